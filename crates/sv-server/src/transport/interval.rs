//! Background-interval delivery

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::pipeline::{PipelineError, RenderPipeline};

/// Re-renders the scene's current pose at a fixed period and broadcasts
/// the frame to every session, independent of inbound message timing.
pub struct IntervalBroadcaster {
    pipeline: Arc<RenderPipeline>,
    period: Duration,
    stereo: Option<f32>,
}

impl IntervalBroadcaster {
    pub fn new(pipeline: Arc<RenderPipeline>, period: Duration) -> Self {
        Self {
            pipeline,
            period,
            stereo: None,
        }
    }

    /// Broadcast stereo pairs with the given eye separation
    pub fn with_stereo(mut self, eye_separation: Option<f32>) -> Self {
        self.stereo = eye_separation;
        self
    }

    /// Render once and broadcast; returns the number of sessions reached
    pub async fn tick(&self) -> Result<usize, PipelineError> {
        let sessions = self.pipeline.sessions();
        if sessions.is_empty() {
            return Ok(0);
        }
        let payload = self.pipeline.render_current(self.stereo).await?;
        Ok(sessions.broadcast(&payload))
    }

    /// Run until `shutdown` is cancelled or rendering becomes impossible
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(period_ms = self.period.as_millis() as u64, "Interval broadcaster started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match self.tick().await {
                    Ok(0) => {}
                    Ok(reached) => tracing::trace!(reached, "Broadcast frame"),
                    Err(e) if e.is_fatal() => {
                        tracing::error!("Interval broadcaster stopping: {}", e);
                        shutdown.cancel();
                        break;
                    }
                    Err(e) => tracing::warn!("Broadcast frame skipped: {}", e),
                }
            }
            tracing::info!("Interval broadcaster stopped");
        })
    }
}
