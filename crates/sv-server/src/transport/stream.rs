//! Pull-based continuous streaming
//!
//! A media pipeline calls [`MediaStream::next_frame`] at its own pace.
//! Each call renders synchronously and returns a frame stamped with a
//! monotonically increasing presentation timestamp. Waiting for the
//! rasterizer is bounded by a deadline, and a failed render yields an
//! error-marked empty frame instead of blocking the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sv_core::{Eye, RenderJob, SceneState};
use sv_renderer::RenderEngine;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::encoding::{FrameLayout, MediaFrame, frame_duration};
use crate::pipeline::PipelineError;
use crate::session::SessionRegistry;

/// Renders the scene's current camera into timestamped media frames
pub struct MediaStream {
    engine: Arc<RenderEngine>,
    scene: Arc<SceneState>,
    layout: FrameLayout,
    eye_separation: f32,
    deadline: Duration,
    duration: u32,
    next_pts: AtomicU64,
}

impl MediaStream {
    pub fn new(
        engine: Arc<RenderEngine>,
        scene: Arc<SceneState>,
        fps: u32,
        deadline: Duration,
    ) -> Self {
        Self {
            engine,
            scene,
            layout: FrameLayout::Mono,
            eye_separation: 0.0,
            deadline,
            duration: frame_duration(fps),
            next_pts: AtomicU64::new(0),
        }
    }

    /// Pack both eyes side by side into every frame
    pub fn with_stereo(mut self, eye_separation: f32) -> Self {
        self.layout = FrameLayout::SideBySide;
        self.eye_separation = eye_separation;
        self
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    /// Frame duration in 90 kHz ticks
    pub fn frame_duration(&self) -> u32 {
        self.duration
    }

    /// True once the render engine can no longer produce frames
    pub fn is_fatal(&self) -> bool {
        self.engine.is_fatal()
    }

    /// Render the next frame. Never fails; errors become marked frames.
    pub fn next_frame(&self) -> MediaFrame {
        let pts = self
            .next_pts
            .fetch_add(u64::from(self.duration), Ordering::SeqCst);
        match self.render(pts) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(pts, "Stream frame failed: {}", e);
                MediaFrame::error(pts, self.duration)
            }
        }
    }

    fn render(&self, pts: u64) -> Result<MediaFrame, PipelineError> {
        let snapshot = self.scene.snapshot();
        let pose = snapshot.camera_pose;

        match self.layout {
            FrameLayout::Mono => {
                let frame =
                    self.engine
                        .try_execute_for(&snapshot, &RenderJob::mono(pose), self.deadline)?;
                let media = MediaFrame::from_frame(&frame, pts, self.duration);
                self.engine.recycle(frame);
                Ok(media?)
            }
            FrameLayout::SideBySide => {
                let eye = |eye| RenderJob::for_eye(pose, eye, self.eye_separation);
                let left =
                    self.engine
                        .try_execute_for(&snapshot, &eye(Eye::Left), self.deadline)?;
                let right = match self.engine.try_execute_for(
                    &snapshot,
                    &eye(Eye::Right),
                    self.deadline,
                ) {
                    Ok(right) => right,
                    Err(e) => {
                        self.engine.recycle(left);
                        return Err(e.into());
                    }
                };
                let media = MediaFrame::side_by_side(&left, &right, pts, self.duration);
                self.engine.recycle(left);
                self.engine.recycle(right);
                Ok(media?)
            }
        }
    }
}

/// Pull frames at `fps` and broadcast them until `shutdown` is cancelled
pub fn spawn_stream_pacer(
    stream: Arc<MediaStream>,
    sessions: Arc<SessionRegistry>,
    fps: u32,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(fps, "Media stream pacer started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if sessions.is_empty() {
                continue;
            }

            let source = Arc::clone(&stream);
            let frame = match tokio::task::spawn_blocking(move || source.next_frame()).await {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("Stream render task failed: {}", e);
                    continue;
                }
            };
            if frame.is_error() && stream.is_fatal() {
                tracing::error!("Render engine lost, stopping media stream");
                shutdown.cancel();
                break;
            }
            sessions.broadcast(&frame.to_bytes());
        }
        tracing::info!("Media stream pacer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};
    use sv_core::{Pose, SceneSettings, SceneSnapshot, generate_box_mesh};
    use sv_renderer::{
        BackendKind, RasterError, Rasterizer, RenderTarget, RendererConfig,
    };

    const W: u32 = 24;
    const H: u32 = 16;

    fn scene() -> Arc<SceneState> {
        let scene = SceneState::new(
            Arc::new(generate_box_mesh([1.0, 1.0, 1.0])),
            &SceneSettings::default(),
            W as f32 / H as f32,
        )
        .unwrap();
        scene.set_camera_pose(Pose::from_rotation_translation(
            Quat::IDENTITY,
            Vec3::new(0.0, 0.0, 6.0),
        ));
        Arc::new(scene)
    }

    fn software_engine() -> Arc<RenderEngine> {
        let config = RendererConfig::default()
            .with_backend(BackendKind::Software)
            .with_size(W, H);
        Arc::new(RenderEngine::from_config(&config).unwrap())
    }

    #[test]
    fn test_timestamps_increase_monotonically() {
        let stream = MediaStream::new(software_engine(), scene(), 30, Duration::from_millis(500));
        let pts: Vec<u64> = (0..5).map(|_| stream.next_frame().pts).collect();
        assert_eq!(pts, vec![0, 3000, 6000, 9000, 12000]);
    }

    #[test]
    fn test_mono_frame_dimensions() {
        let stream = MediaStream::new(software_engine(), scene(), 30, Duration::from_millis(500));
        let frame = stream.next_frame();
        assert!(!frame.is_error());
        assert_eq!((frame.width, frame.height), (W, H));
        assert_eq!(frame.data.len(), (W * H * 4) as usize);
        assert_eq!(frame.duration, 3000);
    }

    #[test]
    fn test_side_by_side_stereo() {
        let stream = MediaStream::new(software_engine(), scene(), 30, Duration::from_millis(500))
            .with_stereo(0.06);
        let frame = stream.next_frame();
        assert_eq!(frame.layout, FrameLayout::SideBySide);
        assert_eq!((frame.width, frame.height), (2 * W, H));
        assert_eq!(frame.data.len(), (2 * W * H * 4) as usize);
    }

    #[test]
    fn test_failure_yields_marked_frame_and_advances_clock() {
        struct Broken;
        impl Rasterizer for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn render(&mut self, _: &SceneSnapshot, _: RenderTarget<'_>) -> Result<(), RasterError> {
                Err(RasterError::Failed("bad state".into()))
            }
        }

        let engine = Arc::new(RenderEngine::new(Box::new(Broken), W, H));
        let stream = MediaStream::new(engine, scene(), 30, Duration::from_millis(50));
        let first = stream.next_frame();
        let second = stream.next_frame();
        assert!(first.is_error() && second.is_error());
        assert!(second.pts > first.pts);
        assert!(!stream.is_fatal());
    }

    #[test]
    fn test_busy_rasterizer_does_not_block_forever() {
        struct Slow;
        impl Rasterizer for Slow {
            fn name(&self) -> &'static str {
                "slow"
            }
            fn render(&mut self, _: &SceneSnapshot, _: RenderTarget<'_>) -> Result<(), RasterError> {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            }
        }

        let engine = Arc::new(RenderEngine::new(Box::new(Slow), W, H));
        let stream = Arc::new(MediaStream::new(
            Arc::clone(&engine),
            scene(),
            30,
            Duration::from_millis(20),
        ));

        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let busy = {
            let engine = Arc::clone(&engine);
            let scene = scene();
            std::thread::spawn(move || {
                started_tx.send(()).unwrap();
                engine.render(&scene.snapshot(), 0.0).unwrap();
            })
        };
        started_rx.recv().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let frame = stream.next_frame();
        assert!(frame.is_error());
        busy.join().unwrap();
    }
}
