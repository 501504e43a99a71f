//! Frame delivery
//!
//! Three interchangeable modes share one [`RenderPipeline`]:
//!
//! - [`TransportMode::Event`]: every accepted pose renders and replies to
//!   the sending session only ([`EventHandler`]).
//! - [`TransportMode::Interval`]: a background task re-renders the current
//!   scene pose at a fixed period and broadcasts ([`IntervalBroadcaster`]).
//! - [`TransportMode::Stream`]: a pacing task pulls timestamped media
//!   frames from a [`MediaStream`] and broadcasts them.

mod event;
mod interval;
mod stream;
mod ws;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::pipeline::RenderPipeline;

pub use event::{EventHandler, EventOutcome};
pub use interval::IntervalBroadcaster;
pub use stream::{MediaStream, spawn_stream_pacer};
pub use ws::{AppState, router};

/// How frames reach clients
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Request/response: each pose message triggers one frame
    #[default]
    Event,
    /// Periodic re-render and broadcast
    Interval,
    /// Pull-based continuous media stream
    Stream,
}

impl TransportMode {
    /// True when inbound poses render immediately
    pub fn renders_on_pose(&self) -> bool {
        matches!(self, TransportMode::Event)
    }
}

/// Start the background task the configured mode needs, if any
pub fn spawn_background(
    config: &ServerConfig,
    pipeline: &Arc<RenderPipeline>,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    let stereo = config
        .stereo
        .enabled
        .then_some(config.stereo.eye_separation);
    match config.stream.mode {
        TransportMode::Event => None,
        TransportMode::Interval => Some(
            IntervalBroadcaster::new(Arc::clone(pipeline), config.broadcast_interval())
                .with_stereo(stereo)
                .spawn(shutdown),
        ),
        TransportMode::Stream => {
            let mut stream = MediaStream::new(
                Arc::clone(pipeline.engine()),
                Arc::clone(pipeline.scene()),
                config.stream.fps,
                config.render_timeout(),
            );
            if let Some(sep) = stereo {
                stream = stream.with_stereo(sep);
            }
            Some(spawn_stream_pacer(
                Arc::new(stream),
                Arc::clone(pipeline.sessions()),
                config.stream.fps,
                shutdown,
            ))
        }
    }
}
