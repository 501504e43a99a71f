//! Inbound message handling and request/response delivery

use std::sync::Arc;
use std::time::Instant;

use sv_core::{ClientMessage, ClientPose, ControlMessage, IntrinsicsUpdate};
use uuid::Uuid;

use super::TransportMode;
use crate::pipeline::RenderPipeline;
use crate::session::{PoseDecision, SessionError};

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// A frame of `bytes` bytes was queued for the sender
    Emitted { bytes: usize },
    /// Pose stored, render suppressed by the minimum emit interval
    Deferred,
    /// State updated without rendering
    Applied,
    /// Unknown control message
    Ignored,
    /// Malformed input; no frame for this message
    Rejected,
    /// Render or delivery failed; the frame was skipped
    Dropped,
    /// The session disconnected; any frame was discarded
    SessionGone,
}

/// Decodes inbound messages and drives the pipeline for one deployment
#[derive(Clone)]
pub struct EventHandler {
    pipeline: Arc<RenderPipeline>,
    render_on_pose: bool,
}

impl EventHandler {
    pub fn new(pipeline: Arc<RenderPipeline>, mode: TransportMode) -> Self {
        Self {
            pipeline,
            render_on_pose: mode.renders_on_pose(),
        }
    }

    pub fn pipeline(&self) -> &Arc<RenderPipeline> {
        &self.pipeline
    }

    /// Handle a text frame
    pub async fn handle_text(&self, session: Uuid, text: &str) -> EventOutcome {
        match ClientMessage::decode(text) {
            Ok(message) => self.dispatch(session, message).await,
            Err(e) => {
                tracing::warn!(session = %session, "Ignoring message: {}", e);
                EventOutcome::Rejected
            }
        }
    }

    /// Handle a binary frame carrying JSON text
    pub async fn handle_binary(&self, session: Uuid, data: &[u8]) -> EventOutcome {
        match ClientMessage::decode_bytes(data) {
            Ok(message) => self.dispatch(session, message).await,
            Err(e) => {
                tracing::warn!(session = %session, len = data.len(), "Ignoring message: {}", e);
                EventOutcome::Rejected
            }
        }
    }

    /// Route a decoded message
    pub async fn dispatch(&self, session: Uuid, message: ClientMessage) -> EventOutcome {
        match message {
            ClientMessage::PoseUpdate(pose) => self.on_pose(session, pose).await,
            ClientMessage::IntrinsicsUpdate(update) => self.on_intrinsics(session, update),
            ClientMessage::Control(ControlMessage::Stereo {
                enabled,
                eye_separation,
            }) => match self
                .pipeline
                .sessions()
                .set_stereo(session, enabled, eye_separation)
            {
                Ok(_) => EventOutcome::Applied,
                Err(_) => EventOutcome::SessionGone,
            },
            ClientMessage::Control(ControlMessage::Other(kind)) => {
                tracing::debug!(session = %session, kind = %kind, "Ignoring control message");
                EventOutcome::Ignored
            }
        }
    }

    fn on_intrinsics(&self, session: Uuid, update: IntrinsicsUpdate) -> EventOutcome {
        match self
            .pipeline
            .scene()
            .set_camera_intrinsics(update.fov_y, update.aspect)
        {
            Ok(version) => {
                tracing::info!(
                    session = %session,
                    fov_y = update.fov_y,
                    aspect = update.aspect,
                    version,
                    "Camera intrinsics updated"
                );
                EventOutcome::Applied
            }
            Err(e) => {
                tracing::warn!(session = %session, "Rejected camera intrinsics: {}", e);
                EventOutcome::Rejected
            }
        }
    }

    async fn on_pose(&self, session: Uuid, client: ClientPose) -> EventOutcome {
        let pose = match client.to_renderer_pose() {
            Ok(pose) => pose,
            Err(e) => {
                tracing::warn!(session = %session, "Skipping frame: {}", e);
                return EventOutcome::Rejected;
            }
        };
        let sessions = self.pipeline.sessions();

        if !self.render_on_pose {
            // background modes render from the scene's latest pose
            if sessions.record_pose(session, pose).is_err() {
                return EventOutcome::SessionGone;
            }
            self.pipeline.scene().set_camera_pose(pose);
            return EventOutcome::Applied;
        }

        let ticket = match sessions.update_pose(session, pose) {
            Ok(PoseDecision::Render(ticket)) => ticket,
            Ok(PoseDecision::Deferred { seq, retry_in }) => {
                tracing::trace!(session = %session, seq, ?retry_in, "Pose deferred");
                return EventOutcome::Deferred;
            }
            Err(_) => return EventOutcome::SessionGone,
        };

        let start = Instant::now();
        let payload = match self.pipeline.render_pose(ticket.pose, ticket.stereo).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(session = %session, seq = ticket.seq, "Frame skipped: {}", e);
                return EventOutcome::Dropped;
            }
        };
        let rendered = Instant::now();
        let bytes = payload.len();

        match sessions.deliver(session, payload) {
            Ok(()) => {
                tracing::debug!(
                    session = %session,
                    seq = ticket.seq,
                    bytes,
                    render_ms = (rendered - start).as_secs_f64() * 1000.0,
                    emit_ms = rendered.elapsed().as_secs_f64() * 1000.0,
                    "Frame emitted"
                );
                EventOutcome::Emitted { bytes }
            }
            Err(SessionError::NotFound(_)) => {
                tracing::debug!(session = %session, "Discarding frame for departed session");
                EventOutcome::SessionGone
            }
            Err(e) => {
                tracing::warn!(session = %session, "Frame dropped: {}", e);
                EventOutcome::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{EncodingFormat, FrameEncoder};
    use crate::session::SessionRegistry;
    use glam::Vec3;
    use std::time::Duration;
    use sv_core::{SceneSettings, SceneState, generate_box_mesh};
    use sv_renderer::{BackendKind, RenderEngine, RendererConfig};

    fn handler(mode: TransportMode) -> EventHandler {
        let config = RendererConfig::default()
            .with_backend(BackendKind::Software)
            .with_size(16, 12);
        let scene = SceneState::new(
            Arc::new(generate_box_mesh([1.0, 1.0, 1.0])),
            &SceneSettings::default(),
            16.0 / 12.0,
        )
        .unwrap();
        let pipeline = RenderPipeline::new(
            Arc::new(scene),
            Arc::new(RenderEngine::from_config(&config).unwrap()),
            Arc::new(SessionRegistry::new(Duration::from_millis(33), 4)),
            FrameEncoder::new(EncodingFormat::RawRgba),
        );
        EventHandler::new(Arc::new(pipeline), mode)
    }

    const POSE: &str =
        r#"{"position":{"x":1,"y":0,"z":-2},"quaternion":{"x":0,"y":0,"z":0,"w":1}}"#;

    #[tokio::test]
    async fn test_malformed_pose_is_rejected_without_frame() {
        let handler = handler(TransportMode::Event);
        let (session, mut rx) = handler.pipeline().sessions().connect();
        let outcome = handler
            .handle_text(session.id(), r#"{"position":{"x":1,"y":0},"quaternion":{}}"#)
            .await;
        assert_eq!(outcome, EventOutcome::Rejected);
        assert!(rx.try_recv().is_err());
        assert_eq!(handler.pipeline().engine().render_count(), 0);
    }

    #[tokio::test]
    async fn test_second_pose_inside_interval_is_deferred() {
        let handler = handler(TransportMode::Event);
        let (session, _rx) = handler.pipeline().sessions().connect();
        assert!(matches!(
            handler.handle_text(session.id(), POSE).await,
            EventOutcome::Emitted { bytes } if bytes == 16 * 12 * 4
        ));
        assert_eq!(
            handler.handle_text(session.id(), POSE).await,
            EventOutcome::Deferred
        );
    }

    #[tokio::test]
    async fn test_background_mode_only_records_pose() {
        let handler = handler(TransportMode::Interval);
        let (session, mut rx) = handler.pipeline().sessions().connect();
        assert_eq!(
            handler.handle_text(session.id(), POSE).await,
            EventOutcome::Applied
        );
        assert!(rx.try_recv().is_err());
        let (_, pose) = handler.pipeline().scene().camera_pose();
        assert_eq!(pose.translation(), Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(session.last_pose().map(|(seq, _)| seq), Some(1));
    }

    #[tokio::test]
    async fn test_intrinsics_and_control_messages() {
        let handler = handler(TransportMode::Event);
        let (session, _rx) = handler.pipeline().sessions().connect();
        let version = handler.pipeline().scene().version();

        assert_eq!(
            handler
                .handle_text(session.id(), r#"{"fov": 90, "aspect": 2.0}"#)
                .await,
            EventOutcome::Applied
        );
        assert!(handler.pipeline().scene().version() > version);
        assert_eq!(
            handler.pipeline().scene().snapshot().camera.aspect,
            2.0
        );

        assert_eq!(
            handler
                .handle_text(session.id(), r#"{"type":"stereo","enabled":true}"#)
                .await,
            EventOutcome::Applied
        );
        assert!(session.stereo().enabled);

        assert_eq!(
            handler.handle_text(session.id(), r#"{"type":"ping"}"#).await,
            EventOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_binary_json_is_accepted() {
        let handler = handler(TransportMode::Event);
        let (session, mut rx) = handler.pipeline().sessions().connect();
        assert!(matches!(
            handler.handle_binary(session.id(), POSE.as_bytes()).await,
            EventOutcome::Emitted { .. }
        ));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let handler = handler(TransportMode::Event);
        assert_eq!(
            handler.handle_text(Uuid::new_v4(), POSE).await,
            EventOutcome::SessionGone
        );
    }
}
