//! The shared render-and-encode context
//!
//! [`RenderPipeline`] owns every process-wide component a transport needs
//! (scene, engine, stereo coordinator, session registry, encoder) and is
//! passed explicitly to each transport. Render calls run on tokio's
//! blocking pool under a deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use sv_core::{MessageError, Pose, RenderJob, SceneError, SceneState};
use sv_renderer::{RenderEngine, RenderError, StereoCoordinator};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::encoding::{EncodeError, FrameEncoder};
use crate::session::{SessionError, SessionRegistry, StereoMode};

/// Anything that can go wrong between an inbound message and a delivered frame
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Scene(#[from] SceneError),
}

impl PipelineError {
    /// True when rendering cannot continue in this process
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Render(e) if e.is_fatal())
    }
}

/// The blocking half of the pipeline, cheap to clone onto a worker thread
#[derive(Clone)]
struct RenderContext {
    scene: Arc<SceneState>,
    engine: Arc<RenderEngine>,
    stereo: StereoCoordinator,
    encoder: FrameEncoder,
    with_depth: bool,
}

impl RenderContext {
    /// Render at `pose`, or at the scene's current camera when `pose` is
    /// `None`, and encode the result. Gives up without rendering when the
    /// rasterizer is not free before `deadline`.
    fn render_encoded(
        &self,
        pose: Option<Pose>,
        eye_separation: Option<f32>,
        deadline: Instant,
    ) -> Result<Bytes, PipelineError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match eye_separation {
            Some(sep) => {
                let snapshot = self.scene.snapshot();
                let pose = pose.unwrap_or(snapshot.camera_pose);
                let frames = self.stereo.try_render_stereo(
                    &snapshot,
                    pose,
                    sep,
                    self.with_depth,
                    remaining,
                )?;
                let encoded = self.encoder.encode_stereo(&frames);
                self.engine.recycle(frames.left);
                self.engine.recycle(frames.right);
                Ok(encoded?)
            }
            None => {
                let frame = match pose {
                    Some(pose) => self.engine.try_render_scene(
                        &self.scene,
                        &RenderJob::mono(pose).with_depth(self.with_depth),
                        remaining,
                    )?,
                    None => {
                        let snapshot = self.scene.snapshot();
                        let job = RenderJob::mono(snapshot.camera_pose).with_depth(self.with_depth);
                        self.engine.try_execute_for(&snapshot, &job, remaining)?
                    }
                };
                let encoded = self.encoder.encode(&frame);
                self.engine.recycle(frame);
                Ok(encoded?)
            }
        }
    }
}

/// Explicit owning context shared by all transports
pub struct RenderPipeline {
    render: RenderContext,
    sessions: Arc<SessionRegistry>,
    render_timeout: Duration,
    shutdown: CancellationToken,
}

impl RenderPipeline {
    pub fn new(
        scene: Arc<SceneState>,
        engine: Arc<RenderEngine>,
        sessions: Arc<SessionRegistry>,
        encoder: FrameEncoder,
    ) -> Self {
        Self {
            render: RenderContext {
                scene,
                stereo: StereoCoordinator::new(Arc::clone(&engine)),
                engine,
                encoder,
                with_depth: false,
            },
            sessions,
            render_timeout: Duration::from_millis(500),
            shutdown: CancellationToken::new(),
        }
    }

    /// Pipeline wired from the server configuration
    pub fn from_config(
        config: &ServerConfig,
        scene: Arc<SceneState>,
        engine: Arc<RenderEngine>,
        shutdown: CancellationToken,
    ) -> Self {
        let sessions = SessionRegistry::new(config.min_emit_interval(), config.stream.queue_capacity)
            .with_default_stereo(StereoMode {
                enabled: config.stereo.enabled,
                eye_separation: config.stereo.eye_separation,
            });
        Self::new(
            scene,
            engine,
            Arc::new(sessions),
            FrameEncoder::new(config.stream.encoding),
        )
        .with_depth(config.stream.with_depth)
        .with_render_timeout(config.render_timeout())
        .with_shutdown(shutdown)
    }

    /// Attach linear depth to every rendered frame
    pub fn with_depth(mut self, with_depth: bool) -> Self {
        self.render.with_depth = with_depth;
        self
    }

    pub fn with_encoder(mut self, encoder: FrameEncoder) -> Self {
        self.render.encoder = encoder;
        self
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    /// Token cancelled when the render engine becomes unusable
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn scene(&self) -> &Arc<SceneState> {
        &self.render.scene
    }

    pub fn engine(&self) -> &Arc<RenderEngine> {
        &self.render.engine
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn encoder(&self) -> FrameEncoder {
        self.render.encoder
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn render_timeout(&self) -> Duration {
        self.render_timeout
    }

    /// Store `pose` as the scene camera, then render and encode at it,
    /// stereo when `eye_separation` is set
    pub async fn render_pose(
        &self,
        pose: Pose,
        eye_separation: Option<f32>,
    ) -> Result<Bytes, PipelineError> {
        self.run(Some(pose), eye_separation).await
    }

    /// Render and encode from the scene's current camera pose
    pub async fn render_current(&self, eye_separation: Option<f32>) -> Result<Bytes, PipelineError> {
        self.run(None, eye_separation).await
    }

    async fn run(
        &self,
        pose: Option<Pose>,
        eye_separation: Option<f32>,
    ) -> Result<Bytes, PipelineError> {
        // poses reach the scene in arrival order, whether or not they render
        if let Some(pose) = pose {
            self.render.scene.set_camera_pose(pose);
        }

        let deadline = Instant::now() + self.render_timeout;
        let context = self.render.clone();
        let task = tokio::task::spawn_blocking(move || {
            context.render_encoded(pose, eye_separation, deadline)
        });

        // a job still queued for the rasterizer at the deadline gives up
        // there; one already rendering finishes and its frame is dropped
        let result = match tokio::time::timeout(self.render_timeout, task).await {
            Err(_) => Err(RenderError::Timeout(self.render_timeout).into()),
            Ok(Err(join)) => {
                Err(RenderError::Failure(format!("render task did not complete: {join}")).into())
            }
            Ok(Ok(result)) => result,
        };

        if let Err(e) = &result
            && e.is_fatal()
        {
            tracing::error!("Render engine failed, shutting down: {}", e);
            self.shutdown.cancel();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::EncodingFormat;
    use glam::{Quat, Vec3};
    use std::sync::mpsc;
    use sv_core::{SceneSettings, SceneSnapshot, generate_box_mesh};
    use sv_renderer::{BackendKind, RasterError, Rasterizer, RenderTarget, RendererConfig};

    const W: u32 = 32;
    const H: u32 = 24;

    fn scene() -> Arc<SceneState> {
        Arc::new(
            SceneState::new(
                Arc::new(generate_box_mesh([1.0, 1.0, 1.0])),
                &SceneSettings::default(),
                W as f32 / H as f32,
            )
            .unwrap(),
        )
    }

    fn software_pipeline() -> RenderPipeline {
        let config = RendererConfig::default()
            .with_backend(BackendKind::Software)
            .with_size(W, H);
        RenderPipeline::new(
            scene(),
            Arc::new(RenderEngine::from_config(&config).unwrap()),
            Arc::new(SessionRegistry::new(Duration::from_millis(33), 4)),
            FrameEncoder::new(EncodingFormat::RawRgba),
        )
    }

    fn facing_box() -> Pose {
        Pose::from_rotation_translation(Quat::IDENTITY, Vec3::new(0.0, 0.0, 6.0))
    }

    #[tokio::test]
    async fn test_render_pose_writes_scene_and_encodes() {
        let pipeline = software_pipeline();
        let payload = pipeline.render_pose(facing_box(), None).await.unwrap();
        assert_eq!(payload.len(), (W * H * 4) as usize);
        assert_eq!(pipeline.scene().camera_pose().1, facing_box());
        assert!(payload.chunks_exact(4).any(|px| px[3] > 0));
    }

    #[tokio::test]
    async fn test_render_current_leaves_scene_version() {
        let pipeline = software_pipeline();
        pipeline.scene().set_camera_pose(facing_box());
        let version = pipeline.scene().version();
        let payload = pipeline.render_current(None).await.unwrap();
        assert_eq!(payload.len(), (W * H * 4) as usize);
        assert_eq!(pipeline.scene().version(), version);
    }

    #[tokio::test]
    async fn test_fatal_error_cancels_shutdown() {
        struct Lost;
        impl Rasterizer for Lost {
            fn name(&self) -> &'static str {
                "lost"
            }
            fn render(&mut self, _: &SceneSnapshot, _: RenderTarget<'_>) -> Result<(), RasterError> {
                Err(RasterError::ContextLost("device removed".into()))
            }
        }

        let token = CancellationToken::new();
        let pipeline = RenderPipeline::new(
            scene(),
            Arc::new(RenderEngine::new(Box::new(Lost), W, H)),
            Arc::new(SessionRegistry::new(Duration::from_millis(33), 4)),
            FrameEncoder::new(EncodingFormat::RawRgba),
        )
        .with_shutdown(token.clone());

        let err = pipeline.render_pose(Pose::IDENTITY, None).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_slow_render_times_out() {
        struct Slow;
        impl Rasterizer for Slow {
            fn name(&self) -> &'static str {
                "slow"
            }
            fn render(&mut self, _: &SceneSnapshot, _: RenderTarget<'_>) -> Result<(), RasterError> {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            }
        }

        let token = CancellationToken::new();
        let pipeline = RenderPipeline::new(
            scene(),
            Arc::new(RenderEngine::new(Box::new(Slow), W, H)),
            Arc::new(SessionRegistry::new(Duration::from_millis(33), 4)),
            FrameEncoder::new(EncodingFormat::RawRgba),
        )
        .with_render_timeout(Duration::from_millis(20))
        .with_shutdown(token.clone());

        let err = pipeline.render_pose(Pose::IDENTITY, None).await.unwrap_err();
        assert_eq!(
            err,
            PipelineError::Render(RenderError::Timeout(Duration::from_millis(20)))
        );
        assert!(!err.is_fatal());
        assert!(!token.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timed_out_jobs_never_reach_the_rasterizer() {
        /// Holds the rasterizer inside the first render until released
        struct Gate {
            started: mpsc::Sender<()>,
            release: mpsc::Receiver<()>,
        }
        impl Rasterizer for Gate {
            fn name(&self) -> &'static str {
                "gate"
            }
            fn render(&mut self, _: &SceneSnapshot, _: RenderTarget<'_>) -> Result<(), RasterError> {
                let _ = self.started.send(());
                let _ = self.release.recv();
                Ok(())
            }
        }

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let engine = Arc::new(RenderEngine::new(
            Box::new(Gate {
                started: started_tx,
                release: release_rx,
            }),
            W,
            H,
        ));
        let pipeline = RenderPipeline::new(
            scene(),
            Arc::clone(&engine),
            Arc::new(SessionRegistry::new(Duration::from_millis(33), 4)),
            FrameEncoder::new(EncodingFormat::RawRgba),
        )
        .with_render_timeout(Duration::from_millis(20));

        let poses: Vec<Pose> = (0..4)
            .map(|i| Pose::from_rotation_translation(Quat::IDENTITY, Vec3::new(0.0, 0.0, 6.0 + i as f32)))
            .collect();

        // the first job holds the rasterizer past its own deadline
        let err = pipeline.render_pose(poses[0], None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Render(RenderError::Timeout(_))));
        tokio::task::spawn_blocking(move || started_rx.recv())
            .await
            .unwrap()
            .unwrap();

        for (i, &pose) in poses.iter().enumerate().skip(1) {
            let eye_separation = (i % 2 == 0).then_some(0.06);
            let err = pipeline.render_pose(pose, eye_separation).await.unwrap_err();
            assert!(matches!(err, PipelineError::Render(RenderError::Timeout(_))));
        }
        let err = pipeline.render_current(None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Render(RenderError::Timeout(_))));

        // let every abandoned job pass its deadline before freeing the rasterizer
        tokio::time::sleep(Duration::from_millis(100)).await;
        release_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.render_count() < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(engine.render_count(), 1);
        assert_eq!(pipeline.scene().camera_pose().1, poses[3]);
    }

    #[tokio::test]
    async fn test_stereo_payload_with_image_container_and_depth_is_rejected() {
        let pipeline = software_pipeline()
            .with_depth(true)
            .with_encoder(FrameEncoder::new(EncodingFormat::ImageContainer));
        let err = pipeline.render_pose(facing_box(), Some(0.06)).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Encode(EncodeError::UnsupportedDepth(_))
        ));
    }
}
