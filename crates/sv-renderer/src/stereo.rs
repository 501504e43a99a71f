//! Stereo (dual-eye) rendering
//!
//! One head pose becomes two [`RenderJob`]s offset by half the eye
//! separation along the camera's X axis. Both jobs are submitted together
//! but the engine serializes them, so completion order is arbitrary;
//! results are paired by their eye tag, never by arrival order.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sv_core::{Eye, Frame, Pose, RenderJob, SceneSnapshot};

use crate::engine::RenderEngine;
use crate::error::RenderError;

/// A matched left/right pair
#[derive(Debug, Clone)]
pub struct StereoFrames {
    /// Frame rendered at `-eye_separation / 2`
    pub left: Frame,
    /// Frame rendered at `+eye_separation / 2`
    pub right: Frame,
}

/// Drives both eyes of a stereo pair through one [`RenderEngine`]
#[derive(Clone)]
pub struct StereoCoordinator {
    engine: Arc<RenderEngine>,
}

impl StereoCoordinator {
    /// Coordinator sharing `engine` with mono callers
    pub fn new(engine: Arc<RenderEngine>) -> Self {
        Self { engine }
    }

    /// The shared engine
    pub fn engine(&self) -> &Arc<RenderEngine> {
        &self.engine
    }

    /// Render both eyes of `pose`. Fails as a whole if either eye fails.
    pub fn render_stereo(
        &self,
        snapshot: &SceneSnapshot,
        pose: Pose,
        eye_separation: f32,
        with_depth: bool,
    ) -> Result<StereoFrames, RenderError> {
        self.render_pair(snapshot, pose, eye_separation, with_depth, None)
    }

    /// Like [`Self::render_stereo`], but an eye that cannot get the
    /// rasterizer within `deadline` of this call fails the pair instead of
    /// waiting.
    pub fn try_render_stereo(
        &self,
        snapshot: &SceneSnapshot,
        pose: Pose,
        eye_separation: f32,
        with_depth: bool,
        deadline: Duration,
    ) -> Result<StereoFrames, RenderError> {
        self.render_pair(
            snapshot,
            pose,
            eye_separation,
            with_depth,
            Some(Instant::now() + deadline),
        )
    }

    fn render_pair(
        &self,
        snapshot: &SceneSnapshot,
        pose: Pose,
        eye_separation: f32,
        with_depth: bool,
        deadline: Option<Instant>,
    ) -> Result<StereoFrames, RenderError> {
        let jobs = [Eye::Left, Eye::Right]
            .map(|eye| RenderJob::for_eye(pose, eye, eye_separation).with_depth(with_depth));

        let results: Vec<(Eye, Result<Frame, RenderError>)> = thread::scope(|scope| {
            let engine = &self.engine;
            let handles = jobs.map(|job| {
                scope.spawn(move || match deadline {
                    Some(deadline) => engine.try_execute_for(
                        snapshot,
                        &job,
                        deadline.saturating_duration_since(Instant::now()),
                    ),
                    None => engine.execute(snapshot, &job),
                })
            });
            jobs.iter()
                .zip(handles)
                .map(|(job, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(RenderError::Failure(format!(
                            "{} eye render panicked",
                            job.eye().name()
                        )))
                    });
                    (job.eye(), result)
                })
                .collect()
        });

        self.pair(results)
    }

    fn pair(
        &self,
        results: Vec<(Eye, Result<Frame, RenderError>)>,
    ) -> Result<StereoFrames, RenderError> {
        let mut left = None;
        let mut right = None;
        let mut error: Option<RenderError> = None;

        for (eye, result) in results {
            match result {
                Ok(frame) => match eye {
                    Eye::Left => left = Some(frame),
                    Eye::Right => right = Some(frame),
                    Eye::Mono => self.engine.recycle(frame),
                },
                Err(e) => {
                    tracing::warn!(eye = eye.name(), "Stereo eye failed: {}", e);
                    // keep a fatal error over a per-job one
                    if error.as_ref().is_none_or(|prev| !prev.is_fatal()) {
                        error = Some(e);
                    }
                }
            }
        }

        match (left, right, error) {
            (Some(left), Some(right), None) => Ok(StereoFrames { left, right }),
            (left, right, error) => {
                for frame in left.into_iter().chain(right) {
                    self.engine.recycle(frame);
                }
                Err(error.unwrap_or_else(|| RenderError::Failure("incomplete stereo pair".into())))
            }
        }
    }
}
