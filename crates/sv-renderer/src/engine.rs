//! Exclusive render engine
//!
//! The rasterizer is non-reentrant, so every render goes through one
//! `parking_lot::Mutex`. Callers queue on the lock rather than race. Output
//! buffers come from a small [`FramePool`] and can be handed back with
//! [`RenderEngine::recycle`] once encoded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use sv_core::{Eye, Frame, RenderJob, SceneSnapshot, SceneState};

use crate::config::{BackendKind, RendererConfig};
use crate::error::{RasterError, RenderError};
use crate::rasterizer::{Rasterizer, RenderTarget, SoftwareRasterizer, WgpuRasterizer};

/// Default number of spare buffers kept per kind
const POOL_CAPACITY: usize = 8;

/// Reusable color/depth buffers of one fixed size
#[derive(Debug)]
pub struct FramePool {
    width: u32,
    height: u32,
    colors: Vec<Vec<u8>>,
    depths: Vec<Vec<f32>>,
    capacity: usize,
}

impl FramePool {
    /// Empty pool for `width` x `height` frames
    pub fn new(width: u32, height: u32, capacity: usize) -> Self {
        Self {
            width,
            height,
            colors: Vec::new(),
            depths: Vec::new(),
            capacity,
        }
    }

    fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// A frame with buffers of the right size. Contents are unspecified;
    /// the rasterizer overwrites them.
    pub fn take(&mut self, eye: Eye, with_depth: bool) -> Frame {
        let pixels = self.pixels();
        let color = self.colors.pop().unwrap_or_else(|| vec![0; pixels * 4]);
        let depth = with_depth.then(|| self.depths.pop().unwrap_or_else(|| vec![0.0; pixels]));
        Frame {
            width: self.width,
            height: self.height,
            color,
            depth,
            eye,
        }
    }

    /// Return a frame's buffers; mismatched sizes are dropped
    pub fn recycle(&mut self, frame: Frame) {
        let pixels = self.pixels();
        let (color, depth) = frame.into_buffers();
        if color.len() == pixels * 4 && self.colors.len() < self.capacity {
            self.colors.push(color);
        }
        if let Some(depth) = depth
            && depth.len() == pixels
            && self.depths.len() < self.capacity
        {
            self.depths.push(depth);
        }
    }

    /// Spare (color, depth) buffers currently held
    pub fn available(&self) -> (usize, usize) {
        (self.colors.len(), self.depths.len())
    }
}

/// Exclusive wrapper around one rasterizer
pub struct RenderEngine {
    rasterizer: Mutex<Box<dyn Rasterizer>>,
    backend: &'static str,
    pool: Mutex<FramePool>,
    width: u32,
    height: u32,
    fatal: AtomicBool,
    renders: AtomicU64,
}

impl RenderEngine {
    /// Wrap a rasterizer producing `width` x `height` frames
    pub fn new(rasterizer: Box<dyn Rasterizer>, width: u32, height: u32) -> Self {
        let backend = rasterizer.name();
        tracing::info!(backend, width, height, "Render engine ready");
        Self {
            rasterizer: Mutex::new(rasterizer),
            backend,
            pool: Mutex::new(FramePool::new(width, height, POOL_CAPACITY)),
            width,
            height,
            fatal: AtomicBool::new(false),
            renders: AtomicU64::new(0),
        }
    }

    /// Build the backend selected in `config`
    pub fn from_config(config: &RendererConfig) -> Result<Self, RenderError> {
        let rasterizer: Box<dyn Rasterizer> = match config.backend {
            BackendKind::Software => Box::new(SoftwareRasterizer::new(config)),
            BackendKind::Gpu => Box::new(WgpuRasterizer::new(config)?),
            BackendKind::Auto => match WgpuRasterizer::new(config) {
                Ok(gpu) => Box::new(gpu),
                Err(e) => {
                    tracing::warn!("GPU rasterizer unavailable ({}), using software", e);
                    Box::new(SoftwareRasterizer::new(config))
                }
            },
        };
        Ok(Self::new(
            rasterizer,
            config.viewport.width,
            config.viewport.height,
        ))
    }

    /// Backend name for logs
    pub fn backend_name(&self) -> &'static str {
        self.backend
    }

    /// Output frame size
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// True once the rasterizer reported an unrecoverable failure
    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    /// Completed renders since startup
    pub fn render_count(&self) -> u64 {
        self.renders.load(Ordering::Relaxed)
    }

    /// Run one job, waiting for the rasterizer as long as needed
    pub fn execute(&self, snapshot: &SceneSnapshot, job: &RenderJob) -> Result<Frame, RenderError> {
        self.check_fatal()?;
        let mut rasterizer = self.rasterizer.lock();
        self.execute_locked(&mut **rasterizer, snapshot, job)
    }

    /// Run one job, giving up if the rasterizer is not free within `deadline`
    pub fn try_execute_for(
        &self,
        snapshot: &SceneSnapshot,
        job: &RenderJob,
        deadline: Duration,
    ) -> Result<Frame, RenderError> {
        self.check_fatal()?;
        let Some(mut rasterizer) = self.rasterizer.try_lock_for(deadline) else {
            return Err(RenderError::Timeout(deadline));
        };
        self.execute_locked(&mut **rasterizer, snapshot, job)
    }

    /// Render the snapshot's own camera pose shifted by `eye_offset`
    pub fn render(&self, snapshot: &SceneSnapshot, eye_offset: f32) -> Result<Frame, RenderError> {
        let job = RenderJob::new(snapshot.camera_pose, Eye::Mono, eye_offset);
        self.execute(snapshot, &job)
    }

    /// Like [`Self::render`], with a linear depth buffer
    pub fn render_with_depth(
        &self,
        snapshot: &SceneSnapshot,
        eye_offset: f32,
    ) -> Result<Frame, RenderError> {
        let job = RenderJob::new(snapshot.camera_pose, Eye::Mono, eye_offset).with_depth(true);
        self.execute(snapshot, &job)
    }

    /// Render the scene as it stands once the rasterizer is acquired, from
    /// the job's pose. Gives up without touching the rasterizer if it is
    /// not free within `deadline`.
    pub fn try_render_scene(
        &self,
        scene: &SceneState,
        job: &RenderJob,
        deadline: Duration,
    ) -> Result<Frame, RenderError> {
        self.check_fatal()?;
        let Some(mut rasterizer) = self.rasterizer.try_lock_for(deadline) else {
            return Err(RenderError::Timeout(deadline));
        };
        let snapshot = scene.snapshot();
        self.execute_locked(&mut **rasterizer, &snapshot, job)
    }

    /// Hand a frame's buffers back for reuse
    pub fn recycle(&self, frame: Frame) {
        self.pool.lock().recycle(frame);
    }

    fn check_fatal(&self) -> Result<(), RenderError> {
        if self.is_fatal() {
            return Err(RenderError::Fatal("render engine is unusable".into()));
        }
        Ok(())
    }

    fn execute_locked(
        &self,
        rasterizer: &mut dyn Rasterizer,
        snapshot: &SceneSnapshot,
        job: &RenderJob,
    ) -> Result<Frame, RenderError> {
        // another caller may have hit a fatal error while we waited
        self.check_fatal()?;

        let view = snapshot
            .with_camera_pose(job.pose())
            .with_eye_offset(job.eye_offset());
        let mut frame = self.pool.lock().take(job.eye(), job.wants_depth());

        let start = Instant::now();
        let result = rasterizer.render(
            &view,
            RenderTarget {
                width: frame.width,
                height: frame.height,
                color: &mut frame.color,
                depth: frame.depth.as_deref_mut(),
            },
        );

        match result {
            Ok(()) => {
                self.renders.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    eye = job.eye().name(),
                    render_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Rendered frame"
                );
                Ok(frame)
            }
            Err(RasterError::ContextLost(msg)) => {
                self.fatal.store(true, Ordering::SeqCst);
                tracing::error!("Rasterizer context lost: {}", msg);
                Err(RenderError::Fatal(msg))
            }
            Err(e) => {
                self.pool.lock().recycle(frame);
                tracing::warn!(eye = job.eye().name(), "Render failed: {}", e);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, mpsc};
    use std::thread;
    use sv_core::{Pose, SceneSettings, generate_box_mesh};

    const W: u32 = 32;
    const H: u32 = 24;

    fn scene() -> SceneState {
        SceneState::new(
            Arc::new(generate_box_mesh([1.0, 1.0, 1.0])),
            &SceneSettings::default(),
            W as f32 / H as f32,
        )
        .unwrap()
    }

    fn software_engine() -> RenderEngine {
        let config = RendererConfig::default()
            .with_backend(BackendKind::Software)
            .with_size(W, H);
        RenderEngine::from_config(&config).unwrap()
    }

    fn looking_at_mesh() -> Pose {
        Pose::from_rotation_translation(Quat::IDENTITY, Vec3::new(0.0, 0.0, 6.0))
    }

    /// Fills the frame with the camera's x translation and records poses
    struct Recording {
        poses: Arc<parking_lot::Mutex<Vec<Pose>>>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl Rasterizer for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn render(
            &mut self,
            scene: &SceneSnapshot,
            target: RenderTarget<'_>,
        ) -> Result<(), RasterError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.poses.lock().push(scene.camera_pose);
            let tag = (scene.camera_pose.translation().x * 100.0).round() as u8;
            thread::sleep(Duration::from_millis(2));
            target.color.fill(tag);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn recording() -> (RenderEngine, Arc<parking_lot::Mutex<Vec<Pose>>>, Arc<AtomicUsize>) {
        let poses = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let raster = Recording {
            poses: Arc::clone(&poses),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::clone(&max_in_flight),
        };
        (RenderEngine::new(Box::new(raster), W, H), poses, max_in_flight)
    }

    struct Scripted {
        results: Vec<Result<(), RasterError>>,
    }

    impl Rasterizer for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn render(&mut self, _: &SceneSnapshot, _: RenderTarget<'_>) -> Result<(), RasterError> {
            if self.results.is_empty() {
                Ok(())
            } else {
                self.results.remove(0)
            }
        }
    }

    #[test]
    fn test_render_produces_full_size_frame() {
        let engine = software_engine();
        let frame = engine.render(&scene().snapshot(), 0.0).unwrap();
        assert_eq!(frame.color.len(), (W * H * 4) as usize);
        assert!(frame.depth.is_none());
        assert_eq!(frame.eye, Eye::Mono);

        let frame = engine.render_with_depth(&scene().snapshot(), 0.0).unwrap();
        assert_eq!(frame.depth.map(|d| d.len()), Some((W * H) as usize));
        assert_eq!(engine.render_count(), 2);
    }

    #[test]
    fn test_setting_same_pose_twice_is_idempotent() {
        let engine = software_engine();
        let scene = scene();
        let job = RenderJob::mono(looking_at_mesh()).with_depth(true);

        scene.set_camera_pose(looking_at_mesh());
        let once = engine
            .try_render_scene(&scene, &job, Duration::from_secs(1))
            .unwrap();
        scene.set_camera_pose(looking_at_mesh());
        scene.set_camera_pose(looking_at_mesh());
        let twice = engine.render_with_depth(&scene.snapshot(), 0.0).unwrap();
        assert_eq!(once.color, twice.color);
        assert_eq!(once.depth, twice.depth);
    }

    #[test]
    fn test_render_scene_uses_job_pose_and_leaves_scene() {
        let (engine, poses, _) = recording();
        let scene = scene();
        let version_before = scene.version();
        engine
            .try_render_scene(&scene, &RenderJob::mono(looking_at_mesh()), Duration::from_secs(1))
            .unwrap();
        assert_eq!(poses.lock()[0], looking_at_mesh());
        assert_eq!(scene.camera_pose().1, Pose::IDENTITY);
        assert_eq!(scene.version(), version_before);
    }

    #[test]
    fn test_eye_offset_is_applied_to_a_copy() {
        let (engine, poses, _) = recording();
        let snapshot = scene().snapshot();
        engine.render(&snapshot, 0.25).unwrap();
        assert_eq!(snapshot.camera_pose, Pose::IDENTITY);
        assert_eq!(poses.lock()[0].translation(), Vec3::new(0.25, 0.0, 0.0));
    }

    #[test]
    fn test_at_most_one_render_in_flight() {
        let (engine, poses, max_in_flight) = recording();
        let engine = Arc::new(engine);
        let snapshot = scene().snapshot();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = Arc::clone(&engine);
                let snapshot = snapshot.clone();
                thread::spawn(move || {
                    for _ in 0..5 {
                        let frame = engine.render(&snapshot, i as f32 / 100.0).unwrap();
                        // no other job's pixels leaked into this buffer
                        assert!(frame.color.iter().all(|&b| b == i as u8));
                        engine.recycle(frame);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(poses.lock().len(), 40);
    }

    #[test]
    fn test_failure_is_per_job() {
        let engine = RenderEngine::new(
            Box::new(Scripted {
                results: vec![Err(RasterError::Failed("invalid resource state".into()))],
            }),
            W,
            H,
        );
        let snapshot = scene().snapshot();
        assert!(matches!(
            engine.render(&snapshot, 0.0),
            Err(RenderError::Failure(_))
        ));
        assert!(!engine.is_fatal());
        assert!(engine.render(&snapshot, 0.0).is_ok());
    }

    #[test]
    fn test_context_loss_is_fatal() {
        let engine = RenderEngine::new(
            Box::new(Scripted {
                results: vec![Err(RasterError::ContextLost("gone".into()))],
            }),
            W,
            H,
        );
        let snapshot = scene().snapshot();
        let err = engine.render(&snapshot, 0.0).unwrap_err();
        assert!(err.is_fatal());
        assert!(engine.is_fatal());
        assert!(engine.render(&snapshot, 0.0).unwrap_err().is_fatal());
    }

    #[test]
    fn test_try_execute_times_out_while_busy() {
        struct Slow(mpsc::Sender<()>);
        impl Rasterizer for Slow {
            fn name(&self) -> &'static str {
                "slow"
            }
            fn render(&mut self, _: &SceneSnapshot, _: RenderTarget<'_>) -> Result<(), RasterError> {
                let _ = self.0.send(());
                thread::sleep(Duration::from_millis(300));
                Ok(())
            }
        }

        let (tx, rx) = mpsc::channel();
        let engine = Arc::new(RenderEngine::new(Box::new(Slow(tx)), W, H));
        let snapshot = scene().snapshot();

        let busy = {
            let engine = Arc::clone(&engine);
            let snapshot = snapshot.clone();
            thread::spawn(move || engine.render(&snapshot, 0.0))
        };
        rx.recv().unwrap();

        let deadline = Duration::from_millis(10);
        let err = engine
            .try_execute_for(&snapshot, &RenderJob::mono(Pose::IDENTITY), deadline)
            .unwrap_err();
        assert_eq!(err, RenderError::Timeout(deadline));
        assert!(busy.join().unwrap().is_ok());
    }

    #[test]
    fn test_pool_reuses_buffers() {
        let engine = software_engine();
        let snapshot = scene().snapshot();
        let frame = engine.render_with_depth(&snapshot, 0.0).unwrap();
        let color_ptr = frame.color.as_ptr();
        engine.recycle(frame);
        assert_eq!(engine.pool.lock().available(), (1, 1));

        let again = engine.render(&snapshot, 0.0).unwrap();
        assert_eq!(again.color.as_ptr(), color_ptr);
        assert_eq!(engine.pool.lock().available(), (0, 1));
    }

    #[test]
    fn test_pool_drops_mismatched_buffers() {
        let mut pool = FramePool::new(2, 2, 4);
        pool.recycle(Frame::new(3, 3, Eye::Mono, true));
        assert_eq!(pool.available(), (0, 0));
        pool.recycle(Frame::new(2, 2, Eye::Left, true));
        assert_eq!(pool.available(), (1, 1));
        let frame = pool.take(Eye::Right, false);
        assert_eq!(frame.eye, Eye::Right);
        assert!(frame.depth.is_none());
    }
}
