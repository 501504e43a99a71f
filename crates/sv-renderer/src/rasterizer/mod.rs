//! The rasterizer seam: "scene snapshot -> pixels (+ depth)"
//!
//! Implementations are not required to be reentrant or thread-safe beyond
//! `Send`; the [`RenderEngine`](crate::RenderEngine) guarantees only one call
//! is in flight at a time.

mod gpu;
mod software;

use glam::Vec3;

use sv_core::SceneSnapshot;

use crate::error::RasterError;

pub use gpu::WgpuRasterizer;
pub use software::SoftwareRasterizer;

/// Output buffers for one render call.
///
/// `color` holds `width * height` RGBA8 pixels, `depth` (when present) holds
/// `width * height` linear view distances with 0 for background. Both are
/// row-major, top row first, and a backend must overwrite every element.
pub struct RenderTarget<'a> {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// RGBA8 output
    pub color: &'a mut [u8],
    /// Linear depth output
    pub depth: Option<&'a mut [f32]>,
}

impl RenderTarget<'_> {
    /// Check buffer lengths against the declared size
    pub fn validate(&self) -> Result<(), RasterError> {
        let pixels = self.width as usize * self.height as usize;
        if pixels == 0 {
            return Err(RasterError::Failed("zero-sized render target".into()));
        }
        if self.color.len() != pixels * 4 {
            return Err(RasterError::Failed(format!(
                "color buffer holds {} bytes, target needs {}",
                self.color.len(),
                pixels * 4
            )));
        }
        if let Some(depth) = &self.depth
            && depth.len() != pixels
        {
            return Err(RasterError::Failed(format!(
                "depth buffer holds {} values, target needs {}",
                depth.len(),
                pixels
            )));
        }
        Ok(())
    }
}

/// Black-box rasterizer resource
pub trait Rasterizer: Send {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Render `scene` from its camera pose into `target`
    fn render(&mut self, scene: &SceneSnapshot, target: RenderTarget<'_>)
    -> Result<(), RasterError>;
}

/// Lambert shading with a point light and ambient term, two-sided.
///
/// Mirrors `fs_main` in `shaders/mesh.wgsl`.
pub(crate) fn shade(
    scene: &SceneSnapshot,
    world_position: Vec3,
    world_normal: Vec3,
    ambient_strength: f32,
) -> [u8; 4] {
    let mut normal = world_normal.normalize_or_zero();
    let to_eye = (scene.camera_pose.translation() - world_position).normalize_or_zero();
    if normal.dot(to_eye) < 0.0 {
        normal = -normal;
    }
    let to_light = (scene.light_position() - world_position).normalize_or_zero();
    let diffuse = normal.dot(to_light).max(0.0) * scene.light.intensity;
    let lit = Vec3::from(scene.light.color) * diffuse + Vec3::splat(ambient_strength);

    let [r, g, b, a] = scene.mesh.color;
    let rgb = (Vec3::new(r, g, b) * lit).clamp(Vec3::ZERO, Vec3::ONE) * 255.0;
    [
        rgb.x.round() as u8,
        rgb.y.round() as u8,
        rgb.z.round() as u8,
        (a.clamp(0.0, 1.0) * 255.0).round() as u8,
    ]
}
