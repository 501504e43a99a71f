//! Deterministic CPU rasterizer
//!
//! A plain z-buffer triangle rasterizer with near-plane clipping and
//! perspective-correct attribute interpolation. It produces the same
//! conventions as the GPU backend (top-left origin, linear depth, two-sided
//! Lambert shading) and is used on hosts without a GPU and in tests.

use glam::{Mat3, Vec2, Vec3, Vec4, Vec4Swizzles};

use sv_core::SceneSnapshot;

use super::{Rasterizer, RenderTarget, shade};
use crate::camera::linearize_depth;
use crate::config::RendererConfig;
use crate::error::RasterError;

#[derive(Debug, Clone, Copy)]
struct ClipVertex {
    clip: Vec4,
    world: Vec3,
    normal: Vec3,
}

impl ClipVertex {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        Self {
            clip: self.clip.lerp(other.clip, t),
            world: self.world.lerp(other.world, t),
            normal: self.normal.lerp(other.normal, t),
        }
    }
}

/// CPU z-buffer rasterizer
pub struct SoftwareRasterizer {
    background: [u8; 4],
    ambient_strength: f32,
    zbuffer: Vec<f32>,
}

impl SoftwareRasterizer {
    /// Create a rasterizer using the config's clear color and lighting
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            background: config.viewport.background_rgba8(),
            ambient_strength: config.lighting.ambient_strength,
            zbuffer: Vec::new(),
        }
    }

    fn draw_triangle(
        &mut self,
        scene: &SceneSnapshot,
        tri: [ClipVertex; 3],
        target: &mut RenderTarget<'_>,
    ) {
        let width = target.width as usize;
        let height = target.height as usize;

        // Screen-space positions (pixel units, y down) and 1/w per vertex
        let screen = tri.map(|v| {
            let inv_w = 1.0 / v.clip.w;
            let ndc = v.clip.xyz() * inv_w;
            (
                Vec2::new(
                    (ndc.x + 1.0) * 0.5 * width as f32,
                    (1.0 - ndc.y) * 0.5 * height as f32,
                ),
                ndc.z,
                inv_w,
            )
        });
        let [(p0, z0, iw0), (p1, z1, iw1), (p2, z2, iw2)] = screen;

        let area = edge(p0, p1, p2);
        if area.abs() <= f32::EPSILON {
            return;
        }

        let min = p0.min(p1).min(p2);
        let max = p0.max(p1).max(p2);
        if max.x < 0.0 || max.y < 0.0 || min.x >= width as f32 || min.y >= height as f32 {
            return;
        }
        let x_start = min.x.max(0.0).floor() as usize;
        let y_start = min.y.max(0.0).floor() as usize;
        let x_end = (max.x.ceil() as usize).min(width - 1);
        let y_end = (max.y.ceil() as usize).min(height - 1);

        for y in y_start..=y_end {
            for x in x_start..=x_end {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                // Dividing by the signed area accepts both windings
                let b0 = edge(p1, p2, p) / area;
                let b1 = edge(p2, p0, p) / area;
                let b2 = edge(p0, p1, p) / area;
                if b0 < 0.0 || b1 < 0.0 || b2 < 0.0 {
                    continue;
                }

                let z = b0 * z0 + b1 * z1 + b2 * z2;
                if !(0.0..=1.0).contains(&z) {
                    continue;
                }
                let index = y * width + x;
                if z >= self.zbuffer[index] {
                    continue;
                }
                self.zbuffer[index] = z;

                let (w0, w1, w2) = (b0 * iw0, b1 * iw1, b2 * iw2);
                let norm = w0 + w1 + w2;
                let world = (tri[0].world * w0 + tri[1].world * w1 + tri[2].world * w2) / norm;
                let normal = tri[0].normal * w0 + tri[1].normal * w1 + tri[2].normal * w2;

                let rgba = shade(scene, world, normal, self.ambient_strength);
                target.color[index * 4..index * 4 + 4].copy_from_slice(&rgba);
            }
        }
    }
}

impl Rasterizer for SoftwareRasterizer {
    fn name(&self) -> &'static str {
        "software"
    }

    fn render(
        &mut self,
        scene: &SceneSnapshot,
        mut target: RenderTarget<'_>,
    ) -> Result<(), RasterError> {
        target.validate()?;

        for pixel in target.color.chunks_exact_mut(4) {
            pixel.copy_from_slice(&self.background);
        }
        let pixels = target.width as usize * target.height as usize;
        self.zbuffer.clear();
        self.zbuffer.resize(pixels, f32::INFINITY);

        let mesh = &scene.mesh;
        let model = scene.mesh_transform;
        let normal_matrix = Mat3::from_mat4(model).inverse().transpose();
        let view_proj = scene.view_projection();

        let vertices: Vec<ClipVertex> = mesh
            .vertices
            .iter()
            .zip(&mesh.normals)
            .map(|(p, n)| {
                let world = model.transform_point3(Vec3::from(*p));
                ClipVertex {
                    clip: view_proj * world.extend(1.0),
                    world,
                    normal: normal_matrix * Vec3::from(*n),
                }
            })
            .collect();

        for tri in mesh.indices.chunks_exact(3) {
            let corners = [tri[0], tri[1], tri[2]].map(|i| vertices.get(i as usize).copied());
            let [Some(a), Some(b), Some(c)] = corners else {
                return Err(RasterError::Failed(format!(
                    "triangle {tri:?} references a missing vertex"
                )));
            };

            let polygon = clip_near([a, b, c]);
            for i in 1..polygon.len().saturating_sub(1) {
                self.draw_triangle(scene, [polygon[0], polygon[i], polygon[i + 1]], &mut target);
            }
        }

        if let Some(depth) = target.depth {
            let (near, far) = (scene.camera.znear, scene.camera.zfar);
            for (out, z) in depth.iter_mut().zip(&self.zbuffer) {
                *out = if z.is_finite() {
                    linearize_depth(*z, near, far)
                } else {
                    0.0
                };
            }
        }
        Ok(())
    }
}

/// Signed doubled area of (a, b, p)
fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Clip a triangle against the near plane (clip-space z >= 0)
fn clip_near(tri: [ClipVertex; 3]) -> Vec<ClipVertex> {
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let current = tri[i];
        let next = tri[(i + 1) % 3];
        let current_inside = current.clip.z >= 0.0;
        let next_inside = next.clip.z >= 0.0;
        if current_inside {
            out.push(current);
        }
        if current_inside != next_inside {
            let t = current.clip.z / (current.clip.z - next.clip.z);
            out.push(current.lerp(&next, t));
        }
    }
    out
}
