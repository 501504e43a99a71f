//! Uniform layout shared with the mesh shader, and depth helpers

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4};

use sv_core::SceneSnapshot;

/// Per-render uniform buffer data
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SceneUniform {
    /// Projection * view
    pub view_proj: [[f32; 4]; 4],
    /// World-to-camera
    pub view: [[f32; 4]; 4],
    /// Mesh node transform
    pub model: [[f32; 4]; 4],
    /// Inverse-transpose of the model rotation/scale, padded to 4x4
    pub normal_matrix: [[f32; 4]; 4],
    /// Camera position (w unused)
    pub eye: [f32; 4],
    /// Light position (w unused)
    pub light_position: [f32; 4],
    /// Light color in rgb, intensity in w
    pub light_color: [f32; 4],
    /// Mesh base color
    pub base_color: [f32; 4],
    /// x = ambient strength
    pub params: [f32; 4],
}

impl SceneUniform {
    /// Build the uniform block for one render of `scene`
    pub fn from_snapshot(scene: &SceneSnapshot, ambient_strength: f32) -> Self {
        let normal_matrix = Mat3::from_mat4(scene.mesh_transform).inverse().transpose();
        let eye = scene.camera_pose.translation();
        let light = scene.light_position();
        let [r, g, b] = scene.light.color;

        Self {
            view_proj: scene.view_projection().to_cols_array_2d(),
            view: scene.view_matrix().to_cols_array_2d(),
            model: scene.mesh_transform.to_cols_array_2d(),
            normal_matrix: Mat4::from_mat3(normal_matrix).to_cols_array_2d(),
            eye: eye.extend(1.0).to_array(),
            light_position: light.extend(1.0).to_array(),
            light_color: [r, g, b, scene.light.intensity],
            base_color: scene.mesh.color,
            params: [ambient_strength, 0.0, 0.0, 0.0],
        }
    }
}

/// Convert a 0..1 depth-buffer value from a right-handed perspective
/// projection into linear distance along the view axis.
pub fn linearize_depth(depth: f32, znear: f32, zfar: f32) -> f32 {
    znear * zfar / (zfar - depth * (zfar - znear))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    #[test]
    fn test_linearize_matches_projection() {
        let (near, far) = (0.05, 100.0);
        let proj = Mat4::perspective_rh(1.2, 1.5, near, far);
        for distance in [0.05_f32, 0.5, 3.0, 42.0, 99.0] {
            let clip = proj * Vec4::new(0.0, 0.0, -distance, 1.0);
            let ndc_z = clip.z / clip.w;
            assert_relative_eq!(
                linearize_depth(ndc_z, near, far),
                distance,
                max_relative = 1e-3
            );
        }
        assert_relative_eq!(linearize_depth(0.0, near, far), near);
        assert_relative_eq!(linearize_depth(1.0, near, far), far, max_relative = 1e-5);
    }

    #[test]
    fn test_uniform_size_is_std140_friendly() {
        assert_eq!(std::mem::size_of::<SceneUniform>() % 16, 0);
    }
}
