//! Process-wide scene state
//!
//! The scene holds exactly one camera, one mesh and one light node. The
//! camera pose is a versioned cell: every [`SceneState::set_camera_pose`]
//! overwrites it under the scene lock and bumps the version, so the last
//! write before a render's snapshot is what gets rendered. Renders never
//! hold the scene lock; they work on an immutable [`SceneSnapshot`].

mod bounds;
mod node;

use std::sync::Arc;

use glam::{Mat4, Vec3};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_FOV_Y_DEGREES, DEFAULT_LIGHT_INTENSITY, DEFAULT_MESH_OFFSET, DEFAULT_Z_FAR,
    DEFAULT_Z_NEAR,
};
use crate::mesh::MeshGeometry;
use crate::pose::Pose;

pub use bounds::BoundingBox;
pub use node::{NodeInfo, NodeKind, NodePayload, PerspectiveCamera, PointLight, SceneNode};

/// Static scene parameters applied at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneSettings {
    /// Vertical field of view in degrees
    pub fov_y_degrees: f32,
    pub znear: f32,
    pub zfar: f32,
    pub light_intensity: f32,
    pub light_color: [f32; 3],
    /// World translation of the mesh node
    pub mesh_offset: [f32; 3],
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            fov_y_degrees: DEFAULT_FOV_Y_DEGREES,
            znear: DEFAULT_Z_NEAR,
            zfar: DEFAULT_Z_FAR,
            light_intensity: DEFAULT_LIGHT_INTENSITY,
            light_color: [1.0, 1.0, 1.0],
            mesh_offset: DEFAULT_MESH_OFFSET,
        }
    }
}

/// Scene errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SceneError {
    #[error("Invalid camera intrinsics: {0}")]
    InvalidIntrinsics(String),
    #[error("Invalid scene settings: {0}")]
    InvalidSettings(String),
}

struct SceneGraph {
    camera: SceneNode<PerspectiveCamera>,
    mesh: SceneNode<Arc<MeshGeometry>>,
    light: SceneNode<PointLight>,
    version: u64,
}

/// Immutable description of everything a render needs
#[derive(Debug, Clone)]
pub struct SceneSnapshot {
    /// Scene version this snapshot was taken at
    pub version: u64,
    /// Camera-to-world transform
    pub camera_pose: Pose,
    pub camera: PerspectiveCamera,
    pub mesh: Arc<MeshGeometry>,
    pub mesh_transform: Mat4,
    pub light: PointLight,
    pub light_transform: Mat4,
}

impl SceneSnapshot {
    /// Copy of this snapshot with the camera moved along its local X axis
    pub fn with_eye_offset(&self, eye_offset: f32) -> Self {
        let mut shifted = self.clone();
        if eye_offset != 0.0 {
            shifted.camera_pose = self
                .camera_pose
                .with_local_offset(Vec3::new(eye_offset, 0.0, 0.0));
        }
        shifted
    }

    /// Copy of this snapshot rendered from a different camera pose
    pub fn with_camera_pose(&self, pose: Pose) -> Self {
        Self {
            camera_pose: pose,
            ..self.clone()
        }
    }

    /// World-to-camera transform
    pub fn view_matrix(&self) -> Mat4 {
        self.camera_pose.matrix().inverse()
    }

    pub fn view_projection(&self) -> Mat4 {
        self.camera.projection_matrix() * self.view_matrix()
    }

    /// World-space light position
    pub fn light_position(&self) -> Vec3 {
        self.light_transform.w_axis.truncate()
    }
}

/// Single source of truth for what gets rendered next
pub struct SceneState {
    graph: RwLock<SceneGraph>,
}

impl SceneState {
    /// Build the scene around a loaded mesh
    pub fn new(
        mesh: Arc<MeshGeometry>,
        settings: &SceneSettings,
        aspect: f32,
    ) -> Result<Self, SceneError> {
        if !(settings.znear > 0.0 && settings.zfar > settings.znear) {
            return Err(SceneError::InvalidSettings(format!(
                "clip planes must satisfy 0 < znear < zfar, got {} / {}",
                settings.znear, settings.zfar
            )));
        }
        let camera = PerspectiveCamera {
            yfov: settings.fov_y_degrees.to_radians(),
            aspect,
            znear: settings.znear,
            zfar: settings.zfar,
        };
        validate_intrinsics(camera.yfov, camera.aspect)?;

        let graph = SceneGraph {
            camera: SceneNode::new("camera", Mat4::IDENTITY, camera),
            mesh: SceneNode::new(
                mesh.name.clone(),
                Mat4::from_translation(Vec3::from(settings.mesh_offset)),
                mesh,
            ),
            light: SceneNode::new(
                "light",
                Mat4::IDENTITY,
                PointLight {
                    color: settings.light_color,
                    intensity: settings.light_intensity,
                },
            ),
            version: 0,
        };

        Ok(Self {
            graph: RwLock::new(graph),
        })
    }

    /// Overwrite the camera pose (last write wins). Returns the new version.
    pub fn set_camera_pose(&self, pose: Pose) -> u64 {
        let mut graph = self.graph.write();
        graph.camera.transform = pose.matrix();
        graph.version += 1;
        graph.version
    }

    /// Current camera pose and the scene version it belongs to
    pub fn camera_pose(&self) -> (u64, Pose) {
        let graph = self.graph.read();
        (graph.version, Pose::from_matrix(graph.camera.transform))
    }

    /// Replace the camera projection in place
    pub fn set_camera_intrinsics(&self, fov_y: f32, aspect: f32) -> Result<u64, SceneError> {
        validate_intrinsics(fov_y, aspect)?;
        let mut graph = self.graph.write();
        graph.camera.payload.yfov = fov_y;
        graph.camera.payload.aspect = aspect;
        graph.version += 1;
        Ok(graph.version)
    }

    /// Swap the mesh geometry, keeping the mesh node and its transform
    pub fn replace_mesh(&self, mesh: Arc<MeshGeometry>) -> u64 {
        let mut graph = self.graph.write();
        graph.mesh.name = mesh.name.clone();
        graph.mesh.payload = mesh;
        graph.version += 1;
        graph.version
    }

    /// Consistent copy of the scene for one render
    pub fn snapshot(&self) -> SceneSnapshot {
        let graph = self.graph.read();
        SceneSnapshot {
            version: graph.version,
            camera_pose: Pose::from_matrix(graph.camera.transform),
            camera: graph.camera.payload,
            mesh: Arc::clone(&graph.mesh.payload),
            mesh_transform: graph.mesh.transform,
            light: graph.light.payload,
            light_transform: graph.light.transform,
        }
    }

    pub fn version(&self) -> u64 {
        self.graph.read().version
    }

    /// All nodes reachable from the root
    pub fn nodes(&self) -> Vec<NodeInfo> {
        let graph = self.graph.read();
        vec![graph.light.info(), graph.mesh.info(), graph.camera.info()]
    }

    /// Number of nodes of the given kind
    pub fn count(&self, kind: NodeKind) -> usize {
        self.nodes().iter().filter(|n| n.kind == kind).count()
    }

    /// World-space bounds of the mesh node
    pub fn mesh_bounds(&self) -> BoundingBox {
        let graph = self.graph.read();
        graph.mesh.payload.bounds().transform(&graph.mesh.transform)
    }
}

fn validate_intrinsics(fov_y: f32, aspect: f32) -> Result<(), SceneError> {
    if !fov_y.is_finite() || fov_y <= 0.0 || fov_y >= std::f32::consts::PI {
        return Err(SceneError::InvalidIntrinsics(format!(
            "fov must be in (0, pi) radians, got {fov_y}"
        )));
    }
    if !aspect.is_finite() || aspect <= 0.0 {
        return Err(SceneError::InvalidIntrinsics(format!(
            "aspect must be positive, got {aspect}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::generate_box_mesh;
    use glam::Quat;
    use std::thread;

    fn scene() -> SceneState {
        SceneState::new(
            Arc::new(generate_box_mesh([1.0, 1.0, 1.0])),
            &SceneSettings::default(),
            16.0 / 9.0,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let snap = scene().snapshot();
        assert!((snap.camera.yfov - 110.0_f32.to_radians()).abs() < 1e-6);
        assert_eq!(snap.light.intensity, 2.0);
        assert_eq!(snap.mesh_transform.w_axis.truncate(), Vec3::new(0.0, 0.0, 3.0));
        assert_eq!(snap.camera_pose, Pose::IDENTITY);
        assert_eq!(snap.version, 0);
    }

    #[test]
    fn test_set_camera_pose_last_write_wins() {
        let scene = scene();
        let a = Pose::from_rotation_translation(Quat::IDENTITY, Vec3::X);
        let b = Pose::from_rotation_translation(Quat::IDENTITY, Vec3::Y);
        let v1 = scene.set_camera_pose(a);
        let v2 = scene.set_camera_pose(b);
        assert!(v2 > v1);
        assert_eq!(scene.camera_pose(), (v2, b));
        assert_eq!(scene.snapshot().camera_pose, b);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let scene = scene();
        let before = scene.snapshot();
        scene.set_camera_pose(Pose::from_rotation_translation(Quat::IDENTITY, Vec3::Z));
        scene.set_camera_intrinsics(1.0, 2.0).unwrap();
        assert_eq!(before.camera_pose, Pose::IDENTITY);
        assert!((before.camera.aspect - 16.0 / 9.0).abs() < 1e-6);
    }

    #[test]
    fn test_intrinsics_update_keeps_single_camera() {
        let scene = scene();
        let camera_id = scene
            .nodes()
            .into_iter()
            .find(|n| n.kind == NodeKind::Camera)
            .map(|n| n.id);

        for i in 1..10 {
            scene.set_camera_intrinsics(0.1 * i as f32, 1.0 + i as f32).unwrap();
        }
        scene.replace_mesh(Arc::new(generate_box_mesh([2.0, 2.0, 2.0])));

        assert_eq!(scene.count(NodeKind::Camera), 1);
        assert_eq!(scene.count(NodeKind::Mesh), 1);
        assert_eq!(scene.count(NodeKind::Light), 1);
        let camera_id_after = scene
            .nodes()
            .into_iter()
            .find(|n| n.kind == NodeKind::Camera)
            .map(|n| n.id);
        assert_eq!(camera_id, camera_id_after);
    }

    #[test]
    fn test_invalid_intrinsics_rejected_without_change() {
        let scene = scene();
        let before = scene.snapshot().camera;
        assert!(scene.set_camera_intrinsics(0.0, 1.0).is_err());
        assert!(scene.set_camera_intrinsics(1.0, f32::NAN).is_err());
        assert_eq!(scene.snapshot().camera, before);
    }

    #[test]
    fn test_concurrent_pose_writes_are_serialized() {
        let scene = Arc::new(scene());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let scene = Arc::clone(&scene);
                thread::spawn(move || {
                    for j in 0..100 {
                        let t = Vec3::new(i as f32, j as f32, 0.0);
                        scene.set_camera_pose(Pose::from_rotation_translation(Quat::IDENTITY, t));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let (version, pose) = scene.camera_pose();
        assert_eq!(version, 800);
        // whichever write landed last, it was applied whole
        assert_eq!(pose.translation().y, 99.0);
        assert!(pose.is_rigid());
    }

    #[test]
    fn test_eye_offset_does_not_touch_source() {
        let scene = scene();
        scene.set_camera_pose(Pose::from_rotation_translation(Quat::IDENTITY, Vec3::ZERO));
        let snap = scene.snapshot();
        let left = snap.with_eye_offset(-0.03);
        assert_eq!(left.camera_pose.translation(), Vec3::new(-0.03, 0.0, 0.0));
        assert_eq!(snap.camera_pose.translation(), Vec3::ZERO);
        assert_eq!(scene.camera_pose().1.translation(), Vec3::ZERO);
    }

    #[test]
    fn test_mesh_bounds_follow_offset() {
        let bounds = scene().mesh_bounds();
        assert_eq!(bounds.center(), Vec3::new(0.0, 0.0, 3.0));
    }

    #[test]
    fn test_bad_clip_planes() {
        let settings = SceneSettings {
            znear: 1.0,
            zfar: 0.5,
            ..Default::default()
        };
        let result = SceneState::new(Arc::new(generate_box_mesh([1.0; 3])), &settings, 1.0);
        assert!(matches!(result, Err(SceneError::InvalidSettings(_))));
    }
}
