//! Client-space to renderer-space camera pose conversion
//!
//! Clients send camera transforms in a right-handed, Y-up web convention.
//! The renderer uses a different right-handed convention: the Z position
//! component is negated and the quaternion components are read in
//! `(w, z, y, x)` order, which swaps the X and Z rotation axes.

use glam::{Mat3, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::constants::ROTATION_EPSILON;

/// Camera position as sent by the client
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Camera orientation as sent by the client (unit quaternion, scalar `w`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientQuaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl ClientQuaternion {
    /// The identity rotation
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

/// A client camera pose: position plus orientation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientPose {
    pub position: ClientPosition,
    pub quaternion: ClientQuaternion,
}

impl ClientPose {
    /// Parse a pose from a JSON value, reporting the first missing or
    /// non-numeric field.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, PoseError> {
        Ok(Self {
            position: ClientPosition {
                x: number(value, "position", "x")?,
                y: number(value, "position", "y")?,
                z: number(value, "position", "z")?,
            },
            quaternion: ClientQuaternion {
                x: number(value, "quaternion", "x")?,
                y: number(value, "quaternion", "y")?,
                z: number(value, "quaternion", "z")?,
                w: number(value, "quaternion", "w")?,
            },
        })
    }

    /// Convert into a renderer-space pose
    pub fn to_renderer_pose(&self) -> Result<Pose, PoseError> {
        PoseConverter::to_renderer_pose(&self.position, &self.quaternion)
    }
}

fn number(value: &serde_json::Value, group: &str, key: &str) -> Result<f32, PoseError> {
    let field = format!("{group}.{key}");
    let raw = value
        .get(group)
        .ok_or_else(|| PoseError::MissingField(group.to_string()))?
        .get(key)
        .ok_or_else(|| PoseError::MissingField(field.clone()))?;

    raw.as_f64()
        .map(|v| v as f32)
        .filter(|v| v.is_finite())
        .ok_or(PoseError::NonNumeric(field))
}

/// Renderer-space camera transform (camera-to-world, 4x4 homogeneous)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose(Mat4);

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    /// Camera at the origin with no rotation
    pub const IDENTITY: Self = Self(Mat4::IDENTITY);

    /// Wrap an existing matrix
    pub fn from_matrix(matrix: Mat4) -> Self {
        Self(matrix)
    }

    /// Build a pose from a rotation and translation
    pub fn from_rotation_translation(rotation: Quat, translation: Vec3) -> Self {
        Self(Mat4::from_rotation_translation(rotation, translation))
    }

    /// The full 4x4 matrix
    pub fn matrix(&self) -> Mat4 {
        self.0
    }

    /// Translation column
    pub fn translation(&self) -> Vec3 {
        self.0.w_axis.truncate()
    }

    /// Upper-left 3x3 rotation block
    pub fn rotation(&self) -> Mat3 {
        Mat3::from_mat4(self.0)
    }

    /// Copy of this pose moved along its own (local) axes
    pub fn with_local_offset(&self, offset: Vec3) -> Self {
        Self(self.0 * Mat4::from_translation(offset))
    }

    /// True when the rotation block is orthonormal with determinant +1
    pub fn is_rigid(&self) -> bool {
        let r = self.rotation();
        let should_be_identity = r.transpose() * r;
        should_be_identity.abs_diff_eq(Mat3::IDENTITY, ROTATION_EPSILON)
            && (r.determinant() - 1.0).abs() < ROTATION_EPSILON
    }
}

/// Pose conversion errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoseError {
    #[error("Invalid pose: missing field '{0}'")]
    MissingField(String),
    #[error("Invalid pose: field '{0}' is not a finite number")]
    NonNumeric(String),
    #[error("Invalid pose: quaternion has zero length")]
    DegenerateQuaternion,
}

/// Maps client-space camera transforms to renderer space
pub struct PoseConverter;

impl PoseConverter {
    /// Convert a client position + quaternion into a renderer pose.
    ///
    /// The quaternion is normalized before conversion, so slightly
    /// denormalized client input still yields an orthonormal rotation.
    pub fn to_renderer_pose(
        position: &ClientPosition,
        quaternion: &ClientQuaternion,
    ) -> Result<Pose, PoseError> {
        for (name, v) in [
            ("position.x", position.x),
            ("position.y", position.y),
            ("position.z", position.z),
            ("quaternion.x", quaternion.x),
            ("quaternion.y", quaternion.y),
            ("quaternion.z", quaternion.z),
            ("quaternion.w", quaternion.w),
        ] {
            if !v.is_finite() {
                return Err(PoseError::NonNumeric(name.to_string()));
            }
        }

        let translation = Vec3::new(position.x, position.y, -position.z);

        // (w, z, y, x): scalar first, X and Z swapped
        let rotation = Quat::from_xyzw(quaternion.z, quaternion.y, quaternion.x, quaternion.w);
        if rotation.length_squared() <= f32::EPSILON {
            return Err(PoseError::DegenerateQuaternion);
        }

        Ok(Pose::from_rotation_translation(
            rotation.normalize(),
            translation,
        ))
    }
}
