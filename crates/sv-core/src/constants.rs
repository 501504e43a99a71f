//! Global constants for sv-core

/// Default vertical field of view in degrees
pub const DEFAULT_FOV_Y_DEGREES: f32 = 110.0;

/// Default near clipping plane distance
pub const DEFAULT_Z_NEAR: f32 = 0.05;

/// Default far clipping plane distance
pub const DEFAULT_Z_FAR: f32 = 100.0;

/// Default point light intensity
pub const DEFAULT_LIGHT_INTENSITY: f32 = 2.0;

/// Default mesh placement (translation applied to the mesh node)
pub const DEFAULT_MESH_OFFSET: [f32; 3] = [0.0, 0.0, 3.0];

/// Default color for meshes without material data (gray, RGBA)
pub const DEFAULT_COLOR: [f32; 4] = [0.7, 0.7, 0.7, 1.0];

/// Default horizontal distance between the two eyes of a stereo pair (meters)
pub const DEFAULT_EYE_SEPARATION: f32 = 0.06;

/// Mesh vertex comparison precision (multiply by this, then round to int)
pub const VERTEX_PRECISION: f32 = 10000.0;

/// Tolerance used when validating unit quaternions and orthonormal rotations
pub const ROTATION_EPSILON: f32 = 1e-4;
