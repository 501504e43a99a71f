//! Scene nodes and their payloads

use std::sync::Arc;

use glam::Mat4;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mesh::MeshGeometry;

/// What a node carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Mesh,
    Camera,
    Light,
}

/// Perspective projection parameters of the camera node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveCamera {
    /// Vertical field of view in radians
    pub yfov: f32,
    /// Width / height
    pub aspect: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl PerspectiveCamera {
    /// Right-handed projection with a 0..1 depth range
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.yfov, self.aspect, self.znear, self.zfar)
    }
}

/// Point light payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointLight {
    pub color: [f32; 3],
    pub intensity: f32,
}

/// Payload types a node may carry
pub trait NodePayload {
    const KIND: NodeKind;
}

impl NodePayload for PerspectiveCamera {
    const KIND: NodeKind = NodeKind::Camera;
}

impl NodePayload for PointLight {
    const KIND: NodeKind = NodeKind::Light;
}

impl NodePayload for Arc<MeshGeometry> {
    const KIND: NodeKind = NodeKind::Mesh;
}

/// A node in the scene: identity, world transform and a typed payload.
///
/// Nodes are updated in place; the id survives every transform or payload
/// change.
#[derive(Debug, Clone)]
pub struct SceneNode<T> {
    pub id: Uuid,
    pub name: String,
    pub transform: Mat4,
    pub payload: T,
}

impl<T: NodePayload> SceneNode<T> {
    pub fn new(name: impl Into<String>, transform: Mat4, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            transform,
            payload,
        }
    }

    pub fn kind(&self) -> NodeKind {
        T::KIND
    }

    /// Type-erased description of this node
    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            id: self.id,
            name: self.name.clone(),
            kind: T::KIND,
            transform: self.transform,
        }
    }
}

/// Type-erased view of a node for listing and inspection
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub id: Uuid,
    pub name: String,
    pub kind: NodeKind,
    pub transform: Mat4,
}
