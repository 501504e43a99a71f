//! StreamView Core Data Structures
//!
//! This crate contains the renderer-agnostic pieces of the render service:
//! - Pose: client-space to renderer-space camera conversion
//! - Message: inbound client messages decoded once at the transport edge
//! - Scene: the process-wide scene graph (camera, mesh, light)
//! - Mesh: asset loading (glTF, OBJ, STL) with a pre-parsed cache
//! - Frame: transient render output and render job descriptions

pub mod constants;
pub mod frame;
pub mod mesh;
pub mod message;
pub mod pose;
pub mod scene;

pub use constants::*;
pub use frame::*;
pub use mesh::*;
pub use message::*;
pub use pose::*;
pub use scene::*;
