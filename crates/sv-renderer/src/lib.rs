//! StreamView Renderer
//!
//! Turns a scene snapshot plus a camera pose into RGBA (and optional depth)
//! buffers.
//!
//! # Architecture
//!
//! - [`rasterizer::Rasterizer`] - the black-box "scene + pose -> pixels" seam
//! - [`rasterizer::WgpuRasterizer`] - headless offscreen GPU backend
//! - [`rasterizer::SoftwareRasterizer`] - deterministic CPU backend
//! - [`engine::RenderEngine`] - exclusive wrapper; one render in flight at a time
//! - [`stereo::StereoCoordinator`] - left/right eye pairs from one head pose
//!
//! ```text
//! sv-renderer/
//! ├── rasterizer/      # Rasterizer trait and backends
//! ├── shaders/         # WGSL for the GPU backend
//! ├── camera.rs        # Uniform layout and depth helpers
//! ├── config.rs        # Serializable renderer settings
//! ├── engine.rs        # RenderEngine + frame buffer pool
//! ├── error.rs         # RenderError / RasterError
//! ├── stereo.rs        # StereoCoordinator
//! └── vertex.rs        # GPU vertex layout
//! ```

pub mod camera;
pub mod config;
pub mod engine;
pub mod error;
pub mod rasterizer;
pub mod stereo;
pub mod vertex;

pub use camera::{SceneUniform, linearize_depth};
pub use config::{BackendKind, LightingConfig, RendererConfig, ViewportConfig};
pub use engine::{FramePool, RenderEngine};
pub use error::{RasterError, RenderError};
pub use rasterizer::{Rasterizer, RenderTarget, SoftwareRasterizer, WgpuRasterizer};
pub use stereo::{StereoCoordinator, StereoFrames};
pub use vertex::MeshVertex;
