//! Renderer configuration structures
//!
//! Serializable settings for the render engine, nested the same way in
//! configuration files.

use serde::{Deserialize, Serialize};

/// Which rasterizer implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// GPU when an adapter is available, CPU otherwise
    #[default]
    Auto,
    /// Headless wgpu device; fails when no adapter exists
    Gpu,
    /// CPU reference rasterizer
    Software,
}

/// Output image configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewportConfig {
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Background clear color (RGBA)
    pub background_color: [f32; 4],
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            background_color: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

impl ViewportConfig {
    /// Width / height
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    /// Background color quantized to RGBA8
    pub fn background_rgba8(&self) -> [u8; 4] {
        self.background_color
            .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
    }
}

/// Shading configuration shared by both backends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LightingConfig {
    /// Ambient light strength added to every lit fragment
    pub ambient_strength: f32,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            ambient_strength: 0.15,
        }
    }
}

/// Complete renderer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RendererConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: BackendKind,
    /// Output size and clear color
    #[serde(default)]
    pub viewport: ViewportConfig,
    /// Shading settings
    #[serde(default)]
    pub lighting: LightingConfig,
    /// Per-render deadline in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    500
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            viewport: ViewportConfig::default(),
            lighting: LightingConfig::default(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RendererConfig {
    /// Create a new renderer configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Same configuration with a different output size
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.viewport.width = width;
        self.viewport.height = height;
        self
    }

    /// Same configuration with a different backend
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }
}
