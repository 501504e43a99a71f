//! Mesh asset loading (glTF/GLB, OBJ, STL) and the pre-parsed mesh cache

mod cache;
mod glb;
mod normals;
mod obj;
mod primitive;
mod stl;

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_COLOR;
use crate::scene::BoundingBox;

pub use cache::{CACHE_FORMAT_VERSION, load_mesh_cached};
pub use glb::load_gltf;
pub use normals::{calculate_face_normals, calculate_triangle_normal, calculate_vertex_normals};
pub use obj::load_obj;
pub use primitive::generate_box_mesh;
pub use stl::load_stl;

/// CPU-side triangle mesh ready for upload to a rasterizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshGeometry {
    /// Name derived from the source file
    pub name: String,
    /// Vertex positions
    pub vertices: Vec<[f32; 3]>,
    /// Per-vertex normals (same length as `vertices`)
    pub normals: Vec<[f32; 3]>,
    /// Triangle list indices
    pub indices: Vec<u32>,
    /// Base color (RGBA)
    pub color: [f32; 4],
}

impl MeshGeometry {
    /// Create an empty mesh
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vertices: Vec::new(),
            normals: Vec::new(),
            indices: Vec::new(),
            color: DEFAULT_COLOR,
        }
    }

    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// True when there is nothing to draw
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Axis-aligned bounds of all vertices
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::from_points(self.vertices.iter().map(|v| Vec3::from(*v)))
    }

    /// Check index ranges and attribute lengths
    pub fn validate(&self) -> Result<(), MeshError> {
        if self.is_empty() {
            return Err(MeshError::EmptyMesh);
        }
        if self.indices.len() % 3 != 0 {
            return Err(MeshError::Parse(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        if self.normals.len() != self.vertices.len() {
            return Err(MeshError::Parse(format!(
                "{} normals for {} vertices",
                self.normals.len(),
                self.vertices.len()
            )));
        }
        let vertex_count = self.vertices.len() as u32;
        if let Some(bad) = self.indices.iter().find(|&&i| i >= vertex_count) {
            return Err(MeshError::Parse(format!(
                "index {bad} out of range for {vertex_count} vertices"
            )));
        }
        Ok(())
    }

    /// Append another primitive, offsetting its indices
    pub(crate) fn append(&mut self, vertices: &[[f32; 3]], normals: &[[f32; 3]], indices: &[u32]) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(vertices);
        self.normals.extend_from_slice(normals);
        self.indices.extend(indices.iter().map(|i| base + i));
    }
}

/// Source length unit of a mesh file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MeshUnit {
    /// Meters (no scaling)
    #[default]
    Meters,
    /// Millimeters (scale by 0.001)
    Millimeters,
    /// Centimeters (scale by 0.01)
    Centimeters,
    /// Inches (scale by 0.0254)
    Inches,
}

impl MeshUnit {
    pub fn scale_factor(&self) -> f32 {
        match self {
            MeshUnit::Meters => 1.0,
            MeshUnit::Millimeters => 0.001,
            MeshUnit::Centimeters => 0.01,
            MeshUnit::Inches => 0.0254,
        }
    }
}

/// Detect mesh format from file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Gltf,
    Obj,
    Stl,
    Unknown,
}

impl MeshFormat {
    /// Detect format from file path
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            Some("glb") | Some("gltf") => MeshFormat::Gltf,
            Some("obj") => MeshFormat::Obj,
            Some("stl") => MeshFormat::Stl,
            _ => MeshFormat::Unknown,
        }
    }

    /// Get format name
    pub fn name(&self) -> &'static str {
        match self {
            MeshFormat::Gltf => "glTF",
            MeshFormat::Obj => "OBJ",
            MeshFormat::Stl => "STL",
            MeshFormat::Unknown => "Unknown",
        }
    }
}

/// Load any supported mesh format in meters
pub fn load_mesh(path: impl AsRef<Path>) -> Result<MeshGeometry, MeshError> {
    load_mesh_with_unit(path, MeshUnit::Meters)
}

/// Load any supported mesh format, scaling positions from `unit` to meters
pub fn load_mesh_with_unit(
    path: impl AsRef<Path>,
    unit: MeshUnit,
) -> Result<MeshGeometry, MeshError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MeshError::AssetMissing(path.display().to_string()));
    }

    let mut mesh = match MeshFormat::from_path(path) {
        MeshFormat::Gltf => load_gltf(path)?,
        MeshFormat::Obj => load_obj(path)?,
        MeshFormat::Stl => load_stl(path)?,
        MeshFormat::Unknown => {
            return Err(MeshError::UnsupportedFormat(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("unknown")
                    .to_string(),
            ));
        }
    };

    let scale = unit.scale_factor();
    if scale != 1.0 {
        for v in &mut mesh.vertices {
            *v = [v[0] * scale, v[1] * scale, v[2] * scale];
        }
    }

    mesh.validate()?;
    tracing::info!(
        path = %path.display(),
        vertices = mesh.vertices.len(),
        triangles = mesh.triangle_count(),
        "Loaded mesh"
    );
    Ok(mesh)
}

/// Name for a mesh derived from its file stem
pub(crate) fn mesh_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed")
        .to_string()
}

/// Mesh-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum MeshError {
    #[error("Scene asset not found: {0}")]
    AssetMissing(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Empty mesh: no geometry found")]
    EmptyMesh,
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Mesh cache error: {0}")]
    Cache(String),
}
