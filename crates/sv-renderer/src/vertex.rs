//! GPU vertex layout for mesh rendering

use bytemuck::{Pod, Zeroable};

use sv_core::MeshGeometry;

/// Vertex for mesh rendering with position and normal.
///
/// Color comes from the per-render uniform, so it is not repeated per vertex.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MeshVertex {
    /// Vertex position in local space.
    pub position: [f32; 3],
    /// Vertex normal vector.
    pub normal: [f32; 3],
}

impl MeshVertex {
    /// Vertex attribute descriptors for the shader.
    pub const ATTRIBUTES: &'static [wgpu::VertexAttribute] = &[
        wgpu::VertexAttribute {
            offset: 0,
            shader_location: 0,
            format: wgpu::VertexFormat::Float32x3,
        },
        wgpu::VertexAttribute {
            offset: std::mem::size_of::<[f32; 3]>() as u64,
            shader_location: 1,
            format: wgpu::VertexFormat::Float32x3,
        },
    ];

    /// Returns the vertex buffer layout for this vertex type.
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: Self::ATTRIBUTES,
        }
    }

    /// Interleave a mesh's positions and normals
    pub fn from_geometry(mesh: &MeshGeometry) -> Vec<Self> {
        mesh.vertices
            .iter()
            .zip(&mesh.normals)
            .map(|(&position, &normal)| Self { position, normal })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_stride() {
        assert_eq!(MeshVertex::layout().array_stride, 24);
        let mesh = sv_core::generate_box_mesh([1.0, 1.0, 1.0]);
        assert_eq!(MeshVertex::from_geometry(&mesh).len(), 24);
    }
}
