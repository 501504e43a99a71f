//! glTF / GLB mesh loading
//!
//! Every triangle primitive reachable from the default scene is flattened
//! into a single [`MeshGeometry`] with node transforms baked in.

use std::path::Path;

use glam::{Mat3, Mat4, Vec3};

use super::normals::calculate_vertex_normals;
use super::{MeshError, MeshGeometry, mesh_name};

/// Load a `.glb` or `.gltf` file
pub fn load_gltf(path: impl AsRef<Path>) -> Result<MeshGeometry, MeshError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| MeshError::Io(e.to_string()))?;
    load_gltf_from_slice(&mesh_name(path), &data)
}

/// Load glTF content from memory; external buffer URIs are not supported
pub fn load_gltf_from_slice(name: &str, data: &[u8]) -> Result<MeshGeometry, MeshError> {
    let (document, buffers, _images) =
        gltf::import_slice(data).map_err(|e| MeshError::Parse(e.to_string()))?;

    let mut geometry = MeshGeometry::new(name);
    let mut color = None;

    match document.default_scene().or_else(|| document.scenes().next()) {
        Some(scene) => {
            for node in scene.nodes() {
                visit_node(&node, Mat4::IDENTITY, &buffers, &mut geometry, &mut color);
            }
        }
        None => {
            for mesh in document.meshes() {
                append_mesh(&mesh, Mat4::IDENTITY, &buffers, &mut geometry, &mut color);
            }
        }
    }

    if geometry.is_empty() {
        return Err(MeshError::EmptyMesh);
    }
    if let Some(color) = color {
        geometry.color = color;
    }
    Ok(geometry)
}

fn visit_node(
    node: &gltf::Node,
    parent: Mat4,
    buffers: &[gltf::buffer::Data],
    geometry: &mut MeshGeometry,
    color: &mut Option<[f32; 4]>,
) {
    let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
    if let Some(mesh) = node.mesh() {
        append_mesh(&mesh, world, buffers, geometry, color);
    }
    for child in node.children() {
        visit_node(&child, world, buffers, geometry, color);
    }
}

fn append_mesh(
    mesh: &gltf::Mesh,
    transform: Mat4,
    buffers: &[gltf::buffer::Data],
    geometry: &mut MeshGeometry,
    color: &mut Option<[f32; 4]>,
) {
    let normal_matrix = Mat3::from_mat4(transform).inverse().transpose();

    for primitive in mesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            tracing::debug!(mode = ?primitive.mode(), "Skipping non-triangle primitive");
            continue;
        }

        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|d| d.0.as_slice()));
        let Some(positions) = reader.read_positions() else {
            continue;
        };

        let vertices: Vec<[f32; 3]> = positions
            .map(|p| transform.transform_point3(Vec3::from(p)).to_array())
            .collect();
        let indices: Vec<u32> = match reader.read_indices() {
            Some(indices) => indices.into_u32().collect(),
            None => (0..vertices.len() as u32).collect(),
        };

        let normals: Vec<[f32; 3]> = match reader.read_normals() {
            Some(normals) => normals
                .map(|n| (normal_matrix * Vec3::from(n)).normalize_or_zero().to_array())
                .collect(),
            None => calculate_vertex_normals(&vertices, &indices),
        };
        if normals.len() != vertices.len() {
            tracing::warn!("Skipping primitive with mismatched normal count");
            continue;
        }

        if color.is_none() {
            *color = Some(primitive.material().pbr_metallic_roughness().base_color_factor());
        }
        geometry.append(&vertices, &normals, &indices);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One triangle in the XY plane, placed by a node translated to z = 5
    const TRIANGLE_GLTF: &str = r#"{"asset":{"version":"2.0"},"scene":0,"scenes":[{"nodes":[0]}],"nodes":[{"mesh":0,"translation":[0,0,5]}],"meshes":[{"primitives":[{"attributes":{"POSITION":0},"indices":1}]}],"buffers":[{"byteLength":44,"uri":"data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAAABAAIAAAA="}],"bufferViews":[{"buffer":0,"byteOffset":0,"byteLength":36},{"buffer":0,"byteOffset":36,"byteLength":6}],"accessors":[{"bufferView":0,"componentType":5126,"count":3,"type":"VEC3","min":[0,0,0],"max":[1,1,0]},{"bufferView":1,"componentType":5123,"count":3,"type":"SCALAR"}]}"#;

    #[test]
    fn test_load_embedded_triangle_applies_node_transform() {
        let mesh = load_gltf_from_slice("tri", TRIANGLE_GLTF.as_bytes()).unwrap();
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        for v in &mesh.vertices {
            assert!((v[2] - 5.0).abs() < 1e-6);
        }
        // computed normals face +Z for counter-clockwise winding
        for n in &mesh.normals {
            assert!((n[2] - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_invalid_gltf_is_parse_error() {
        let err = load_gltf_from_slice("bad", b"{not gltf").unwrap_err();
        assert!(matches!(err, MeshError::Parse(_)));
    }
}
