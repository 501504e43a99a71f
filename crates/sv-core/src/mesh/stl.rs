//! STL file loading

use std::collections::HashMap;
use std::io::BufReader;
use std::path::Path;

use crate::constants::VERTEX_PRECISION;

use super::normals::calculate_vertex_normals;
use super::{MeshError, MeshGeometry, mesh_name};

/// Load an STL file (ASCII or binary)
pub fn load_stl(path: impl AsRef<Path>) -> Result<MeshGeometry, MeshError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| MeshError::Io(e.to_string()))?;
    let mut reader = BufReader::new(file);

    let mesh = stl_io::read_stl(&mut reader).map_err(|e| MeshError::Parse(e.to_string()))?;
    if mesh.faces.is_empty() {
        return Err(MeshError::EmptyMesh);
    }

    let (vertices, indices) = weld_vertices(&mesh);
    let normals = calculate_vertex_normals(&vertices, &indices);

    let mut geometry = MeshGeometry::new(mesh_name(path));
    geometry.append(&vertices, &normals, &indices);
    Ok(geometry)
}

/// Merge coincident vertices so smooth normals can be shared across faces
fn weld_vertices(mesh: &stl_io::IndexedMesh) -> (Vec<[f32; 3]>, Vec<u32>) {
    let mut unique_vertices: Vec<[f32; 3]> = Vec::new();
    let mut vertex_map: HashMap<[i32; 3], u32> = HashMap::new();
    let mut indices: Vec<u32> = Vec::with_capacity(mesh.faces.len() * 3);

    for face in &mesh.faces {
        for &vertex_idx in &face.vertices {
            let vertex = mesh.vertices[vertex_idx];
            let v = [vertex[0], vertex[1], vertex[2]];

            let key = [
                (v[0] * VERTEX_PRECISION).round() as i32,
                (v[1] * VERTEX_PRECISION).round() as i32,
                (v[2] * VERTEX_PRECISION).round() as i32,
            ];

            let index = *vertex_map.entry(key).or_insert_with(|| {
                unique_vertices.push(v);
                (unique_vertices.len() - 1) as u32
            });
            indices.push(index);
        }
    }

    (unique_vertices, indices)
}
