//! OBJ mesh file loading

use std::path::Path;

use super::normals::calculate_vertex_normals;
use super::{MeshError, MeshGeometry, mesh_name};

/// Load an OBJ file, merging every model into one mesh
pub fn load_obj(path: impl AsRef<Path>) -> Result<MeshGeometry, MeshError> {
    let path = path.as_ref();

    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .map_err(|e| MeshError::Parse(e.to_string()))?;

    if models.is_empty() {
        return Err(MeshError::EmptyMesh);
    }

    let mut geometry = MeshGeometry::new(mesh_name(path));

    for model in &models {
        let mesh = &model.mesh;

        let vertices: Vec<[f32; 3]> = mesh
            .positions
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();

        // single_index guarantees normals line up with positions when present
        let normals: Vec<[f32; 3]> = if mesh.normals.len() == mesh.positions.len() {
            mesh.normals
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect()
        } else {
            calculate_vertex_normals(&vertices, &mesh.indices)
        };

        geometry.append(&vertices, &normals, &mesh.indices);
    }

    if geometry.is_empty() {
        return Err(MeshError::EmptyMesh);
    }
    Ok(geometry)
}
