//! Normal calculation utilities for mesh data

use glam::Vec3;

/// Calculate normal for a single triangle
pub fn calculate_triangle_normal(v0: [f32; 3], v1: [f32; 3], v2: [f32; 3]) -> [f32; 3] {
    let e1 = Vec3::from(v1) - Vec3::from(v0);
    let e2 = Vec3::from(v2) - Vec3::from(v0);
    let cross = e1.cross(e2);
    if cross.length_squared() > 0.0 {
        cross.normalize().to_array()
    } else {
        [0.0, 0.0, 1.0]
    }
}

/// Calculate one normal per triangle
pub fn calculate_face_normals(vertices: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    indices
        .chunks_exact(3)
        .map(|tri| {
            calculate_triangle_normal(
                vertices[tri[0] as usize],
                vertices[tri[1] as usize],
                vertices[tri[2] as usize],
            )
        })
        .collect()
}

/// Calculate smooth per-vertex normals by area-weighted accumulation of
/// adjacent face normals
pub fn calculate_vertex_normals(vertices: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut accum = vec![Vec3::ZERO; vertices.len()];

    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        if a >= vertices.len() || b >= vertices.len() || c >= vertices.len() {
            continue;
        }
        let v0 = Vec3::from(vertices[a]);
        // Unnormalized cross product weights by triangle area
        let weighted = (Vec3::from(vertices[b]) - v0).cross(Vec3::from(vertices[c]) - v0);
        accum[a] += weighted;
        accum[b] += weighted;
        accum[c] += weighted;
    }

    accum
        .into_iter()
        .map(|n| {
            if n.length_squared() > 0.0 {
                n.normalize().to_array()
            } else {
                [0.0, 0.0, 1.0]
            }
        })
        .collect()
}
