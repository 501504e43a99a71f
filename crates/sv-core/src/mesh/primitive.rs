//! Box mesh generation, used as a stand-in scene when no asset is configured

use crate::constants::DEFAULT_COLOR;

use super::MeshGeometry;

/// Generate a box centered at the origin
///
/// # Arguments
/// * `size` - [width (x), height (y), depth (z)]
///
/// 24 vertices (4 per face so each face keeps a flat normal), 12 triangles
pub fn generate_box_mesh(size: [f32; 3]) -> MeshGeometry {
    let hx = size[0] / 2.0;
    let hy = size[1] / 2.0;
    let hz = size[2] / 2.0;

    let mut vertices = Vec::with_capacity(24);
    let mut normals = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    let mut add_face = |corners: [[f32; 3]; 4], normal: [f32; 3]| {
        let base = vertices.len() as u32;
        for corner in corners {
            vertices.push(corner);
            normals.push(normal);
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    };

    add_face(
        [[hx, -hy, -hz], [hx, hy, -hz], [hx, hy, hz], [hx, -hy, hz]],
        [1.0, 0.0, 0.0],
    );
    add_face(
        [[-hx, hy, -hz], [-hx, -hy, -hz], [-hx, -hy, hz], [-hx, hy, hz]],
        [-1.0, 0.0, 0.0],
    );
    add_face(
        [[hx, hy, -hz], [-hx, hy, -hz], [-hx, hy, hz], [hx, hy, hz]],
        [0.0, 1.0, 0.0],
    );
    add_face(
        [[-hx, -hy, -hz], [hx, -hy, -hz], [hx, -hy, hz], [-hx, -hy, hz]],
        [0.0, -1.0, 0.0],
    );
    add_face(
        [[-hx, -hy, hz], [hx, -hy, hz], [hx, hy, hz], [-hx, hy, hz]],
        [0.0, 0.0, 1.0],
    );
    add_face(
        [[-hx, hy, -hz], [hx, hy, -hz], [hx, -hy, -hz], [-hx, -hy, -hz]],
        [0.0, 0.0, -1.0],
    );

    MeshGeometry {
        name: "box".to_string(),
        vertices,
        normals,
        indices,
        color: DEFAULT_COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::calculate_face_normals;
    use glam::Vec3;

    #[test]
    fn test_box_counts_and_bounds() {
        let mesh = generate_box_mesh([2.0, 4.0, 6.0]);
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.triangle_count(), 12);
        let bounds = mesh.bounds();
        assert_eq!(bounds.min, Vec3::new(-1.0, -2.0, -3.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_box_winding_matches_normals() {
        let mesh = generate_box_mesh([1.0, 1.0, 1.0]);
        let face_normals = calculate_face_normals(&mesh.vertices, &mesh.indices);
        for (tri, face_normal) in mesh.indices.chunks_exact(3).zip(face_normals) {
            let stored = Vec3::from(mesh.normals[tri[0] as usize]);
            assert!(stored.dot(Vec3::from(face_normal)) > 0.99);
        }
    }
}
