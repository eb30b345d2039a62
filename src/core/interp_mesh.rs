//! Mesh vertex and camera interpolation.
//!
//! Same linear blend as the keypoints, applied to dense vertex arrays.
//! Faces are topology and never blended.

use glam::Vec3;
use log::warn;

use crate::entities::FrameRecord;

/// Blended mesh payload
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshBlend {
    pub vertices: Vec<Vec3>,
    pub faces: Vec<[u32; 3]>,
    pub camera_translation: Option<Vec3>,
}

/// Blend the mesh of two bracketing records at `t` (clamped to `[0, 1]`).
///
/// On a vertex count mismatch the `before` mesh is used unblended (or `after`
/// when `before` carries none) and a warning is logged.
pub fn interpolate_mesh(before: &FrameRecord, after: &FrameRecord, t: f32) -> MeshBlend {
    let t = t.clamp(0.0, 1.0);
    let bv = &before.mesh_vertices;
    let av = &after.mesh_vertices;

    let vertices = if bv.len() == av.len() {
        bv.iter().zip(av.iter()).map(|(b, a)| b.lerp(*a, t)).collect()
    } else {
        warn!(
            "Vertex count mismatch between frames {} ({}) and {} ({}), holding {}",
            before.frame_index,
            bv.len(),
            after.frame_index,
            av.len(),
            if bv.is_empty() { "after" } else { "before" }
        );
        if bv.is_empty() { av.clone() } else { bv.clone() }
    };

    let faces = if before.mesh_vertices.len() == vertices.len() {
        before.mesh_faces.clone()
    } else if after.mesh_vertices.len() == vertices.len() {
        after.mesh_faces.clone()
    } else {
        Vec::new()
    };

    let camera_translation = match (before.camera_translation, after.camera_translation) {
        (Some(b), Some(a)) => Some(b.lerp(a, t)),
        (b, a) => b.or(a),
    };

    MeshBlend {
        vertices,
        faces,
        camera_translation,
    }
}

/// Frozen copy of one record's mesh
pub fn duplicate_mesh(source: &FrameRecord) -> MeshBlend {
    MeshBlend {
        vertices: source.mesh_vertices.clone(),
        faces: source.mesh_faces.clone(),
        camera_translation: source.camera_translation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(idx: i32, verts: Vec<Vec3>, faces: Vec<[u32; 3]>) -> FrameRecord {
        FrameRecord::new(idx, idx as f64 * 33.3).with_mesh(verts, faces)
    }

    #[test]
    fn test_vertices_blend_linearly() {
        let b = rec(0, vec![Vec3::ZERO, Vec3::ONE], vec![[0, 1, 1]]);
        let a = rec(4, vec![Vec3::splat(4.0), Vec3::splat(5.0)], vec![[1, 0, 0]]);
        let out = interpolate_mesh(&b, &a, 0.25);
        assert_eq!(out.vertices, vec![Vec3::ONE, Vec3::splat(2.0)]);
        // Both match: before wins
        assert_eq!(out.faces, vec![[0, 1, 1]]);
    }

    #[test]
    fn test_endpoints() {
        let b = rec(0, vec![Vec3::new(1.0, 2.0, 3.0)], vec![]);
        let a = rec(2, vec![Vec3::new(-1.0, 0.5, 9.0)], vec![]);
        assert_eq!(interpolate_mesh(&b, &a, 0.0).vertices, b.mesh_vertices);
        let at1 = interpolate_mesh(&b, &a, 1.0).vertices;
        assert!(at1[0].abs_diff_eq(a.mesh_vertices[0], 1e-6));
    }

    #[test]
    fn test_mismatch_prefers_before() {
        let b = rec(0, vec![Vec3::X; 3], vec![[0, 1, 2]]);
        let a = rec(2, vec![Vec3::Y; 5], vec![[0, 1, 2], [2, 3, 4]]);
        let out = interpolate_mesh(&b, &a, 0.5);
        assert_eq!(out.vertices, vec![Vec3::X; 3]);
        assert_eq!(out.faces, vec![[0, 1, 2]]);
    }

    #[test]
    fn test_mismatch_with_empty_before_uses_after() {
        let b = rec(0, vec![], vec![]);
        let a = rec(2, vec![Vec3::Y; 2], vec![[0, 1, 1]]);
        let out = interpolate_mesh(&b, &a, 0.5);
        assert_eq!(out.vertices, vec![Vec3::Y; 2]);
        assert_eq!(out.faces, vec![[0, 1, 1]]);
    }

    #[test]
    fn test_camera_blend_and_copy() {
        let b = rec(0, vec![], vec![]).with_camera(Vec3::new(0.0, 0.0, 10.0));
        let a = rec(2, vec![], vec![]).with_camera(Vec3::new(2.0, 0.0, 20.0));
        assert_eq!(
            interpolate_mesh(&b, &a, 0.5).camera_translation,
            Some(Vec3::new(1.0, 0.0, 15.0))
        );

        let bare = rec(2, vec![], vec![]);
        assert_eq!(
            interpolate_mesh(&bare, &a, 0.5).camera_translation,
            a.camera_translation
        );
        assert_eq!(interpolate_mesh(&bare, &bare, 0.5).camera_translation, None);
    }

    #[test]
    fn test_duplicate_mesh() {
        let src = rec(3, vec![Vec3::Z], vec![[0, 0, 0]]).with_camera(Vec3::ONE);
        let out = duplicate_mesh(&src);
        assert_eq!(out.vertices, src.mesh_vertices);
        assert_eq!(out.faces, src.mesh_faces);
        assert_eq!(out.camera_translation, Some(Vec3::ONE));
    }
}
