//! Coordinate conversions between the pose model's camera space and the
//! viewer's right-handed, Y-up space.

use glam::{Vec2, Vec3};

/// Default focal length of the mesh regressor (pixels)
pub const DEFAULT_FOCAL_LENGTH: f32 = 5000.0;

/// Rotate mesh vertices 180 degrees about X (negates Y and Z).
pub fn flip_mesh_x180(vertices: &mut [Vec3]) {
    for v in vertices.iter_mut() {
        v.y = -v.y;
        v.z = -v.z;
    }
}

/// Mirror the camera translation along X.
pub fn flip_camera_x(translation: Vec3) -> Vec3 {
    Vec3::new(-translation.x, translation.y, translation.z)
}

/// Convert weak-perspective camera params predicted on a square crop
/// (`[scale, tx, ty]`) into a full-image camera translation.
///
/// `box_center` and `img_size` are in pixels, `box_size` is the crop side.
pub fn cam_crop_to_full(
    cam_bbox: Vec3,
    box_center: Vec2,
    box_size: f32,
    img_size: Vec2,
    focal_length: f32,
) -> Vec3 {
    let half = img_size / 2.0;
    let bs = box_size * cam_bbox.x + 1e-9;
    let tz = 2.0 * focal_length / bs;
    let tx = 2.0 * (box_center.x - half.x) / bs + cam_bbox.y;
    let ty = 2.0 * (box_center.y - half.y) / bs + cam_bbox.z;
    Vec3::new(tx, ty, tz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_mesh_negates_y_and_z() {
        let mut verts = vec![Vec3::new(1.0, 2.0, 3.0), Vec3::new(-1.0, 0.0, -4.0)];
        flip_mesh_x180(&mut verts);
        assert_eq!(verts[0], Vec3::new(1.0, -2.0, -3.0));
        assert_eq!(verts[1], Vec3::new(-1.0, 0.0, 4.0));
    }

    #[test]
    fn test_flip_camera_x() {
        assert_eq!(flip_camera_x(Vec3::new(0.3, 0.1, 40.0)), Vec3::new(-0.3, 0.1, 40.0));
    }

    #[test]
    fn test_cam_crop_to_full_centered_box() {
        // Box centred in a 1000x1000 image: translation only carries crop offsets.
        let cam = cam_crop_to_full(
            Vec3::new(0.5, 0.1, -0.2),
            Vec2::new(500.0, 500.0),
            200.0,
            Vec2::new(1000.0, 1000.0),
            DEFAULT_FOCAL_LENGTH,
        );
        assert!((cam.x - 0.1).abs() < 1e-5);
        assert!((cam.y + 0.2).abs() < 1e-5);
        // tz = 2 * 5000 / (200 * 0.5)
        assert!((cam.z - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_cam_crop_to_full_offset_box() {
        let cam = cam_crop_to_full(
            Vec3::new(1.0, 0.0, 0.0),
            Vec2::new(600.0, 400.0),
            100.0,
            Vec2::new(1000.0, 800.0),
            DEFAULT_FOCAL_LENGTH,
        );
        // tx = 2 * (600 - 500) / 100, ty = 2 * (400 - 400) / 100
        assert!((cam.x - 2.0).abs() < 1e-5);
        assert!(cam.y.abs() < 1e-5);
    }
}
