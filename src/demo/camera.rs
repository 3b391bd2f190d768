// First-person camera, right-handed, depth range 0..1

use glam::{EulerRot, Mat4, Quat, Vec2, Vec3};

#[derive(Debug, Clone, Copy, Default)]
pub struct MoveKeys {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
}

impl MoveKeys {
    fn any(&self) -> bool {
        self.forward || self.back || self.left || self.right
    }
}

#[derive(Debug, Clone)]
pub struct FirstPersonCamera {
    pub keys: MoveKeys,
    /// Mouse look is active while set
    pub looking: bool,
    pub move_speed: f32,
    pub mouse_speed: f32,
    position: Vec3,
    /// World-to-view rotation
    orientation: Quat,
    mouse_position: Vec2,
    projection: Mat4,
}

impl FirstPersonCamera {
    pub fn new(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let orientation = Quat::from_mat4(&Mat4::look_at_rh(position, target, up)).normalize();
        Self {
            keys: MoveKeys::default(),
            looking: false,
            move_speed: 1.0,
            mouse_speed: 4.0,
            position,
            orientation,
            mouse_position: Vec2::ZERO,
            projection: Mat4::IDENTITY,
        }
    }

    /// Y is flipped for Vulkan clip space.
    pub fn set_perspective(&mut self, fov_y: f32, aspect: f32, near: f32, far: f32) {
        let mut projection = Mat4::perspective_rh(fov_y, aspect, near, far);
        projection.y_axis.y *= -1.0;
        self.projection = projection;
    }

    /// `mouse` is the cursor position normalized to the window size.
    pub fn update(&mut self, delta_seconds: f32, mouse: Vec2) {
        if self.looking {
            let d = mouse - self.mouse_position;
            let turn = Quat::from_euler(
                EulerRot::XYZ,
                -self.mouse_speed * d.y,
                self.mouse_speed * d.x,
                0.0,
            );
            self.orientation = (turn * self.orientation).normalize();
        }
        self.mouse_position = mouse;

        if !self.keys.any() {
            return;
        }

        let rotation = Mat4::from_quat(self.orientation);
        let right = rotation.row(0).truncate();
        let up = rotation.row(1).truncate();
        let forward = up.cross(right);

        let mut dir = Vec3::ZERO;
        if self.keys.forward {
            dir += forward;
        }
        if self.keys.back {
            dir -= forward;
        }
        if self.keys.left {
            dir -= right;
        }
        if self.keys.right {
            dir += right;
        }

        // Opposite keys cancel out
        if let Some(dir) = dir.try_normalize() {
            self.position += dir * delta_seconds * self.move_speed;
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn view(&self) -> Mat4 {
        Mat4::from_quat(self.orientation) * Mat4::from_translation(-self.position)
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> FirstPersonCamera {
        FirstPersonCamera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y)
    }

    #[test]
    fn test_target_is_straight_ahead() {
        let p = camera().view().transform_point3(Vec3::ZERO);
        assert!(p.abs_diff_eq(Vec3::new(0.0, 0.0, -5.0), 1e-5));
    }

    #[test]
    fn test_forward_moves_toward_target() {
        let mut cam = camera();
        cam.keys.forward = true;
        cam.update(1.0, Vec2::ZERO);
        assert!(cam.position().abs_diff_eq(Vec3::new(0.0, 0.0, 4.0), 1e-5));
    }

    #[test]
    fn test_opposite_keys_cancel() {
        let mut cam = camera();
        cam.keys.left = true;
        cam.keys.right = true;
        cam.update(1.0, Vec2::ZERO);
        assert_eq!(cam.position(), Vec3::new(0.0, 0.0, 5.0));
    }

    #[test]
    fn test_mouse_ignored_unless_looking() {
        let mut cam = camera();
        let before = cam.view();
        cam.update(0.016, Vec2::new(0.3, 0.1));
        assert_eq!(cam.view(), before);

        cam.looking = true;
        cam.update(0.016, Vec2::new(0.5, 0.1));
        assert_ne!(cam.view(), before);
    }

    #[test]
    fn test_perspective_flips_y() {
        let mut cam = camera();
        cam.set_perspective(45f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
        assert!(cam.projection().y_axis.y < 0.0);

        // Point above the view axis lands in the upper half (negative y)
        let clip = cam.view_projection() * Vec3::new(0.0, 1.0, 0.0).extend(1.0);
        assert!(clip.y / clip.w < 0.0);
    }
}
