//! Perspective camera and the `CameraUniforms` block shared by every pass
//!
//! Depth follows wgpu's 0..1 clip range, so the lighting and SSAO passes can
//! rebuild view-space positions from the depth target with `inv_proj`.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Perspective frustum; `fov_y` is vertical and in radians
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            fov_y: 45f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Projection {
    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }
}

/// Look-at camera handed to `DeferredRenderer::render` each frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO)
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }

    /// Camera on a sphere around `target`; angles in radians
    pub fn orbit(target: Vec3, distance: f32, yaw: f32, pitch: f32) -> Self {
        let (sin_yaw, cos_yaw) = yaw.sin_cos();
        let (sin_pitch, cos_pitch) = pitch.sin_cos();
        let offset = Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw);
        Self::new(target + offset * distance, target)
    }

    /// Keep the aspect ratio in step with the output; zero sizes are ignored
    pub fn set_viewport_size(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.projection.aspect = width as f32 / height as f32;
        }
    }

    pub fn uniform_data(&self) -> CameraUniformData {
        let view = Mat4::look_at_rh(self.position, self.target, self.up);
        let proj = self.projection.matrix();
        CameraUniformData {
            view,
            proj,
            view_proj: proj * view,
            inv_view: view.inverse(),
            inv_proj: proj.inverse(),
            position: self.position.extend(1.0),
            near_far: Vec4::new(self.projection.near, self.projection.far, 0.0, 0.0),
        }
    }
}

/// Mirrors `CameraUniforms` in the WGSL frame bindings
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniformData {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub inv_view: Mat4,
    pub inv_proj: Mat4,
    pub position: Vec4,
    pub near_far: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_block_matches_shader_layout() {
        // five mat4x4 plus two vec4
        assert_eq!(std::mem::size_of::<CameraUniformData>(), 5 * 64 + 2 * 16);
    }

    #[test]
    fn test_orbit_places_camera_on_sphere() {
        let target = Vec3::new(1.0, 0.0, -2.0);
        let camera = Camera::orbit(target, 5.0, 0.3, 0.2);
        assert!(((camera.position - target).length() - 5.0).abs() < 1e-4);
        assert_eq!(camera.target, target);

        let straight_up = Camera::orbit(Vec3::ZERO, 2.0, 0.0, std::f32::consts::FRAC_PI_2);
        assert!(straight_up.position.abs_diff_eq(Vec3::new(0.0, 2.0, 0.0), 1e-5));
    }

    #[test]
    fn test_uniform_inverses_and_clip_planes() {
        let camera = Camera::orbit(Vec3::ZERO, 5.0, 0.3, 0.2);
        let data = camera.uniform_data();
        assert!((data.view * data.inv_view).abs_diff_eq(Mat4::IDENTITY, 1e-4));
        assert!((data.proj * data.inv_proj).abs_diff_eq(Mat4::IDENTITY, 1e-4));
        assert!(data.view_proj.abs_diff_eq(data.proj * data.view, 1e-5));
        assert_eq!(data.position, camera.position.extend(1.0));
        assert_eq!(data.near_far, Vec4::new(0.1, 1000.0, 0.0, 0.0));

        // The target projects to the center of the screen
        let clip = data.view_proj * camera.target.extend(1.0);
        assert!((clip.truncate() / clip.w).truncate().abs_diff_eq(glam::Vec2::ZERO, 1e-5));
    }

    #[test]
    fn test_viewport_size_sets_aspect() {
        let mut camera = Camera::default();
        camera.set_viewport_size(800, 400);
        assert_eq!(camera.projection.aspect, 2.0);
        camera.set_viewport_size(0, 400);
        assert_eq!(camera.projection.aspect, 2.0);
    }
}
