//! Per-frame scene input
//!
//! The renderer does not own a scene graph. Each frame the caller hands it a
//! flat [`SceneFrame`]: the drawable meshes with their world transforms, the
//! lights and the ambient terms.

mod camera;
mod environment;
mod light;
mod transform;

pub use camera::*;
pub use environment::*;
pub use light::*;
pub use transform::*;

use crate::resources::{RenderGeometry, RenderMaterial};
use glam::{Mat4, Vec3};
use std::sync::Arc;

/// A drawable instance: geometry placed in the world with an optional material
#[derive(Debug, Clone)]
pub struct SceneMesh {
    pub transform: Mat4,
    pub geometry: Arc<RenderGeometry>,
    /// Falls back to the batcher's default material when `None`
    pub material: Option<Arc<RenderMaterial>>,
}

impl SceneMesh {
    pub fn new(geometry: Arc<RenderGeometry>, material: Option<Arc<RenderMaterial>>) -> Self {
        Self {
            transform: Mat4::IDENTITY,
            geometry,
            material,
        }
    }

    pub fn with_transform(mut self, transform: impl Into<Mat4>) -> Self {
        self.transform = transform.into();
        self
    }
}

/// Everything `DeferredRenderer::render` draws in one frame
#[derive(Debug, Clone)]
pub struct SceneFrame {
    pub meshes: Vec<SceneMesh>,
    pub lights: Vec<Light>,
    pub ambient: Vec3,
    pub environment: Option<Arc<Environment>>,
}

impl Default for SceneFrame {
    fn default() -> Self {
        Self {
            meshes: Vec::new(),
            lights: Vec::new(),
            ambient: Vec3::splat(0.03),
            environment: None,
        }
    }
}

impl SceneFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mesh(&mut self, mesh: SceneMesh) {
        self.meshes.push(mesh);
    }

    pub fn add_light(&mut self, light: impl Into<Light>) {
        self.lights.push(light.into());
    }

    /// Add a spot light; angles are half-angles in radians
    #[allow(clippy::too_many_arguments)]
    pub fn add_spot_light(
        &mut self,
        position: Vec3,
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        radius: f32,
        inner_angle: f32,
        outer_angle: f32,
    ) {
        self.lights.push(Light::Spot(SpotLight {
            position,
            direction: direction.normalize_or_zero(),
            color,
            intensity,
            radius,
            inner_angle,
            outer_angle,
        }));
    }

    pub fn add_directional_light(&mut self, direction: Vec3, color: Vec3, intensity: f32) {
        self.lights.push(Light::Directional(DirectionalLight {
            direction: direction.normalize_or_zero(),
            color,
            intensity,
        }));
    }

    /// Number of point and spot lights
    pub fn local_light_count(&self) -> usize {
        self.lights.iter().filter(|l| !l.is_directional()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_helpers() {
        let mut frame = SceneFrame::new();
        frame.add_directional_light(Vec3::new(0.0, -2.0, 0.0), Vec3::ONE, 1.0);
        frame.add_light(PointLight::new(Vec3::ZERO, Vec3::ONE, 2.0, 4.0));
        frame.add_spot_light(Vec3::Y, Vec3::NEG_Y, Vec3::ONE, 1.0, 10.0, 0.3, 0.5);

        assert_eq!(frame.lights.len(), 3);
        assert_eq!(frame.local_light_count(), 2);
        match frame.lights[0] {
            Light::Directional(light) => assert_eq!(light.direction, Vec3::NEG_Y),
            _ => panic!("expected a directional light"),
        }
    }
}
