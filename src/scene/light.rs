//! Lights and their GPU packing

use crate::backend::*;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// Omnidirectional light with a finite radius
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            radius,
        }
    }
}

/// Cone light; angles are half-angles in radians
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotLight {
    pub position: Vec3,
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
    pub inner_angle: f32,
    pub outer_angle: f32,
}

/// Light at infinity, like the sun
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.5, -1.0, -0.5).normalize(),
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    Point(PointLight),
    Spot(SpotLight),
    Directional(DirectionalLight),
}

impl Light {
    pub fn is_directional(&self) -> bool {
        matches!(self, Light::Directional(_))
    }

    pub fn to_gpu_data(&self) -> GpuLightData {
        match self {
            Light::Point(light) => GpuLightData {
                position: light.position.extend(light.radius),
                color_intensity: light.color.extend(light.intensity),
                direction_type: Vec4::new(0.0, 0.0, 0.0, 0.0),
                spot_params: Vec4::ZERO,
            },
            Light::Spot(light) => GpuLightData {
                position: light.position.extend(light.radius),
                color_intensity: light.color.extend(light.intensity),
                direction_type: light.direction.normalize_or_zero().extend(1.0),
                spot_params: Vec4::new(light.inner_angle.cos(), light.outer_angle.cos(), 0.0, 0.0),
            },
            Light::Directional(light) => GpuLightData {
                position: Vec4::ZERO,
                color_intensity: light.color.extend(light.intensity),
                direction_type: light.direction.normalize_or_zero().extend(2.0),
                spot_params: Vec4::ZERO,
            },
        }
    }
}

impl From<PointLight> for Light {
    fn from(light: PointLight) -> Self {
        Light::Point(light)
    }
}

impl From<SpotLight> for Light {
    fn from(light: SpotLight) -> Self {
        Light::Spot(light)
    }
}

impl From<DirectionalLight> for Light {
    fn from(light: DirectionalLight) -> Self {
        Light::Directional(light)
    }
}

/// GPU-friendly light data structure
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuLightData {
    /// xyz = position, w = radius
    pub position: Vec4,
    /// xyz = color, w = intensity
    pub color_intensity: Vec4,
    /// xyz = direction, w = light type (0=point, 1=spot, 2=directional)
    pub direction_type: Vec4,
    /// x = cos(inner_angle), y = cos(outer_angle)
    pub spot_params: Vec4,
}

/// Lighting uniform block (group 0, binding 2)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightingUniformData {
    /// rgb = ambient color, a = environment intensity
    pub ambient: Vec4,
    /// x = all lights, y = directional lights
    pub counts: [u32; 4],
    /// x = 1 when an environment map is bound
    pub params: [f32; 4],
}

/// Light counts uploaded for the current frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightCounts {
    pub directional: u32,
    pub local: u32,
}

impl LightCounts {
    pub fn total(&self) -> u32 {
        self.directional + self.local
    }
}

/// Packs scene lights into a fixed-size storage buffer.
///
/// Directional lights are stored first, then point and spot lights, so the
/// lighting pass can address each group as a contiguous instance range.
#[derive(Debug)]
pub struct LightManager {
    max_lights: u32,
    light_buffer: BufferHandle,
    uniform_buffer: BufferHandle,
    packed: Vec<GpuLightData>,
    counts: LightCounts,
}

impl LightManager {
    pub fn new(backend: &mut dyn GraphicsBackend, max_lights: u32) -> BackendResult<Self> {
        let max_lights = max_lights.max(1);
        let light_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("Lights".into()),
            size: max_lights as u64 * std::mem::size_of::<GpuLightData>() as u64,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?;
        let uniform_buffer = match backend.create_buffer(&BufferDescriptor {
            label: Some("Lighting uniforms".into()),
            size: std::mem::size_of::<LightingUniformData>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        }) {
            Ok(buffer) => buffer,
            Err(e) => {
                backend.destroy_buffer(light_buffer);
                return Err(e);
            }
        };

        Ok(Self {
            max_lights,
            light_buffer,
            uniform_buffer,
            packed: Vec::with_capacity(max_lights as usize),
            counts: LightCounts::default(),
        })
    }

    /// Pack and upload `lights`, dropping any beyond the buffer capacity
    pub fn update(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        lights: &[Light],
        ambient: Vec3,
        environment_intensity: Option<f32>,
    ) -> LightCounts {
        if lights.len() > self.max_lights as usize {
            log::warn!(
                "{} lights submitted, only the first {} are used",
                lights.len(),
                self.max_lights
            );
        }

        self.packed.clear();
        let directional = lights.iter().filter(|l| l.is_directional());
        let local = lights.iter().filter(|l| !l.is_directional());
        for light in directional.chain(local).take(self.max_lights as usize) {
            self.packed.push(light.to_gpu_data());
        }

        let directional = self
            .packed
            .iter()
            .take_while(|l| l.direction_type.w == 2.0)
            .count() as u32;
        self.counts = LightCounts {
            directional,
            local: self.packed.len() as u32 - directional,
        };

        let uniform = LightingUniformData {
            ambient: ambient.extend(environment_intensity.unwrap_or(0.0)),
            counts: [self.counts.total(), directional, 0, 0],
            params: [environment_intensity.map_or(0.0, |_| 1.0), 0.0, 0.0, 0.0],
        };
        if !self.packed.is_empty() {
            backend.write_buffer(self.light_buffer, 0, bytemuck::cast_slice(&self.packed));
        }
        backend.write_buffer(self.uniform_buffer, 0, bytemuck::bytes_of(&uniform));
        self.counts
    }

    pub fn counts(&self) -> LightCounts {
        self.counts
    }

    /// Lights uploaded by the last `update`, in GPU order
    pub fn packed(&self) -> &[GpuLightData] {
        &self.packed
    }

    pub fn light_buffer(&self) -> BufferHandle {
        self.light_buffer
    }

    pub fn uniform_buffer(&self) -> BufferHandle {
        self.uniform_buffer
    }

    pub fn max_lights(&self) -> u32 {
        self.max_lights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f32) -> Light {
        PointLight::new(Vec3::new(x, 0.0, 0.0), Vec3::ONE, 1.0, 5.0).into()
    }

    #[test]
    fn test_gpu_layout() {
        assert_eq!(std::mem::size_of::<GpuLightData>(), 64);
        assert_eq!(std::mem::size_of::<LightingUniformData>(), 48);
    }

    #[test]
    fn test_directional_lights_packed_first() {
        let mut backend = RecordingBackend::new(1, 1);
        let mut manager = LightManager::new(&mut backend, 8).unwrap();
        let counts = manager.update(
            &mut backend,
            &[point(1.0), DirectionalLight::default().into(), point(2.0)],
            Vec3::splat(0.1),
            None,
        );

        assert_eq!(counts, LightCounts { directional: 1, local: 2 });
        assert_eq!(manager.packed()[0].direction_type.w, 2.0);
        assert_eq!(manager.packed()[1].position.x, 1.0);
        assert_eq!(manager.packed()[2].position.x, 2.0);

        let data = backend.buffer_data(manager.uniform_buffer()).unwrap();
        let uniform: LightingUniformData = bytemuck::pod_read_unaligned(data);
        assert_eq!(uniform.counts[0], 3);
        assert_eq!(uniform.counts[1], 1);
    }

    #[test]
    fn test_truncates_to_capacity() {
        let mut backend = RecordingBackend::new(1, 1);
        let mut manager = LightManager::new(&mut backend, 2).unwrap();
        let lights: Vec<Light> = (0..5).map(|i| point(i as f32)).collect();
        let counts = manager.update(&mut backend, &lights, Vec3::ZERO, Some(1.0));
        assert_eq!(counts.total(), 2);
        assert_eq!(backend.out_of_bounds_writes(), 0);
    }
}
