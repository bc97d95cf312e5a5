//! Materials: PBR parameters, variant bits and the GPU binding set

use crate::backend::*;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// PBR surface parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub emissive_strength: f32,
    /// Fragments with alpha below this are discarded by `discard` variants
    pub alpha_cutoff: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            emissive: Vec3::ZERO,
            emissive_strength: 1.0,
            alpha_cutoff: 0.5,
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_base_color(mut self, color: Vec4) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic;
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    pub fn with_emissive(mut self, emissive: Vec3, strength: f32) -> Self {
        self.emissive = emissive;
        self.emissive_strength = strength;
        self
    }

    pub fn uniform_data(&self) -> MaterialUniformData {
        MaterialUniformData {
            base_color: self.base_color,
            metallic_roughness: [self.metallic, self.roughness, self.alpha_cutoff, 0.0],
            emissive: self.emissive.extend(self.emissive_strength),
        }
    }

    pub fn plastic(color: Vec3) -> Self {
        Self::new("plastic")
            .with_base_color(color.extend(1.0))
            .with_roughness(0.4)
    }

    pub fn metal(color: Vec3, roughness: f32) -> Self {
        Self::new("metal")
            .with_base_color(color.extend(1.0))
            .with_metallic(1.0)
            .with_roughness(roughness)
    }

    pub fn gold() -> Self {
        Self::metal(Vec3::new(1.0, 0.766, 0.336), 0.3)
    }

    pub fn copper() -> Self {
        Self::metal(Vec3::new(0.955, 0.637, 0.538), 0.4)
    }

    pub fn glass() -> Self {
        Self::new("glass")
            .with_base_color(Vec4::new(1.0, 1.0, 1.0, 0.3))
            .with_roughness(0.1)
    }

    pub fn emissive(color: Vec3, strength: f32) -> Self {
        Self::new("emissive").with_emissive(color, strength)
    }
}

/// Material uniform data for GPU
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialUniformData {
    pub base_color: Vec4,
    pub metallic_roughness: [f32; 4], // x=metallic, y=roughness, z=alpha cutoff
    pub emissive: Vec4,               // xyz=emissive, w=strength
}

/// 4-bit material variant key, part of the pipeline key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MaterialVariant(u8);

impl MaterialVariant {
    pub const TRANSPARENT: Self = Self(1 << 0);
    pub const DOUBLE_SIDED: Self = Self(1 << 1);
    pub const DISCARD: Self = Self(1 << 2);
    pub const UNLIT: Self = Self(1 << 3);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0xF)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn transparent(&self) -> bool {
        self.contains(Self::TRANSPARENT)
    }

    pub fn double_sided(&self) -> bool {
        self.contains(Self::DOUBLE_SIDED)
    }

    pub fn discard(&self) -> bool {
        self.contains(Self::DISCARD)
    }

    pub fn unlit(&self) -> bool {
        self.contains(Self::UNLIT)
    }
}

impl std::ops::BitOr for MaterialVariant {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for MaterialVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

static NEXT_MATERIAL_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a `RenderMaterial`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(u64);

/// An immutable material ready for drawing.
///
/// Owns a uniform buffer with the packed `MaterialUniformData` and the bind
/// group (group 2) that exposes it.
#[derive(Debug)]
pub struct RenderMaterial {
    id: MaterialId,
    params: Material,
    variant: MaterialVariant,
    uniform_buffer: BufferHandle,
    bind_group: BindGroupHandle,
}

impl RenderMaterial {
    pub fn builder(params: Material) -> RenderMaterialBuilder {
        RenderMaterialBuilder {
            params,
            variant: MaterialVariant::empty(),
        }
    }

    pub fn id(&self) -> MaterialId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.params.name
    }

    pub fn params(&self) -> &Material {
        &self.params
    }

    pub fn variant(&self) -> MaterialVariant {
        self.variant
    }

    pub fn bind_group(&self) -> BindGroupHandle {
        self.bind_group
    }

    pub fn uniform_buffer(&self) -> BufferHandle {
        self.uniform_buffer
    }
}

pub struct RenderMaterialBuilder {
    params: Material,
    variant: MaterialVariant,
}

impl RenderMaterialBuilder {
    fn flag(mut self, flag: MaterialVariant, enabled: bool) -> Self {
        if enabled {
            self.variant = self.variant | flag;
        } else {
            self.variant = MaterialVariant(self.variant.0 & !flag.0);
        }
        self
    }

    pub fn transparent(self, enabled: bool) -> Self {
        self.flag(MaterialVariant::TRANSPARENT, enabled)
    }

    pub fn double_sided(self, enabled: bool) -> Self {
        self.flag(MaterialVariant::DOUBLE_SIDED, enabled)
    }

    pub fn discard(self, enabled: bool) -> Self {
        self.flag(MaterialVariant::DISCARD, enabled)
    }

    pub fn unlit(self, enabled: bool) -> Self {
        self.flag(MaterialVariant::UNLIT, enabled)
    }

    /// Upload the uniform block and create the material bind group
    pub fn build(
        self,
        backend: &mut dyn GraphicsBackend,
        layout: BindGroupLayoutHandle,
    ) -> BackendResult<RenderMaterial> {
        let uniform = self.params.uniform_data();
        let uniform_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("Material '{}'", self.params.name)),
                size: std::mem::size_of::<MaterialUniformData>() as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
            bytemuck::bytes_of(&uniform),
        )?;
        let bind_group =
            match backend.create_bind_group(layout, &[(0, BindGroupEntry::buffer(uniform_buffer))]) {
                Ok(bind_group) => bind_group,
                Err(e) => {
                    backend.destroy_buffer(uniform_buffer);
                    return Err(e);
                }
            };

        Ok(RenderMaterial {
            id: MaterialId(NEXT_MATERIAL_ID.fetch_add(1, Ordering::Relaxed)),
            params: self.params,
            variant: self.variant,
            uniform_buffer,
            bind_group,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material_layout(backend: &mut RecordingBackend) -> BindGroupLayoutHandle {
        backend
            .create_bind_group_layout(&[BindGroupLayoutEntry::new(
                0,
                ShaderStageFlags::VERTEX_FRAGMENT,
                BindingType::UniformBuffer,
            )])
            .unwrap()
    }

    #[test]
    fn test_variant_bits() {
        let mut backend = RecordingBackend::new(1, 1);
        let layout = material_layout(&mut backend);
        let material = RenderMaterial::builder(Material::glass())
            .transparent(true)
            .double_sided(true)
            .build(&mut backend, layout)
            .unwrap();
        assert_eq!(material.variant().bits(), 0b0011);
        assert!(material.variant().transparent());
        assert!(!material.variant().unlit());

        let toggled = RenderMaterial::builder(Material::default())
            .unlit(true)
            .discard(true)
            .unlit(false)
            .build(&mut backend, layout)
            .unwrap();
        assert_eq!(toggled.variant(), MaterialVariant::DISCARD);
        assert_ne!(material.id(), toggled.id());
    }

    #[test]
    fn test_uniform_upload() {
        let mut backend = RecordingBackend::new(1, 1);
        let layout = material_layout(&mut backend);
        let material = RenderMaterial::builder(Material::gold())
            .build(&mut backend, layout)
            .unwrap();
        let data = backend.buffer_data(material.uniform_buffer()).unwrap();
        let uniform: MaterialUniformData = bytemuck::pod_read_unaligned(&data[..48]);
        assert_eq!(uniform.metallic_roughness[0], 1.0);
        assert!(backend.is_bind_group_live(material.bind_group()));
    }
}
