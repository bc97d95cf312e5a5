//! Equirectangular environment map for image based ambient and the skybox

use crate::backend::*;
use glam::Vec3;
use image::{DynamicImage, GenericImageView};

/// Environment texture bound at group 2 of the lighting and skybox passes
#[derive(Debug)]
pub struct Environment {
    texture: TextureHandle,
    view: TextureViewHandle,
    sampler: SamplerHandle,
    bind_group: BindGroupHandle,
    intensity: f32,
    width: u32,
    height: u32,
}

impl Environment {
    /// Upload RGBA8 sRGB texels laid out as an equirectangular map
    pub fn from_rgba8(
        backend: &mut dyn GraphicsBackend,
        layout: BindGroupLayoutHandle,
        width: u32,
        height: u32,
        pixels: &[u8],
        intensity: f32,
    ) -> BackendResult<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(BackendError::TextureCreationFailed(format!(
                "environment expects {expected} bytes for {width}x{height}, got {}",
                pixels.len()
            )));
        }

        let texture = backend.create_texture(&TextureDescriptor {
            label: Some("Environment".into()),
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            ..Default::default()
        })?;
        backend.write_texture(texture, pixels, width, height);

        let view = match backend.create_texture_view(texture) {
            Ok(view) => view,
            Err(e) => {
                backend.destroy_texture(texture);
                return Err(e);
            }
        };
        let bound = backend
            .create_sampler(&SamplerDescriptor {
                label: Some("Environment sampler".into()),
                address_mode_u: AddressMode::Repeat,
                ..Default::default()
            })
            .and_then(|sampler| {
                backend
                    .create_bind_group(
                        layout,
                        &[
                            (0, BindGroupEntry::Texture(view)),
                            (1, BindGroupEntry::Sampler(sampler)),
                        ],
                    )
                    .map(|bind_group| (sampler, bind_group))
            });
        let (sampler, bind_group) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                backend.destroy_texture_view(view);
                backend.destroy_texture(texture);
                return Err(e);
            }
        };

        log::debug!("Environment uploaded ({width}x{height}, intensity {intensity})");
        Ok(Self {
            texture,
            view,
            sampler,
            bind_group,
            intensity,
            width,
            height,
        })
    }

    /// Upload a decoded image, converted to RGBA8
    pub fn from_image(
        backend: &mut dyn GraphicsBackend,
        layout: BindGroupLayoutHandle,
        image: &DynamicImage,
        intensity: f32,
    ) -> BackendResult<Self> {
        let (width, height) = image.dimensions();
        let pixels = image.to_rgba8().into_raw();
        Self::from_rgba8(backend, layout, width, height, &pixels, intensity)
    }

    /// Vertical sky gradient, horizon to zenith, with a darker ground
    pub fn gradient(
        backend: &mut dyn GraphicsBackend,
        layout: BindGroupLayoutHandle,
        zenith: Vec3,
        horizon: Vec3,
        ground: Vec3,
        intensity: f32,
    ) -> BackendResult<Self> {
        const WIDTH: u32 = 8;
        const HEIGHT: u32 = 64;
        let mut pixels = Vec::with_capacity((WIDTH * HEIGHT * 4) as usize);
        for y in 0..HEIGHT {
            // v = 0 at the zenith, 0.5 at the horizon
            let v = (y as f32 + 0.5) / HEIGHT as f32;
            let color = if v < 0.5 {
                horizon.lerp(zenith, 1.0 - v * 2.0)
            } else {
                horizon.lerp(ground, ((v - 0.5) * 4.0).min(1.0))
            };
            let texel = to_srgb8(color);
            for _ in 0..WIDTH {
                pixels.extend_from_slice(&texel);
            }
        }
        Self::from_rgba8(backend, layout, WIDTH, HEIGHT, &pixels, intensity)
    }

    /// 1x1 black map bound when a frame has no environment
    pub fn fallback(
        backend: &mut dyn GraphicsBackend,
        layout: BindGroupLayoutHandle,
    ) -> BackendResult<Self> {
        Self::from_rgba8(backend, layout, 1, 1, &[0, 0, 0, 255], 0.0)
    }

    pub fn bind_group(&self) -> BindGroupHandle {
        self.bind_group
    }

    pub fn sampler(&self) -> SamplerHandle {
        self.sampler
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_bind_group(self.bind_group);
        backend.destroy_texture_view(self.view);
        backend.destroy_texture(self.texture);
    }
}

fn to_srgb8(linear: Vec3) -> [u8; 4] {
    let encode = |c: f32| {
        let c = c.clamp(0.0, 1.0);
        let s = if c <= 0.003_130_8 {
            c * 12.92
        } else {
            1.055 * c.powf(1.0 / 2.4) - 0.055
        };
        (s * 255.0).round() as u8
    };
    [encode(linear.x), encode(linear.y), encode(linear.z), 255]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn environment_layout(backend: &mut RecordingBackend) -> BindGroupLayoutHandle {
        backend
            .create_bind_group_layout(&[
                BindGroupLayoutEntry::new(
                    0,
                    ShaderStageFlags::FRAGMENT,
                    BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                    },
                ),
                BindGroupLayoutEntry::new(1, ShaderStageFlags::FRAGMENT, BindingType::Sampler { filtering: true }),
            ])
            .unwrap()
    }

    #[test]
    fn test_rejects_mismatched_pixel_data() {
        let mut backend = RecordingBackend::new(1, 1);
        let layout = environment_layout(&mut backend);
        let result = Environment::from_rgba8(&mut backend, layout, 2, 2, &[0; 8], 1.0);
        assert!(matches!(result, Err(BackendError::TextureCreationFailed(_))));
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_from_image_converts_to_rgba8() {
        let mut backend = RecordingBackend::new(1, 1);
        let layout = environment_layout(&mut backend);
        let image = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(4, 2, image::Rgb([255, 128, 0])));
        let environment = Environment::from_image(&mut backend, layout, &image, 2.0).unwrap();
        assert_eq!(environment.size(), (4, 2));
        assert_eq!(environment.intensity(), 2.0);
        assert_eq!(backend.live_texture_count(), 1);
    }

    #[test]
    fn test_gradient_and_fallback() {
        let mut backend = RecordingBackend::new(1, 1);
        let layout = environment_layout(&mut backend);
        let sky = Environment::gradient(
            &mut backend,
            layout,
            Vec3::new(0.2, 0.4, 0.9),
            Vec3::splat(0.8),
            Vec3::splat(0.1),
            0.5,
        )
        .unwrap();
        assert_eq!(sky.size(), (8, 64));
        assert!(backend.is_bind_group_live(sky.bind_group()));

        let fallback = Environment::fallback(&mut backend, layout).unwrap();
        assert_eq!(fallback.intensity(), 0.0);
        fallback.destroy(&mut backend);
        assert_eq!(backend.live_texture_count(), 1);
    }

    #[test]
    fn test_srgb_encoding() {
        assert_eq!(to_srgb8(Vec3::ZERO), [0, 0, 0, 255]);
        assert_eq!(to_srgb8(Vec3::ONE), [255, 255, 255, 255]);
        assert_eq!(to_srgb8(Vec3::splat(0.5))[0], 188);
    }
}
