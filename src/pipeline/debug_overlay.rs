//! Debug overlay of intermediate render targets
//!
//! Each requested [`DebugView`] is drawn as a quarter-size tile over the
//! final image, four per row starting at the bottom-left corner.

use super::attachments::{FrameAttachments, ResourceScope};
use super::*;
use crate::shader::FULLSCREEN_VERTEX;

pub const LABEL: &str = "Debug Overlay";

const TILES_PER_ROW: u32 = 4;

/// How the color tile shader maps a texel to the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum TileMode {
    Rgb = 0,
    Alpha = 1,
    Hdr = 2,
}

/// Bind groups for the tiles that could be resolved this frame
#[derive(Debug, Clone, Default)]
pub struct DebugBindings {
    pub tiles: Vec<(DebugView, BindGroupHandle)>,
}

impl DebugBindings {
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Screen rectangle `(x, y, width, height)` of tile `index`
pub fn tile_rect(index: u32, width: u32, height: u32) -> (f32, f32, f32, f32) {
    let tile_w = (width / TILES_PER_ROW).max(1) as f32;
    let tile_h = (height / TILES_PER_ROW).max(1) as f32;
    let column = (index % TILES_PER_ROW) as f32;
    let row = (index / TILES_PER_ROW) as f32;
    let y = (height as f32 - (row + 1.0) * tile_h).max(0.0);
    (column * tile_w, y, tile_w, tile_h)
}

pub struct DebugOverlayPass {
    views: Vec<DebugView>,
    color_layout: BindGroupLayoutHandle,
    depth_layout: BindGroupLayoutHandle,
    mode_params: [BufferHandle; 3],
    color_pipeline: RenderPipelineHandle,
    depth_pipeline: RenderPipelineHandle,
}

impl DebugOverlayPass {
    pub fn new(backend: &mut dyn GraphicsBackend, views: Vec<DebugView>) -> BackendResult<Self> {
        let color_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(
                0,
                ShaderStageFlags::FRAGMENT,
                BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                },
            ),
            BindGroupLayoutEntry::new(1, ShaderStageFlags::FRAGMENT, BindingType::UniformBuffer),
        ])?;
        let depth_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry::new(
            0,
            ShaderStageFlags::FRAGMENT,
            BindingType::Texture {
                sample_type: TextureSampleType::Depth,
            },
        )])?;
        let mode_params = [
            uniform_buffer(backend, "Debug tile rgb", &[TileMode::Rgb as u32, 0, 0, 0])?,
            uniform_buffer(backend, "Debug tile alpha", &[TileMode::Alpha as u32, 0, 0, 0])?,
            uniform_buffer(backend, "Debug tile hdr", &[TileMode::Hdr as u32, 0, 0, 0])?,
        ];

        let output = backend.swapchain_format();
        let color_pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor::fullscreen(
            "Debug tile color",
            format!("{FULLSCREEN_VERTEX}{COLOR_TILE_SHADER}"),
            vec![color_layout],
            vec![ColorTargetState::replace(output)],
        ))?;
        let depth_pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor::fullscreen(
            "Debug tile depth",
            format!("{FULLSCREEN_VERTEX}{DEPTH_TILE_SHADER}"),
            vec![depth_layout],
            vec![ColorTargetState::replace(output)],
        ))?;

        Ok(Self {
            views,
            color_layout,
            depth_layout,
            mode_params,
            color_pipeline,
            depth_pipeline,
        })
    }

    pub fn views(&self) -> &[DebugView] {
        &self.views
    }

    pub fn bind(
        &self,
        scope: &mut ResourceScope<'_>,
        attachments: &FrameAttachments,
    ) -> BackendResult<DebugBindings> {
        let mut tiles = Vec::with_capacity(self.views.len());
        for &view in &self.views {
            let bind_group = match view {
                DebugView::Depth => scope.bind_group(
                    self.depth_layout,
                    &[(0, BindGroupEntry::Texture(attachments.depth.view))],
                )?,
                _ => {
                    let Some((texture, mode)) = color_source(view, attachments) else {
                        log::warn!("Debug view {view:?} is unavailable with the current configuration");
                        continue;
                    };
                    scope.bind_group(
                        self.color_layout,
                        &[
                            (0, BindGroupEntry::Texture(texture)),
                            (1, BindGroupEntry::buffer(self.mode_params[mode as usize])),
                        ],
                    )?
                }
            };
            tiles.push((view, bind_group));
        }
        Ok(DebugBindings { tiles })
    }

    /// Draw every bound tile over `output`; records nothing without tiles
    pub fn record(
        &self,
        backend: &mut dyn GraphicsBackend,
        output: TextureViewHandle,
        bindings: &DebugBindings,
        width: u32,
        height: u32,
    ) -> u32 {
        if bindings.is_empty() {
            return 0;
        }
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(LABEL.into()),
            color_attachments: vec![ColorAttachment::load(output)],
            depth_stencil_attachment: None,
        });
        for (index, (view, bind_group)) in bindings.tiles.iter().enumerate() {
            let (x, y, w, h) = tile_rect(index as u32, width, height);
            backend.set_viewport(x, y, w, h, 0.0, 1.0);
            backend.set_render_pipeline(if *view == DebugView::Depth {
                self.depth_pipeline
            } else {
                self.color_pipeline
            });
            backend.set_bind_group(0, *bind_group);
            backend.draw(0..3, 0..1);
        }
        backend.end_render_pass();
        bindings.tiles.len() as u32
    }
}

fn color_source(view: DebugView, attachments: &FrameAttachments) -> Option<(TextureViewHandle, TileMode)> {
    match view {
        DebugView::Albedo => Some((attachments.albedo.view, TileMode::Rgb)),
        DebugView::Normal => Some((attachments.normal.view, TileMode::Rgb)),
        DebugView::MetalRough => Some((attachments.material.view, TileMode::Rgb)),
        // SSAO lands in the albedo alpha channel
        DebugView::Occlusion => attachments
            .occlusion
            .map(|_| (attachments.albedo.view, TileMode::Alpha)),
        DebugView::Light => Some((attachments.light.view, TileMode::Hdr)),
        DebugView::Bloom => attachments.bloom.first().map(|mip| (mip.view, TileMode::Hdr)),
        DebugView::Depth => None,
    }
}

const COLOR_TILE_SHADER: &str = r#"
@group(0) @binding(0) var tile_texture: texture_2d<f32>;
@group(0) @binding(1) var<uniform> mode: vec4<u32>;

@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let size = vec2<f32>(textureDimensions(tile_texture));
    let coord = clamp(vec2<i32>(input.uv * size), vec2<i32>(0), vec2<i32>(size) - 1);
    let texel = textureLoad(tile_texture, coord, 0);
    var color = texel.rgb;
    switch mode.x {
        case 1u: { color = vec3<f32>(texel.a); }
        case 2u: { color = texel.rgb / (texel.rgb + vec3<f32>(1.0)); }
        default: {}
    }
    return vec4<f32>(color, 1.0);
}
"#;

const DEPTH_TILE_SHADER: &str = r#"
@group(0) @binding(0) var depth_texture: texture_depth_2d;

@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let size = vec2<f32>(textureDimensions(depth_texture));
    let coord = clamp(vec2<i32>(input.uv * size), vec2<i32>(0), vec2<i32>(size) - 1);
    // Stretch the far end of the range so near geometry is visible
    let depth = pow(textureLoad(depth_texture, coord, 0), 32.0);
    return vec4<f32>(vec3<f32>(depth), 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::validate_wgsl;

    #[test]
    fn test_shaders_validate() {
        validate_wgsl(&format!("{FULLSCREEN_VERTEX}{COLOR_TILE_SHADER}")).unwrap();
        validate_wgsl(&format!("{FULLSCREEN_VERTEX}{DEPTH_TILE_SHADER}")).unwrap();
    }

    #[test]
    fn test_tiles_fill_rows_from_bottom_left() {
        assert_eq!(tile_rect(0, 800, 600), (0.0, 450.0, 200.0, 150.0));
        assert_eq!(tile_rect(3, 800, 600), (600.0, 450.0, 200.0, 150.0));
        assert_eq!(tile_rect(4, 800, 600), (0.0, 300.0, 200.0, 150.0));
    }

    #[test]
    fn test_unavailable_views_are_skipped() {
        let mut backend = RecordingBackend::new(32, 32);
        let views = vec![DebugView::Bloom, DebugView::Albedo, DebugView::Occlusion, DebugView::Depth];
        let pass = DebugOverlayPass::new(&mut backend, views).unwrap();
        let config = DeferredConfig {
            ssao: None,
            bloom: None,
            ..Default::default()
        };

        let mut scope = ResourceScope::new(&mut backend);
        let attachments = FrameAttachments::allocate(&mut scope, 32, 32, &config).unwrap();
        let bindings = pass.bind(&mut scope, &attachments).unwrap();
        let _owned = scope.commit();

        let shown: Vec<_> = bindings.tiles.iter().map(|(view, _)| *view).collect();
        assert_eq!(shown, vec![DebugView::Albedo, DebugView::Depth]);

        let output = backend.begin_frame().unwrap().swapchain_view;
        assert_eq!(pass.record(&mut backend, output, &bindings, 32, 32), 2);
        let recorded = backend.pass(LABEL).unwrap();
        assert_eq!(recorded.color_load_ops(), vec![LoadOp::Load]);
    }

    #[test]
    fn test_empty_bindings_record_nothing() {
        let mut backend = RecordingBackend::new(8, 8);
        let pass = DebugOverlayPass::new(&mut backend, Vec::new()).unwrap();
        let output = backend.begin_frame().unwrap().swapchain_view;
        assert_eq!(pass.record(&mut backend, output, &DebugBindings::default(), 8, 8), 0);
        assert!(backend.passes().is_empty());
    }
}
