//! Recording GPU backend for testing and development.
//!
//! This backend doesn't talk to a device. It hands out handles, keeps track
//! of live resources and buffer contents, and records every render pass with
//! the commands issued inside it, so frame structure can be inspected
//! without GPU hardware. Failures can be injected to exercise error paths.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shader::validate_wgsl;
use std::collections::HashMap;

/// A command issued inside a recorded render pass
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    SetPipeline(RenderPipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    SetVertexBuffer { slot: u32, buffer: BufferHandle, offset: u64 },
    SetIndexBuffer { buffer: BufferHandle, offset: u64, format: IndexFormat },
    SetViewport { x: f32, y: f32, width: f32, height: f32 },
    SetScissorRect { x: u32, y: u32, width: u32, height: u32 },
    Draw { vertices: std::ops::Range<u32>, instances: std::ops::Range<u32> },
    DrawIndexed { indices: std::ops::Range<u32>, base_vertex: i32, instances: std::ops::Range<u32> },
}

impl RecordedCommand {
    pub fn is_draw(&self) -> bool {
        matches!(self, RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. })
    }

    /// Instance range of a draw command
    pub fn instances(&self) -> Option<std::ops::Range<u32>> {
        match self {
            RecordedCommand::Draw { instances, .. } | RecordedCommand::DrawIndexed { instances, .. } => {
                Some(instances.clone())
            }
            _ => None,
        }
    }
}

/// A render pass as it was recorded
#[derive(Debug, Clone)]
pub struct RecordedPass {
    pub descriptor: RenderPassDescriptor,
    pub commands: Vec<RecordedCommand>,
}

impl RecordedPass {
    pub fn label(&self) -> &str {
        self.descriptor.label.as_deref().unwrap_or("")
    }

    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_draw()).count()
    }

    pub fn draws(&self) -> impl Iterator<Item = &RecordedCommand> {
        self.commands.iter().filter(|c| c.is_draw())
    }

    pub fn color_load_ops(&self) -> Vec<LoadOp> {
        self.descriptor
            .color_attachments
            .iter()
            .map(|a| a.load_op)
            .collect()
    }
}

#[derive(Debug)]
struct RecordedBuffer {
    descriptor: BufferDescriptor,
    data: Vec<u8>,
}

/// Recording backend
#[derive(Debug)]
pub struct RecordingBackend {
    width: u32,
    height: u32,
    format: TextureFormat,
    next_id: u64,

    buffers: HashMap<BufferHandle, RecordedBuffer>,
    textures: HashMap<TextureHandle, TextureDescriptor>,
    views: HashMap<TextureViewHandle, Option<TextureHandle>>,
    samplers: HashMap<SamplerHandle, SamplerDescriptor>,
    bind_group_layouts: HashMap<BindGroupLayoutHandle, Vec<BindGroupLayoutEntry>>,
    bind_groups: HashMap<BindGroupHandle, Vec<(u32, BindGroupEntry)>>,
    pipelines: HashMap<RenderPipelineHandle, RenderPipelineDescriptor>,

    passes: Vec<RecordedPass>,
    current_pass: Option<RecordedPass>,
    swapchain_view: Option<TextureViewHandle>,
    frames_submitted: u64,
    out_of_bounds_writes: u64,

    failing_pipeline_labels: Vec<String>,
    texture_budget: Option<usize>,
}

impl RecordingBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Bgra8Unorm,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            samplers: HashMap::new(),
            bind_group_layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            pipelines: HashMap::new(),
            passes: Vec::new(),
            current_pass: None,
            swapchain_view: None,
            frames_submitted: 0,
            out_of_bounds_writes: 0,
            failing_pipeline_labels: Vec::new(),
            texture_budget: None,
        }
    }

    /// Get the backend name.
    pub fn name(&self) -> &'static str {
        "Recording Backend"
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, command: RecordedCommand) {
        match self.current_pass.as_mut() {
            Some(pass) => pass.commands.push(command),
            None => log::warn!("RecordingBackend: {command:?} issued outside a render pass"),
        }
    }

    // Failure injection

    /// Fail every pipeline whose label contains `needle`
    pub fn fail_pipelines_containing(&mut self, needle: &str) {
        self.failing_pipeline_labels.push(needle.to_string());
    }

    /// Allow `count` more texture creations, then fail
    pub fn fail_textures_after(&mut self, count: usize) {
        self.texture_budget = Some(count);
    }

    pub fn clear_failures(&mut self) {
        self.failing_pipeline_labels.clear();
        self.texture_budget = None;
    }

    // Inspection

    pub fn passes(&self) -> &[RecordedPass] {
        &self.passes
    }

    pub fn pass(&self, label: &str) -> Option<&RecordedPass> {
        self.passes.iter().find(|p| p.label() == label)
    }

    pub fn pass_labels(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.label()).collect()
    }

    pub fn clear_passes(&mut self) {
        self.passes.clear();
    }

    pub fn total_draw_count(&self) -> usize {
        self.passes.iter().map(RecordedPass::draw_count).sum()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn pipeline(&self, handle: RenderPipelineHandle) -> Option<&RenderPipelineDescriptor> {
        self.pipelines.get(&handle)
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&handle)
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Texture behind a view; `None` for swapchain or destroyed views
    pub fn view_texture(&self, view: TextureViewHandle) -> Option<TextureHandle> {
        self.views.get(&view).copied().flatten()
    }

    pub fn is_view_live(&self, view: TextureViewHandle) -> bool {
        self.views.contains_key(&view)
    }

    pub fn is_bind_group_live(&self, bind_group: BindGroupHandle) -> bool {
        self.bind_groups.contains_key(&bind_group)
    }

    pub fn bind_group_entries(&self, bind_group: BindGroupHandle) -> Option<&[(u32, BindGroupEntry)]> {
        self.bind_groups.get(&bind_group).map(Vec::as_slice)
    }

    pub fn live_bind_group_count(&self) -> usize {
        self.bind_groups.len()
    }

    pub fn is_buffer_live(&self, buffer: BufferHandle) -> bool {
        self.buffers.contains_key(&buffer)
    }

    pub fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        self.buffers.get(&buffer).map(|b| b.descriptor.size)
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn out_of_bounds_writes(&self) -> u64 {
        self.out_of_bounds_writes
    }
}

impl GraphicsBackend for RecordingBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        if let Some(old) = self.swapchain_view.take() {
            self.views.remove(&old);
        }
        let view = TextureViewHandle(self.next_handle());
        self.views.insert(view, None);
        self.swapchain_view = Some(view);
        Ok(FrameContext {
            swapchain_view: view,
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if self.current_pass.is_some() {
            log::warn!("RecordingBackend: frame ended with an open render pass");
        }
        self.frames_submitted += 1;
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.format
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!("RecordingBackend: creating buffer {:?} (size: {})", desc.label, desc.size);
        let handle = BufferHandle(self.next_handle());
        self.buffers.insert(
            handle,
            RecordedBuffer {
                descriptor: desc.clone(),
                data: vec![0; desc.size as usize],
            },
        );
        Ok(handle)
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let handle = self.create_buffer(&BufferDescriptor {
            size: data.len() as u64,
            ..desc.clone()
        })?;
        self.write_buffer(handle, 0, data);
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(recorded) = self.buffers.get_mut(&buffer) else {
            log::warn!("RecordingBackend: write to unknown buffer {buffer:?}");
            self.out_of_bounds_writes += 1;
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > recorded.data.len() {
            log::warn!(
                "RecordingBackend: write of {} bytes at {offset} overflows {:?} ({} bytes)",
                data.len(),
                recorded.descriptor.label,
                recorded.data.len()
            );
            self.out_of_bounds_writes += 1;
            return;
        }
        recorded.data[start..end].copy_from_slice(data);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if let Some(budget) = self.texture_budget.as_mut() {
            if *budget == 0 {
                return Err(BackendError::TextureCreationFailed(format!(
                    "injected failure for {:?}",
                    desc.label
                )));
            }
            *budget -= 1;
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has a zero extent",
                desc.label
            )));
        }
        log::trace!(
            "RecordingBackend: creating texture {:?} ({}x{}, {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        let handle = TextureHandle(self.next_handle());
        self.textures.insert(handle, desc.clone());
        Ok(handle)
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains_key(&texture) {
            return Err(BackendError::TextureCreationFailed("Texture not found".into()));
        }
        let view = TextureViewHandle(self.next_handle());
        self.views.insert(view, Some(texture));
        Ok(view)
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        log::trace!(
            "RecordingBackend: writing {} bytes ({width}x{height}) to {texture:?}",
            data.len()
        );
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let handle = SamplerHandle(self.next_handle());
        self.samplers.insert(handle, desc.clone());
        Ok(handle)
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let handle = BindGroupLayoutHandle(self.next_handle());
        self.bind_group_layouts.insert(handle, entries.to_vec());
        Ok(handle)
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let Some(layout_entries) = self.bind_group_layouts.get(&layout) else {
            return Err(BackendError::BindGroupCreationFailed("Layout not found".into()));
        };
        if layout_entries.len() != entries.len() {
            return Err(BackendError::BindGroupCreationFailed(format!(
                "layout expects {} entries, got {}",
                layout_entries.len(),
                entries.len()
            )));
        }
        for (binding, entry) in entries {
            let live = match entry {
                BindGroupEntry::Buffer { buffer, .. } => self.buffers.contains_key(buffer),
                BindGroupEntry::Texture(view) => self.views.contains_key(view),
                BindGroupEntry::Sampler(sampler) => self.samplers.contains_key(sampler),
            };
            if !live {
                return Err(BackendError::BindGroupCreationFailed(format!(
                    "binding {binding} references a destroyed resource"
                )));
            }
        }
        let handle = BindGroupHandle(self.next_handle());
        self.bind_groups.insert(handle, entries.to_vec());
        Ok(handle)
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let label = desc.label.as_deref().unwrap_or("");
        if self
            .failing_pipeline_labels
            .iter()
            .any(|needle| label.contains(needle.as_str()))
        {
            return Err(BackendError::ShaderCreationFailed(format!(
                "injected failure for {label}"
            )));
        }
        validate_wgsl(&desc.shader)
            .map_err(|reason| BackendError::ShaderCreationFailed(format!("{label}: {reason}")))?;
        log::trace!("RecordingBackend: creating pipeline {label}");
        let handle = RenderPipelineHandle(self.next_handle());
        self.pipelines.insert(handle, desc.clone());
        Ok(handle)
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        if let Some(open) = self.current_pass.take() {
            log::warn!("RecordingBackend: pass {:?} was never ended", open.label());
            self.passes.push(open);
        }
        self.current_pass = Some(RecordedPass {
            descriptor: desc.clone(),
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) {
        if let Some(pass) = self.current_pass.take() {
            self.passes.push(pass);
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record(RecordedCommand::SetPipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.record(RecordedCommand::SetBindGroup { index, bind_group });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.record(RecordedCommand::SetVertexBuffer { slot, buffer, offset });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        self.record(RecordedCommand::SetIndexBuffer { buffer, offset, format });
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, _min_depth: f32, _max_depth: f32) {
        self.record(RecordedCommand::SetViewport { x, y, width, height });
    }

    fn set_scissor_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.record(RecordedCommand::SetScissorRect { x, y, width, height });
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        self.record(RecordedCommand::Draw { vertices, instances });
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        self.record(RecordedCommand::DrawIndexed { indices, base_vertex, instances });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.views.remove(&view);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group);
    }
}
