//! Grow-only per-frame instance storage

use crate::backend::*;

/// Smallest capacity, in instances
pub const MIN_INSTANCE_CAPACITY: u32 = 64;

const INSTANCE_SIZE: u64 = std::mem::size_of::<InstanceData>() as u64;

/// Storage buffer of `InstanceData` plus the bind group (group 1) that
/// exposes it to scene shaders.
///
/// Capacity is a power of two and only ever doubles. Growing replaces both
/// the buffer and the bind group, so callers must fetch `bind_group()` after
/// `ensure_capacity`.
#[derive(Debug)]
pub struct InstanceBuffer {
    label: String,
    layout: BindGroupLayoutHandle,
    buffer: BufferHandle,
    bind_group: BindGroupHandle,
    capacity: u32,
    high_water_mark: u32,
}

impl InstanceBuffer {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        layout: BindGroupLayoutHandle,
        initial_capacity: u32,
    ) -> BackendResult<Self> {
        let capacity = initial_capacity.max(MIN_INSTANCE_CAPACITY).next_power_of_two();
        let (buffer, bind_group) = Self::allocate(backend, label, layout, capacity)?;
        Ok(Self {
            label: label.to_string(),
            layout,
            buffer,
            bind_group,
            capacity,
            high_water_mark: 0,
        })
    }

    fn allocate(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        layout: BindGroupLayoutHandle,
        capacity: u32,
    ) -> BackendResult<(BufferHandle, BindGroupHandle)> {
        let buffer = backend.create_buffer(&BufferDescriptor {
            label: Some(format!("{label} instances")),
            size: capacity as u64 * INSTANCE_SIZE,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?;
        match backend.create_bind_group(layout, &[(0, BindGroupEntry::buffer(buffer))]) {
            Ok(bind_group) => Ok((buffer, bind_group)),
            Err(e) => {
                backend.destroy_buffer(buffer);
                Err(e)
            }
        }
    }

    /// Make room for `required` instances. Returns whether the buffer was
    /// reallocated; on error the previous buffer stays in place.
    pub fn ensure_capacity(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        required: u32,
    ) -> BackendResult<bool> {
        self.high_water_mark = self.high_water_mark.max(required);
        if required <= self.capacity {
            return Ok(false);
        }

        let mut capacity = self.capacity;
        while capacity < required {
            capacity = capacity.saturating_mul(2);
        }

        let (buffer, bind_group) = Self::allocate(backend, &self.label, self.layout, capacity)?;
        backend.destroy_bind_group(self.bind_group);
        backend.destroy_buffer(self.buffer);
        log::debug!(
            "{} instance buffer grown {} -> {capacity} instances",
            self.label,
            self.capacity
        );

        self.buffer = buffer;
        self.bind_group = bind_group;
        self.capacity = capacity;
        Ok(true)
    }

    /// Upload `instances` starting at element 0, in one transfer
    pub fn upload(&self, backend: &mut dyn GraphicsBackend, instances: &[InstanceData]) {
        if !instances.is_empty() {
            backend.write_buffer(self.buffer, 0, bytemuck::cast_slice(instances));
        }
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn bind_group(&self) -> BindGroupHandle {
        self.bind_group
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Largest instance count requested so far
    pub fn high_water_mark(&self) -> u32 {
        self.high_water_mark
    }
}
