//! CPU-side mesh data and primitive generators

use super::geometry::{IndexBufferBinding, RenderGeometry, VertexBufferBinding};
use crate::backend::*;
use crate::error::RenderResult;
use crate::layout::GeometryLayoutCache;
use glam::{Vec2, Vec3, Vec4};
use std::f32::consts::PI;

/// Interleaved vertices plus a `u32` triangle list
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Upload vertex and index data and wrap them in a `RenderGeometry`
    pub fn upload(
        &self,
        backend: &mut dyn GraphicsBackend,
        layouts: &GeometryLayoutCache,
    ) -> RenderResult<RenderGeometry> {
        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} vertices", self.name)),
                size: (self.vertices.len() * std::mem::size_of::<Vertex>()) as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
            bytemuck::cast_slice(&self.vertices),
        )?;
        let index_buffer = match backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} indices", self.name)),
                size: (self.indices.len() * std::mem::size_of::<u32>()) as u64,
                usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
            bytemuck::cast_slice(&self.indices),
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                backend.destroy_buffer(vertex_buffer);
                return Err(e.into());
            }
        };

        let geometry = RenderGeometry::builder(PrimitiveTopology::TriangleList, self.indices.len() as u32)
            .vertex_buffer(Vertex::layout(), VertexBufferBinding::new(vertex_buffer))
            .index_buffer(IndexBufferBinding {
                buffer: index_buffer,
                offset: 0,
                format: IndexFormat::Uint32,
            })
            .build(layouts)?;
        Ok(geometry)
    }

    fn push_quad_indices(&mut self, a: u32, b: u32, c: u32, d: u32) {
        self.indices.extend_from_slice(&[a, b, c, a, c, d]);
    }

    /// Unit cube centered at the origin, four vertices per face
    pub fn cube() -> Self {
        let mut mesh = Self::new("cube");

        // (normal, u axis, v axis) per face
        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];
        let corners = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];

        for (normal, u_axis, v_axis) in faces {
            let base = mesh.vertices.len() as u32;
            for (u, v) in corners {
                mesh.vertices.push(Vertex {
                    position: normal * 0.5 + u_axis * u + v_axis * v,
                    normal,
                    uv: Vec2::new(u + 0.5, 0.5 - v),
                    tangent: u_axis.extend(1.0),
                });
            }
            mesh.push_quad_indices(base, base + 1, base + 2, base + 3);
        }

        mesh
    }

    /// UV sphere of radius 0.5
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut mesh = Self::new("sphere");
        let segments = segments.max(3);
        let rings = rings.max(2);

        for ring in 0..=rings {
            let phi = ring as f32 * PI / rings as f32;
            for segment in 0..=segments {
                let theta = segment as f32 * 2.0 * PI / segments as f32;
                let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
                mesh.vertices.push(Vertex {
                    position: normal * 0.5,
                    normal,
                    uv: Vec2::new(segment as f32 / segments as f32, ring as f32 / rings as f32),
                    tangent: Vec4::new(-theta.sin(), 0.0, theta.cos(), 1.0),
                });
            }
        }

        let row = segments + 1;
        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * row + segment;
                let below = current + row;
                mesh.push_quad_indices(current, current + 1, below + 1, below);
            }
        }

        mesh
    }

    /// Plane in the XZ plane facing +Y
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut mesh = Self::new("plane");
        let cells = subdivisions.max(1);

        for z in 0..=cells {
            for x in 0..=cells {
                let u = x as f32 / cells as f32;
                let v = z as f32 / cells as f32;
                mesh.vertices.push(Vertex {
                    position: Vec3::new((u - 0.5) * width, 0.0, (v - 0.5) * depth),
                    normal: Vec3::Y,
                    uv: Vec2::new(u, v),
                    tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
                });
            }
        }

        let row = cells + 1;
        for z in 0..cells {
            for x in 0..cells {
                let current = z * row + x;
                let next = current + row;
                mesh.push_quad_indices(current, next, next + 1, current + 1);
            }
        }

        mesh
    }
}
