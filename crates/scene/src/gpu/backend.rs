use std::sync::Arc;

use isfdoc::{ProgramSource, TextureTarget, UniformKind, VERTEX_ATTRIBUTE};
use wgpu::util::DeviceExt;

use crate::backend::{RenderBackend, UniformValue};
use crate::buffer::BufferRef;
use crate::error::{BackendError, CompileError};
use crate::geometry::Quad;
use crate::types::Size;

use super::context::WgpuContext;
use super::pipeline::WgpuProgram;
use super::pool::GpuTexture;
use super::uniforms::{write_value, TextureSlot};

/// Handle into a `WgpuProgram`: a byte offset in its uniform block, a
/// texture slot, or the quad attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WgpuLocation {
    Uniform {
        program: u64,
        offset: u32,
        kind: UniformKind,
    },
    Texture {
        program: u64,
        slot: usize,
    },
    Attribute {
        program: u64,
    },
}

impl WgpuLocation {
    fn program(self) -> u64 {
        match self {
            WgpuLocation::Uniform { program, .. }
            | WgpuLocation::Texture { program, .. }
            | WgpuLocation::Attribute { program } => program,
        }
    }
}

struct OpenPass {
    program: u64,
    target: BufferRef,
    viewport: Size,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    texture_layout: wgpu::BindGroupLayout,
    slots: Vec<TextureSlot>,
    uniforms: Vec<u8>,
    textures: Vec<Option<BufferRef>>,
}

/// Records every pass into its own command buffer against pooled
/// `GpuTexture` targets.
pub struct WgpuBackend {
    context: Arc<WgpuContext>,
    next_program: u64,
    vertex_buffer: Option<wgpu::Buffer>,
    placeholder_2d: wgpu::TextureView,
    placeholder_cube: wgpu::TextureView,
    sampler: wgpu::Sampler,
    open: Option<OpenPass>,
}

impl WgpuBackend {
    pub fn new(context: Arc<WgpuContext>) -> Self {
        let placeholder_2d = create_placeholder(&context, TextureTarget::Texture2D);
        let placeholder_cube = create_placeholder(&context, TextureTarget::Cube);
        let sampler = context.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("isf sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        Self {
            context,
            next_program: 0,
            vertex_buffer: None,
            placeholder_2d,
            placeholder_cube,
            sampler,
            open: None,
        }
    }

    pub fn context(&self) -> &Arc<WgpuContext> {
        &self.context
    }

    fn open_pass(&mut self, location: WgpuLocation) -> Option<&mut OpenPass> {
        let open = self.open.as_mut()?;
        if open.program != location.program() {
            tracing::warn!(?location, program = open.program, "location belongs to another program");
            return None;
        }
        Some(open)
    }
}

fn create_placeholder(context: &WgpuContext, target: TextureTarget) -> wgpu::TextureView {
    let layers = match target {
        TextureTarget::Cube => 6,
        _ => 1,
    };
    let data = vec![0u8; 4 * layers as usize];
    let texture = context.device.create_texture_with_data(
        &context.queue,
        &wgpu::TextureDescriptor {
            label: Some("isf placeholder texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        &data,
    );
    let dimension = match target {
        TextureTarget::Cube => wgpu::TextureViewDimension::Cube,
        _ => wgpu::TextureViewDimension::D2,
    };
    texture.create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(dimension),
        ..Default::default()
    })
}

impl RenderBackend for WgpuBackend {
    type Program = WgpuProgram;
    type Location = WgpuLocation;

    fn compile(&mut self, source: &ProgramSource) -> Result<Self::Program, CompileError> {
        self.next_program += 1;
        let program = WgpuProgram::build(&self.context, self.next_program, source)?;
        tracing::debug!(
            program = program.id(),
            uniform_bytes = program.layout().size(),
            textures = program.textures().len(),
            "compiled wgpu program"
        );
        Ok(program)
    }

    fn uniform_location(&self, program: &Self::Program, name: &str) -> Option<Self::Location> {
        if let Some(slot) = program.layout().slot(name) {
            return Some(WgpuLocation::Uniform {
                program: program.id(),
                offset: slot.offset,
                kind: slot.kind,
            });
        }
        program
            .textures()
            .iter()
            .position(|slot| slot.name == name)
            .map(|slot| WgpuLocation::Texture {
                program: program.id(),
                slot,
            })
    }

    fn attribute_location(&self, program: &Self::Program, name: &str) -> Option<Self::Location> {
        (name == VERTEX_ATTRIBUTE).then_some(WgpuLocation::Attribute {
            program: program.id(),
        })
    }

    fn upload_quad(&mut self, quad: &Quad) -> Result<(), BackendError> {
        let buffer = self
            .context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("isf quad"),
                contents: bytemuck::cast_slice(&quad.positions),
                usage: wgpu::BufferUsages::VERTEX,
            });
        self.vertex_buffer = Some(buffer);
        Ok(())
    }

    fn begin_pass(
        &mut self,
        program: &Self::Program,
        target: &BufferRef,
        viewport: Size,
    ) -> Result<(), BackendError> {
        if self.open.is_some() {
            return Err(BackendError::new("begin_pass called while a pass is open"));
        }
        if target.backing::<GpuTexture>().is_none() {
            return Err(BackendError::new(format!(
                "pass target {:?} is not a wgpu texture",
                target.id()
            )));
        }
        self.open = Some(OpenPass {
            program: program.id(),
            target: Arc::clone(target),
            viewport,
            pipeline: program.pipeline(target.precision()).clone(),
            uniform_buffer: program.uniform_buffer.clone(),
            uniform_bind_group: program.uniform_bind_group.clone(),
            texture_layout: program.texture_layout.clone(),
            slots: program.textures().to_vec(),
            uniforms: vec![0; program.layout().size() as usize],
            textures: vec![None; program.textures().len()],
        });
        Ok(())
    }

    fn set_uniform(&mut self, location: Self::Location, value: UniformValue) {
        let Some(open) = self.open_pass(location) else {
            return;
        };
        if let WgpuLocation::Uniform { offset, .. } = location {
            write_value(&mut open.uniforms, offset, value);
        }
    }

    fn bind_texture(&mut self, location: Self::Location, buffer: &BufferRef) {
        let Some(open) = self.open_pass(location) else {
            return;
        };
        let WgpuLocation::Texture { slot, .. } = location else {
            return;
        };
        let Some(expected) = open.slots.get(slot).map(|slot| slot.target) else {
            return;
        };
        if buffer.target() != expected || buffer.backing::<GpuTexture>().is_none() {
            tracing::warn!(
                buffer = ?buffer.id(),
                expected = %expected,
                "texture does not fit sampler slot; using placeholder"
            );
            return;
        }
        open.textures[slot] = Some(Arc::clone(buffer));
    }

    fn draw(&mut self, _attribute: Option<Self::Location>) -> Result<(), BackendError> {
        let open = self
            .open
            .take()
            .ok_or_else(|| BackendError::new("draw called without an open pass"))?;
        let vertex_buffer = self
            .vertex_buffer
            .as_ref()
            .ok_or_else(|| BackendError::new("draw called before the quad was uploaded"))?;
        let target = open
            .target
            .backing::<GpuTexture>()
            .ok_or_else(|| BackendError::new("pass target lost its texture"))?;
        let device = &self.context.device;

        let mut entries = Vec::with_capacity(open.slots.len() * 2);
        for (index, slot) in open.slots.iter().enumerate() {
            let view = match open.textures[index]
                .as_ref()
                .and_then(|buffer| buffer.backing::<GpuTexture>())
            {
                Some(texture) => &texture.view,
                None if slot.target == TextureTarget::Cube => &self.placeholder_cube,
                None => &self.placeholder_2d,
            };
            entries.push(wgpu::BindGroupEntry {
                binding: (index as u32) * 2,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: (index as u32) * 2 + 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("isf texture bind group"),
            layout: &open.texture_layout,
            entries: &entries,
        });

        let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("isf uniform staging"),
            contents: &open.uniforms,
            usage: wgpu::BufferUsages::COPY_SRC,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("isf pass encoder"),
        });
        encoder.copy_buffer_to_buffer(&staging, 0, &open.uniform_buffer, 0, open.uniforms.len() as u64);

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("isf pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_viewport(
                0.0,
                0.0,
                open.viewport.width as f32,
                open.viewport.height as f32,
                0.0,
                1.0,
            );
            pass.set_pipeline(&open.pipeline);
            pass.set_bind_group(0, &open.uniform_bind_group, &[]);
            pass.set_bind_group(1, &texture_bind_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.draw(0..4, 0..1);
        }

        self.context.queue.submit(std::iter::once(encoder.finish()));
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(BackendError::new(err.to_string()));
        }
        Ok(())
    }
}
