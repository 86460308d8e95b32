use std::borrow::Cow;

use isfdoc::{ProgramSource, TextureTarget};
use wgpu::naga::ShaderStage as NagaStage;

use crate::error::{CompileError, ShaderStage};
use crate::types::Precision;

use super::context::WgpuContext;
use super::pool::texture_format;
use super::uniforms::{texture_declarations, texture_slots, TextureSlot, UniformLayout};

/// One compiled ISF variant: its uniform block, texture slots and a render
/// pipeline per target precision.
pub struct WgpuProgram {
    id: u64,
    layout: UniformLayout,
    textures: Vec<TextureSlot>,
    pub(crate) uniform_buffer: wgpu::Buffer,
    pub(crate) uniform_bind_group: wgpu::BindGroup,
    pub(crate) texture_layout: wgpu::BindGroupLayout,
    standard: wgpu::RenderPipeline,
    float: wgpu::RenderPipeline,
}

impl WgpuProgram {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    pub(crate) fn textures(&self) -> &[TextureSlot] {
        &self.textures
    }

    pub(crate) fn pipeline(&self, precision: Precision) -> &wgpu::RenderPipeline {
        match precision {
            Precision::Standard => &self.standard,
            Precision::Float => &self.float,
        }
    }

    pub(crate) fn build(
        context: &WgpuContext,
        id: u64,
        source: &ProgramSource,
    ) -> Result<Self, CompileError> {
        let device = &context.device;
        let layout = UniformLayout::from_interface(&source.interface);
        let textures = texture_slots(&source.interface)?;
        let declarations = format!(
            "#version 450\n{}{}",
            layout.declaration(),
            texture_declarations(&textures)
        );

        let vertex_module = compile_stage(
            device,
            ShaderStage::Vertex,
            format!("{declarations}\n{}", source.vertex),
        )?;
        let fragment_module = compile_stage(
            device,
            ShaderStage::Fragment,
            format!("{declarations}\n{}", source.fragment),
        )?;

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("isf uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("isf texture layout"),
            entries: &texture_layout_entries(&textures),
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("isf uniform buffer"),
            size: u64::from(layout.size()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("isf uniform bind group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("isf pipeline layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let build = |precision: Precision| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("isf pass pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some("main"),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x2],
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some("main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: texture_format(precision),
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            })
        };
        let standard = build(Precision::Standard);
        let float = build(Precision::Float);
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(CompileError::Pipeline(err.to_string()));
        }

        Ok(Self {
            id,
            layout,
            textures,
            uniform_buffer,
            uniform_bind_group,
            texture_layout,
            standard,
            float,
        })
    }
}

fn compile_stage(
    device: &wgpu::Device,
    stage: ShaderStage,
    source: String,
) -> Result<wgpu::ShaderModule, CompileError> {
    let (label, naga_stage) = match stage {
        ShaderStage::Vertex => ("isf vertex", NagaStage::Vertex),
        ShaderStage::Fragment => ("isf fragment", NagaStage::Fragment),
    };
    tracing::trace!(%stage, source = %source, "compiling shader stage");

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(source),
            stage: naga_stage,
            defines: &[],
        },
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(CompileError::Shader {
            stage,
            message: err.to_string(),
        }),
        None => Ok(module),
    }
}

fn texture_layout_entries(slots: &[TextureSlot]) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(slots.len() * 2);
    for (index, slot) in slots.iter().enumerate() {
        let view_dimension = match slot.target {
            TextureTarget::Cube => wgpu::TextureViewDimension::Cube,
            _ => wgpu::TextureViewDimension::D2,
        };
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: (index as u32) * 2,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: (index as u32) * 2 + 1,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}
