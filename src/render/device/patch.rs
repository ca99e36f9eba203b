//! Indirect instanced draw of the grass patch mesh into the host frame

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use wgpu::util::DeviceExt;

use crate::core::{Error, Result};
use crate::grass::params::{
    GLOBAL_CULL_REF, GLOBAL_ENCODE_REF, GLOBAL_INSTANCES, GLOBAL_INSTANCE_BOUNDS, GLOBAL_OBSTACLE_MAP, GLOBAL_STATE,
    GLOBAL_SURFACE_LUT,
};
use crate::render::backend::{DepthConvention, IndirectDraw, ShadowCasting};
use crate::render::device::resources::{vertex_layout, RasterShader, Resources, ShaderRole, DEPTH_FORMAT};
use crate::render::globals::ShaderGlobals;

/// Color (and optional depth) target the grass is drawn into
pub struct FrameTarget {
    pub color: wgpu::TextureView,
    pub color_format: wgpu::TextureFormat,
    /// Must be [`DEPTH_FORMAT`] when present
    pub depth: Option<wgpu::TextureView>,
    /// Host camera
    pub view_projection: Mat4,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PatchUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub cull_ref: [f32; 4],
    pub encode_ref: [f32; 4],
    pub bounds: [f32; 4],
    pub state: [f32; 4],
    /// x = receive shadows
    pub flags: [f32; 4],
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    shader: String,
    color_format: wgpu::TextureFormat,
    depth: bool,
    reversed: bool,
}

pub struct PatchPipelines {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl PatchPipelines {
    pub fn new(device: &wgpu::Device) -> Self {
        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("grass_patch_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Instance infos
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Obstacle map
                texture_entry(2),
                // Surface material LUT
                texture_entry(3),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("grass_patch_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        Self {
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
        }
    }

    fn ensure_pipeline(
        &mut self,
        device: &wgpu::Device,
        shaders: &HashMap<String, RasterShader>,
        key: &PipelineKey,
    ) -> Result<()> {
        if self.pipelines.contains_key(key) {
            return Ok(());
        }

        let shader = shaders
            .get(&key.shader)
            .filter(|s| s.role == ShaderRole::Patch)
            .ok_or_else(|| Error::Gpu(format!("{} is not a patch shader", key.shader)))?;

        let depth_stencil = key.depth.then(|| wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: if key.reversed {
                wgpu::CompareFunction::GreaterEqual
            } else {
                wgpu::CompareFunction::LessEqual
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("{}_pipeline", key.shader)),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader.module,
                entry_point: Some("vs_main"),
                buffers: &[vertex_layout()],
                compilation_options: Default::default(),
            },
            // Blades are single quads seen from both sides
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader.module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.color_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview_mask: None,
            cache: None,
        });

        log::debug!("Created patch pipeline for {} ({:?})", key.shader, key.color_format);
        self.pipelines.insert(key.clone(), pipeline);
        Ok(())
    }

    /// Record the indirect draw into `encoder`.
    ///
    /// Reads instance data, obstacle map and LUT from the shader bus as
    /// published by the pipeline this frame.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        resources: &Resources,
        shaders: &HashMap<String, RasterShader>,
        globals: &ShaderGlobals,
        depth: DepthConvention,
        target: &FrameTarget,
        draw: &IndirectDraw,
    ) -> Result<()> {
        if draw.shadow_casting == ShadowCasting::ShadowsOnly {
            // No shadow pass to contribute to
            log::trace!("Grass draw is shadows-only, skipping color pass");
            return Ok(());
        }

        let material = resources.material(draw.material)?;
        let key = PipelineKey {
            shader: material.shader.clone(),
            color_format: target.color_format,
            depth: target.depth.is_some(),
            reversed: depth == DepthConvention::Reversed,
        };
        self.ensure_pipeline(device, shaders, &key)?;

        let vector = |name: &str| globals.vector(name).unwrap_or(Vec4::ZERO).to_array();
        let uniforms = PatchUniforms {
            view_proj: target.view_projection.to_cols_array_2d(),
            cull_ref: vector(GLOBAL_CULL_REF),
            encode_ref: vector(GLOBAL_ENCODE_REF),
            bounds: vector(GLOBAL_INSTANCE_BOUNDS),
            state: vector(GLOBAL_STATE),
            flags: [if draw.receive_shadows { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0],
        };
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("grass_patch_uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let instances = globals
            .buffer(GLOBAL_INSTANCES)
            .ok_or(Error::MissingResource("published instance buffer"))?;
        let instances = resources.buffer(instances)?;
        let args = resources.buffer(draw.args)?;
        let mesh = resources.mesh(draw.mesh)?;

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("grass_patch_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: instances.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(
                        resources.view_or_fallback(globals.texture(GLOBAL_OBSTACLE_MAP)),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(
                        resources.view_or_fallback(globals.texture(GLOBAL_SURFACE_LUT)),
                    ),
                },
            ],
        });

        let pipeline = self
            .pipelines
            .get(&key)
            .ok_or_else(|| Error::Gpu(format!("missing pipeline for {}", key.shader)))?;

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("grass_patch_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: target.depth.as_ref().map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.set_vertex_buffer(0, mesh.vertices.slice(..));
        render_pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
        render_pass.draw_indexed_indirect(&args.buffer, draw.args_offset);
        Ok(())
    }
}
