//! Executes recorded encode command lists as multi-target raster passes.
//!
//! Each `SetTargets` opens a pass that loads the bound targets; a `Clear`
//! either becomes the load op of the pass it lands in (when nothing has been
//! drawn yet) or starts a fresh clearing pass. Global binds inside the list
//! update the shader bus and apply to every draw recorded after them.

use std::collections::HashMap;
use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use wgpu::util::DeviceExt;

use crate::core::{Error, Result};
use crate::grass::params::{GLOBAL_STATE, GLOBAL_SURFACE_LUT, OBSTACLE_TEXTURE_SLOT, SURFACE_MATERIAL_INDEX};
use crate::grass::surface::{PASS_BLOCKER, PASS_SURFACE, PASS_SURFACE_LUT};
use crate::render::backend::{
    DepthConvention, EncodeCommand, EncodeView, MaterialHandle, MeshHandle, TargetFormat, TextureHandle,
};
use crate::render::device::resources::{
    texture_format, vertex_layout, RasterShader, Resources, ShaderRole, DEPTH_FORMAT,
};
use crate::render::globals::ShaderGlobals;
use crate::render::mesh::SubMesh;

/// Dynamic-offset stride of the per-draw uniform block
const UNIFORM_STRIDE: u64 = 256;

/// Per-draw uniforms shared by every encode shader
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct EncodeDrawUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
    /// Global grass state at the time of the draw
    pub state: [f32; 4],
    /// x = surface material index
    pub material: [f32; 4],
    /// (near, far, camera height, 0)
    pub camera: [f32; 4],
}

/// Fixed-function state of one shader pass
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PassState {
    /// Write masks for (obstacles, depth-normals, biome)
    pub writes: [wgpu::ColorWrites; 3],
    pub depth_write: bool,
    pub depth_test: bool,
}

/// Pass table for encode-capable shader roles
pub fn pass_state(role: ShaderRole, pass: u32) -> Option<PassState> {
    let none = wgpu::ColorWrites::empty();
    let all = wgpu::ColorWrites::ALL;
    match (role, pass) {
        (ShaderRole::Obstacle, 0) => Some(PassState {
            writes: [all, none, none],
            depth_write: false,
            depth_test: false,
        }),
        (ShaderRole::Surface, PASS_SURFACE) | (ShaderRole::Surface, PASS_BLOCKER) => Some(PassState {
            writes: [none, all, all],
            depth_write: true,
            depth_test: true,
        }),
        (ShaderRole::Surface, PASS_SURFACE_LUT) => Some(PassState {
            writes: [none, none, all],
            depth_write: false,
            depth_test: true,
        }),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    shader: String,
    pass: u32,
    formats: [TargetFormat; 3],
    reversed: bool,
}

struct PlannedDraw {
    key: PipelineKey,
    mesh: MeshHandle,
    submesh: SubMesh,
    uniforms: EncodeDrawUniforms,
    main_texture: Option<TextureHandle>,
    lut: Option<TextureHandle>,
}

struct PlannedPass {
    colors: [TextureHandle; 3],
    depth: TextureHandle,
    clear: Option<(Vec4, f32)>,
    draws: Vec<PlannedDraw>,
}

/// Encode pass pipelines, keyed by shader, pass and target formats
pub struct EncodePipelines {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl EncodePipelines {
    pub fn new(device: &wgpu::Device) -> Self {
        let texture_entry = |binding, filterable| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("grass_encode_layout"),
            entries: &[
                // Per-draw uniforms
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(std::mem::size_of::<EncodeDrawUniforms>() as u64),
                    },
                    count: None,
                },
                // Material main texture
                texture_entry(1, true),
                // Surface material LUT
                texture_entry(2, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("grass_encode_pipeline_layout"),
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
            .ok_or_else(|| Error::Gpu(format!("unknown shader {}", key.shader)))?;
        let state = pass_state(shader.role, key.pass)
            .ok_or_else(|| Error::Gpu(format!("shader {} has no encode pass {}", key.shader, key.pass)))?;

        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .formats
            .iter()
            .zip(state.writes)
            .map(|(format, write_mask)| {
                Some(wgpu::ColorTargetState {
                    format: texture_format(*format),
                    blend: None,
                    write_mask,
                })
            })
            .collect();

        let depth_compare = match (state.depth_test, key.reversed) {
            (false, _) => wgpu::CompareFunction::Always,
            (true, false) => wgpu::CompareFunction::LessEqual,
            (true, true) => wgpu::CompareFunction::GreaterEqual,
        };

        let fragment_entry = format!("fs_pass{}", key.pass);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("{}_pass{}", key.shader, key.pass)),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader.module,
                entry_point: Some("vs_main"),
                buffers: &[vertex_layout()],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: state.depth_write,
                depth_compare,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader.module,
                entry_point: Some(&fragment_entry),
                targets: &targets,
                compilation_options: Default::default(),
            }),
            multiview_mask: None,
            cache: None,
        });

        log::debug!("Created encode pipeline {}_pass{}", key.shader, key.pass);
        self.pipelines.insert(key.clone(), pipeline);
        Ok(())
    }

    /// Record `commands` into `encoder`
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        resources: &Resources,
        shaders: &HashMap<String, RasterShader>,
        globals: &mut ShaderGlobals,
        depth: DepthConvention,
        view: &EncodeView,
        commands: &[EncodeCommand],
    ) -> Result<()> {
        let passes = plan(resources, globals, depth, view, commands)?;

        for pass in &passes {
            for draw in &pass.draws {
                self.ensure_pipeline(device, shaders, &draw.key)?;
            }
        }

        let draw_count: usize = passes.iter().map(|p| p.draws.len()).sum();
        let uniform_buffer = (draw_count > 0).then(|| {
            let mut data = vec![0u8; draw_count * UNIFORM_STRIDE as usize];
            for (i, draw) in passes.iter().flat_map(|p| &p.draws).enumerate() {
                let start = i * UNIFORM_STRIDE as usize;
                let bytes = bytemuck::bytes_of(&draw.uniforms);
                data[start..start + bytes.len()].copy_from_slice(bytes);
            }
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("grass_encode_uniforms"),
                contents: &data,
                usage: wgpu::BufferUsages::UNIFORM,
            })
        });

        let bind_groups: Vec<wgpu::BindGroup> = match &uniform_buffer {
            Some(buffer) => passes
                .iter()
                .flat_map(|p| &p.draws)
                .map(|draw| self.bind_group(device, resources, buffer, draw))
                .collect(),
            None => Vec::new(),
        };

        let mut draw_index = 0usize;
        for pass in &passes {
            let colors = [
                resources.texture(pass.colors[0])?,
                resources.texture(pass.colors[1])?,
                resources.texture(pass.colors[2])?,
            ];
            let depth_target = resources.texture(pass.depth)?;
            let size = (depth_target.width, depth_target.height);
            if colors.iter().any(|c| (c.width, c.height) != size) {
                log::warn!("Encode targets differ in size, skipping pass");
                draw_index += pass.draws.len();
                continue;
            }
            let depth_view = depth_target
                .depth_view
                .as_ref()
                .ok_or(Error::MissingResource("encode depth attachment"))?;

            let (color_load, depth_load) = match pass.clear {
                Some((color, depth)) => (
                    wgpu::LoadOp::Clear(wgpu::Color {
                        r: color.x as f64,
                        g: color.y as f64,
                        b: color.z as f64,
                        a: color.w as f64,
                    }),
                    wgpu::LoadOp::Clear(depth),
                ),
                None => (wgpu::LoadOp::Load, wgpu::LoadOp::Load),
            };

            let attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colors
                .iter()
                .map(|target| {
                    Some(wgpu::RenderPassColorAttachment {
                        view: &target.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: color_load,
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })
                })
                .collect();

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("grass_encode_pass"),
                color_attachments: &attachments,
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            for draw in &pass.draws {
                let pipeline = self
                    .pipelines
                    .get(&draw.key)
                    .ok_or_else(|| Error::Gpu(format!("missing pipeline for {}", draw.key.shader)))?;
                let mesh = resources.mesh(draw.mesh)?;
                let offset = (draw_index as u64 * UNIFORM_STRIDE) as u32;
                let sub = draw.submesh;

                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(0, &bind_groups[draw_index], &[offset]);
                render_pass.set_vertex_buffer(0, mesh.vertices.slice(..));
                render_pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(sub.index_start..sub.index_start + sub.index_count, sub.base_vertex, 0..1);
                draw_index += 1;
            }
        }

        Ok(())
    }

    fn bind_group(
        &self,
        device: &wgpu::Device,
        resources: &Resources,
        uniforms: &wgpu::Buffer,
        draw: &PlannedDraw,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("grass_encode_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: uniforms,
                        offset: 0,
                        size: NonZeroU64::new(std::mem::size_of::<EncodeDrawUniforms>() as u64),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(resources.view_or_fallback(draw.main_texture)),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(resources.view_or_fallback(draw.lut)),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&resources.sampler),
                },
            ],
        })
    }
}

/// Split a command list into passes and resolve every draw's inputs
fn plan(
    resources: &Resources,
    globals: &mut ShaderGlobals,
    convention: DepthConvention,
    view: &EncodeView,
    commands: &[EncodeCommand],
) -> Result<Vec<PlannedPass>> {
    let mut passes: Vec<PlannedPass> = Vec::new();
    let view_proj = view.view_projection().to_cols_array_2d();
    let camera = [view.near, view.far, view.position.y, 0.0];

    for command in commands {
        let (mesh, transform, material, submesh, pass) = match command {
            EncodeCommand::SetTargets { colors, depth } => {
                passes.push(PlannedPass {
                    colors: *colors,
                    depth: *depth,
                    clear: None,
                    draws: Vec::new(),
                });
                continue;
            }
            EncodeCommand::Clear { color, depth } => {
                let current = passes
                    .last_mut()
                    .ok_or_else(|| Error::Gpu("encode clear without bound targets".into()))?;
                if current.draws.is_empty() {
                    current.clear = Some((*color, *depth));
                } else {
                    let (colors, depth_target) = (current.colors, current.depth);
                    passes.push(PlannedPass {
                        colors,
                        depth: depth_target,
                        clear: Some((*color, *depth)),
                        draws: Vec::new(),
                    });
                }
                continue;
            }
            EncodeCommand::SetGlobalVector { name, value } => {
                globals.set_vector(name, *value);
                continue;
            }
            EncodeCommand::SetGlobalTexture { name, texture } => {
                globals.set_texture(name, *texture);
                continue;
            }
            EncodeCommand::DrawMesh {
                mesh,
                transform,
                material,
                submesh,
                pass,
            } => (*mesh, *transform, *material, *submesh, *pass),
            EncodeCommand::DrawRenderer {
                renderer,
                material,
                submesh,
                pass,
            } => {
                let renderer = resources.renderer(*renderer)?;
                (renderer.mesh, renderer.transform, *material, *submesh, *pass)
            }
        };

        let current = passes
            .last_mut()
            .ok_or_else(|| Error::Gpu("encode draw without bound targets".into()))?;
        let Some(draw) = plan_draw(resources, globals, current.colors, mesh, material, submesh, pass, convention)? else {
            continue;
        };
        current.draws.push(PlannedDraw {
            uniforms: EncodeDrawUniforms {
                view_proj,
                model: transform.to_cols_array_2d(),
                camera,
                ..draw.uniforms
            },
            ..draw
        });
    }

    Ok(passes)
}

#[allow(clippy::too_many_arguments)]
fn plan_draw(
    resources: &Resources,
    globals: &ShaderGlobals,
    colors: [TextureHandle; 3],
    mesh: MeshHandle,
    material: MaterialHandle,
    submesh: u32,
    pass: u32,
    convention: DepthConvention,
) -> Result<Option<PlannedDraw>> {
    let material = resources.material(material)?;
    let Some(sub) = resources.mesh(mesh)?.submeshes.get(submesh as usize).copied() else {
        log::warn!("Mesh {} has no submesh {}, skipping draw", mesh.id(), submesh);
        return Ok(None);
    };

    let formats = [
        resources.texture(colors[0])?.format,
        resources.texture(colors[1])?.format,
        resources.texture(colors[2])?.format,
    ];

    let material_vector = material.vectors.get(SURFACE_MATERIAL_INDEX).copied().unwrap_or(Vec4::ZERO);
    let state = globals.vector(GLOBAL_STATE).unwrap_or(Vec4::ZERO);

    Ok(Some(PlannedDraw {
        key: PipelineKey {
            shader: material.shader.clone(),
            pass,
            formats,
            reversed: convention == DepthConvention::Reversed,
        },
        mesh,
        submesh: sub,
        uniforms: EncodeDrawUniforms {
            state: state.to_array(),
            material: material_vector.to_array(),
            ..EncodeDrawUniforms::zeroed()
        },
        main_texture: material.textures.get(OBSTACLE_TEXTURE_SLOT).copied(),
        lut: globals.texture(GLOBAL_SURFACE_LUT),
    }))
}
