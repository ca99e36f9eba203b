//! Named compute programs with keyword variants.
//!
//! A program is declared once with its resource interface and compiled
//! lazily: every distinct keyword combination gets its own pipeline, built
//! the first time a dispatch needs it and reused afterwards.

use std::collections::HashMap;

use glam::Vec4;
use wgpu::util::DeviceExt;

use crate::core::{Error, Result};
use crate::render::backend::{BufferHandle, KernelInfo, TextureHandle};
use crate::render::device::resources::Resources;

/// Resource interface of a compute program.
///
/// Group 0 binding 0 is a uniform block holding `vectors` in declaration
/// order. Storage buffers follow at bindings `1..`, then one non-filterable
/// sampled texture per entry of `textures`. Keywords are boolean WGSL
/// `override` constants of the same name.
#[derive(Clone, Copy, Debug)]
pub struct ComputeProgramDesc<'a> {
    pub name: &'a str,
    pub source: &'a str,
    /// (entry point, threads per group along x)
    pub kernels: &'a [(&'a str, u32)],
    pub keywords: &'a [&'a str],
    pub vectors: &'a [&'a str],
    pub buffers: &'a [&'a str],
    pub textures: &'a [&'a str],
}

pub struct ComputeProgram {
    name: String,
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    kernels: Vec<(String, u32)>,
    keywords: Vec<String>,
    vectors: Vec<String>,
    buffers: Vec<String>,
    textures: Vec<String>,
    enabled: HashMap<String, bool>,
    vector_values: HashMap<String, Vec4>,
    bound_buffers: HashMap<u32, HashMap<String, BufferHandle>>,
    bound_textures: HashMap<u32, HashMap<String, TextureHandle>>,
    pipelines: HashMap<(u32, Vec<bool>), wgpu::ComputePipeline>,
}

impl ComputeProgram {
    pub fn new(device: &wgpu::Device, desc: &ComputeProgramDesc) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.name),
            source: wgpu::ShaderSource::Wgsl(desc.source.into()),
        });

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        let mut binding = 1;
        for _ in desc.buffers {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
            binding += 1;
        }
        for _ in desc.textures {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            binding += 1;
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{}_layout", desc.name)),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{}_pipeline_layout", desc.name)),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let owned = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        Self {
            name: desc.name.to_string(),
            module,
            bind_group_layout,
            pipeline_layout,
            kernels: desc.kernels.iter().map(|(k, w)| (k.to_string(), *w)).collect(),
            keywords: owned(desc.keywords),
            vectors: owned(desc.vectors),
            buffers: owned(desc.buffers),
            textures: owned(desc.textures),
            enabled: HashMap::new(),
            vector_values: HashMap::new(),
            bound_buffers: HashMap::new(),
            bound_textures: HashMap::new(),
            pipelines: HashMap::new(),
        }
    }

    pub fn find_kernel(&self, kernel: &str) -> Option<KernelInfo> {
        self.kernels
            .iter()
            .position(|(name, _)| name == kernel)
            .map(|index| KernelInfo {
                index: index as u32,
                thread_group_width: self.kernels[index].1,
            })
    }

    pub fn set_keyword(&mut self, keyword: &str, enabled: bool) {
        if !self.keywords.iter().any(|k| k == keyword) {
            log::warn!("{}: unknown keyword {}", self.name, keyword);
            return;
        }
        self.enabled.insert(keyword.to_string(), enabled);
    }

    pub fn set_vector(&mut self, name: &str, value: Vec4) {
        self.vector_values.insert(name.to_string(), value);
    }

    pub fn set_buffer(&mut self, kernel: u32, name: &str, buffer: BufferHandle) {
        self.bound_buffers.entry(kernel).or_default().insert(name.to_string(), buffer);
    }

    pub fn set_texture(&mut self, kernel: u32, name: &str, texture: TextureHandle) {
        self.bound_textures.entry(kernel).or_default().insert(name.to_string(), texture);
    }

    /// Keyword state in declaration order
    fn variant(&self) -> Vec<bool> {
        self.keywords
            .iter()
            .map(|k| self.enabled.get(k).copied().unwrap_or(false))
            .collect()
    }

    /// Uniform block contents; unset vectors read as zero
    fn uniform_data(&self) -> Vec<[f32; 4]> {
        let mut data: Vec<[f32; 4]> = self
            .vectors
            .iter()
            .map(|name| self.vector_values.get(name).copied().unwrap_or(Vec4::ZERO).to_array())
            .collect();
        if data.is_empty() {
            data.push([0.0; 4]);
        }
        data
    }

    fn pipeline(&mut self, device: &wgpu::Device, kernel: u32) -> Result<&wgpu::ComputePipeline> {
        let (entry, _) = self
            .kernels
            .get(kernel as usize)
            .ok_or_else(|| Error::KernelNotFound(format!("{}#{}", self.name, kernel)))?;
        let variant = self.variant();
        let key = (kernel, variant);

        if !self.pipelines.contains_key(&key) {
            let constants: Vec<(&str, f64)> = self
                .keywords
                .iter()
                .zip(&key.1)
                .map(|(k, on)| (k.as_str(), if *on { 1.0 } else { 0.0 }))
                .collect();
            log::debug!("Compiling {}::{} variant {:?}", self.name, entry, key.1);
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&format!("{}_{}", self.name, entry)),
                layout: Some(&self.pipeline_layout),
                module: &self.module,
                entry_point: Some(entry),
                compilation_options: wgpu::PipelineCompilationOptions {
                    constants: &constants,
                    ..Default::default()
                },
                cache: None,
            });
            self.pipelines.insert(key.clone(), pipeline);
        }

        self.pipelines
            .get(&key)
            .ok_or_else(|| Error::KernelNotFound(format!("{}#{}", self.name, kernel)))
    }

    /// Record one dispatch of `kernel` into `encoder`
    pub fn dispatch(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        resources: &Resources,
        kernel: u32,
        groups: [u32; 3],
    ) -> Result<()> {
        let uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{}_uniforms", self.name)),
            contents: bytemuck::cast_slice(&self.uniform_data()),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let no_buffers = HashMap::new();
        let no_textures = HashMap::new();
        let bound_buffers = self.bound_buffers.get(&kernel).unwrap_or(&no_buffers);
        let bound_textures = self.bound_textures.get(&kernel).unwrap_or(&no_textures);

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniforms.as_entire_binding(),
        }];
        let mut binding = 1;
        for name in &self.buffers {
            let handle = bound_buffers
                .get(name)
                .ok_or_else(|| Error::Gpu(format!("{}: buffer {} is not bound", self.name, name)))?;
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: resources.buffer(*handle)?.buffer.as_entire_binding(),
            });
            binding += 1;
        }
        for name in &self.textures {
            let handle = bound_textures
                .get(name)
                .ok_or_else(|| Error::Gpu(format!("{}: texture {} is not bound", self.name, name)))?;
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(&resources.texture(*handle)?.view),
            });
            binding += 1;
        }

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{}_bind_group", self.name)),
            layout: &self.bind_group_layout,
            entries: &entries,
        });

        let pipeline = self.pipeline(device, kernel)?;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("grass_compute_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        Ok(())
    }
}
