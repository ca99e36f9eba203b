//! wgpu implementation of [`GpuBackend`].
//!
//! All GPU work for a frame is recorded into one command encoder in call
//! order and submitted by [`WgpuBackend::submit`] or [`GpuBackend::flush`].
//! The built-in grass shaders and the placement program are registered on
//! construction; hosts may register alternative surface shaders by name.

pub mod compute;
pub mod encode;
pub mod patch;
pub mod resources;

use std::collections::HashMap;

use glam::{Mat4, Vec4};
use wgpu::util::DeviceExt;

use crate::core::{Error, Result};
use crate::grass::params::{
    ENCODE_SHADER, GLOBAL_CULL_REF, GLOBAL_INSTANCES, GLOBAL_STATE, GLOBAL_SURFACE_LUT, KEYWORD_ENCODED_COLOR,
    KEYWORD_RANDOM_HSV, KEYWORD_REVERSED_Z, OBSTACLE_SHADER, PATCH_SHADER, PLACER_BIOME_MAP, PLACER_ENCODED_MAP,
    PLACER_ENCODE_INFO, PLACER_KERNEL, PLACER_PERF_INFO, PLACER_PROGRAM,
};
use crate::render::backend::{
    BufferDesc, BufferHandle, BufferKind, BufferWriteMode, DepthConvention, EncodeCommand, EncodeView, GpuBackend,
    HandleAllocator, IndirectDraw, KernelInfo, MaterialHandle, MeshHandle, RenderTargetDesc, RendererHandle,
    TextureDesc, TextureHandle,
};
use crate::render::context::GpuContext;
use crate::render::globals::ShaderGlobals;
use crate::render::mesh::MeshData;

pub use compute::ComputeProgramDesc;
pub use patch::FrameTarget;
pub use resources::ShaderRole;

use compute::ComputeProgram;
use encode::EncodePipelines;
use patch::PatchPipelines;
use resources::{
    texture_format, GpuBuffer, GpuMaterial, GpuMesh, GpuRenderer, GpuTexture, RasterShader, Resources, DEPTH_FORMAT,
};

/// Threads per group of the placement kernel; must match `grass_placer.wgsl`
pub const PLACER_GROUP_WIDTH: u32 = 64;

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    api: wgpu::Backend,
    handles: HandleAllocator,
    globals: ShaderGlobals,
    resources: Resources,
    shaders: HashMap<String, RasterShader>,
    programs: HashMap<String, ComputeProgram>,
    encode: EncodePipelines,
    patch: PatchPipelines,
    frame_target: Option<FrameTarget>,
    depth: DepthConvention,
    pending: Option<wgpu::CommandEncoder>,
}

impl WgpuBackend {
    pub fn new(context: &GpuContext) -> Self {
        let device = context.device.clone();
        let queue = context.queue.clone();
        let resources = Resources::new(&device, &queue);
        let encode = EncodePipelines::new(&device);
        let patch = PatchPipelines::new(&device);

        let mut backend = Self {
            device,
            queue,
            api: context.adapter.get_info().backend,
            handles: HandleAllocator::default(),
            globals: ShaderGlobals::new(),
            resources,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            encode,
            patch,
            frame_target: None,
            depth: DepthConvention::Standard,
            pending: None,
        };
        backend.register_builtins();
        backend
    }

    fn register_builtins(&mut self) {
        self.register_shader(
            ENCODE_SHADER,
            include_str!("../../../shaders/grass_encode.wgsl"),
            ShaderRole::Surface,
        );
        self.register_shader(
            OBSTACLE_SHADER,
            include_str!("../../../shaders/grass_obstacle.wgsl"),
            ShaderRole::Obstacle,
        );
        self.register_shader(
            PATCH_SHADER,
            include_str!("../../../shaders/grass_patch.wgsl"),
            ShaderRole::Patch,
        );
        self.register_program(&ComputeProgramDesc {
            name: PLACER_PROGRAM,
            source: include_str!("../../../shaders/grass_placer.wgsl"),
            kernels: &[(PLACER_KERNEL, PLACER_GROUP_WIDTH)],
            keywords: &[KEYWORD_REVERSED_Z, KEYWORD_ENCODED_COLOR, KEYWORD_RANDOM_HSV],
            vectors: &[PLACER_PERF_INFO, PLACER_ENCODE_INFO, GLOBAL_CULL_REF, GLOBAL_STATE],
            buffers: &[GLOBAL_INSTANCES],
            textures: &[PLACER_ENCODED_MAP, PLACER_BIOME_MAP, GLOBAL_SURFACE_LUT],
        });
    }

    /// Register a raster shader under `name`, replacing any previous one
    pub fn register_shader(&mut self, name: &str, source: &str, role: ShaderRole) {
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        self.shaders.insert(name.to_string(), RasterShader { module, role });
    }

    /// Register a compute program, replacing any previous one of the same name
    pub fn register_program(&mut self, desc: &ComputeProgramDesc) {
        let program = ComputeProgram::new(&self.device, desc);
        self.programs.insert(desc.name.to_string(), program);
    }

    /// Where indirect draws render; draws are skipped while unset
    pub fn set_frame_target(&mut self, target: Option<FrameTarget>) {
        self.frame_target = target;
    }

    pub fn set_depth_convention(&mut self, depth: DepthConvention) {
        self.depth = depth;
    }

    /// Submit recorded work without waiting for it
    pub fn submit(&mut self) {
        if let Some(encoder) = self.pending.take() {
            self.queue.submit([encoder.finish()]);
        }
    }

    /// Destroy a buffer once nothing unsubmitted can still reference it
    fn retire_buffer(&mut self, buffer: wgpu::Buffer) {
        self.submit();
        buffer.destroy();
    }

    fn program_mut(&mut self, program: &str) -> Option<&mut ComputeProgram> {
        let found = self.programs.get_mut(program);
        if found.is_none() {
            log::warn!("Unknown compute program {}", program);
        }
        found
    }

    fn buffer_usage(kind: BufferKind) -> wgpu::BufferUsages {
        match kind {
            BufferKind::Structured => {
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
            }
            BufferKind::IndirectArgs => {
                wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST
            }
        }
    }
}

/// Buffer size rounded up to the copy alignment
fn aligned_size(bytes: u64) -> u64 {
    bytes.max(wgpu::COPY_BUFFER_ALIGNMENT).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}

impl GpuBackend for WgpuBackend {
    fn create_render_target(&mut self, desc: &RenderTargetDesc) -> Result<TextureHandle> {
        let size = wgpu::Extent3d {
            width: desc.resolution.max(1),
            height: desc.resolution.max(1),
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let depth_view = desc.depth.then(|| {
            self.device
                .create_texture(&wgpu::TextureDescriptor {
                    label: Some(desc.label),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: DEPTH_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                })
                .create_view(&wgpu::TextureViewDescriptor::default())
        });

        let handle = TextureHandle(self.handles.next());
        self.resources.textures.insert(
            handle,
            GpuTexture {
                texture,
                view,
                depth_view,
                format: desc.format,
                width: size.width,
                height: size.height,
            },
        );
        log::debug!("Created render target {} ({}x{}, {:?})", desc.label, size.width, size.height, desc.format);
        Ok(handle)
    }

    fn create_texture(&mut self, desc: &TextureDesc, texels: &[u8]) -> Result<TextureHandle> {
        // Zero-sized textures are invalid; an empty catalog still binds something
        let size = wgpu::Extent3d {
            width: desc.width.max(1),
            height: desc.height.max(1),
            depth_or_array_layers: 1,
        };
        let bytes_per_row = size.width * desc.format.bytes_per_texel();
        let expected = (bytes_per_row * size.height) as usize;
        let mut data = texels.to_vec();
        data.resize(expected, 0);

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(size.height),
            },
            size,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let handle = TextureHandle(self.handles.next());
        self.resources.textures.insert(
            handle,
            GpuTexture {
                texture,
                view,
                depth_view: None,
                format: desc.format,
                width: size.width,
                height: size.height,
            },
        );
        Ok(handle)
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if self.resources.textures.remove(&texture).is_none() {
            log::warn!("Release of unknown texture {}", texture.id());
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: aligned_size(desc.size_bytes()),
            usage: Self::buffer_usage(desc.kind),
            mapped_at_creation: false,
        });
        let handle = BufferHandle(self.handles.next());
        self.resources.buffers.insert(handle, GpuBuffer { buffer, desc: *desc });
        log::debug!("Created buffer {} ({} x {} bytes)", desc.label, desc.count, desc.stride);
        Ok(handle)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        if let Some(released) = self.resources.buffers.remove(&buffer) {
            self.retire_buffer(released.buffer);
        }
    }

    fn supports_mapped_writes(&self) -> bool {
        self.api != wgpu::Backend::Gl
    }

    fn write_buffer_mapped(&mut self, buffer: BufferHandle, first_element: u32, data: &[u8]) -> Result<()> {
        let target = self.resources.buffer(buffer)?;
        if target.desc.write_mode != BufferWriteMode::MappedSubUpdates {
            return Err(Error::Gpu(format!("{} does not allow mapped writes", target.desc.label)));
        }
        let offset = first_element as u64 * target.desc.stride as u64;
        if offset + data.len() as u64 > target.desc.size_bytes() {
            return Err(Error::Gpu(format!("mapped write past the end of {}", target.desc.label)));
        }
        let Some(size) = wgpu::BufferSize::new(data.len() as u64) else {
            return Ok(());
        };
        match self.queue.write_buffer_with(&target.buffer, offset, size) {
            Some(mut view) => {
                view.copy_from_slice(data);
                Ok(())
            }
            None => Err(Error::Gpu(format!("could not map {}", target.desc.label))),
        }
    }

    fn replace_buffer_data(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<()> {
        let target = self.resources.buffer(buffer)?;
        let desc = target.desc;
        if data.len() as u64 > desc.size_bytes() {
            return Err(Error::Gpu(format!("data does not fit {}", desc.label)));
        }
        let mut contents = data.to_vec();
        contents.resize(aligned_size(desc.size_bytes()) as usize, 0);
        let replacement = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(desc.label),
            contents: &contents,
            usage: Self::buffer_usage(desc.kind),
        });
        if let Some(old) = self.resources.buffers.insert(buffer, GpuBuffer { buffer: replacement, desc }) {
            self.retire_buffer(old.buffer);
        }
        Ok(())
    }

    fn create_mesh(&mut self, mesh: &MeshData) -> Result<MeshHandle> {
        if mesh.indices.is_empty() || mesh.positions.is_empty() {
            return Err(Error::Gpu("mesh has no geometry".into()));
        }
        let vertices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("grass_mesh_vertices"),
            contents: bytemuck::cast_slice(&mesh.interleaved()),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("grass_mesh_indices"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let handle = MeshHandle(self.handles.next());
        self.resources.meshes.insert(
            handle,
            GpuMesh {
                vertices,
                indices,
                submeshes: mesh.clone().with_default_submesh().submeshes,
            },
        );
        Ok(handle)
    }

    fn release_mesh(&mut self, mesh: MeshHandle) {
        self.resources.meshes.remove(&mesh);
    }

    fn create_material(&mut self, shader: &str) -> Result<MaterialHandle> {
        if !self.shaders.contains_key(shader) {
            return Err(Error::Gpu(format!("unknown shader {}", shader)));
        }
        let handle = MaterialHandle(self.handles.next());
        self.resources.materials.insert(
            handle,
            GpuMaterial {
                shader: shader.to_string(),
                textures: HashMap::new(),
                vectors: HashMap::new(),
            },
        );
        Ok(handle)
    }

    fn set_material_texture(
        &mut self,
        material: MaterialHandle,
        name: &str,
        texture: Option<TextureHandle>,
    ) -> Result<()> {
        let material = self.resources.material_mut(material)?;
        match texture {
            Some(texture) => material.textures.insert(name.to_string(), texture),
            None => material.textures.remove(name),
        };
        Ok(())
    }

    fn set_material_vector(&mut self, material: MaterialHandle, name: &str, value: Vec4) -> Result<()> {
        self.resources.material_mut(material)?.vectors.insert(name.to_string(), value);
        Ok(())
    }

    fn release_material(&mut self, material: MaterialHandle) {
        self.resources.materials.remove(&material);
    }

    fn create_renderer(&mut self, mesh: MeshHandle, transform: Mat4) -> Result<RendererHandle> {
        self.resources.mesh(mesh)?;
        let handle = RendererHandle(self.handles.next());
        self.resources.renderers.insert(handle, GpuRenderer { mesh, transform });
        Ok(handle)
    }

    fn set_renderer_transform(&mut self, renderer: RendererHandle, transform: Mat4) -> Result<()> {
        let entry = self
            .resources
            .renderers
            .get_mut(&renderer)
            .ok_or_else(|| Error::InvalidHandle(format!("renderer {}", renderer.id())))?;
        entry.transform = transform;
        Ok(())
    }

    fn release_renderer(&mut self, renderer: RendererHandle) {
        self.resources.renderers.remove(&renderer);
    }

    fn depth_convention(&self) -> DepthConvention {
        self.depth
    }

    fn execute_encode(&mut self, view: &EncodeView, commands: &[EncodeCommand]) -> Result<()> {
        let device = &self.device;
        let encoder = self.pending.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("grass_commands"),
            })
        });
        self.encode.execute(
            device,
            encoder,
            &self.resources,
            &self.shaders,
            &mut self.globals,
            self.depth,
            view,
            commands,
        )
    }

    fn flush(&mut self) {
        self.submit();
        if let Err(e) = self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        }) {
            log::warn!("Device poll after flush failed: {e}");
        }
    }

    fn find_kernel(&mut self, program: &str, kernel: &str) -> Option<KernelInfo> {
        self.programs.get(program)?.find_kernel(kernel)
    }

    fn set_keyword(&mut self, program: &str, keyword: &str, enabled: bool) {
        if let Some(program) = self.program_mut(program) {
            program.set_keyword(keyword, enabled);
        }
    }

    fn set_compute_vector(&mut self, program: &str, name: &str, value: Vec4) {
        if let Some(program) = self.program_mut(program) {
            program.set_vector(name, value);
        }
    }

    fn set_compute_buffer(&mut self, program: &str, kernel: u32, name: &str, buffer: BufferHandle) {
        if let Some(program) = self.program_mut(program) {
            program.set_buffer(kernel, name, buffer);
        }
    }

    fn set_compute_texture(&mut self, program: &str, kernel: u32, name: &str, texture: TextureHandle) {
        if let Some(program) = self.program_mut(program) {
            program.set_texture(kernel, name, texture);
        }
    }

    fn dispatch(&mut self, program: &str, kernel: u32, groups: [u32; 3]) -> Result<()> {
        let compute = self
            .programs
            .get_mut(program)
            .ok_or_else(|| Error::KernelNotFound(program.to_string()))?;
        let device = &self.device;
        let encoder = self.pending.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("grass_commands"),
            })
        });
        compute.dispatch(device, encoder, &self.resources, kernel, groups)
    }

    fn draw_mesh_instanced_indirect(&mut self, draw: &IndirectDraw) -> Result<()> {
        let Some(target) = &self.frame_target else {
            log::debug!("No frame target set, skipping grass draw");
            return Ok(());
        };
        let device = &self.device;
        let encoder = self.pending.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("grass_commands"),
            })
        });
        self.patch.draw(
            device,
            encoder,
            &self.resources,
            &self.shaders,
            &self.globals,
            self.depth,
            target,
            draw,
        )
    }

    fn globals(&self) -> &ShaderGlobals {
        &self.globals
    }

    fn globals_mut(&mut self) -> &mut ShaderGlobals {
        &mut self.globals
    }
}
