//! In-memory backend that records every call, for tests.

use std::collections::{HashMap, HashSet};

use glam::{Mat4, Vec4};

use crate::core::{Error, Result};
use crate::render::backend::*;
use crate::render::globals::ShaderGlobals;
use crate::render::mesh::MeshData;

/// One recorded backend call
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    CreateRenderTarget(RenderTargetDesc, TextureHandle),
    CreateTexture(TextureDesc, TextureHandle),
    ReleaseTexture(TextureHandle),
    CreateBuffer(BufferDesc, BufferHandle),
    ReleaseBuffer(BufferHandle),
    WriteMapped { buffer: BufferHandle, first_element: u32, data: Vec<u8> },
    ReplaceData { buffer: BufferHandle, data: Vec<u8> },
    CreateMesh(MeshHandle),
    ReleaseMesh(MeshHandle),
    CreateMaterial { shader: String, material: MaterialHandle },
    SetMaterialTexture { material: MaterialHandle, name: String, texture: Option<TextureHandle> },
    SetMaterialVector { material: MaterialHandle, name: String, value: Vec4 },
    ReleaseMaterial(MaterialHandle),
    CreateRenderer(RendererHandle),
    ReleaseRenderer(RendererHandle),
    Encode { view: EncodeView, commands: Vec<EncodeCommand> },
    Flush,
    FindKernel { kernel: String },
    SetKeyword { keyword: String, enabled: bool },
    SetVector { name: String, value: Vec4 },
    SetBuffer { name: String, buffer: BufferHandle },
    SetTexture { name: String, texture: TextureHandle },
    Dispatch { kernel: u32, groups: [u32; 3] },
    Draw(IndirectDraw),
}

pub struct RecordingBackend {
    handles: HandleAllocator,
    pub events: Vec<Event>,
    /// Kernels resolvable by name
    pub kernels: HashMap<String, KernelInfo>,
    pub mapped_writes: bool,
    pub depth: DepthConvention,
    globals: ShaderGlobals,
    live_textures: HashSet<TextureHandle>,
    live_buffers: HashMap<BufferHandle, (BufferDesc, Vec<u8>)>,
    texture_data: HashMap<TextureHandle, Vec<u8>>,
    keywords: HashMap<String, bool>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        let mut kernels = HashMap::new();
        kernels.insert(
            "cs_main".to_string(),
            KernelInfo { index: 0, thread_group_width: 64 },
        );
        Self {
            handles: HandleAllocator::default(),
            events: Vec::new(),
            kernels,
            mapped_writes: false,
            depth: DepthConvention::Standard,
            globals: ShaderGlobals::new(),
            live_textures: HashSet::new(),
            live_buffers: HashMap::new(),
            texture_data: HashMap::new(),
            keywords: HashMap::new(),
        }
    }

    pub fn without_kernels() -> Self {
        let mut backend = Self::new();
        backend.kernels.clear();
        backend
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Number of texture, buffer, mesh and material creations
    pub fn allocation_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(
                e,
                Event::CreateRenderTarget(..)
                    | Event::CreateTexture(..)
                    | Event::CreateBuffer(..)
                    | Event::CreateMesh(..)
                    | Event::CreateMaterial { .. }
            ))
            .count()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn dispatches(&self) -> Vec<(u32, [u32; 3])> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Dispatch { kernel, groups } => Some((*kernel, *groups)),
                _ => None,
            })
            .collect()
    }

    pub fn draws(&self) -> Vec<IndirectDraw> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Draw(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    pub fn encodes(&self) -> Vec<Vec<EncodeCommand>> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Encode { commands, .. } => Some(commands.clone()),
                _ => None,
            })
            .collect()
    }

    /// Most recent value set for a compute vector
    pub fn last_vector(&self, name: &str) -> Option<Vec4> {
        self.events.iter().rev().find_map(|e| match e {
            Event::SetVector { name: n, value } if n == name => Some(*value),
            _ => None,
        })
    }

    pub fn keyword(&self, keyword: &str) -> Option<bool> {
        self.keywords.get(keyword).copied()
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.live_buffers.get(&buffer).map(|(_, data)| data.as_slice())
    }

    pub fn buffer_desc(&self, buffer: BufferHandle) -> Option<BufferDesc> {
        self.live_buffers.get(&buffer).map(|(desc, _)| *desc)
    }

    pub fn texture_contents(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.texture_data.get(&texture).map(|d| d.as_slice())
    }

    pub fn is_texture_live(&self, texture: TextureHandle) -> bool {
        self.live_textures.contains(&texture)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.live_buffers.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.live_textures.len()
    }
}

impl GpuBackend for RecordingBackend {
    fn create_render_target(&mut self, desc: &RenderTargetDesc) -> Result<TextureHandle> {
        let handle = TextureHandle(self.handles.next());
        self.live_textures.insert(handle);
        self.events.push(Event::CreateRenderTarget(*desc, handle));
        Ok(handle)
    }

    fn create_texture(&mut self, desc: &TextureDesc, texels: &[u8]) -> Result<TextureHandle> {
        let handle = TextureHandle(self.handles.next());
        self.live_textures.insert(handle);
        self.texture_data.insert(handle, texels.to_vec());
        self.events.push(Event::CreateTexture(*desc, handle));
        Ok(handle)
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        self.live_textures.remove(&texture);
        self.texture_data.remove(&texture);
        self.events.push(Event::ReleaseTexture(texture));
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        let handle = BufferHandle(self.handles.next());
        self.live_buffers
            .insert(handle, (*desc, vec![0; desc.size_bytes() as usize]));
        self.events.push(Event::CreateBuffer(*desc, handle));
        Ok(handle)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        self.live_buffers.remove(&buffer);
        self.events.push(Event::ReleaseBuffer(buffer));
    }

    fn supports_mapped_writes(&self) -> bool {
        self.mapped_writes
    }

    fn write_buffer_mapped(&mut self, buffer: BufferHandle, first_element: u32, data: &[u8]) -> Result<()> {
        let (desc, contents) = self
            .live_buffers
            .get_mut(&buffer)
            .ok_or_else(|| Error::InvalidHandle(format!("buffer {}", buffer.id())))?;
        let start = first_element as usize * desc.stride as usize;
        contents[start..start + data.len()].copy_from_slice(data);
        self.events.push(Event::WriteMapped { buffer, first_element, data: data.to_vec() });
        Ok(())
    }

    fn replace_buffer_data(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<()> {
        let (_, contents) = self
            .live_buffers
            .get_mut(&buffer)
            .ok_or_else(|| Error::InvalidHandle(format!("buffer {}", buffer.id())))?;
        contents.clear();
        contents.extend_from_slice(data);
        self.events.push(Event::ReplaceData { buffer, data: data.to_vec() });
        Ok(())
    }

    fn create_mesh(&mut self, _mesh: &MeshData) -> Result<MeshHandle> {
        let handle = MeshHandle(self.handles.next());
        self.events.push(Event::CreateMesh(handle));
        Ok(handle)
    }

    fn release_mesh(&mut self, mesh: MeshHandle) {
        self.events.push(Event::ReleaseMesh(mesh));
    }

    fn create_material(&mut self, shader: &str) -> Result<MaterialHandle> {
        let material = MaterialHandle(self.handles.next());
        self.events.push(Event::CreateMaterial { shader: shader.to_string(), material });
        Ok(material)
    }

    fn set_material_texture(
        &mut self,
        material: MaterialHandle,
        name: &str,
        texture: Option<TextureHandle>,
    ) -> Result<()> {
        self.events.push(Event::SetMaterialTexture { material, name: name.to_string(), texture });
        Ok(())
    }

    fn set_material_vector(&mut self, material: MaterialHandle, name: &str, value: Vec4) -> Result<()> {
        self.events.push(Event::SetMaterialVector { material, name: name.to_string(), value });
        Ok(())
    }

    fn release_material(&mut self, material: MaterialHandle) {
        self.events.push(Event::ReleaseMaterial(material));
    }

    fn create_renderer(&mut self, _mesh: MeshHandle, _transform: Mat4) -> Result<RendererHandle> {
        let renderer = RendererHandle(self.handles.next());
        self.events.push(Event::CreateRenderer(renderer));
        Ok(renderer)
    }

    fn set_renderer_transform(&mut self, _renderer: RendererHandle, _transform: Mat4) -> Result<()> {
        Ok(())
    }

    fn release_renderer(&mut self, renderer: RendererHandle) {
        self.events.push(Event::ReleaseRenderer(renderer));
    }

    fn depth_convention(&self) -> DepthConvention {
        self.depth
    }

    fn execute_encode(&mut self, view: &EncodeView, commands: &[EncodeCommand]) -> Result<()> {
        self.events.push(Event::Encode { view: *view, commands: commands.to_vec() });
        Ok(())
    }

    fn flush(&mut self) {
        self.events.push(Event::Flush);
    }

    fn find_kernel(&mut self, _program: &str, kernel: &str) -> Option<KernelInfo> {
        self.events.push(Event::FindKernel { kernel: kernel.to_string() });
        self.kernels.get(kernel).copied()
    }

    fn set_keyword(&mut self, _program: &str, keyword: &str, enabled: bool) {
        self.keywords.insert(keyword.to_string(), enabled);
        self.events.push(Event::SetKeyword { keyword: keyword.to_string(), enabled });
    }

    fn set_compute_vector(&mut self, _program: &str, name: &str, value: Vec4) {
        self.events.push(Event::SetVector { name: name.to_string(), value });
    }

    fn set_compute_buffer(&mut self, _program: &str, _kernel: u32, name: &str, buffer: BufferHandle) {
        self.events.push(Event::SetBuffer { name: name.to_string(), buffer });
    }

    fn set_compute_texture(&mut self, _program: &str, _kernel: u32, name: &str, texture: TextureHandle) {
        self.events.push(Event::SetTexture { name: name.to_string(), texture });
    }

    fn dispatch(&mut self, _program: &str, kernel: u32, groups: [u32; 3]) -> Result<()> {
        self.events.push(Event::Dispatch { kernel, groups });
        Ok(())
    }

    fn draw_mesh_instanced_indirect(&mut self, draw: &IndirectDraw) -> Result<()> {
        self.events.push(Event::Draw(*draw));
        Ok(())
    }

    fn globals(&self) -> &ShaderGlobals {
        &self.globals
    }

    fn globals_mut(&mut self) -> &mut ShaderGlobals {
        &mut self.globals
    }
}
