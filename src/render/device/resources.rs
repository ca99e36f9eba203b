//! Handle → wgpu object tables owned by the backend

use std::collections::HashMap;

use glam::{Mat4, Vec4};

use crate::core::{Error, Result};
use crate::render::backend::{
    BufferDesc, BufferHandle, MaterialHandle, MeshHandle, RendererHandle, TargetFormat, TextureHandle,
};
use crate::render::mesh::{GpuVertex, SubMesh};

/// Depth attachment format of render targets created with `depth: true`
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

pub const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

/// Layout of [`GpuVertex`] as bound at slot 0
pub fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<GpuVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &VERTEX_ATTRIBUTES,
    }
}

pub fn texture_format(format: TargetFormat) -> wgpu::TextureFormat {
    match format {
        TargetFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TargetFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TargetFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
    }
}

/// What a raster shader is drawn for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderRole {
    /// Splats displacement into the obstacle map
    Obstacle,
    /// Encodes surface depth, normals and biome data
    Surface,
    /// Draws the grass patch instances
    Patch,
}

pub struct RasterShader {
    pub module: wgpu::ShaderModule,
    pub role: ShaderRole,
}

pub struct GpuTexture {
    #[allow(dead_code)]
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub depth_view: Option<wgpu::TextureView>,
    pub format: TargetFormat,
    pub width: u32,
    pub height: u32,
}

pub struct GpuBuffer {
    pub buffer: wgpu::Buffer,
    pub desc: BufferDesc,
}

pub struct GpuMesh {
    pub vertices: wgpu::Buffer,
    pub indices: wgpu::Buffer,
    pub submeshes: Vec<SubMesh>,
}

pub struct GpuMaterial {
    pub shader: String,
    pub textures: HashMap<String, TextureHandle>,
    pub vectors: HashMap<String, Vec4>,
}

pub struct GpuRenderer {
    pub mesh: MeshHandle,
    pub transform: Mat4,
}

/// Every live object the backend has handed out a handle for
pub struct Resources {
    pub textures: HashMap<TextureHandle, GpuTexture>,
    pub buffers: HashMap<BufferHandle, GpuBuffer>,
    pub meshes: HashMap<MeshHandle, GpuMesh>,
    pub materials: HashMap<MaterialHandle, GpuMaterial>,
    pub renderers: HashMap<RendererHandle, GpuRenderer>,
    /// 1x1 black texture bound wherever a texture slot is empty
    pub fallback_view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

impl Resources {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let size = wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        };
        let fallback = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("fallback_texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &fallback,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0, 0, 0, 0],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            size,
        );
        let fallback_view = fallback.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("material_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            textures: HashMap::new(),
            buffers: HashMap::new(),
            meshes: HashMap::new(),
            materials: HashMap::new(),
            renderers: HashMap::new(),
            fallback_view,
            sampler,
        }
    }

    pub fn texture(&self, handle: TextureHandle) -> Result<&GpuTexture> {
        self.textures
            .get(&handle)
            .ok_or_else(|| Error::InvalidHandle(format!("texture {}", handle.id())))
    }

    /// View of `handle`, or the fallback texture when unset or released
    pub fn view_or_fallback(&self, handle: Option<TextureHandle>) -> &wgpu::TextureView {
        handle
            .and_then(|h| self.textures.get(&h))
            .map(|t| &t.view)
            .unwrap_or(&self.fallback_view)
    }

    pub fn buffer(&self, handle: BufferHandle) -> Result<&GpuBuffer> {
        self.buffers
            .get(&handle)
            .ok_or_else(|| Error::InvalidHandle(format!("buffer {}", handle.id())))
    }

    pub fn mesh(&self, handle: MeshHandle) -> Result<&GpuMesh> {
        self.meshes
            .get(&handle)
            .ok_or_else(|| Error::InvalidHandle(format!("mesh {}", handle.id())))
    }

    pub fn material(&self, handle: MaterialHandle) -> Result<&GpuMaterial> {
        self.materials
            .get(&handle)
            .ok_or_else(|| Error::InvalidHandle(format!("material {}", handle.id())))
    }

    pub fn material_mut(&mut self, handle: MaterialHandle) -> Result<&mut GpuMaterial> {
        self.materials
            .get_mut(&handle)
            .ok_or_else(|| Error::InvalidHandle(format!("material {}", handle.id())))
    }

    pub fn renderer(&self, handle: RendererHandle) -> Result<&GpuRenderer> {
        self.renderers
            .get(&handle)
            .ok_or_else(|| Error::InvalidHandle(format!("renderer {}", handle.id())))
    }
}
