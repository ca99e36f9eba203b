//! GPU collaborator interfaces consumed by the grass pipeline.
//!
//! The pipeline never touches a graphics API directly. Everything it needs
//! (render targets, structured buffers, compute dispatch, indirect draws and
//! the global shader-parameter bus) goes through [`GpuBackend`]. Commands are
//! issued into a single ordered stream: an encode pass submitted before a
//! dispatch is always executed before it, and a dispatch before a draw.
//!
//! Handles are opaque ids minted by the backend from a monotonic counter and
//! are never reused, so comparing two handles is a valid "did this resource
//! change" test.

use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::core::Result;
use crate::math::Aabb;
use crate::render::globals::ShaderGlobals;
use crate::render::mesh::MeshData;

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Raw id, for logging
            pub fn id(self) -> u64 {
                self.0
            }
        }
    };
}

gpu_handle!(
    /// A 2D texture or render target
    TextureHandle
);
gpu_handle!(
    /// A fixed-stride GPU buffer
    BufferHandle
);
gpu_handle!(
    /// Uploaded vertex + index data
    MeshHandle
);
gpu_handle!(
    /// A shader program plus its bound resources
    MaterialHandle
);
gpu_handle!(
    /// A host-owned mesh instance with a world transform
    RendererHandle
);

/// Monotonic handle source; ids start at 1 and are never reused.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    pub fn next(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Texel formats used by the pipeline's textures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
}

impl TargetFormat {
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TargetFormat::Rgba8Unorm => 4,
            TargetFormat::Rgba16Float => 8,
            TargetFormat::Rgba32Float => 16,
        }
    }
}

/// Square color render target, optionally with a depth attachment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTargetDesc {
    pub label: &'static str,
    pub resolution: u32,
    pub format: TargetFormat,
    pub depth: bool,
}

/// Sampleable 2D texture with initial contents
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: TargetFormat,
}

/// What a buffer is bound as
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// Read/write structured buffer for compute and draw-time reads
    Structured,
    /// Indirect draw arguments
    IndirectArgs,
}

/// How the CPU is expected to write a buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferWriteMode {
    /// Whole-buffer replace only
    Replace,
    /// Direct-mapped partial writes
    MappedSubUpdates,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub kind: BufferKind,
    /// Element count
    pub count: u32,
    /// Element size in bytes
    pub stride: u32,
    pub write_mode: BufferWriteMode,
}

impl BufferDesc {
    pub fn size_bytes(&self) -> u64 {
        self.count as u64 * self.stride as u64
    }
}

/// A resolved compute kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelInfo {
    pub index: u32,
    /// Threads per group along x
    pub thread_group_width: u32,
}

/// Depth-buffer convention of the active graphics API
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepthConvention {
    /// Near = 0, far = 1
    Standard,
    /// Near = 1, far = 0
    Reversed,
}

impl DepthConvention {
    /// Depth value meaning "nothing drawn here"
    pub fn far_value(self) -> f32 {
        match self {
            DepthConvention::Standard => 1.0,
            DepthConvention::Reversed => 0.0,
        }
    }
}

/// Shadow casting behaviour of the grass draw
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShadowCasting {
    Off,
    #[default]
    On,
    TwoSided,
    ShadowsOnly,
}

// ---------------------------------------------------------------------------
// Encode commands
// ---------------------------------------------------------------------------

/// Camera state an encode pass is rendered from
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EncodeView {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
    pub near: f32,
    pub far: f32,
}

impl EncodeView {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// One recorded step of the auxiliary encode pass
#[derive(Clone, Debug, PartialEq)]
pub enum EncodeCommand {
    /// Bind three color targets plus a depth target
    SetTargets {
        colors: [TextureHandle; 3],
        depth: TextureHandle,
    },
    /// Clear every bound color target and the depth target
    Clear { color: Vec4, depth: f32 },
    /// Draw a mesh with an explicit model matrix
    DrawMesh {
        mesh: MeshHandle,
        transform: Mat4,
        material: MaterialHandle,
        submesh: u32,
        pass: u32,
    },
    /// Draw a host-owned renderer with a replacement material
    DrawRenderer {
        renderer: RendererHandle,
        material: MaterialHandle,
        submesh: u32,
        pass: u32,
    },
    /// Bind a vector globally for all following draws
    SetGlobalVector { name: &'static str, value: Vec4 },
    /// Bind a texture globally for all following draws
    SetGlobalTexture {
        name: &'static str,
        texture: TextureHandle,
    },
}

/// One instanced draw whose counts come from an argument buffer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndirectDraw {
    pub mesh: MeshHandle,
    pub submesh: u32,
    pub material: MaterialHandle,
    pub bounds: Aabb,
    pub args: BufferHandle,
    pub args_offset: u64,
    pub shadow_casting: ShadowCasting,
    pub receive_shadows: bool,
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Graphics services the grass pipeline depends on.
pub trait GpuBackend {
    // -- Textures ----------------------------------------------------------

    fn create_render_target(&mut self, desc: &RenderTargetDesc) -> Result<TextureHandle>;

    /// Create a sampleable texture; `texels` is tightly packed, row 0 first.
    fn create_texture(&mut self, desc: &TextureDesc, texels: &[u8]) -> Result<TextureHandle>;

    fn release_texture(&mut self, texture: TextureHandle);

    // -- Buffers -----------------------------------------------------------

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle>;

    fn release_buffer(&mut self, buffer: BufferHandle);

    /// Whether [`GpuBackend::write_buffer_mapped`] avoids a synchronization point
    fn supports_mapped_writes(&self) -> bool;

    /// Write `data` in place starting at `first_element`
    fn write_buffer_mapped(&mut self, buffer: BufferHandle, first_element: u32, data: &[u8]) -> Result<()>;

    /// Replace the whole buffer contents
    fn replace_buffer_data(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<()>;

    // -- Meshes, materials, renderers --------------------------------------

    fn create_mesh(&mut self, mesh: &MeshData) -> Result<MeshHandle>;

    fn release_mesh(&mut self, mesh: MeshHandle);

    /// Instantiate a material from a named shader
    fn create_material(&mut self, shader: &str) -> Result<MaterialHandle>;

    fn set_material_texture(
        &mut self,
        material: MaterialHandle,
        name: &str,
        texture: Option<TextureHandle>,
    ) -> Result<()>;

    /// Set a per-material vector property
    fn set_material_vector(&mut self, material: MaterialHandle, name: &str, value: Vec4) -> Result<()>;

    fn release_material(&mut self, material: MaterialHandle);

    fn create_renderer(&mut self, mesh: MeshHandle, transform: Mat4) -> Result<RendererHandle>;

    fn set_renderer_transform(&mut self, renderer: RendererHandle, transform: Mat4) -> Result<()>;

    fn release_renderer(&mut self, renderer: RendererHandle);

    // -- Encode pass -------------------------------------------------------

    fn depth_convention(&self) -> DepthConvention;

    /// Queue an encode pass rendered from `view`
    fn execute_encode(&mut self, view: &EncodeView, commands: &[EncodeCommand]) -> Result<()>;

    /// Submit everything queued so far and wait for it to complete
    fn flush(&mut self);

    // -- Compute -----------------------------------------------------------

    fn find_kernel(&mut self, program: &str, kernel: &str) -> Option<KernelInfo>;

    fn set_keyword(&mut self, program: &str, keyword: &str, enabled: bool);

    fn set_compute_vector(&mut self, program: &str, name: &str, value: Vec4);

    fn set_compute_buffer(&mut self, program: &str, kernel: u32, name: &str, buffer: BufferHandle);

    fn set_compute_texture(&mut self, program: &str, kernel: u32, name: &str, texture: TextureHandle);

    fn dispatch(&mut self, program: &str, kernel: u32, groups: [u32; 3]) -> Result<()>;

    // -- Draw --------------------------------------------------------------

    fn draw_mesh_instanced_indirect(&mut self, draw: &IndirectDraw) -> Result<()>;

    // -- Global bus --------------------------------------------------------

    fn globals(&self) -> &ShaderGlobals;

    fn globals_mut(&mut self) -> &mut ShaderGlobals;
}
