//! The native backend seam.
//!
//! Everything the translation engine needs from Direct3D 11 is expressed by
//! the [`NativeDevice`], [`DeviceContext`] and [`DeviceContext1`] traits.
//! Native objects are opaque ids wrapped in typed `Copy` newtypes; ownership
//! is expressed with [`Owned`], which releases the object when dropped.

use std::fmt;
use std::sync::Arc;

use ash::vk;
use bitflags::bitflags;
use vkbridge_core::FeatureLevel;

use crate::error::NativeError;
use crate::format::DxgiFormat;

pub mod null;

/// A native object id.
pub trait NativeObject: Copy + fmt::Debug {
    const KIND: &'static str;
    fn raw(&self) -> u64;
}

macro_rules! native_handle {
    ($($name:ident => $kind:literal),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);

            impl NativeObject for $name {
                const KIND: &'static str = $kind;
                fn raw(&self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

native_handle! {
    NativeBuffer => "buffer",
    NativeTexture => "texture",
    ShaderResourceView => "shader resource view",
    UnorderedAccessView => "unordered access view",
    RenderTargetView => "render target view",
    DepthStencilView => "depth stencil view",
    SamplerState => "sampler state",
    NativeShader => "shader",
    InputLayout => "input layout",
    RasterizerState => "rasterizer state",
    BlendState => "blend state",
    DepthStencilState => "depth stencil state",
    NativeQuery => "query",
}

/// Unique ownership of a native object. Released through the owning device
/// on drop.
pub struct Owned<H: NativeObject> {
    handle: H,
    device: Arc<dyn NativeDevice>,
}

impl<H: NativeObject> Owned<H> {
    pub fn new(device: Arc<dyn NativeDevice>, handle: H) -> Self {
        Self { handle, device }
    }

    pub fn get(&self) -> H {
        self.handle
    }
}

impl<H: NativeObject> Drop for Owned<H> {
    fn drop(&mut self) {
        self.device.release(self.handle.raw());
    }
}

impl<H: NativeObject> fmt::Debug for Owned<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.handle).finish()
    }
}

/// Create a native object and wrap it in [`Owned`].
pub fn create<H, F>(device: &Arc<dyn NativeDevice>, f: F) -> Result<Owned<H>, NativeError>
where
    H: NativeObject,
    F: FnOnce(&dyn NativeDevice) -> Result<H, NativeError>,
{
    let handle = f(device.as_ref())?;
    Ok(Owned::new(device.clone(), handle))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeResource {
    Buffer(NativeBuffer),
    Texture(NativeTexture),
}

impl NativeResource {
    pub fn raw(&self) -> u64 {
        match self {
            NativeResource::Buffer(b) => b.0,
            NativeResource::Texture(t) => t.0,
        }
    }
}

// ── Shader stages ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NativeStage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
    Compute,
}

impl NativeStage {
    pub const ALL: [NativeStage; 6] = [
        NativeStage::Vertex,
        NativeStage::Hull,
        NativeStage::Domain,
        NativeStage::Geometry,
        NativeStage::Pixel,
        NativeStage::Compute,
    ];

    pub const GRAPHICS: [NativeStage; 5] = [
        NativeStage::Vertex,
        NativeStage::Hull,
        NativeStage::Domain,
        NativeStage::Geometry,
        NativeStage::Pixel,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn vk_flag(self) -> vk::ShaderStageFlags {
        match self {
            NativeStage::Vertex => vk::ShaderStageFlags::VERTEX,
            NativeStage::Hull => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            NativeStage::Domain => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            NativeStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            NativeStage::Pixel => vk::ShaderStageFlags::FRAGMENT,
            NativeStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// The single stage named by `flag`, if it names exactly one.
    pub fn from_vk(flag: vk::ShaderStageFlags) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.vk_flag() == flag)
    }

    /// Every native stage whose bit is set in `mask`, in pipeline order.
    pub fn in_mask(mask: vk::ShaderStageFlags) -> impl Iterator<Item = NativeStage> {
        Self::ALL.into_iter().filter(move |s| mask.contains(s.vk_flag()))
    }

    /// Two-letter HLSL profile prefix.
    pub fn profile_prefix(self) -> &'static str {
        match self {
            NativeStage::Vertex => "vs",
            NativeStage::Hull => "hs",
            NativeStage::Domain => "ds",
            NativeStage::Geometry => "gs",
            NativeStage::Pixel => "ps",
            NativeStage::Compute => "cs",
        }
    }
}

// ── Resource descriptions ───────────────────────────────────

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BindFlags: u32 {
        const VERTEX_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const CONSTANT_BUFFER = 0x4;
        const SHADER_RESOURCE = 0x8;
        const STREAM_OUTPUT = 0x10;
        const RENDER_TARGET = 0x20;
        const DEPTH_STENCIL = 0x40;
        const UNORDERED_ACCESS = 0x80;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MiscFlags: u32 {
        const GENERATE_MIPS = 0x1;
        const TEXTURE_CUBE = 0x4;
        const DRAW_INDIRECT_ARGS = 0x10;
        const BUFFER_ALLOW_RAW_VIEWS = 0x20;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClearFlags: u32 {
        const DEPTH = 0x1;
        const STENCIL = 0x2;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub size: u32,
    pub bind: BindFlags,
    pub misc: MiscFlags,
    /// CPU-writable with map/discard semantics.
    pub dynamic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureDimension {
    D1,
    D2,
    D3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub dimension: TextureDimension,
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, array size otherwise.
    pub depth_or_layers: u32,
    pub mip_levels: u32,
    pub samples: u32,
    pub format: DxgiFormat,
    pub bind: BindFlags,
    pub misc: MiscFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewDimension {
    Buffer,
    /// Byte-address view of a buffer.
    RawBuffer,
    Texture1D,
    Texture1DArray,
    Texture2D,
    Texture2DArray,
    Texture2DMs,
    Texture2DMsArray,
    Texture3D,
    TextureCube,
    TextureCubeArray,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewDesc {
    pub format: DxgiFormat,
    pub dimension: ViewDimension,
    /// First mip (textures) or first element (buffers).
    pub first: u32,
    /// Mip count (textures, u32::MAX = rest of chain) or element count (buffers).
    pub count: u32,
    pub first_layer: u32,
    pub layer_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Point,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Wrap,
    Mirror,
    Clamp,
    Border,
    MirrorOnce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDesc {
    pub min: FilterMode,
    pub mag: FilterMode,
    pub mip: FilterMode,
    pub anisotropic: bool,
    pub address: [AddressMode; 3],
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub comparison: Option<ComparisonFunc>,
    pub border_color: [f32; 4],
    pub min_lod: f32,
    pub max_lod: f32,
}

// ── Pipeline state descriptions ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterizerDesc {
    pub wireframe: bool,
    pub cull: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip: bool,
    pub scissor: bool,
    pub multisample: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blend {
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DestAlpha,
    InvDestAlpha,
    DestColor,
    InvDestColor,
    SrcAlphaSat,
    BlendFactor,
    InvBlendFactor,
    Src1Color,
    InvSrc1Color,
    Src1Alpha,
    InvSrc1Alpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendOp {
    Add,
    Subtract,
    RevSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetBlend {
    pub enable: bool,
    pub src: Blend,
    pub dst: Blend,
    pub op: BlendOp,
    pub src_alpha: Blend,
    pub dst_alpha: Blend,
    pub op_alpha: BlendOp,
    pub write_mask: u8,
}

impl Default for RenderTargetBlend {
    fn default() -> Self {
        Self {
            enable: false,
            src: Blend::One,
            dst: Blend::Zero,
            op: BlendOp::Add,
            src_alpha: Blend::One,
            dst_alpha: Blend::Zero,
            op_alpha: BlendOp::Add,
            write_mask: 0xf,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlendDesc {
    pub alpha_to_coverage: bool,
    pub independent: bool,
    pub targets: [RenderTargetBlend; 8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrSat,
    DecrSat,
    Invert,
    Incr,
    Decr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StencilFace {
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
    pub pass: StencilOp,
    pub func: ComparisonFunc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepthStencilDesc {
    pub depth_enable: bool,
    pub depth_write: bool,
    pub depth_func: ComparisonFunc,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front: StencilFace,
    pub back: StencilFace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputElement {
    pub semantic: String,
    pub semantic_index: u32,
    pub format: DxgiFormat,
    pub input_slot: u32,
    pub offset: u32,
    pub per_instance: bool,
    pub step_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    LineListAdj,
    LineStripAdj,
    TriangleListAdj,
    TriangleStripAdj,
    /// Patch list with the given number of control points.
    PatchList(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NativeBox {
    pub left: u32,
    pub top: u32,
    pub front: u32,
    pub right: u32,
    pub bottom: u32,
    pub back: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Signalled once all preceding work has completed.
    Event,
    Occlusion,
    Timestamp,
}

/// Placement of a buffer ↔ texture copy inside the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferFootprint {
    pub offset: u64,
    pub row_pitch: u32,
    pub depth_pitch: u32,
}

// ── Device ──────────────────────────────────────────────────

/// Native device: object creation and destruction.
pub trait NativeDevice: Send + Sync {
    fn feature_level(&self) -> FeatureLevel;

    fn create_buffer(&self, desc: &BufferDesc, initial: Option<&[u8]>)
        -> Result<NativeBuffer, NativeError>;
    fn create_texture(&self, desc: &TextureDesc) -> Result<NativeTexture, NativeError>;
    fn create_shader_resource_view(
        &self,
        resource: NativeResource,
        desc: &ViewDesc,
    ) -> Result<ShaderResourceView, NativeError>;
    fn create_unordered_access_view(
        &self,
        resource: NativeResource,
        desc: &ViewDesc,
    ) -> Result<UnorderedAccessView, NativeError>;
    fn create_render_target_view(
        &self,
        texture: NativeTexture,
        desc: &ViewDesc,
    ) -> Result<RenderTargetView, NativeError>;
    fn create_depth_stencil_view(
        &self,
        texture: NativeTexture,
        desc: &ViewDesc,
    ) -> Result<DepthStencilView, NativeError>;
    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerState, NativeError>;
    fn create_shader(&self, stage: NativeStage, bytecode: &[u8])
        -> Result<NativeShader, NativeError>;
    fn create_input_layout(
        &self,
        elements: &[InputElement],
        vertex_bytecode: &[u8],
    ) -> Result<InputLayout, NativeError>;
    fn create_rasterizer_state(&self, desc: &RasterizerDesc)
        -> Result<RasterizerState, NativeError>;
    fn create_blend_state(&self, desc: &BlendDesc) -> Result<BlendState, NativeError>;
    fn create_depth_stencil_state(
        &self,
        desc: &DepthStencilDesc,
    ) -> Result<DepthStencilState, NativeError>;
    fn create_query(&self, kind: QueryKind) -> Result<NativeQuery, NativeError>;

    /// Drop the reference held on any native object.
    fn release(&self, raw: u64);

    /// The device's immediate context. Called once per device.
    fn immediate_context(&self) -> Box<dyn DeviceContext>;

    fn shader_compiler(&self) -> &dyn ShaderCompiler;
}

// ── Contexts ────────────────────────────────────────────────

/// The legacy immediate-context interface.
///
/// Per-stage calls take the stage as an argument; backends switch over it to
/// reach the stage-specific entry point (`VSSetShaderResources`,
/// `PSSetShaderResources`, ...).
pub trait DeviceContext: Send {
    fn set_shader(&mut self, stage: NativeStage, shader: Option<NativeShader>);
    fn set_shader_resources(
        &mut self,
        stage: NativeStage,
        start_slot: u32,
        views: &[Option<ShaderResourceView>],
    );
    fn set_samplers(&mut self, stage: NativeStage, start_slot: u32, samplers: &[Option<SamplerState>]);
    fn set_constant_buffers(
        &mut self,
        stage: NativeStage,
        start_slot: u32,
        buffers: &[Option<NativeBuffer>],
    );
    fn cs_set_unordered_access_views(
        &mut self,
        start_slot: u32,
        views: &[Option<UnorderedAccessView>],
    );

    fn om_set_render_targets(
        &mut self,
        targets: &[Option<RenderTargetView>],
        depth_stencil: Option<DepthStencilView>,
    );
    /// Bind pixel-stage UAVs starting at `uav_start`, keeping render targets.
    fn om_set_unordered_access_views(&mut self, uav_start: u32, views: &[Option<UnorderedAccessView>]);
    fn om_set_blend_state(&mut self, state: Option<BlendState>, factor: [f32; 4], sample_mask: u32);
    fn om_set_depth_stencil_state(&mut self, state: Option<DepthStencilState>, stencil_ref: u32);

    fn ia_set_input_layout(&mut self, layout: Option<InputLayout>);
    fn ia_set_primitive_topology(&mut self, topology: PrimitiveTopology);
    fn ia_set_vertex_buffers(
        &mut self,
        start_slot: u32,
        buffers: &[Option<NativeBuffer>],
        strides: &[u32],
        offsets: &[u32],
    );
    fn ia_set_index_buffer(&mut self, buffer: Option<NativeBuffer>, format: IndexFormat, offset: u32);

    fn rs_set_state(&mut self, state: Option<RasterizerState>);
    fn rs_set_viewports(&mut self, viewports: &[Viewport]);
    fn rs_set_scissor_rects(&mut self, rects: &[Rect]);

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn draw_instanced_indirect(&mut self, args: NativeBuffer, offset: u32);
    fn draw_indexed_instanced_indirect(&mut self, args: NativeBuffer, offset: u32);
    fn dispatch(&mut self, x: u32, y: u32, z: u32);
    fn dispatch_indirect(&mut self, args: NativeBuffer, offset: u32);

    fn copy_resource(&mut self, dst: NativeResource, src: NativeResource);
    #[allow(clippy::too_many_arguments)]
    fn copy_subresource_region(
        &mut self,
        dst: NativeResource,
        dst_subresource: u32,
        dst_origin: [u32; 3],
        src: NativeResource,
        src_subresource: u32,
        src_box: Option<NativeBox>,
    );
    fn copy_buffer_to_texture(
        &mut self,
        dst: NativeTexture,
        dst_subresource: u32,
        dst_box: NativeBox,
        src: NativeBuffer,
        footprint: BufferFootprint,
    );
    fn copy_texture_to_buffer(
        &mut self,
        dst: NativeBuffer,
        footprint: BufferFootprint,
        src: NativeTexture,
        src_subresource: u32,
        src_box: NativeBox,
    );
    fn update_subresource(
        &mut self,
        dst: NativeResource,
        subresource: u32,
        dst_box: Option<NativeBox>,
        data: &[u8],
        row_pitch: u32,
        depth_pitch: u32,
    );
    fn resolve_subresource(
        &mut self,
        dst: NativeTexture,
        dst_subresource: u32,
        src: NativeTexture,
        src_subresource: u32,
        format: DxgiFormat,
    );

    fn clear_render_target_view(&mut self, view: RenderTargetView, color: [f32; 4]);
    fn clear_depth_stencil_view(&mut self, view: DepthStencilView, flags: ClearFlags, depth: f32, stencil: u8);
    fn clear_unordered_access_view_uint(&mut self, view: UnorderedAccessView, values: [u32; 4]);
    fn clear_unordered_access_view_float(&mut self, view: UnorderedAccessView, values: [f32; 4]);
    fn generate_mips(&mut self, view: ShaderResourceView);

    /// Map with WRITE_DISCARD, copy `data` to `offset`, unmap.
    fn write_discard(&mut self, buffer: NativeBuffer, offset: u32, data: &[u8]) -> Result<(), NativeError>;

    fn begin_query(&mut self, query: NativeQuery);
    fn end_query(&mut self, query: NativeQuery);
    /// Non-blocking poll. `None` while the result is not yet available.
    fn query_data(&mut self, query: NativeQuery) -> Option<u64>;
    fn flush(&mut self);

    /// The extended context interface, when the backend provides it.
    fn extended(&mut self) -> Option<&mut dyn DeviceContext1> {
        None
    }
}

/// The extended (11.1) context interface.
pub trait DeviceContext1 {
    /// Bind constant buffers with offsets and sizes in 16-byte constants.
    fn set_constant_buffers1(
        &mut self,
        stage: NativeStage,
        start_slot: u32,
        buffers: &[Option<NativeBuffer>],
        first_constant: &[u32],
        num_constants: &[u32],
    );
    fn clear_view(&mut self, view: RenderTargetView, color: [f32; 4], rects: &[Rect]);
}

// ── Shader compiler ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CompileOutput {
    pub bytecode: Vec<u8>,
    /// Non-fatal compiler messages.
    pub messages: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileFailure {
    pub messages: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignatureParameter {
    pub semantic: String,
    pub semantic_index: u32,
    pub register: u32,
    /// Number of 32-bit components.
    pub components: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantBufferDesc {
    pub name: String,
    pub bind_point: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShaderReflection {
    pub inputs: Vec<SignatureParameter>,
    pub constant_buffers: Vec<ConstantBufferDesc>,
}

/// Native HLSL compiler and bytecode reflection.
pub trait ShaderCompiler: Send + Sync {
    fn compile(&self, source: &str, entry_point: &str, profile: &str) -> Result<CompileOutput, CompileFailure>;
    fn reflect(&self, bytecode: &[u8]) -> Result<ShaderReflection, NativeError>;
}
