//! Resource View Registry: buffers, images, their views and samplers, each
//! exposing the native handles needed for every binding role.
//!
//! Views are created eagerly when the Vulkan view object is created, one per
//! role its usage allows, and cached for the object's lifetime. A native
//! creation failure is logged and leaves the view empty; binding an empty
//! view is skipped at replay.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error};

use crate::device::Device;
use crate::error::NativeError;
use crate::format::{self, DxgiFormat};
use crate::native::{
    self, AddressMode, BindFlags, BufferDesc, ComparisonFunc, DepthStencilView, FilterMode, MiscFlags,
    NativeBuffer, NativeResource, NativeTexture, Owned, RenderTargetView, SamplerDesc, SamplerState,
    ShaderResourceView, TextureDesc, TextureDimension, UnorderedAccessView, ViewDesc, ViewDimension,
};

/// Log a failed view creation and keep going without the view.
fn view_or_log<H: native::NativeObject>(
    role: &'static str,
    result: Result<Owned<H>, NativeError>,
) -> Option<Owned<H>> {
    match result {
        Ok(view) => Some(view),
        Err(NativeError::FeatureLevel { what, actual, .. }) => {
            debug!("{} view unavailable: {} at feature level {}", role, what, actual);
            None
        }
        Err(e) => {
            error!("failed to create {} view: {}", role, e);
            None
        }
    }
}

// ── Buffer ──────────────────────────────────────────────────

pub struct Buffer {
    native: Owned<NativeBuffer>,
    size: u64,
    usage: vk::BufferUsageFlags,
    unordered_view: Option<Owned<UnorderedAccessView>>,
}

impl Buffer {
    pub fn new(device: &Device, size: u64, usage: vk::BufferUsageFlags) -> Result<Arc<Self>, NativeError> {
        let feature_level = device.feature_level();
        let mut bind = BindFlags::empty();
        let mut misc = MiscFlags::empty();
        if usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER) {
            bind |= BindFlags::VERTEX_BUFFER;
        }
        if usage.contains(vk::BufferUsageFlags::INDEX_BUFFER) {
            bind |= BindFlags::INDEX_BUFFER;
        }
        if usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
            bind |= BindFlags::CONSTANT_BUFFER;
        }
        if usage.intersects(vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER) {
            bind |= BindFlags::SHADER_RESOURCE;
        }
        let storage = usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER) && feature_level.supports_uav();
        if storage {
            bind |= BindFlags::UNORDERED_ACCESS;
            misc |= MiscFlags::BUFFER_ALLOW_RAW_VIEWS;
        }
        if usage.contains(vk::BufferUsageFlags::INDIRECT_BUFFER) {
            misc |= MiscFlags::DRAW_INDIRECT_ARGS;
        }

        // Constant buffers are sized in whole 16-byte constants
        let native_size = u32::try_from(size.div_ceil(16) * 16).map_err(|_| NativeError::CreationFailed {
            kind: "buffer",
            reason: format!("size {} exceeds native limit", size),
        })?;
        let native = native::create(device.native(), |d| {
            d.create_buffer(
                &BufferDesc {
                    size: native_size,
                    bind,
                    misc,
                    dynamic: false,
                },
                None,
            )
        })?;

        let unordered_view = if storage {
            let desc = raw_buffer_view(0, native_size);
            view_or_log(
                "storage buffer",
                native::create(device.native(), |d| {
                    d.create_unordered_access_view(NativeResource::Buffer(native.get()), &desc)
                }),
            )
        } else {
            None
        };

        Ok(Arc::new(Self {
            native,
            size,
            usage,
            unordered_view,
        }))
    }

    pub fn get_buffer(&self) -> NativeBuffer {
        self.native.get()
    }

    /// Whole-buffer unordered-access view; `None` if the buffer is not a
    /// storage buffer or the feature level has no UAVs.
    pub fn get_unordered_access_view(&self) -> Option<UnorderedAccessView> {
        self.unordered_view.as_ref().map(Owned::get)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }
}

/// Byte-address view over `[offset, offset + size)` of a buffer.
pub fn raw_buffer_view(offset: u32, size: u32) -> ViewDesc {
    ViewDesc {
        format: DxgiFormat::R32_TYPELESS,
        dimension: ViewDimension::RawBuffer,
        first: offset / 4,
        count: size / 4,
        first_layer: 0,
        layer_count: 1,
    }
}

// ── Buffer view ─────────────────────────────────────────────

pub struct BufferView {
    buffer: Arc<Buffer>,
    format: vk::Format,
    view: Option<Owned<ShaderResourceView>>,
}

impl BufferView {
    pub fn new(
        device: &Device,
        buffer: Arc<Buffer>,
        format: vk::Format,
        offset: u64,
        range: u64,
    ) -> Result<Arc<Self>, NativeError> {
        let native_format = format::to_native(format);
        if native_format.is_unknown() {
            return Err(NativeError::UnsupportedFormat(format));
        }
        let range = if range == vk::WHOLE_SIZE {
            buffer.size().saturating_sub(offset)
        } else {
            range
        };
        let element = u64::from(format::block_size(format));
        let desc = ViewDesc {
            format: native_format,
            dimension: ViewDimension::Buffer,
            first: (offset / element) as u32,
            count: (range / element) as u32,
            first_layer: 0,
            layer_count: 1,
        };
        // Uniform and storage texel buffers both read through an SRV
        let view = view_or_log(
            "texel buffer",
            native::create(device.native(), |d| {
                d.create_shader_resource_view(NativeResource::Buffer(buffer.get_buffer()), &desc)
            }),
        );
        Ok(Arc::new(Self { buffer, format, view }))
    }

    pub fn get_view(&self) -> Option<ShaderResourceView> {
        self.view.as_ref().map(Owned::get)
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

// ── Image ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ImageDesc {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
}

pub struct Image {
    native: Owned<NativeTexture>,
    native_format: DxgiFormat,
    desc: ImageDesc,
}

impl Image {
    pub fn new(device: &Device, desc: ImageDesc) -> Result<Arc<Self>, NativeError> {
        let native_format = format::to_native(desc.format);
        if native_format.is_unknown() {
            return Err(NativeError::UnsupportedFormat(desc.format));
        }
        let usage = desc.usage;
        let depth = format::is_depth_or_stencil(desc.format);
        let sampled = usage.intersects(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::INPUT_ATTACHMENT);

        let mut bind = BindFlags::empty();
        let mut misc = MiscFlags::empty();
        if sampled {
            bind |= BindFlags::SHADER_RESOURCE;
        }
        if usage.contains(vk::ImageUsageFlags::STORAGE) && device.feature_level().supports_uav() {
            bind |= BindFlags::UNORDERED_ACCESS;
        }
        if usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
            bind |= BindFlags::RENDER_TARGET;
        }
        if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
            bind |= BindFlags::DEPTH_STENCIL;
        }
        // Clear-image commands go through attachment views
        if usage.contains(vk::ImageUsageFlags::TRANSFER_DST) && !format::is_compressed(desc.format) {
            bind |= if depth {
                BindFlags::DEPTH_STENCIL
            } else {
                BindFlags::RENDER_TARGET
            };
        }
        // Blits that downsample a full chain are served by GenerateMips
        if desc.mip_levels > 1
            && usage.contains(vk::ImageUsageFlags::TRANSFER_DST)
            && !depth
            && !format::is_compressed(desc.format)
        {
            bind |= BindFlags::SHADER_RESOURCE | BindFlags::RENDER_TARGET;
            misc |= MiscFlags::GENERATE_MIPS;
        }
        if desc.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE) {
            misc |= MiscFlags::TEXTURE_CUBE;
        }

        let storage_format = if depth && sampled {
            format::depth_typeless(native_format)
        } else {
            native_format
        };
        let dimension = match desc.image_type {
            vk::ImageType::TYPE_1D => TextureDimension::D1,
            vk::ImageType::TYPE_3D => TextureDimension::D3,
            _ => TextureDimension::D2,
        };
        let texture_desc = TextureDesc {
            dimension,
            width: desc.extent.width,
            height: desc.extent.height,
            depth_or_layers: if dimension == TextureDimension::D3 {
                desc.extent.depth
            } else {
                desc.array_layers
            },
            mip_levels: desc.mip_levels,
            samples: desc.samples.as_raw(),
            format: storage_format,
            bind,
            misc,
        };
        let native = native::create(device.native(), |d| d.create_texture(&texture_desc))?;
        Ok(Arc::new(Self {
            native,
            native_format,
            desc,
        }))
    }

    pub fn get_texture(&self) -> NativeTexture {
        self.native.get()
    }

    pub fn resource(&self) -> NativeResource {
        NativeResource::Texture(self.native.get())
    }

    /// Flattened subresource index of (mip level, array layer).
    pub fn subresource_index(&self, level: u32, layer: u32) -> u32 {
        level + layer * self.desc.mip_levels
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    pub fn native_format(&self) -> DxgiFormat {
        self.native_format
    }

    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.desc.array_layers
    }

    pub fn is_multisampled(&self) -> bool {
        self.desc.samples != vk::SampleCountFlags::TYPE_1
    }

    /// Extent of one mip level.
    pub fn level_extent(&self, level: u32) -> vk::Extent3D {
        let e = self.desc.extent;
        vk::Extent3D {
            width: (e.width >> level).max(1),
            height: (e.height >> level).max(1),
            depth: (e.depth >> level).max(1),
        }
    }

    /// Shader view over every mip and layer.
    pub fn create_full_shader_view(&self, device: &Device) -> Result<Owned<ShaderResourceView>, NativeError> {
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: self.desc.mip_levels,
            base_array_layer: 0,
            layer_count: self.desc.array_layers,
        };
        let view_type = match (self.desc.image_type, self.desc.array_layers > 1) {
            (vk::ImageType::TYPE_1D, false) => vk::ImageViewType::TYPE_1D,
            (vk::ImageType::TYPE_1D, true) => vk::ImageViewType::TYPE_1D_ARRAY,
            (vk::ImageType::TYPE_3D, _) => vk::ImageViewType::TYPE_3D,
            (_, false) => vk::ImageViewType::TYPE_2D,
            (_, true) => vk::ImageViewType::TYPE_2D_ARRAY,
        };
        let desc = texture_view_desc(self, self.native_format, view_type, &range);
        native::create(device.native(), |d| d.create_shader_resource_view(self.resource(), &desc))
    }

    fn attachment_range(&self, level: u32, base_layer: u32, layers: u32) -> (vk::ImageViewType, vk::ImageSubresourceRange) {
        let view_type = match self.desc.image_type {
            vk::ImageType::TYPE_1D if layers > 1 => vk::ImageViewType::TYPE_1D_ARRAY,
            vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
            vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
            _ if layers > 1 => vk::ImageViewType::TYPE_2D_ARRAY,
            _ => vk::ImageViewType::TYPE_2D,
        };
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::empty(),
            base_mip_level: level,
            level_count: 1,
            base_array_layer: base_layer,
            layer_count: layers,
        };
        (view_type, range)
    }

    /// Render-target view of one mip over `layers` layers from `base_layer`.
    pub fn create_render_target_view(
        &self,
        device: &Device,
        level: u32,
        base_layer: u32,
        layers: u32,
    ) -> Result<Owned<RenderTargetView>, NativeError> {
        let (view_type, range) = self.attachment_range(level, base_layer, layers);
        let desc = texture_view_desc(self, self.native_format, view_type, &range);
        native::create(device.native(), |d| d.create_render_target_view(self.get_texture(), &desc))
    }

    pub fn create_depth_stencil_view(
        &self,
        device: &Device,
        level: u32,
        base_layer: u32,
        layers: u32,
    ) -> Result<Owned<DepthStencilView>, NativeError> {
        let (view_type, range) = self.attachment_range(level, base_layer, layers);
        let desc = texture_view_desc(self, self.native_format, view_type, &range);
        native::create(device.native(), |d| d.create_depth_stencil_view(self.get_texture(), &desc))
    }
}

fn texture_view_desc(
    image: &Image,
    format: DxgiFormat,
    view_type: vk::ImageViewType,
    range: &vk::ImageSubresourceRange,
) -> ViewDesc {
    let ms = image.is_multisampled();
    let dimension = match view_type {
        vk::ImageViewType::TYPE_1D => ViewDimension::Texture1D,
        vk::ImageViewType::TYPE_1D_ARRAY => ViewDimension::Texture1DArray,
        vk::ImageViewType::TYPE_2D if ms => ViewDimension::Texture2DMs,
        vk::ImageViewType::TYPE_2D_ARRAY if ms => ViewDimension::Texture2DMsArray,
        vk::ImageViewType::TYPE_2D => ViewDimension::Texture2D,
        vk::ImageViewType::TYPE_2D_ARRAY => ViewDimension::Texture2DArray,
        vk::ImageViewType::TYPE_3D => ViewDimension::Texture3D,
        vk::ImageViewType::CUBE => ViewDimension::TextureCube,
        vk::ImageViewType::CUBE_ARRAY => ViewDimension::TextureCubeArray,
        _ => ViewDimension::Texture2D,
    };
    let level_count = if range.level_count == vk::REMAINING_MIP_LEVELS {
        image.mip_levels() - range.base_mip_level
    } else {
        range.level_count
    };
    let layer_count = if range.layer_count == vk::REMAINING_ARRAY_LAYERS {
        image.array_layers() - range.base_array_layer
    } else {
        range.layer_count
    };
    ViewDesc {
        format,
        dimension,
        first: range.base_mip_level,
        count: level_count,
        first_layer: range.base_array_layer,
        layer_count,
    }
}

// ── Image view ──────────────────────────────────────────────

pub struct ImageView {
    image: Arc<Image>,
    format: vk::Format,
    range: vk::ImageSubresourceRange,
    shader_view: Option<Owned<ShaderResourceView>>,
    unordered_view: Option<Owned<UnorderedAccessView>>,
    render_target_view: Option<Owned<RenderTargetView>>,
    depth_stencil_view: Option<Owned<DepthStencilView>>,
}

impl ImageView {
    pub fn new(
        device: &Device,
        image: Arc<Image>,
        view_type: vk::ImageViewType,
        format: vk::Format,
        range: vk::ImageSubresourceRange,
    ) -> Result<Arc<Self>, NativeError> {
        let native_format = format::to_native(format);
        if native_format.is_unknown() {
            return Err(NativeError::UnsupportedFormat(format));
        }
        let usage = image.desc().usage;
        let depth = format::is_depth_or_stencil(format);
        let resource = image.resource();
        let texture = image.get_texture();

        let shader_view = if usage.intersects(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::INPUT_ATTACHMENT) {
            let view_format = if depth {
                format::depth_shader_view(native_format)
            } else {
                native_format
            };
            let desc = texture_view_desc(&image, view_format, view_type, &range);
            view_or_log(
                "shader resource",
                native::create(device.native(), |d| d.create_shader_resource_view(resource, &desc)),
            )
        } else {
            None
        };

        let unordered_view = if usage.contains(vk::ImageUsageFlags::STORAGE) {
            let mut desc = texture_view_desc(&image, native_format, view_type, &range);
            // UAVs address a single mip
            desc.count = 1;
            if matches!(desc.dimension, ViewDimension::TextureCube | ViewDimension::TextureCubeArray) {
                desc.dimension = ViewDimension::Texture2DArray;
            }
            view_or_log(
                "unordered access",
                native::create(device.native(), |d| d.create_unordered_access_view(resource, &desc)),
            )
        } else {
            None
        };

        let attachment = texture_view_desc(&image, native_format, attachment_view_type(view_type), &range);
        let (render_target_view, depth_stencil_view) = if depth {
            let dsv = if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
                view_or_log(
                    "depth stencil",
                    native::create(device.native(), |d| d.create_depth_stencil_view(texture, &attachment)),
                )
            } else {
                None
            };
            (None, dsv)
        } else {
            let rtv = if usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
                view_or_log(
                    "render target",
                    native::create(device.native(), |d| d.create_render_target_view(texture, &attachment)),
                )
            } else {
                None
            };
            (rtv, None)
        };

        Ok(Arc::new(Self {
            image,
            format,
            range,
            shader_view,
            unordered_view,
            render_target_view,
            depth_stencil_view,
        }))
    }

    pub fn get_shader_view(&self) -> Option<ShaderResourceView> {
        self.shader_view.as_ref().map(Owned::get)
    }

    pub fn get_unordered_access_view(&self) -> Option<UnorderedAccessView> {
        self.unordered_view.as_ref().map(Owned::get)
    }

    pub fn get_render_target_view(&self) -> Option<RenderTargetView> {
        self.render_target_view.as_ref().map(Owned::get)
    }

    pub fn get_depth_stencil_view(&self) -> Option<DepthStencilView> {
        self.depth_stencil_view.as_ref().map(Owned::get)
    }

    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn range(&self) -> &vk::ImageSubresourceRange {
        &self.range
    }

    /// Subresource the view's first mip and layer refer to.
    pub fn base_subresource(&self) -> u32 {
        self.image
            .subresource_index(self.range.base_mip_level, self.range.base_array_layer)
    }
}

/// Attachment views of cubes address the faces as a 2D array.
fn attachment_view_type(view_type: vk::ImageViewType) -> vk::ImageViewType {
    match view_type {
        vk::ImageViewType::CUBE | vk::ImageViewType::CUBE_ARRAY => vk::ImageViewType::TYPE_2D_ARRAY,
        other => other,
    }
}

// ── Sampler ─────────────────────────────────────────────────

pub struct Sampler {
    native: Owned<SamplerState>,
}

impl Sampler {
    pub fn new(device: &Device, info: &vk::SamplerCreateInfo<'_>) -> Result<Arc<Self>, NativeError> {
        let desc = sampler_desc(info);
        let native = native::create(device.native(), |d| d.create_sampler(&desc))?;
        Ok(Arc::new(Self { native }))
    }

    pub fn get_native_handle(&self) -> SamplerState {
        self.native.get()
    }
}

fn filter(f: vk::Filter) -> FilterMode {
    if f == vk::Filter::LINEAR {
        FilterMode::Linear
    } else {
        FilterMode::Point
    }
}

fn address_mode(mode: vk::SamplerAddressMode) -> AddressMode {
    match mode {
        vk::SamplerAddressMode::MIRRORED_REPEAT => AddressMode::Mirror,
        vk::SamplerAddressMode::CLAMP_TO_EDGE => AddressMode::Clamp,
        vk::SamplerAddressMode::CLAMP_TO_BORDER => AddressMode::Border,
        vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE => AddressMode::MirrorOnce,
        _ => AddressMode::Wrap,
    }
}

pub(crate) fn comparison_func(op: vk::CompareOp) -> ComparisonFunc {
    match op {
        vk::CompareOp::LESS => ComparisonFunc::Less,
        vk::CompareOp::EQUAL => ComparisonFunc::Equal,
        vk::CompareOp::LESS_OR_EQUAL => ComparisonFunc::LessEqual,
        vk::CompareOp::GREATER => ComparisonFunc::Greater,
        vk::CompareOp::NOT_EQUAL => ComparisonFunc::NotEqual,
        vk::CompareOp::GREATER_OR_EQUAL => ComparisonFunc::GreaterEqual,
        vk::CompareOp::ALWAYS => ComparisonFunc::Always,
        _ => ComparisonFunc::Never,
    }
}

fn border_color(color: vk::BorderColor) -> [f32; 4] {
    match color {
        vk::BorderColor::FLOAT_OPAQUE_BLACK | vk::BorderColor::INT_OPAQUE_BLACK => [0.0, 0.0, 0.0, 1.0],
        vk::BorderColor::FLOAT_OPAQUE_WHITE | vk::BorderColor::INT_OPAQUE_WHITE => [1.0; 4],
        _ => [0.0; 4],
    }
}

fn sampler_desc(info: &vk::SamplerCreateInfo<'_>) -> SamplerDesc {
    SamplerDesc {
        min: filter(info.min_filter),
        mag: filter(info.mag_filter),
        mip: if info.mipmap_mode == vk::SamplerMipmapMode::LINEAR {
            FilterMode::Linear
        } else {
            FilterMode::Point
        },
        anisotropic: info.anisotropy_enable == vk::TRUE,
        address: [
            address_mode(info.address_mode_u),
            address_mode(info.address_mode_v),
            address_mode(info.address_mode_w),
        ],
        mip_lod_bias: info.mip_lod_bias,
        max_anisotropy: (info.max_anisotropy as u32).clamp(1, 16),
        comparison: (info.compare_enable == vk::TRUE).then(|| comparison_func(info.compare_op)),
        border_color: border_color(info.border_color),
        min_lod: info.min_lod,
        max_lod: info.max_lod,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::null::{NullDevice, NullObject};
    use vkbridge_core::{BridgeConfig, FeatureLevel};

    fn setup(level: FeatureLevel) -> (Arc<NullDevice>, Arc<Device>) {
        let null = NullDevice::new(level);
        let device = Device::new(null.clone(), BridgeConfig::default()).unwrap();
        (null, device)
    }

    fn image_desc(format: vk::Format, usage: vk::ImageUsageFlags, mips: u32, layers: u32) -> ImageDesc {
        ImageDesc {
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: 64,
                height: 64,
                depth: 1,
            },
            mip_levels: mips,
            array_layers: layers,
            samples: vk::SampleCountFlags::TYPE_1,
            usage,
            flags: vk::ImageCreateFlags::empty(),
        }
    }

    fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        }
    }

    #[test]
    fn subresource_index_is_level_plus_layer_times_mips() {
        let (_, device) = setup(FeatureLevel::L11_0);
        let image = Image::new(
            &device,
            image_desc(vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED, 4, 3),
        )
        .unwrap();
        assert_eq!(image.subresource_index(0, 0), 0);
        assert_eq!(image.subresource_index(2, 1), 6);
        assert_eq!(image.subresource_index(3, 2), 11);
    }

    #[test]
    fn storage_buffer_has_no_uav_below_11_0() {
        let (_, device) = setup(FeatureLevel::L10_0);
        let buffer = Buffer::new(&device, 256, vk::BufferUsageFlags::STORAGE_BUFFER).unwrap();
        assert!(buffer.get_unordered_access_view().is_none());

        let (_, device) = setup(FeatureLevel::L11_0);
        let buffer = Buffer::new(&device, 256, vk::BufferUsageFlags::STORAGE_BUFFER).unwrap();
        assert!(buffer.get_unordered_access_view().is_some());
    }

    #[test]
    fn depth_view_gets_dsv_not_rtv() {
        let (null, device) = setup(FeatureLevel::L11_0);
        let image = Image::new(
            &device,
            image_desc(
                vk::Format::D24_UNORM_S8_UINT,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                1,
                1,
            ),
        )
        .unwrap();
        let view = ImageView::new(
            &device,
            image.clone(),
            vk::ImageViewType::TYPE_2D,
            vk::Format::D24_UNORM_S8_UINT,
            full_range(vk::ImageAspectFlags::DEPTH),
        )
        .unwrap();
        assert!(view.get_depth_stencil_view().is_some());
        assert!(view.get_render_target_view().is_none());
        let srv = view.get_shader_view().unwrap();
        match null.object(srv.0) {
            Some(NullObject::ShaderResourceView { desc, .. }) => {
                assert_eq!(desc.format, DxgiFormat::R24_UNORM_X8_TYPELESS)
            }
            other => panic!("unexpected object {:?}", other),
        }
        match null.object(image.get_texture().0) {
            Some(NullObject::Texture(desc)) => assert_eq!(desc.format, DxgiFormat::R24G8_TYPELESS),
            other => panic!("unexpected object {:?}", other),
        }
    }

    #[test]
    fn failed_view_creation_yields_null_view() {
        let (null, device) = setup(FeatureLevel::L11_0);
        let image = Image::new(
            &device,
            image_desc(vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED, 1, 1),
        )
        .unwrap();
        null.fail_view_creation(true);
        let view = ImageView::new(
            &device,
            image,
            vk::ImageViewType::TYPE_2D,
            vk::Format::R8G8B8A8_UNORM,
            full_range(vk::ImageAspectFlags::COLOR),
        )
        .unwrap();
        assert!(view.get_shader_view().is_none());
    }

    #[test]
    fn views_are_released_with_their_owner() {
        let (null, device) = setup(FeatureLevel::L11_0);
        let baseline = null.live_objects();
        let image = Image::new(
            &device,
            image_desc(
                vk::Format::R8G8B8A8_UNORM,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                1,
                1,
            ),
        )
        .unwrap();
        let view = ImageView::new(
            &device,
            image,
            vk::ImageViewType::TYPE_2D,
            vk::Format::R8G8B8A8_UNORM,
            full_range(vk::ImageAspectFlags::COLOR),
        )
        .unwrap();
        assert_eq!(null.live_objects(), baseline + 3);
        drop(view);
        assert_eq!(null.live_objects(), baseline);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let (_, device) = setup(FeatureLevel::L11_0);
        let result = Image::new(
            &device,
            image_desc(vk::Format::R8G8B8_UNORM, vk::ImageUsageFlags::SAMPLED, 1, 1),
        );
        assert!(matches!(result, Err(NativeError::UnsupportedFormat(_))));
    }
}
