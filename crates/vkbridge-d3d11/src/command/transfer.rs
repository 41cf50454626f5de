//! Copy, blit, resolve and buffer-update commands.
//!
//! Subresource indices and copy boxes are computed when the command is
//! recorded; replay only issues the native calls.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use super::Replay;
use crate::context::Context;
use crate::device::Device;
use crate::error::{NativeError, ReplayError};
use crate::format;
use crate::native::{BufferFootprint, NativeBox, NativeResource, Owned, ShaderResourceView};
use crate::resource::{Buffer, Image};

fn layer_count(image: &Image, layers: &vk::ImageSubresourceLayers) -> u32 {
    if layers.layer_count == vk::REMAINING_ARRAY_LAYERS {
        image.array_layers().saturating_sub(layers.base_array_layer)
    } else {
        layers.layer_count
    }
}

fn texel_box(offset: vk::Offset3D, extent: vk::Extent3D) -> NativeBox {
    let left = offset.x.max(0) as u32;
    let top = offset.y.max(0) as u32;
    let front = offset.z.max(0) as u32;
    NativeBox {
        left,
        top,
        front,
        right: left + extent.width,
        bottom: top + extent.height,
        back: front + extent.depth,
    }
}

fn origin(offset: vk::Offset3D) -> [u32; 3] {
    [offset.x.max(0) as u32, offset.y.max(0) as u32, offset.z.max(0) as u32]
}

// ── Buffer copies ───────────────────────────────────────────

#[derive(Clone)]
pub struct CopyBuffer {
    pub src: Arc<Buffer>,
    pub dst: Arc<Buffer>,
    pub regions: Vec<vk::BufferCopy>,
}

impl Replay for CopyBuffer {
    const NAME: &'static str = "CopyBuffer";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        let src = NativeResource::Buffer(self.src.get_buffer());
        let dst = NativeResource::Buffer(self.dst.get_buffer());
        for region in &self.regions {
            let left = region.src_offset as u32;
            let src_box = NativeBox {
                left,
                right: left + region.size as u32,
                top: 0,
                bottom: 1,
                front: 0,
                back: 1,
            };
            ctx.native()
                .copy_subresource_region(dst, 0, [region.dst_offset as u32, 0, 0], src, 0, Some(src_box));
        }
        Ok(())
    }
}

// ── Image copies ────────────────────────────────────────────

/// One native subresource-to-subresource copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceCopy {
    pub dst_subresource: u32,
    pub dst_origin: [u32; 3],
    pub src_subresource: u32,
    /// `None` copies the whole subresource.
    pub src_box: Option<NativeBox>,
}

#[derive(Clone)]
pub struct CopyImage {
    src: Arc<Image>,
    dst: Arc<Image>,
    copies: Vec<SubresourceCopy>,
}

impl CopyImage {
    pub fn new(src: Arc<Image>, dst: Arc<Image>, regions: &[vk::ImageCopy]) -> Self {
        // Depth formats only allow whole-subresource copies
        let whole = format::is_depth_or_stencil(src.format());
        let mut copies = Vec::new();
        for region in regions {
            for layer in 0..layer_count(&src, &region.src_subresource) {
                let s = &region.src_subresource;
                let d = &region.dst_subresource;
                copies.push(SubresourceCopy {
                    dst_subresource: dst.subresource_index(d.mip_level, d.base_array_layer + layer),
                    dst_origin: if whole { [0; 3] } else { origin(region.dst_offset) },
                    src_subresource: src.subresource_index(s.mip_level, s.base_array_layer + layer),
                    src_box: (!whole).then(|| texel_box(region.src_offset, region.extent)),
                });
            }
        }
        Self { src, dst, copies }
    }

    pub fn copies(&self) -> &[SubresourceCopy] {
        &self.copies
    }
}

impl Replay for CopyImage {
    const NAME: &'static str = "CopyImage";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        let src = self.src.resource();
        let dst = self.dst.resource();
        for copy in &self.copies {
            ctx.native().copy_subresource_region(
                dst,
                copy.dst_subresource,
                copy.dst_origin,
                src,
                copy.src_subresource,
                copy.src_box,
            );
        }
        Ok(())
    }
}

/// One buffer <-> texture subresource transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferImageTransfer {
    pub subresource: u32,
    pub texel_box: NativeBox,
    pub footprint: BufferFootprint,
}

fn buffer_image_transfers(image: &Image, regions: &[vk::BufferImageCopy]) -> Vec<BufferImageTransfer> {
    let fmt = image.format();
    let (_, block_height) = format::block_extent(fmt);
    let mut out = Vec::new();
    for region in regions {
        let extent = region.image_extent;
        let row_length = if region.buffer_row_length == 0 {
            extent.width
        } else {
            region.buffer_row_length
        };
        let image_height = if region.buffer_image_height == 0 {
            extent.height
        } else {
            region.buffer_image_height
        };
        let row_pitch = format::row_pitch(fmt, row_length);
        let depth_pitch = row_pitch * image_height.div_ceil(block_height);
        let layer_size = u64::from(depth_pitch) * u64::from(extent.depth.max(1));
        let layers = &region.image_subresource;
        for layer in 0..layer_count(image, layers) {
            out.push(BufferImageTransfer {
                subresource: image.subresource_index(layers.mip_level, layers.base_array_layer + layer),
                texel_box: texel_box(region.image_offset, extent),
                footprint: BufferFootprint {
                    offset: region.buffer_offset + u64::from(layer) * layer_size,
                    row_pitch,
                    depth_pitch,
                },
            });
        }
    }
    out
}

#[derive(Clone)]
pub struct CopyBufferToImage {
    buffer: Arc<Buffer>,
    image: Arc<Image>,
    transfers: Vec<BufferImageTransfer>,
}

impl CopyBufferToImage {
    pub fn new(buffer: Arc<Buffer>, image: Arc<Image>, regions: &[vk::BufferImageCopy]) -> Self {
        let transfers = buffer_image_transfers(&image, regions);
        Self {
            buffer,
            image,
            transfers,
        }
    }

    pub fn transfers(&self) -> &[BufferImageTransfer] {
        &self.transfers
    }
}

impl Replay for CopyBufferToImage {
    const NAME: &'static str = "CopyBufferToImage";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        for t in &self.transfers {
            ctx.native().copy_buffer_to_texture(
                self.image.get_texture(),
                t.subresource,
                t.texel_box,
                self.buffer.get_buffer(),
                t.footprint,
            );
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct CopyImageToBuffer {
    image: Arc<Image>,
    buffer: Arc<Buffer>,
    transfers: Vec<BufferImageTransfer>,
}

impl CopyImageToBuffer {
    pub fn new(image: Arc<Image>, buffer: Arc<Buffer>, regions: &[vk::BufferImageCopy]) -> Self {
        let transfers = buffer_image_transfers(&image, regions);
        Self {
            image,
            buffer,
            transfers,
        }
    }
}

impl Replay for CopyImageToBuffer {
    const NAME: &'static str = "CopyImageToBuffer";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        for t in &self.transfers {
            ctx.native().copy_texture_to_buffer(
                self.buffer.get_buffer(),
                t.footprint,
                self.image.get_texture(),
                t.subresource,
                t.texel_box,
            );
        }
        Ok(())
    }
}

// ── Mip generation and blits ────────────────────────────────

/// Regenerates every mip below the first from the top level.
#[derive(Clone)]
pub struct GenerateMips {
    view: Arc<Owned<ShaderResourceView>>,
}

impl GenerateMips {
    pub fn new(device: &Device, image: &Image) -> Result<Self, NativeError> {
        let view = image.create_full_shader_view(device)?;
        Ok(Self { view: Arc::new(view) })
    }
}

impl Replay for GenerateMips {
    const NAME: &'static str = "GenerateMips";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        ctx.native().generate_mips(self.view.get());
        Ok(())
    }
}

/// How a blit is carried out natively.
#[derive(Clone)]
pub enum BlitMode {
    /// Source and destination regions have the same size.
    Copy(CopyImage),
    /// Each region halves one level of the same image into the next.
    GenerateMips(GenerateMips),
    /// Scaling the native context cannot express.
    Unsupported,
}

#[derive(Clone)]
pub struct BlitImage {
    pub mode: BlitMode,
}

fn blit_extent(offsets: &[vk::Offset3D; 2]) -> Option<vk::Extent3D> {
    let [a, b] = offsets;
    if b.x < a.x || b.y < a.y || b.z < a.z {
        return None;
    }
    Some(vk::Extent3D {
        width: (b.x - a.x) as u32,
        height: (b.y - a.y) as u32,
        depth: (b.z - a.z) as u32,
    })
}

impl BlitImage {
    pub fn new(device: &Device, src: Arc<Image>, dst: Arc<Image>, regions: &[vk::ImageBlit]) -> Result<Self, NativeError> {
        let extents: Option<Vec<(vk::Extent3D, vk::Extent3D)>> = regions
            .iter()
            .map(|r| Some((blit_extent(&r.src_offsets)?, blit_extent(&r.dst_offsets)?)))
            .collect();
        let Some(extents) = extents else {
            debug!("mirrored blits are not supported");
            return Ok(Self {
                mode: BlitMode::Unsupported,
            });
        };

        if extents.iter().all(|(s, d)| s == d) {
            let copies: Vec<vk::ImageCopy> = regions
                .iter()
                .zip(&extents)
                .map(|(r, (extent, _))| vk::ImageCopy {
                    src_subresource: r.src_subresource,
                    src_offset: r.src_offsets[0],
                    dst_subresource: r.dst_subresource,
                    dst_offset: r.dst_offsets[0],
                    extent: *extent,
                })
                .collect();
            return Ok(Self {
                mode: BlitMode::Copy(CopyImage::new(src, dst, &copies)),
            });
        }

        let mip_chain = Arc::ptr_eq(&src, &dst)
            && regions.iter().zip(&extents).all(|(r, (s, d))| {
                let level = r.src_subresource.mip_level;
                r.dst_subresource.mip_level == level + 1
                    && *s == src.level_extent(level)
                    && *d == src.level_extent(level + 1)
            });
        if mip_chain {
            return Ok(Self {
                mode: BlitMode::GenerateMips(GenerateMips::new(device, &src)?),
            });
        }

        debug!("scaling blit between {} regions is not supported", regions.len());
        Ok(Self {
            mode: BlitMode::Unsupported,
        })
    }
}

impl Replay for BlitImage {
    const NAME: &'static str = "BlitImage";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        match &self.mode {
            BlitMode::Copy(copy) => copy.apply(ctx),
            BlitMode::GenerateMips(mips) => mips.apply(ctx),
            BlitMode::Unsupported => Ok(()),
        }
    }
}

// ── Resolve ─────────────────────────────────────────────────

#[derive(Clone)]
pub struct ResolveImage {
    src: Arc<Image>,
    dst: Arc<Image>,
    /// (dst subresource, src subresource)
    pairs: Vec<(u32, u32)>,
}

impl ResolveImage {
    pub fn new(src: Arc<Image>, dst: Arc<Image>, regions: &[vk::ImageResolve]) -> Self {
        let mut pairs = Vec::new();
        for region in regions {
            let s = &region.src_subresource;
            let d = &region.dst_subresource;
            for layer in 0..layer_count(&src, s) {
                pairs.push((
                    dst.subresource_index(d.mip_level, d.base_array_layer + layer),
                    src.subresource_index(s.mip_level, s.base_array_layer + layer),
                ));
            }
        }
        Self { src, dst, pairs }
    }
}

impl Replay for ResolveImage {
    const NAME: &'static str = "ResolveImage";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        let format = self.dst.native_format();
        for &(dst_sub, src_sub) in &self.pairs {
            ctx.native()
                .resolve_subresource(self.dst.get_texture(), dst_sub, self.src.get_texture(), src_sub, format);
        }
        Ok(())
    }
}

// ── Buffer updates ──────────────────────────────────────────

#[derive(Clone)]
pub struct UpdateBuffer {
    pub buffer: Arc<Buffer>,
    pub offset: u64,
    pub data: Vec<u8>,
}

impl Replay for UpdateBuffer {
    const NAME: &'static str = "UpdateBuffer";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        let left = self.offset as u32;
        let dst_box = NativeBox {
            left,
            right: left + self.data.len() as u32,
            top: 0,
            bottom: 1,
            front: 0,
            back: 1,
        };
        ctx.native().update_subresource(
            NativeResource::Buffer(self.buffer.get_buffer()),
            0,
            Some(dst_box),
            &self.data,
            0,
            0,
        );
        Ok(())
    }
}

/// `vkCmdFillBuffer`, replayed as an update with the repeated word.
#[derive(Clone)]
pub struct FillBuffer(UpdateBuffer);

impl FillBuffer {
    pub fn new(buffer: Arc<Buffer>, offset: u64, size: u64, data: u32) -> Self {
        let size = if size == vk::WHOLE_SIZE {
            buffer.size().saturating_sub(offset) & !3
        } else {
            size
        };
        let bytes = data.to_le_bytes();
        let data = bytes.iter().copied().cycle().take(size as usize).collect();
        Self(UpdateBuffer { buffer, offset, data })
    }
}

impl Replay for FillBuffer {
    const NAME: &'static str = "FillBuffer";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        self.0.apply(ctx)
    }
}
