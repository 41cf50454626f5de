//! Clear commands. Attachment views and depth/stencil clear flags are
//! resolved when the command is recorded.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use super::Replay;
use crate::context::Context;
use crate::device::Device;
use crate::error::{NativeError, ReplayError};
use crate::format;
use crate::native::{ClearFlags, DepthStencilView, Owned, Rect, RenderTargetView};
use crate::pipeline::rect;
use crate::renderpass::{self, RenderPass};
use crate::resource::Image;

/// Float colour handed to the native clear for an attachment of `format`.
/// Integer targets take their integer value converted to float.
pub(crate) fn clear_colour(format: vk::Format, value: &vk::ClearColorValue) -> [f32; 4] {
    // SAFETY: every variant of the union is four plain 32-bit words.
    unsafe {
        if !format::is_integer(format) {
            value.float32
        } else if matches!(
            format,
            vk::Format::R8_SINT
                | vk::Format::R8G8_SINT
                | vk::Format::R8G8B8A8_SINT
                | vk::Format::R16_SINT
                | vk::Format::R16G16_SINT
                | vk::Format::R16G16B16A16_SINT
                | vk::Format::R32_SINT
                | vk::Format::R32G32_SINT
                | vk::Format::R32G32B32_SINT
                | vk::Format::R32G32B32A32_SINT
        ) {
            value.int32.map(|v| v as f32)
        } else {
            value.uint32.map(|v| v as f32)
        }
    }
}

fn resolved_count(count: u32, base: u32, total: u32) -> u32 {
    if count == vk::REMAINING_MIP_LEVELS {
        total.saturating_sub(base)
    } else {
        count
    }
}

// ── Image clears ────────────────────────────────────────────

#[derive(Clone)]
pub struct ClearColorImage {
    targets: Vec<Arc<Owned<RenderTargetView>>>,
    color: [f32; 4],
}

impl ClearColorImage {
    /// One render-target view per mip level of each range.
    pub fn new(
        device: &Device,
        image: &Image,
        value: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) -> Result<Self, NativeError> {
        let mut targets = Vec::new();
        for range in ranges {
            let levels = resolved_count(range.level_count, range.base_mip_level, image.mip_levels());
            let layers = resolved_count(range.layer_count, range.base_array_layer, image.array_layers());
            for level in range.base_mip_level..range.base_mip_level + levels {
                let view = image.create_render_target_view(device, level, range.base_array_layer, layers)?;
                targets.push(Arc::new(view));
            }
        }
        Ok(Self {
            targets,
            color: clear_colour(image.format(), value),
        })
    }
}

impl Replay for ClearColorImage {
    const NAME: &'static str = "ClearColorImage";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        for target in &self.targets {
            ctx.native().clear_render_target_view(target.get(), self.color);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ClearDepthStencilImage {
    targets: Vec<Arc<Owned<DepthStencilView>>>,
    flags: ClearFlags,
    depth: f32,
    stencil: u8,
}

impl ClearDepthStencilImage {
    pub fn new(
        device: &Device,
        image: &Image,
        value: vk::ClearDepthStencilValue,
        ranges: &[vk::ImageSubresourceRange],
    ) -> Result<Self, NativeError> {
        let mut targets = Vec::new();
        let mut aspects = vk::ImageAspectFlags::empty();
        for range in ranges {
            aspects |= range.aspect_mask;
            let levels = resolved_count(range.level_count, range.base_mip_level, image.mip_levels());
            let layers = resolved_count(range.layer_count, range.base_array_layer, image.array_layers());
            for level in range.base_mip_level..range.base_mip_level + levels {
                let view = image.create_depth_stencil_view(device, level, range.base_array_layer, layers)?;
                targets.push(Arc::new(view));
            }
        }
        Ok(Self {
            targets,
            flags: renderpass::clear_flags(image.format(), aspects),
            depth: value.depth,
            stencil: value.stencil as u8,
        })
    }

    pub fn flags(&self) -> ClearFlags {
        self.flags
    }
}

impl Replay for ClearDepthStencilImage {
    const NAME: &'static str = "ClearDepthStencilImage";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        if self.flags.is_empty() {
            return Ok(());
        }
        for target in &self.targets {
            ctx.native()
                .clear_depth_stencil_view(target.get(), self.flags, self.depth, self.stencil);
        }
        Ok(())
    }
}

// ── Attachment clears ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentClear {
    /// Index into the subpass's colour attachments.
    Color { index: u32, color: [f32; 4] },
    DepthStencil { flags: ClearFlags, depth: f32, stencil: u8 },
}

/// `vkCmdClearAttachments` inside the current subpass.
#[derive(Clone)]
pub struct ClearAttachments {
    clears: Vec<AttachmentClear>,
    rects: Vec<Rect>,
}

impl ClearAttachments {
    pub fn new(
        render_pass: &RenderPass,
        subpass: u32,
        attachments: &[vk::ClearAttachment],
        rects: &[vk::ClearRect],
    ) -> Self {
        let desc = render_pass.subpass(subpass);
        let mut clears = Vec::new();
        for attachment in attachments {
            if attachment.aspect_mask.contains(vk::ImageAspectFlags::COLOR) {
                let index = attachment.color_attachment;
                let format = desc
                    .and_then(|d| d.colors.get(index as usize).copied().flatten())
                    .and_then(|a| render_pass.attachment(a))
                    .map(|a| a.format)
                    .unwrap_or(vk::Format::UNDEFINED);
                // SAFETY: colour aspect clears carry a colour value.
                let value = unsafe { attachment.clear_value.color };
                clears.push(AttachmentClear::Color {
                    index,
                    color: clear_colour(format, &value),
                });
            } else {
                let format = desc
                    .and_then(|d| d.depth_stencil)
                    .and_then(|a| render_pass.attachment(a))
                    .map(|a| a.format)
                    .unwrap_or(vk::Format::UNDEFINED);
                let flags = renderpass::clear_flags(format, attachment.aspect_mask);
                if flags.is_empty() {
                    continue;
                }
                // SAFETY: depth/stencil aspect clears carry a depth/stencil value.
                let value = unsafe { attachment.clear_value.depth_stencil };
                clears.push(AttachmentClear::DepthStencil {
                    flags,
                    depth: value.depth,
                    stencil: value.stencil as u8,
                });
            }
        }
        if rects.iter().any(|r| r.base_array_layer != 0 || r.layer_count > 1) {
            debug!("layered attachment clears clear every bound layer");
        }
        Self {
            clears,
            rects: rects.iter().map(|r| rect(&r.rect)).collect(),
        }
    }

    pub fn clears(&self) -> &[AttachmentClear] {
        &self.clears
    }
}

impl Replay for ClearAttachments {
    const NAME: &'static str = "ClearAttachments";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        let active = ctx
            .render_pass()
            .cloned()
            .ok_or(ReplayError::NoActiveRenderPass(Self::NAME))?;
        let Some(subpass) = active.render_pass.subpass(active.subpass) else {
            return Ok(());
        };
        for clear in &self.clears {
            match clear {
                AttachmentClear::Color { index, color } => {
                    let view = subpass
                        .colors
                        .get(*index as usize)
                        .copied()
                        .flatten()
                        .and_then(|a| active.framebuffer.attachment(a))
                        .and_then(|v| v.get_render_target_view());
                    let Some(view) = view else { continue };
                    match ctx.extended() {
                        Some(ext) => ext.clear_view(view, *color, &self.rects),
                        None => {
                            debug!("partial clears need the extended context, clearing the whole view");
                            ctx.native().clear_render_target_view(view, *color);
                        }
                    }
                }
                AttachmentClear::DepthStencil { flags, depth, stencil } => {
                    let view = subpass
                        .depth_stencil
                        .and_then(|a| active.framebuffer.attachment(a))
                        .and_then(|v| v.get_depth_stencil_view());
                    if let Some(view) = view {
                        ctx.native().clear_depth_stencil_view(view, *flags, *depth, *stencil);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_targets_clear_with_converted_values() {
        let value = vk::ClearColorValue { uint32: [1, 2, 3, 4] };
        assert_eq!(clear_colour(vk::Format::R32G32B32A32_UINT, &value), [1.0, 2.0, 3.0, 4.0]);
        let value = vk::ClearColorValue {
            float32: [0.25, 0.5, 0.75, 1.0],
        };
        assert_eq!(clear_colour(vk::Format::R8G8B8A8_UNORM, &value), [0.25, 0.5, 0.75, 1.0]);
    }
}
