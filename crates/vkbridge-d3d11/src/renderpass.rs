//! Render passes and framebuffers.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::format;
use crate::native::ClearFlags;
use crate::resource::ImageView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
}

/// Attachment indices used by one subpass; `None` is `VK_ATTACHMENT_UNUSED`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubpassDesc {
    pub colors: Vec<Option<u32>>,
    pub resolves: Vec<Option<u32>>,
    pub depth_stencil: Option<u32>,
    pub inputs: Vec<Option<u32>>,
}

impl SubpassDesc {
    fn uses(&self, attachment: u32) -> bool {
        self.colors
            .iter()
            .chain(&self.resolves)
            .chain(&self.inputs)
            .chain(std::iter::once(&self.depth_stencil))
            .any(|a| *a == Some(attachment))
    }
}

pub struct RenderPass {
    attachments: Vec<AttachmentDesc>,
    subpasses: Vec<SubpassDesc>,
    /// Subpass each attachment is first used in.
    first_use: Vec<Option<u32>>,
}

impl RenderPass {
    pub fn new(attachments: Vec<AttachmentDesc>, subpasses: Vec<SubpassDesc>) -> Self {
        let first_use = (0..attachments.len() as u32)
            .map(|a| subpasses.iter().position(|s| s.uses(a)).map(|p| p as u32))
            .collect();
        for (i, subpass) in subpasses.iter().enumerate() {
            if subpass.inputs.iter().any(Option::is_some) {
                debug!("subpass {}: input attachments are not supported", i);
            }
        }
        Self {
            attachments,
            subpasses,
            first_use,
        }
    }

    pub fn attachments(&self) -> &[AttachmentDesc] {
        &self.attachments
    }

    pub fn attachment(&self, index: u32) -> Option<&AttachmentDesc> {
        self.attachments.get(index as usize)
    }

    pub fn subpasses(&self) -> &[SubpassDesc] {
        &self.subpasses
    }

    pub fn subpass(&self, index: u32) -> Option<&SubpassDesc> {
        self.subpasses.get(index as usize)
    }

    pub fn subpass_count(&self) -> u32 {
        self.subpasses.len() as u32
    }

    /// Colour attachment count of a subpass, which is also where its
    /// fragment-stage UAV registers start.
    pub fn color_count(&self, subpass: u32) -> u32 {
        self.subpass(subpass).map(|s| s.colors.len() as u32).unwrap_or(0)
    }

    pub fn first_use(&self, attachment: u32) -> Option<u32> {
        self.first_use.get(attachment as usize).copied().flatten()
    }

    /// Whether `attachment` is cleared when `subpass` begins.
    pub fn clears_colour_on(&self, attachment: u32, subpass: u32) -> bool {
        self.first_use(attachment) == Some(subpass)
            && self
                .attachment(attachment)
                .is_some_and(|a| a.load_op == vk::AttachmentLoadOp::CLEAR)
    }

    /// Depth/stencil clear flags applied when `subpass` begins.
    pub fn depth_clear_flags_on(&self, attachment: u32, subpass: u32) -> ClearFlags {
        if self.first_use(attachment) != Some(subpass) {
            return ClearFlags::empty();
        }
        let Some(desc) = self.attachment(attachment) else {
            return ClearFlags::empty();
        };
        let mut flags = ClearFlags::empty();
        if format::is_depth(desc.format) && desc.load_op == vk::AttachmentLoadOp::CLEAR {
            flags |= ClearFlags::DEPTH;
        }
        if format::has_stencil(desc.format) && desc.stencil_load_op == vk::AttachmentLoadOp::CLEAR {
            flags |= ClearFlags::STENCIL;
        }
        flags
    }
}

/// Native clear flags for the aspects of a depth/stencil format.
pub fn clear_flags(format: vk::Format, aspects: vk::ImageAspectFlags) -> ClearFlags {
    let mut flags = ClearFlags::empty();
    if aspects.contains(vk::ImageAspectFlags::DEPTH) && format::is_depth(format) {
        flags |= ClearFlags::DEPTH;
    }
    if aspects.contains(vk::ImageAspectFlags::STENCIL) && format::has_stencil(format) {
        flags |= ClearFlags::STENCIL;
    }
    flags
}

pub struct Framebuffer {
    attachments: Vec<Arc<ImageView>>,
    extent: vk::Extent2D,
    layers: u32,
}

impl Framebuffer {
    pub fn new(attachments: Vec<Arc<ImageView>>, extent: vk::Extent2D, layers: u32) -> Self {
        Self {
            attachments,
            extent,
            layers,
        }
    }

    pub fn attachment(&self, index: u32) -> Option<&Arc<ImageView>> {
        self.attachments.get(index as usize)
    }

    pub fn attachments(&self) -> &[Arc<ImageView>] {
        &self.attachments
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(format: vk::Format, load_op: vk::AttachmentLoadOp) -> AttachmentDesc {
        AttachmentDesc {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: load_op,
        }
    }

    #[test]
    fn attachments_clear_on_first_use_only() {
        let pass = RenderPass::new(
            vec![
                attachment(vk::Format::R8G8B8A8_UNORM, vk::AttachmentLoadOp::CLEAR),
                attachment(vk::Format::R8G8B8A8_UNORM, vk::AttachmentLoadOp::CLEAR),
                attachment(vk::Format::D24_UNORM_S8_UINT, vk::AttachmentLoadOp::CLEAR),
            ],
            vec![
                SubpassDesc {
                    colors: vec![Some(0)],
                    depth_stencil: Some(2),
                    ..Default::default()
                },
                SubpassDesc {
                    colors: vec![Some(0), Some(1)],
                    ..Default::default()
                },
            ],
        );
        assert!(pass.clears_colour_on(0, 0));
        assert!(!pass.clears_colour_on(0, 1));
        assert!(pass.clears_colour_on(1, 1));
        assert_eq!(pass.depth_clear_flags_on(2, 0), ClearFlags::DEPTH | ClearFlags::STENCIL);
        assert_eq!(pass.color_count(1), 2);
    }

    #[test]
    fn clear_flags_follow_format_and_aspects() {
        let both = vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL;
        assert_eq!(clear_flags(vk::Format::D32_SFLOAT, both), ClearFlags::DEPTH);
        assert_eq!(
            clear_flags(vk::Format::D24_UNORM_S8_UINT, vk::ImageAspectFlags::STENCIL),
            ClearFlags::STENCIL
        );
    }
}
