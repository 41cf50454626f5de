//! Render pass and framebuffer functions for the Vulkan ICD.

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use vkbridge_d3d11::renderpass::{AttachmentDesc, SubpassDesc};
use vkbridge_d3d11::{Framebuffer, RenderPass};

use crate::ffi::{self, guard, guard_result};
use crate::handle_store;

fn attachment_index(reference: &vk::AttachmentReference) -> Option<u32> {
    (reference.attachment != vk::ATTACHMENT_UNUSED).then_some(reference.attachment)
}

/// # Safety
/// The reference arrays of `subpass` must be valid for their counts.
unsafe fn subpass_desc(subpass: &vk::SubpassDescription<'_>) -> SubpassDesc {
    let refs = |ptr: *const vk::AttachmentReference, count: u32| -> Vec<Option<u32>> {
        unsafe { ffi::slice(ptr, count) }.iter().map(attachment_index).collect()
    };
    SubpassDesc {
        colors: refs(subpass.p_color_attachments, subpass.color_attachment_count),
        // Resolve attachments, when present, pair with the colour attachments
        resolves: refs(subpass.p_resolve_attachments, subpass.color_attachment_count),
        depth_stencil: unsafe { subpass.p_depth_stencil_attachment.as_ref() }.and_then(attachment_index),
        inputs: refs(subpass.p_input_attachments, subpass.input_attachment_count),
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCreateRenderPass(
    _device: vk::Device,
    p_create_info: *const vk::RenderPassCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_render_pass: *mut vk::RenderPass,
) -> vk::Result {
    guard_result(|| {
        let ci = unsafe { ffi::reference(p_create_info) }?;
        let attachments = unsafe { ffi::slice(ci.p_attachments, ci.attachment_count) }
            .iter()
            .map(|a| AttachmentDesc {
                format: a.format,
                samples: a.samples,
                load_op: a.load_op,
                store_op: a.store_op,
                stencil_load_op: a.stencil_load_op,
            })
            .collect();
        let subpasses = unsafe { ffi::slice(ci.p_subpasses, ci.subpass_count) }
            .iter()
            .map(|s| unsafe { subpass_desc(s) })
            .collect();
        // Subpass dependencies need no translation: replay is strictly ordered.
        let id = handle_store::store_render_pass(Arc::new(RenderPass::new(attachments, subpasses)));
        unsafe { ffi::write(p_render_pass, vk::RenderPass::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyRenderPass(
    _device: vk::Device,
    render_pass: vk::RenderPass,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_render_pass(render_pass.as_raw());
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetRenderAreaGranularity(
    _device: vk::Device,
    _render_pass: vk::RenderPass,
    p_granularity: *mut vk::Extent2D,
) {
    guard((), || {
        let _ = unsafe { ffi::write(p_granularity, vk::Extent2D { width: 1, height: 1 }) };
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkCreateFramebuffer(
    _device: vk::Device,
    p_create_info: *const vk::FramebufferCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_framebuffer: *mut vk::Framebuffer,
) -> vk::Result {
    guard_result(|| {
        let ci = unsafe { ffi::reference(p_create_info) }?;
        let views = unsafe { ffi::slice(ci.p_attachments, ci.attachment_count) }
            .iter()
            .map(|v| handle_store::get_image_view(v.as_raw()))
            .collect::<Result<Vec<_>, _>>()?;
        let framebuffer = Framebuffer::new(
            views,
            vk::Extent2D {
                width: ci.width,
                height: ci.height,
            },
            ci.layers,
        );
        let id = handle_store::store_framebuffer(Arc::new(framebuffer));
        unsafe { ffi::write(p_framebuffer, vk::Framebuffer::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyFramebuffer(
    _device: vk::Device,
    framebuffer: vk::Framebuffer,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_framebuffer(framebuffer.as_raw());
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_references_become_none() {
        let colors = [
            vk::AttachmentReference {
                attachment: 0,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            },
            vk::AttachmentReference {
                attachment: vk::ATTACHMENT_UNUSED,
                layout: vk::ImageLayout::UNDEFINED,
            },
        ];
        let depth = vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription::default()
            .color_attachments(&colors)
            .depth_stencil_attachment(&depth);
        let desc = unsafe { subpass_desc(&subpass) };
        assert_eq!(desc.colors, vec![Some(0), None]);
        assert!(desc.resolves.is_empty());
        assert_eq!(desc.depth_stencil, Some(2));
    }
}
