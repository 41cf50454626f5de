//! Render pass and subpass boundaries.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use super::clear::clear_colour;
use super::Replay;
use crate::context::{ActiveRenderPass, Context};
use crate::error::ReplayError;
use crate::format;
use crate::renderpass::{Framebuffer, RenderPass};

#[derive(Clone)]
pub struct BeginRenderPass {
    pub render_pass: Arc<RenderPass>,
    pub framebuffer: Arc<Framebuffer>,
    pub render_area: vk::Rect2D,
    pub clear_values: Vec<vk::ClearValue>,
}

impl Replay for BeginRenderPass {
    const NAME: &'static str = "BeginRenderPass";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        ctx.set_render_pass(Some(ActiveRenderPass {
            render_pass: self.render_pass.clone(),
            framebuffer: self.framebuffer.clone(),
            render_area: self.render_area,
            clear_values: self.clear_values.clone(),
            subpass: 0,
        }));
        Ok(())
    }
}

/// Binds the subpass's attachments, clears those first used here and moves
/// the fragment UAV range past the colour targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeginSubpass {
    pub subpass: u32,
}

impl Replay for BeginSubpass {
    const NAME: &'static str = "BeginSubpass";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        let Some(active) = ctx.render_pass_mut() else {
            return Err(ReplayError::NoActiveRenderPass(Self::NAME));
        };
        active.subpass = self.subpass;
        let active = active.clone();
        let pass = &active.render_pass;
        let fb = &active.framebuffer;
        let Some(desc) = pass.subpass(self.subpass) else {
            return Ok(());
        };

        let targets: Vec<_> = desc
            .colors
            .iter()
            .map(|a| a.and_then(|a| fb.attachment(a)).and_then(|v| v.get_render_target_view()))
            .collect();
        let depth_stencil = desc
            .depth_stencil
            .and_then(|a| fb.attachment(a))
            .and_then(|v| v.get_depth_stencil_view());
        ctx.native().om_set_render_targets(&targets, depth_stencil);

        let area = crate::pipeline::rect(&active.render_area);

        for (attachment, target) in desc.colors.iter().zip(&targets) {
            let (Some(attachment), Some(view)) = (*attachment, *target) else {
                continue;
            };
            if !pass.clears_colour_on(attachment, self.subpass) {
                continue;
            }
            let Some(value) = active.clear_values.get(attachment as usize) else {
                debug!("attachment {} has no clear value", attachment);
                continue;
            };
            let format = pass.attachment(attachment).map(|a| a.format).unwrap_or(vk::Format::UNDEFINED);
            // SAFETY: colour attachments take the colour member.
            let color = clear_colour(format, unsafe { &value.color });
            match ctx.extended() {
                Some(ext) => ext.clear_view(view, color, &[area]),
                None => {
                    debug!("render area clears need the extended context, clearing the whole view");
                    ctx.native().clear_render_target_view(view, color);
                }
            }
        }
        if let (Some(attachment), Some(view)) = (desc.depth_stencil, depth_stencil) {
            let flags = pass.depth_clear_flags_on(attachment, self.subpass);
            if let Some(value) = active.clear_values.get(attachment as usize).filter(|_| !flags.is_empty()) {
                // Depth clears always cover the whole view.
                // SAFETY: depth/stencil attachments take the depth_stencil member.
                let value = unsafe { value.depth_stencil };
                ctx.native()
                    .clear_depth_stencil_view(view, flags, value.depth, value.stencil as u8);
            }
        }

        ctx.set_uav_start(pass.color_count(self.subpass));
        Ok(())
    }
}

/// Resolves multisampled colour attachments into their resolve targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndSubpass {
    pub subpass: u32,
}

impl Replay for EndSubpass {
    const NAME: &'static str = "EndSubpass";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        let Some(active) = ctx.render_pass().cloned() else {
            return Err(ReplayError::NoActiveRenderPass(Self::NAME));
        };
        let Some(desc) = active.render_pass.subpass(self.subpass) else {
            return Ok(());
        };
        let fb = &active.framebuffer;
        for (color, resolve) in desc.colors.iter().zip(&desc.resolves) {
            let (Some(src), Some(dst)) = (
                color.and_then(|a| fb.attachment(a)),
                resolve.and_then(|a| fb.attachment(a)),
            ) else {
                continue;
            };
            let dst_image = dst.image();
            ctx.native().resolve_subresource(
                dst_image.get_texture(),
                dst.base_subresource(),
                src.image().get_texture(),
                src.base_subresource(),
                format::to_native(dst.format()),
            );
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndRenderPass;

impl Replay for EndRenderPass {
    const NAME: &'static str = "EndRenderPass";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        if ctx.render_pass().is_none() {
            return Err(ReplayError::NoActiveRenderPass(Self::NAME));
        }
        ctx.native().om_set_render_targets(&[], None);
        ctx.set_render_pass(None);
        ctx.set_uav_start(0);
        Ok(())
    }
}
