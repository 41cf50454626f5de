//! Binding commands: pipelines, descriptor sets, push constants and the
//! fixed-function state that can be set dynamically.

use std::sync::Arc;

use ash::vk;
use tracing::trace;

use super::Replay;
use crate::context::Context;
use crate::descriptor::DescriptorBuckets;
use crate::error::ReplayError;
use crate::layout::{ClassSlots, ResourceClass};
use crate::native::{IndexFormat, NativeStage, Rect, Viewport};
use crate::pipeline::Pipeline;
use crate::resource::Buffer;

const GRAPHICS_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::ALL_GRAPHICS;

fn bind_point_stages(bind_point: vk::PipelineBindPoint) -> vk::ShaderStageFlags {
    if bind_point == vk::PipelineBindPoint::COMPUTE {
        vk::ShaderStageFlags::COMPUTE
    } else {
        GRAPHICS_STAGES
    }
}

// ── Pipeline ────────────────────────────────────────────────

#[derive(Clone)]
pub struct BindPipeline {
    pub pipeline: Pipeline,
}

impl Replay for BindPipeline {
    const NAME: &'static str = "BindPipeline";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        match &self.pipeline {
            Pipeline::Graphics(p) => {
                let native = ctx.native();
                for stage in NativeStage::GRAPHICS {
                    native.set_shader(stage, p.shader(stage).map(|s| s.get_native_handle()));
                }
                native.ia_set_input_layout(p.input_layout());
                native.ia_set_primitive_topology(p.topology());
                native.rs_set_state(Some(p.rasterizer_state()));
                if !p.viewports().is_empty() {
                    ctx.set_viewports(0, p.viewports());
                }
                if !p.scissors().is_empty() {
                    ctx.set_scissors(0, p.scissors());
                }
                ctx.set_graphics_pipeline(p.clone());
            }
            Pipeline::Compute(p) => {
                ctx.native()
                    .set_shader(NativeStage::Compute, Some(p.shader().get_native_handle()));
            }
        }
        Ok(())
    }
}

// ── Descriptor sets ─────────────────────────────────────────

/// `vkCmdBindDescriptorSets` for one set. The buckets are a snapshot taken
/// at record time; later updates to the set do not affect this command.
#[derive(Clone)]
pub struct BindDescriptorSet {
    pub bind_point: vk::PipelineBindPoint,
    pub set: u32,
    /// First native slot of each class the pipeline layout gives this set.
    pub base: ClassSlots,
    pub buckets: Arc<DescriptorBuckets>,
    /// One offset per dynamic binding, in ascending binding order.
    pub dynamic_offsets: Vec<u32>,
}

impl BindDescriptorSet {
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub fn set_index(&self) -> u32 {
        self.set
    }

    fn slot(&self, class: ResourceClass, local: u32) -> u32 {
        self.base.get(class) + local
    }

    fn stages(&self, stages: vk::ShaderStageFlags) -> vk::ShaderStageFlags {
        stages & bind_point_stages(self.bind_point)
    }

    fn bind(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        use ResourceClass::*;
        let b = &*self.buckets;

        for entry in &b.combined {
            let stages = self.stages(entry.stages);
            if let Some(view) = entry.view {
                ctx.bind_shader_resource(stages, self.slot(ShaderResource, entry.texture_slot), Some(view));
            }
            if let Some(sampler) = entry.sampler {
                ctx.bind_sampler(stages, self.slot(Sampler, entry.sampler_slot), Some(sampler));
            }
        }
        for entry in &b.samplers {
            if let Some(sampler) = entry.view {
                ctx.bind_sampler(self.stages(entry.stages), self.slot(Sampler, entry.slot), Some(sampler));
            }
        }
        for entry in &b.sampled_textures {
            if let Some(view) = entry.view {
                ctx.bind_shader_resource(self.stages(entry.stages), self.slot(ShaderResource, entry.slot), Some(view));
            }
        }
        for entry in b.uniform_buffers.iter().filter(|e| !e.dynamic) {
            let stages = self.stages(entry.stages);
            let slot = self.slot(ConstantBuffer, entry.slot);
            if entry.whole {
                ctx.bind_constant_buffer(stages, slot, Some(entry.buffer));
            } else {
                ctx.bind_constant_buffer_range(stages, slot, entry.buffer, entry.first_constant, entry.num_constants);
            }
        }
        for entry in &b.texel_buffers {
            if let Some(view) = entry.view {
                ctx.bind_shader_resource(self.stages(entry.stages), self.slot(ShaderResource, entry.slot), Some(view));
            }
        }
        for entry in b.storage_buffers.iter().filter(|e| !e.dynamic) {
            if let Some(view) = entry.view {
                ctx.bind_unordered_access(self.stages(entry.stages), self.slot(UnorderedAccess, entry.slot), Some(view));
            }
        }
        for entry in &b.storage_textures {
            if let Some(view) = entry.view {
                ctx.bind_unordered_access(self.stages(entry.stages), self.slot(UnorderedAccess, entry.slot), Some(view));
            }
        }

        for entry in &b.dynamic_buffers {
            let stages = self.stages(entry.stages);
            let Some(&dynamic_offset) = self.dynamic_offsets.get(entry.offset_index as usize) else {
                return Err(ReplayError::MissingDynamicOffset {
                    binding: entry.binding,
                    index: entry.offset_index,
                });
            };
            let dynamic_offset = u64::from(dynamic_offset);
            let offset = entry.offset + dynamic_offset;
            match entry.descriptor_type {
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => {
                    ctx.bind_constant_buffer_range(
                        stages,
                        self.slot(ConstantBuffer, entry.slot),
                        entry.buffer,
                        (offset / 16) as u32,
                        (entry.range / 16) as u32,
                    );
                }
                vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => {
                    if !ctx.device().feature_level().supports_uav() {
                        trace!("binding {}: no UAVs at this feature level", entry.binding);
                        continue;
                    }
                    let view = ctx.transient_buffer_view(entry.buffer, offset, entry.range)?;
                    ctx.bind_unordered_access(stages, self.slot(UnorderedAccess, entry.slot), Some(view));
                }
                other => return Err(ReplayError::UnsupportedDynamicDescriptorType(other)),
            }
        }
        Ok(())
    }

    /// Null every slot `bind` touched.
    fn unbind(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        use ResourceClass::*;
        let b = &*self.buckets;

        for entry in &b.combined {
            let stages = self.stages(entry.stages);
            if entry.view.is_some() {
                ctx.bind_shader_resource(stages, self.slot(ShaderResource, entry.texture_slot), None);
            }
            if entry.sampler.is_some() {
                ctx.bind_sampler(stages, self.slot(Sampler, entry.sampler_slot), None);
            }
        }
        for entry in b.samplers.iter().filter(|e| e.view.is_some()) {
            ctx.bind_sampler(self.stages(entry.stages), self.slot(Sampler, entry.slot), None);
        }
        for entry in b.sampled_textures.iter().filter(|e| e.view.is_some()) {
            ctx.bind_shader_resource(self.stages(entry.stages), self.slot(ShaderResource, entry.slot), None);
        }
        for entry in b.uniform_buffers.iter().filter(|e| !e.dynamic) {
            ctx.bind_constant_buffer(self.stages(entry.stages), self.slot(ConstantBuffer, entry.slot), None);
        }
        for entry in b.texel_buffers.iter().filter(|e| e.view.is_some()) {
            ctx.bind_shader_resource(self.stages(entry.stages), self.slot(ShaderResource, entry.slot), None);
        }
        for entry in b.storage_buffers.iter().filter(|e| !e.dynamic && e.view.is_some()) {
            ctx.bind_unordered_access(self.stages(entry.stages), self.slot(UnorderedAccess, entry.slot), None);
        }
        for entry in b.storage_textures.iter().filter(|e| e.view.is_some()) {
            ctx.bind_unordered_access(self.stages(entry.stages), self.slot(UnorderedAccess, entry.slot), None);
        }
        for entry in &b.dynamic_buffers {
            let stages = self.stages(entry.stages);
            match entry.descriptor_type {
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => {
                    ctx.bind_constant_buffer(stages, self.slot(ConstantBuffer, entry.slot), None);
                }
                vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => {
                    if ctx.device().feature_level().supports_uav() {
                        ctx.bind_unordered_access(stages, self.slot(UnorderedAccess, entry.slot), None);
                    }
                }
                other => return Err(ReplayError::UnsupportedDynamicDescriptorType(other)),
            }
        }
        Ok(())
    }
}

impl Replay for BindDescriptorSet {
    const NAME: &'static str = "BindDescriptorSet";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        if let Some(previous) = ctx.replace_bound_set(self) {
            previous.unbind(ctx)?;
        }
        self.bind(ctx)
    }

    fn remove(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        ctx.forget_bound_set(self);
        self.unbind(ctx)
    }
}

// ── Push constants ──────────────────────────────────────────

#[derive(Clone)]
pub struct PushConstants {
    pub stages: vk::ShaderStageFlags,
    pub offset: u32,
    pub data: Vec<u8>,
}

impl Replay for PushConstants {
    const NAME: &'static str = "PushConstants";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        ctx.write_push_constants(self.offset, &self.data)?;
        ctx.bind_push_constants(self.stages);
        Ok(())
    }

    fn remove(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        ctx.unbind_push_constants(self.stages);
        Ok(())
    }
}

// ── Input assembly ──────────────────────────────────────────

#[derive(Clone)]
pub struct BindVertexBuffers {
    pub first_binding: u32,
    pub buffers: Vec<(Arc<Buffer>, u64)>,
}

impl Replay for BindVertexBuffers {
    const NAME: &'static str = "BindVertexBuffers";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        let buffers: Vec<_> = self.buffers.iter().map(|(b, o)| (b.get_buffer(), *o)).collect();
        ctx.set_vertex_buffers(self.first_binding, &buffers);
        Ok(())
    }
}

#[derive(Clone)]
pub struct BindIndexBuffer {
    pub buffer: Arc<Buffer>,
    pub offset: u64,
    pub index_type: vk::IndexType,
}

impl Replay for BindIndexBuffer {
    const NAME: &'static str = "BindIndexBuffer";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        let format = if self.index_type == vk::IndexType::UINT16 {
            IndexFormat::U16
        } else {
            IndexFormat::U32
        };
        ctx.native()
            .ia_set_index_buffer(Some(self.buffer.get_buffer()), format, self.offset as u32);
        Ok(())
    }
}

// ── Dynamic state ───────────────────────────────────────────

#[derive(Clone)]
pub struct SetViewport {
    pub first: u32,
    pub viewports: Vec<Viewport>,
}

impl Replay for SetViewport {
    const NAME: &'static str = "SetViewport";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        ctx.set_viewports(self.first, &self.viewports);
        Ok(())
    }
}

#[derive(Clone)]
pub struct SetScissor {
    pub first: u32,
    pub scissors: Vec<Rect>,
}

impl Replay for SetScissor {
    const NAME: &'static str = "SetScissor";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        ctx.set_scissors(self.first, &self.scissors);
        Ok(())
    }
}

#[derive(Clone)]
pub struct SetBlendConstants(pub [f32; 4]);

impl Replay for SetBlendConstants {
    const NAME: &'static str = "SetBlendConstants";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        ctx.set_blend_constants(self.0);
        Ok(())
    }
}

/// The native context has one reference for both faces; the last value set
/// wins.
#[derive(Clone)]
pub struct SetStencilReference {
    pub faces: vk::StencilFaceFlags,
    pub reference: u32,
}

impl Replay for SetStencilReference {
    const NAME: &'static str = "SetStencilReference";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        ctx.set_stencil_reference(self.reference);
        Ok(())
    }
}
