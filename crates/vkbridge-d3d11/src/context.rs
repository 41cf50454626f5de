//! Replay context: the binding state that crosses command boundaries during
//! one replay pass, and the per-stage bind helpers commands go through.

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, trace};

use crate::command::bind::BindDescriptorSet;
use crate::command::Replay;
use crate::device::Device;
use crate::error::ReplayError;
use crate::layout::PUSH_CONSTANT_SLOT;
use crate::native::{
    self, DeviceContext, DeviceContext1, NativeBuffer, NativeResource, NativeStage, Owned, Rect, SamplerState,
    ShaderResourceView, UnorderedAccessView, Viewport,
};
use crate::pipeline::GraphicsPipeline;
use crate::renderpass::{Framebuffer, RenderPass};
use crate::resource::raw_buffer_view;

/// The render pass instance between `BeginRenderPass` and `EndRenderPass`.
#[derive(Clone)]
pub struct ActiveRenderPass {
    pub render_pass: Arc<RenderPass>,
    pub framebuffer: Arc<Framebuffer>,
    pub render_area: vk::Rect2D,
    pub clear_values: Vec<vk::ClearValue>,
    pub subpass: u32,
}

pub struct Context<'a> {
    device: &'a Device,
    native: &'a mut dyn DeviceContext,
    /// First output-merger slot fragment UAVs occupy.
    uav_start: u32,
    /// Fragment UAVs by shader register, relative to `uav_start`.
    raw_uavs: Vec<Option<UnorderedAccessView>>,
    push_constants: Vec<u8>,
    push_stages: vk::ShaderStageFlags,
    render_pass: Option<ActiveRenderPass>,
    graphics_pipeline: Option<Arc<GraphicsPipeline>>,
    blend_constants: Option<[f32; 4]>,
    stencil_reference: Option<u32>,
    vertex_buffers: BTreeMap<u32, (NativeBuffer, u64)>,
    viewports: Vec<Viewport>,
    scissors: Vec<Rect>,
    bound_sets: BTreeMap<(i32, u32), BindDescriptorSet>,
    transients: Vec<Owned<UnorderedAccessView>>,
}

impl<'a> Context<'a> {
    pub fn new(device: &'a Device, native: &'a mut dyn DeviceContext) -> Self {
        Self {
            device,
            native,
            uav_start: 0,
            raw_uavs: Vec::new(),
            push_constants: vec![0; device.push_constant_size() as usize],
            push_stages: vk::ShaderStageFlags::empty(),
            render_pass: None,
            graphics_pipeline: None,
            blend_constants: None,
            stencil_reference: None,
            vertex_buffers: BTreeMap::new(),
            viewports: Vec::new(),
            scissors: Vec::new(),
            bound_sets: BTreeMap::new(),
            transients: Vec::new(),
        }
    }

    pub fn device(&self) -> &'a Device {
        self.device
    }

    /// Legacy context interface.
    pub fn native(&mut self) -> &mut dyn DeviceContext {
        &mut *self.native
    }

    /// Extended context interface, when the backend has one.
    pub fn extended(&mut self) -> Option<&mut dyn DeviceContext1> {
        self.native.extended()
    }

    // ── UAV slot space ───────────────────────────────────────

    pub fn uav_start(&self) -> u32 {
        self.uav_start
    }

    /// Move the fragment UAV range to start at `start`, rebinding any active
    /// UAVs above the new boundary.
    pub fn set_uav_start(&mut self, start: u32) {
        if start == self.uav_start {
            return;
        }
        debug!("uav start {} -> {}", self.uav_start, start);
        self.uav_start = start;
        if self.raw_uavs.iter().any(Option::is_some) {
            self.native.om_set_unordered_access_views(start, &self.raw_uavs);
        }
    }

    // ── Per-stage binding ────────────────────────────────────

    pub fn bind_shader_resource(&mut self, stages: vk::ShaderStageFlags, slot: u32, view: Option<ShaderResourceView>) {
        for stage in NativeStage::in_mask(stages) {
            self.native.set_shader_resources(stage, slot, &[view]);
        }
    }

    pub fn bind_sampler(&mut self, stages: vk::ShaderStageFlags, slot: u32, sampler: Option<SamplerState>) {
        for stage in NativeStage::in_mask(stages) {
            self.native.set_samplers(stage, slot, &[sampler]);
        }
    }

    pub fn bind_constant_buffer(&mut self, stages: vk::ShaderStageFlags, slot: u32, buffer: Option<NativeBuffer>) {
        for stage in NativeStage::in_mask(stages) {
            self.native.set_constant_buffers(stage, slot, &[buffer]);
        }
    }

    /// Bind `num_constants` 16-byte constants of `buffer` from
    /// `first_constant`. Needs the extended interface; without it the whole
    /// buffer is bound.
    pub fn bind_constant_buffer_range(
        &mut self,
        stages: vk::ShaderStageFlags,
        slot: u32,
        buffer: NativeBuffer,
        first_constant: u32,
        num_constants: u32,
    ) {
        for stage in NativeStage::in_mask(stages) {
            match self.native.extended() {
                Some(ext) => ext.set_constant_buffers1(stage, slot, &[Some(buffer)], &[first_constant], &[num_constants]),
                None => {
                    debug!("constant buffer offsets need the extended context, binding from offset 0");
                    self.native.set_constant_buffers(stage, slot, &[Some(buffer)]);
                }
            }
        }
    }

    /// UAVs bind to the compute stage directly and to the fragment stage
    /// through the output merger. Other stages have no UAV slots.
    pub fn bind_unordered_access(&mut self, stages: vk::ShaderStageFlags, slot: u32, view: Option<UnorderedAccessView>) {
        for stage in NativeStage::in_mask(stages) {
            match stage {
                NativeStage::Compute => self.native.cs_set_unordered_access_views(slot, &[view]),
                NativeStage::Pixel => {
                    let index = slot as usize;
                    if self.raw_uavs.len() <= index {
                        self.raw_uavs.resize(index + 1, None);
                    }
                    self.raw_uavs[index] = view;
                    self.native.om_set_unordered_access_views(self.uav_start, &self.raw_uavs);
                    if self.raw_uavs.iter().all(Option::is_none) {
                        self.raw_uavs.clear();
                    }
                }
                other => trace!("{:?} stage has no UAV slots", other),
            }
        }
    }

    /// Byte-address UAV over part of a buffer, alive until the replay pass
    /// ends.
    pub fn transient_buffer_view(
        &mut self,
        buffer: NativeBuffer,
        offset: u64,
        range: u64,
    ) -> Result<UnorderedAccessView, ReplayError> {
        let desc = raw_buffer_view(offset as u32, range as u32);
        let view = native::create(self.device.native(), |d| {
            d.create_unordered_access_view(NativeResource::Buffer(buffer), &desc)
        })?;
        let handle = view.get();
        self.transients.push(view);
        Ok(handle)
    }

    // ── Push constants ───────────────────────────────────────

    /// Update the push-constant shadow and upload it to the reserved buffer.
    pub fn write_push_constants(&mut self, offset: u32, data: &[u8]) -> Result<(), ReplayError> {
        let start = offset as usize;
        let end = (start + data.len()).min(self.push_constants.len());
        if start < end {
            self.push_constants[start..end].copy_from_slice(&data[..end - start]);
        }
        let buffer = self.device.push_constant_buffer();
        self.native.write_discard(buffer, 0, &self.push_constants)?;
        Ok(())
    }

    pub fn bind_push_constants(&mut self, stages: vk::ShaderStageFlags) {
        let buffer = self.device.push_constant_buffer();
        self.bind_constant_buffer(stages, PUSH_CONSTANT_SLOT, Some(buffer));
        self.push_stages |= stages;
    }

    pub fn unbind_push_constants(&mut self, stages: vk::ShaderStageFlags) {
        self.bind_constant_buffer(stages, PUSH_CONSTANT_SLOT, None);
        self.push_stages &= !stages;
    }

    // ── Descriptor sets ──────────────────────────────────────

    /// Remember `set` as bound, returning the set it replaces.
    pub(crate) fn replace_bound_set(&mut self, set: &BindDescriptorSet) -> Option<BindDescriptorSet> {
        self.bound_sets
            .insert((set.bind_point().as_raw(), set.set_index()), set.clone())
    }

    pub(crate) fn forget_bound_set(&mut self, set: &BindDescriptorSet) {
        self.bound_sets.remove(&(set.bind_point().as_raw(), set.set_index()));
    }

    // ── Render pass and pipeline state ───────────────────────

    pub fn render_pass(&self) -> Option<&ActiveRenderPass> {
        self.render_pass.as_ref()
    }

    pub fn render_pass_mut(&mut self) -> Option<&mut ActiveRenderPass> {
        self.render_pass.as_mut()
    }

    pub fn set_render_pass(&mut self, pass: Option<ActiveRenderPass>) {
        self.render_pass = pass;
    }

    pub fn graphics_pipeline(&self) -> Option<&Arc<GraphicsPipeline>> {
        self.graphics_pipeline.as_ref()
    }

    pub fn set_graphics_pipeline(&mut self, pipeline: Arc<GraphicsPipeline>) {
        self.graphics_pipeline = Some(pipeline);
        self.apply_blend_state();
        self.apply_depth_stencil_state();
        self.apply_vertex_buffers();
    }

    pub fn set_blend_constants(&mut self, constants: [f32; 4]) {
        self.blend_constants = Some(constants);
        self.apply_blend_state();
    }

    pub fn set_stencil_reference(&mut self, reference: u32) {
        self.stencil_reference = Some(reference);
        self.apply_depth_stencil_state();
    }

    fn apply_blend_state(&mut self) {
        let Some(pipeline) = &self.graphics_pipeline else {
            return;
        };
        let constants = match self.blend_constants {
            Some(c) if pipeline.is_dynamic(vk::DynamicState::BLEND_CONSTANTS) => c,
            _ => pipeline.blend_constants(),
        };
        self.native
            .om_set_blend_state(Some(pipeline.blend_state()), constants, pipeline.sample_mask());
    }

    fn apply_depth_stencil_state(&mut self) {
        let Some(pipeline) = &self.graphics_pipeline else {
            return;
        };
        let reference = match self.stencil_reference {
            Some(r) if pipeline.is_dynamic(vk::DynamicState::STENCIL_REFERENCE) => r,
            _ => pipeline.stencil_reference(),
        };
        self.native
            .om_set_depth_stencil_state(Some(pipeline.depth_stencil_state()), reference);
    }

    /// The native context sets all viewports at once; `first` is merged
    /// into what is already set.
    pub fn set_viewports(&mut self, first: u32, viewports: &[Viewport]) {
        splice(&mut self.viewports, first, viewports);
        self.native.rs_set_viewports(&self.viewports);
    }

    pub fn set_scissors(&mut self, first: u32, scissors: &[Rect]) {
        splice(&mut self.scissors, first, scissors);
        self.native.rs_set_scissor_rects(&self.scissors);
    }

    pub fn set_vertex_buffers(&mut self, first_binding: u32, buffers: &[(NativeBuffer, u64)]) {
        for (i, buffer) in buffers.iter().enumerate() {
            self.vertex_buffers.insert(first_binding + i as u32, *buffer);
        }
        self.apply_vertex_buffers();
    }

    /// Strides live in the pipeline, so vertex buffers are (re)bound
    /// whenever either changes.
    fn apply_vertex_buffers(&mut self) {
        if self.vertex_buffers.is_empty() {
            return;
        }
        let stride_of = |binding: u32| {
            self.graphics_pipeline
                .as_ref()
                .map(|p| p.vertex_stride(binding))
                .unwrap_or(0)
        };
        let mut buffers = Vec::new();
        let mut strides = Vec::new();
        let mut offsets = Vec::new();
        let first = self.vertex_buffers.keys().next().copied().unwrap_or(0);
        let last = self.vertex_buffers.keys().next_back().copied().unwrap_or(0);
        for binding in first..=last {
            let entry = self.vertex_buffers.get(&binding);
            buffers.push(entry.map(|(b, _)| *b));
            strides.push(stride_of(binding));
            offsets.push(entry.map(|(_, o)| *o as u32).unwrap_or(0));
        }
        self.native.ia_set_vertex_buffers(first, &buffers, &strides, &offsets);
    }

    // ── End of pass ──────────────────────────────────────────

    /// Undo everything this pass left bound: descriptor sets in reverse
    /// order, push constants and the render targets of an unfinished pass.
    pub fn finish(&mut self) -> Result<(), ReplayError> {
        let sets: Vec<BindDescriptorSet> = std::mem::take(&mut self.bound_sets).into_values().rev().collect();
        for set in &sets {
            set.remove(self)?;
        }
        if !self.push_stages.is_empty() {
            let stages = self.push_stages;
            self.unbind_push_constants(stages);
        }
        if self.render_pass.take().is_some() {
            self.native.om_set_render_targets(&[], None);
        }
        self.set_uav_start(0);
        self.raw_uavs.clear();
        self.graphics_pipeline = None;
        self.blend_constants = None;
        self.stencil_reference = None;
        self.vertex_buffers.clear();
        self.viewports.clear();
        self.scissors.clear();
        Ok(())
    }
}

fn splice<T: Copy + Default>(dst: &mut Vec<T>, first: u32, src: &[T]) {
    let first = first as usize;
    if dst.len() < first + src.len() {
        dst.resize(first + src.len(), T::default());
    }
    dst[first..first + src.len()].copy_from_slice(src);
}
