//! Command buffers and pools.
//!
//! A command buffer owns the list of recorded [`Command`]s and enforces the
//! Vulkan lifecycle. Recording validates what can be checked without the
//! GPU; replay happens at submission.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::command::bind::{
    BindDescriptorSet, BindIndexBuffer, BindPipeline, BindVertexBuffers, PushConstants, SetBlendConstants,
    SetScissor, SetStencilReference, SetViewport,
};
use crate::command::clear::{ClearAttachments, ClearColorImage, ClearDepthStencilImage};
use crate::command::draw::{Dispatch, DispatchIndirect, Draw, DrawIndexed, DrawIndexedIndirect, DrawIndirect};
use crate::command::pass::{BeginRenderPass, BeginSubpass, EndRenderPass, EndSubpass};
use crate::command::sync::{
    BeginQuery, EndQuery, PipelineBarrier, ResetEvent, ResetQueryPool, SetEvent, WaitEvents, WriteTimestamp,
};
use crate::command::transfer::{
    BlitImage, CopyBuffer, CopyBufferToImage, CopyImage, CopyImageToBuffer, FillBuffer, ResolveImage, UpdateBuffer,
};
use crate::command::Command;
use crate::context::Context;
use crate::descriptor::DescriptorSet;
use crate::device::Device;
use crate::error::{RecordError, ReplayError};
use crate::layout::PipelineLayout;
use crate::native::DeviceContext;
use crate::pipeline::{self, Pipeline};
use crate::query::QueryPool;
use crate::queue::Event;
use crate::renderpass::{Framebuffer, RenderPass};
use crate::resource::{Buffer, Image};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Pending,
    Invalid,
}

/// Render pass a secondary buffer continues.
#[derive(Clone)]
pub struct Inheritance {
    pub render_pass: Arc<RenderPass>,
    pub subpass: u32,
}

#[derive(Default)]
struct Recording {
    /// Render pass and subpass being recorded into.
    render_pass: Option<(Arc<RenderPass>, u32)>,
    graphics_pipeline: bool,
}

struct Inner {
    state: CommandBufferState,
    commands: Vec<Command>,
    one_time: bool,
    recording: Recording,
}

pub struct CommandBuffer {
    level: vk::CommandBufferLevel,
    inner: Mutex<Inner>,
}

impl CommandBuffer {
    pub fn new(level: vk::CommandBufferLevel) -> Arc<Self> {
        Arc::new(Self {
            level,
            inner: Mutex::new(Inner {
                state: CommandBufferState::Initial,
                commands: Vec::new(),
                one_time: false,
                recording: Recording::default(),
            }),
        })
    }

    pub fn level(&self) -> vk::CommandBufferLevel {
        self.level
    }

    pub fn state(&self) -> CommandBufferState {
        self.inner.lock().state
    }

    pub fn command_count(&self) -> usize {
        self.inner.lock().commands.len()
    }

    /// Names of the recorded commands, in order.
    pub fn command_names(&self) -> Vec<&'static str> {
        self.inner.lock().commands.iter().map(Command::name).collect()
    }

    // ── Lifecycle ────────────────────────────────────────────

    pub fn begin(&self, flags: vk::CommandBufferUsageFlags, inheritance: Option<Inheritance>) -> Result<(), RecordError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CommandBufferState::Initial | CommandBufferState::Executable => {}
            CommandBufferState::Invalid if inner.one_time => return Err(RecordError::OneTimeSubmitNotReset),
            actual => {
                return Err(RecordError::InvalidState {
                    actual,
                    expected: "initial or executable",
                })
            }
        }
        inner.commands.clear();
        inner.one_time = flags.contains(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        inner.recording = Recording::default();
        if self.level == vk::CommandBufferLevel::SECONDARY
            && flags.contains(vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE)
        {
            inner.recording.render_pass = inheritance.map(|i| (i.render_pass, i.subpass));
        }
        inner.state = CommandBufferState::Recording;
        Ok(())
    }

    pub fn end(&self) -> Result<(), RecordError> {
        let mut inner = self.inner.lock();
        expect_recording(&inner)?;
        if self.level == vk::CommandBufferLevel::PRIMARY && inner.recording.render_pass.is_some() {
            return Err(RecordError::InsideRenderPass("vkEndCommandBuffer"));
        }
        inner.state = CommandBufferState::Executable;
        Ok(())
    }

    /// Drop every recorded command and return to the initial state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.commands.clear();
        inner.one_time = false;
        inner.recording = Recording::default();
        inner.state = CommandBufferState::Initial;
    }

    // ── Recording helpers ────────────────────────────────────

    fn record(&self, command: impl Into<Command>) -> Result<(), RecordError> {
        self.record_with(|_| Ok(vec![command.into()]))
    }

    fn record_with<F>(&self, f: F) -> Result<(), RecordError>
    where
        F: FnOnce(&mut Recording) -> Result<Vec<Command>, RecordError>,
    {
        let mut inner = self.inner.lock();
        expect_recording(&inner)?;
        let commands = f(&mut inner.recording)?;
        inner.commands.extend(commands);
        Ok(())
    }

    fn record_draw(&self, name: &'static str, command: impl Into<Command>) -> Result<(), RecordError> {
        let command = command.into();
        self.record_with(|rec| {
            if rec.render_pass.is_none() {
                return Err(RecordError::NotInRenderPass(name));
            }
            if !rec.graphics_pipeline {
                return Err(RecordError::NoPipelineBound(name));
            }
            Ok(vec![command])
        })
    }

    fn record_outside_pass(&self, name: &'static str, command: impl Into<Command>) -> Result<(), RecordError> {
        let command = command.into();
        self.record_with(|rec| {
            if rec.render_pass.is_some() {
                return Err(RecordError::InsideRenderPass(name));
            }
            Ok(vec![command])
        })
    }

    // ── Binding ──────────────────────────────────────────────

    pub fn bind_pipeline(&self, pipeline: Pipeline) -> Result<(), RecordError> {
        self.record_with(|rec| {
            if matches!(pipeline, Pipeline::Graphics(_)) {
                rec.graphics_pipeline = true;
            }
            Ok(vec![BindPipeline { pipeline }.into()])
        })
    }

    /// `vkCmdBindDescriptorSets`. `dynamic_offsets` holds one offset per
    /// dynamic binding of every set, sets in order and bindings ascending.
    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: &PipelineLayout,
        first_set: u32,
        sets: &[Arc<DescriptorSet>],
        dynamic_offsets: &[u32],
    ) -> Result<(), RecordError> {
        let mut commands = Vec::with_capacity(sets.len());
        let mut offsets = dynamic_offsets;
        for (i, set) in sets.iter().enumerate() {
            let index = first_set + i as u32;
            let base = layout.set_base(index).ok_or(RecordError::SetOutOfRange {
                index,
                count: layout.set_layouts().len(),
            })?;
            let expected = set.dynamic_count() as usize;
            let last = i + 1 == sets.len();
            if offsets.len() < expected || (last && offsets.len() != expected) {
                return Err(RecordError::DynamicOffsetCount {
                    set: index,
                    expected,
                    actual: offsets.len(),
                });
            }
            let (mine, rest) = offsets.split_at(expected);
            offsets = rest;
            commands.push(
                BindDescriptorSet {
                    bind_point,
                    set: index,
                    base,
                    buckets: set.buckets(),
                    dynamic_offsets: mine.to_vec(),
                }
                .into(),
            );
        }
        self.record_with(|_| Ok(commands))
    }

    pub fn push_constants(&self, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) -> Result<(), RecordError> {
        self.record(PushConstants {
            stages,
            offset,
            data: data.to_vec(),
        })
    }

    pub fn bind_vertex_buffers(&self, first_binding: u32, buffers: Vec<(Arc<Buffer>, u64)>) -> Result<(), RecordError> {
        self.record(BindVertexBuffers {
            first_binding,
            buffers,
        })
    }

    pub fn bind_index_buffer(&self, buffer: Arc<Buffer>, offset: u64, index_type: vk::IndexType) -> Result<(), RecordError> {
        self.record(BindIndexBuffer {
            buffer,
            offset,
            index_type,
        })
    }

    pub fn set_viewport(&self, first: u32, viewports: &[vk::Viewport]) -> Result<(), RecordError> {
        self.record(SetViewport {
            first,
            viewports: viewports.iter().map(pipeline::viewport).collect(),
        })
    }

    pub fn set_scissor(&self, first: u32, scissors: &[vk::Rect2D]) -> Result<(), RecordError> {
        self.record(SetScissor {
            first,
            scissors: scissors.iter().map(pipeline::rect).collect(),
        })
    }

    pub fn set_blend_constants(&self, constants: [f32; 4]) -> Result<(), RecordError> {
        self.record(SetBlendConstants(constants))
    }

    pub fn set_stencil_reference(&self, faces: vk::StencilFaceFlags, reference: u32) -> Result<(), RecordError> {
        self.record(SetStencilReference { faces, reference })
    }

    // ── Draw and dispatch ────────────────────────────────────

    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> Result<(), RecordError> {
        self.record_draw(
            "vkCmdDraw",
            Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
        )
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<(), RecordError> {
        self.record_draw(
            "vkCmdDrawIndexed",
            DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            },
        )
    }

    pub fn draw_indirect(&self, buffer: Arc<Buffer>, offset: u64, draw_count: u32, stride: u32) -> Result<(), RecordError> {
        self.record_draw(
            "vkCmdDrawIndirect",
            DrawIndirect {
                buffer,
                offset,
                draw_count,
                stride,
            },
        )
    }

    pub fn draw_indexed_indirect(&self, buffer: Arc<Buffer>, offset: u64, draw_count: u32, stride: u32) -> Result<(), RecordError> {
        self.record_draw(
            "vkCmdDrawIndexedIndirect",
            DrawIndexedIndirect {
                buffer,
                offset,
                draw_count,
                stride,
            },
        )
    }

    pub fn dispatch(&self, x: u32, y: u32, z: u32) -> Result<(), RecordError> {
        self.record_outside_pass("vkCmdDispatch", Dispatch { x, y, z })
    }

    pub fn dispatch_indirect(&self, buffer: Arc<Buffer>, offset: u64) -> Result<(), RecordError> {
        self.record_outside_pass("vkCmdDispatchIndirect", DispatchIndirect { buffer, offset })
    }

    // ── Transfers ────────────────────────────────────────────

    pub fn copy_buffer(&self, src: Arc<Buffer>, dst: Arc<Buffer>, regions: &[vk::BufferCopy]) -> Result<(), RecordError> {
        self.record_outside_pass(
            "vkCmdCopyBuffer",
            CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        )
    }

    pub fn copy_image(&self, src: Arc<Image>, dst: Arc<Image>, regions: &[vk::ImageCopy]) -> Result<(), RecordError> {
        self.record_outside_pass("vkCmdCopyImage", CopyImage::new(src, dst, regions))
    }

    pub fn copy_buffer_to_image(
        &self,
        buffer: Arc<Buffer>,
        image: Arc<Image>,
        regions: &[vk::BufferImageCopy],
    ) -> Result<(), RecordError> {
        self.record_outside_pass("vkCmdCopyBufferToImage", CopyBufferToImage::new(buffer, image, regions))
    }

    pub fn copy_image_to_buffer(
        &self,
        image: Arc<Image>,
        buffer: Arc<Buffer>,
        regions: &[vk::BufferImageCopy],
    ) -> Result<(), RecordError> {
        self.record_outside_pass("vkCmdCopyImageToBuffer", CopyImageToBuffer::new(image, buffer, regions))
    }

    pub fn blit_image(
        &self,
        device: &Device,
        src: Arc<Image>,
        dst: Arc<Image>,
        regions: &[vk::ImageBlit],
    ) -> Result<(), RecordError> {
        let blit = BlitImage::new(device, src, dst, regions)?;
        self.record_outside_pass("vkCmdBlitImage", blit)
    }

    pub fn resolve_image(&self, src: Arc<Image>, dst: Arc<Image>, regions: &[vk::ImageResolve]) -> Result<(), RecordError> {
        self.record_outside_pass("vkCmdResolveImage", ResolveImage::new(src, dst, regions))
    }

    pub fn update_buffer(&self, buffer: Arc<Buffer>, offset: u64, data: &[u8]) -> Result<(), RecordError> {
        self.record_outside_pass(
            "vkCmdUpdateBuffer",
            UpdateBuffer {
                buffer,
                offset,
                data: data.to_vec(),
            },
        )
    }

    pub fn fill_buffer(&self, buffer: Arc<Buffer>, offset: u64, size: u64, data: u32) -> Result<(), RecordError> {
        self.record_outside_pass("vkCmdFillBuffer", FillBuffer::new(buffer, offset, size, data))
    }

    // ── Clears ───────────────────────────────────────────────

    pub fn clear_color_image(
        &self,
        device: &Device,
        image: &Image,
        value: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) -> Result<(), RecordError> {
        let clear = ClearColorImage::new(device, image, value, ranges)?;
        self.record_outside_pass("vkCmdClearColorImage", clear)
    }

    pub fn clear_depth_stencil_image(
        &self,
        device: &Device,
        image: &Image,
        value: vk::ClearDepthStencilValue,
        ranges: &[vk::ImageSubresourceRange],
    ) -> Result<(), RecordError> {
        let clear = ClearDepthStencilImage::new(device, image, value, ranges)?;
        self.record_outside_pass("vkCmdClearDepthStencilImage", clear)
    }

    pub fn clear_attachments(&self, attachments: &[vk::ClearAttachment], rects: &[vk::ClearRect]) -> Result<(), RecordError> {
        self.record_with(|rec| {
            let Some((pass, subpass)) = &rec.render_pass else {
                return Err(RecordError::NotInRenderPass("vkCmdClearAttachments"));
            };
            Ok(vec![ClearAttachments::new(pass, *subpass, attachments, rects).into()])
        })
    }

    // ── Render passes ────────────────────────────────────────

    pub fn begin_render_pass(
        &self,
        render_pass: Arc<RenderPass>,
        framebuffer: Arc<Framebuffer>,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) -> Result<(), RecordError> {
        self.record_with(|rec| {
            if rec.render_pass.is_some() {
                return Err(RecordError::InsideRenderPass("vkCmdBeginRenderPass"));
            }
            rec.render_pass = Some((render_pass.clone(), 0));
            Ok(vec![
                BeginRenderPass {
                    render_pass,
                    framebuffer,
                    render_area,
                    clear_values: clear_values.to_vec(),
                }
                .into(),
                BeginSubpass { subpass: 0 }.into(),
            ])
        })
    }

    pub fn next_subpass(&self) -> Result<(), RecordError> {
        self.record_with(|rec| {
            let Some((_, subpass)) = rec.render_pass.as_mut() else {
                return Err(RecordError::NotInRenderPass("vkCmdNextSubpass"));
            };
            let current = *subpass;
            *subpass += 1;
            Ok(vec![
                EndSubpass { subpass: current }.into(),
                BeginSubpass { subpass: current + 1 }.into(),
            ])
        })
    }

    pub fn end_render_pass(&self) -> Result<(), RecordError> {
        self.record_with(|rec| {
            let Some((_, subpass)) = rec.render_pass.take() else {
                return Err(RecordError::NotInRenderPass("vkCmdEndRenderPass"));
            };
            Ok(vec![EndSubpass { subpass }.into(), EndRenderPass.into()])
        })
    }

    // ── Synchronisation and queries ──────────────────────────

    pub fn pipeline_barrier(&self, src_stages: vk::PipelineStageFlags, dst_stages: vk::PipelineStageFlags) -> Result<(), RecordError> {
        self.record(PipelineBarrier { src_stages, dst_stages })
    }

    pub fn set_event(&self, event: Arc<Event>) -> Result<(), RecordError> {
        self.record(SetEvent { event })
    }

    pub fn reset_event(&self, event: Arc<Event>) -> Result<(), RecordError> {
        self.record(ResetEvent { event })
    }

    pub fn wait_events(&self, events: Vec<Arc<Event>>) -> Result<(), RecordError> {
        self.record(WaitEvents { events })
    }

    pub fn begin_query(&self, pool: Arc<QueryPool>, query: u32) -> Result<(), RecordError> {
        self.record(BeginQuery { pool, query })
    }

    pub fn end_query(&self, pool: Arc<QueryPool>, query: u32) -> Result<(), RecordError> {
        self.record(EndQuery { pool, query })
    }

    pub fn reset_query_pool(&self, pool: Arc<QueryPool>, first: u32, count: u32) -> Result<(), RecordError> {
        self.record_outside_pass("vkCmdResetQueryPool", ResetQueryPool { pool, first, count })
    }

    pub fn write_timestamp(&self, pool: Arc<QueryPool>, query: u32) -> Result<(), RecordError> {
        self.record(WriteTimestamp { pool, query })
    }

    // ── Composition and replay ───────────────────────────────

    /// Append a copy of every command of each secondary buffer, in order.
    pub fn execute_commands(&self, secondaries: &[Arc<CommandBuffer>]) -> Result<(), RecordError> {
        let mut commands = Vec::new();
        for secondary in secondaries {
            let inner = secondary.inner.lock();
            if inner.state != CommandBufferState::Executable {
                return Err(RecordError::InvalidState {
                    actual: inner.state,
                    expected: "executable secondary",
                });
            }
            commands.extend(inner.commands.iter().cloned());
        }
        self.record_with(|_| Ok(commands))
    }

    /// Replay the recorded commands against `native`. The caller holds the
    /// device context lock.
    pub fn submit(&self, device: &Device, native: &mut dyn DeviceContext) -> Result<(), ReplayError> {
        let mut inner = self.inner.lock();
        if inner.state != CommandBufferState::Executable {
            return Err(ReplayError::NotExecutable(inner.state));
        }
        inner.state = CommandBufferState::Pending;
        debug!(command_count = inner.commands.len(), "replaying command buffer");

        let mut ctx = Context::new(device, native);
        let mut result = Ok(());
        for command in &inner.commands {
            trace!("apply {}", command.name());
            if let Err(e) = command.apply(&mut ctx) {
                result = Err(e);
                break;
            }
        }
        let finished = ctx.finish();

        inner.state = if inner.one_time {
            CommandBufferState::Invalid
        } else {
            CommandBufferState::Executable
        };
        result.and(finished)
    }
}

fn expect_recording(inner: &Inner) -> Result<(), RecordError> {
    if inner.state == CommandBufferState::Recording {
        Ok(())
    } else {
        Err(RecordError::InvalidState {
            actual: inner.state,
            expected: "recording",
        })
    }
}

// ── Pool ────────────────────────────────────────────────────

/// Tracks the command buffers allocated from it.
#[derive(Default)]
pub struct CommandPool {
    buffers: Mutex<Vec<Arc<CommandBuffer>>>,
}

impl CommandPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, level: vk::CommandBufferLevel, count: u32) -> Vec<Arc<CommandBuffer>> {
        let allocated: Vec<_> = (0..count).map(|_| CommandBuffer::new(level)).collect();
        self.buffers.lock().extend(allocated.iter().cloned());
        allocated
    }

    pub fn free(&self, buffers: &[Arc<CommandBuffer>]) {
        self.buffers
            .lock()
            .retain(|b| !buffers.iter().any(|f| Arc::ptr_eq(b, f)));
    }

    /// `vkResetCommandPool`: every buffer goes back to the initial state.
    pub fn reset(&self) {
        for buffer in self.buffers.lock().iter() {
            buffer.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> Arc<CommandBuffer> {
        let cmd = CommandBuffer::new(vk::CommandBufferLevel::PRIMARY);
        cmd.begin(vk::CommandBufferUsageFlags::empty(), None).unwrap();
        cmd
    }

    #[test]
    fn lifecycle_follows_begin_end_reset() {
        let cmd = CommandBuffer::new(vk::CommandBufferLevel::PRIMARY);
        assert_eq!(cmd.state(), CommandBufferState::Initial);
        assert!(matches!(cmd.end(), Err(RecordError::InvalidState { .. })));

        cmd.begin(vk::CommandBufferUsageFlags::empty(), None).unwrap();
        cmd.pipeline_barrier(vk::PipelineStageFlags::TOP_OF_PIPE, vk::PipelineStageFlags::BOTTOM_OF_PIPE)
            .unwrap();
        cmd.end().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Executable);
        assert_eq!(cmd.command_count(), 1);

        // Re-beginning drops the previous recording
        cmd.begin(vk::CommandBufferUsageFlags::empty(), None).unwrap();
        assert_eq!(cmd.command_count(), 0);

        cmd.reset();
        assert_eq!(cmd.state(), CommandBufferState::Initial);
    }

    #[test]
    fn draws_need_a_render_pass_and_pipeline() {
        let cmd = recording();
        assert_eq!(cmd.draw(3, 1, 0, 0), Err(RecordError::NotInRenderPass("vkCmdDraw")));
        assert!(matches!(cmd.end_render_pass(), Err(RecordError::NotInRenderPass(_))));
    }

    #[test]
    fn dispatch_outside_render_pass_only() {
        let cmd = recording();
        cmd.dispatch(1, 1, 1).unwrap();
        assert_eq!(cmd.command_names(), vec!["Dispatch"]);
    }

    #[test]
    fn secondary_commands_are_copied() {
        let secondary = CommandBuffer::new(vk::CommandBufferLevel::SECONDARY);
        secondary.begin(vk::CommandBufferUsageFlags::empty(), None).unwrap();
        secondary.dispatch(1, 2, 3).unwrap();
        secondary.end().unwrap();

        let primary = recording();
        primary.execute_commands(&[secondary.clone()]).unwrap();
        primary.execute_commands(&[secondary.clone()]).unwrap();
        assert_eq!(primary.command_count(), 2);

        // Resetting the secondary leaves the primary's copies intact
        secondary.reset();
        assert_eq!(primary.command_count(), 2);
    }

    #[test]
    fn unfinished_secondary_is_rejected() {
        let secondary = CommandBuffer::new(vk::CommandBufferLevel::SECONDARY);
        let primary = recording();
        assert!(matches!(
            primary.execute_commands(&[secondary]),
            Err(RecordError::InvalidState { .. })
        ));
    }

    #[test]
    fn pool_tracks_and_frees_buffers() {
        let pool = CommandPool::new();
        let buffers = pool.allocate(vk::CommandBufferLevel::PRIMARY, 3);
        assert_eq!(pool.len(), 3);
        buffers[0].begin(vk::CommandBufferUsageFlags::empty(), None).unwrap();
        pool.reset();
        assert_eq!(buffers[0].state(), CommandBufferState::Initial);
        pool.free(&buffers[..2]);
        assert_eq!(pool.len(), 1);
    }
}
