//! Command pool, command buffer and `vkCmd*` functions for the Vulkan ICD.
//!
//! `vkCmd*` functions return nothing, so a recording failure is kept on the
//! command buffer and reported by the next `vkEndCommandBuffer`.

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use parking_lot::Mutex;
use tracing::{debug, error};
use vkbridge_d3d11::{CommandPool, Inheritance, RecordError};

use crate::dispatch::DispatchableHandle;
use crate::ffi::{self, guard, guard_result};
use crate::handle_store::{self, CommandBufferEntry, CommandPoolState};

// ── Command pools ───────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCreateCommandPool(
    device: vk::Device,
    p_create_info: *const vk::CommandPoolCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_command_pool: *mut vk::CommandPool,
) -> vk::Result {
    guard_result(|| {
        let dev = unsafe { handle_store::device(device) }?;
        let ci = unsafe { ffi::reference(p_create_info) }?;
        if ci.queue_family_index != 0 {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        let id = handle_store::store_cmd_pool(Arc::new(CommandPoolState {
            pool: CommandPool::new(),
            device: dev.device.clone(),
            handles: Mutex::new(Vec::new()),
        }));
        unsafe { ffi::write(p_command_pool, vk::CommandPool::from_raw(id)) }
    })
}

/// Drop the registry entry and the dispatchable allocation of `handle`.
///
/// # Safety
/// `handle` must have come from `vkAllocateCommandBuffers` and not have been
/// released yet.
unsafe fn release_handle(handle: vk::CommandBuffer) {
    // SAFETY: guaranteed by the caller.
    if let Some(id) = unsafe { DispatchableHandle::id_of(handle) } {
        handle_store::remove_cmd_buffer(id);
    }
    // SAFETY: guaranteed by the caller.
    unsafe { DispatchableHandle::release(handle) };
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyCommandPool(
    _device: vk::Device,
    command_pool: vk::CommandPool,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        let Some(state) = handle_store::remove_cmd_pool(command_pool.as_raw()) else {
            return;
        };
        state.pool.reset();
        let handles = std::mem::take(&mut *state.handles.lock());
        for handle in handles {
            unsafe { release_handle(handle) };
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkResetCommandPool(
    _device: vk::Device,
    command_pool: vk::CommandPool,
    _flags: vk::CommandPoolResetFlags,
) -> vk::Result {
    guard_result(|| {
        let state = handle_store::get_cmd_pool(command_pool.as_raw())?;
        state.pool.reset();
        let handles = state.handles.lock().clone();
        for handle in handles {
            if let Ok(entry) = unsafe { handle_store::command_buffer(handle) } {
                entry.error.lock().take();
            }
        }
        Ok(())
    })
}

// ── Command buffers ─────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkAllocateCommandBuffers(
    _device: vk::Device,
    p_allocate_info: *const vk::CommandBufferAllocateInfo<'_>,
    p_command_buffers: *mut vk::CommandBuffer,
) -> vk::Result {
    guard_result(|| {
        let ai = unsafe { ffi::reference(p_allocate_info) }?;
        let state = handle_store::get_cmd_pool(ai.command_pool.as_raw())?;
        let out = unsafe { ffi::slice_mut(p_command_buffers, ai.command_buffer_count) };
        if out.len() != ai.command_buffer_count as usize {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        let buffers = state.pool.allocate(ai.level, ai.command_buffer_count);
        let mut handles = state.handles.lock();
        for (buffer, slot) in buffers.into_iter().zip(out.iter_mut()) {
            let id = handle_store::store_cmd_buffer(Arc::new(CommandBufferEntry {
                buffer,
                device: state.device.clone(),
                error: Mutex::new(None),
            }));
            let handle = DispatchableHandle::wrap(id);
            handles.push(handle);
            *slot = handle;
        }
        debug!(count = ai.command_buffer_count, level = ?ai.level, "allocated command buffers");
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkFreeCommandBuffers(
    _device: vk::Device,
    command_pool: vk::CommandPool,
    command_buffer_count: u32,
    p_command_buffers: *const vk::CommandBuffer,
) {
    guard((), || {
        let Ok(state) = handle_store::get_cmd_pool(command_pool.as_raw()) else {
            return;
        };
        let mut handles = state.handles.lock();
        for &handle in unsafe { ffi::slice(p_command_buffers, command_buffer_count) } {
            if handle == vk::CommandBuffer::null() {
                continue;
            }
            if let Ok(entry) = unsafe { handle_store::command_buffer(handle) } {
                state.pool.free(&[entry.buffer.clone()]);
            }
            handles.retain(|h| *h != handle);
            unsafe { release_handle(handle) };
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkBeginCommandBuffer(
    command_buffer: vk::CommandBuffer,
    p_begin_info: *const vk::CommandBufferBeginInfo<'_>,
) -> vk::Result {
    guard_result(|| {
        let entry = unsafe { handle_store::command_buffer(command_buffer) }?;
        let bi = unsafe { ffi::reference(p_begin_info) }?;
        let inheritance = match unsafe { bi.p_inheritance_info.as_ref() } {
            Some(info)
                if entry.buffer.level() == vk::CommandBufferLevel::SECONDARY
                    && bi.flags.contains(vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE) =>
            {
                Some(Inheritance {
                    render_pass: handle_store::get_render_pass(info.render_pass.as_raw())?,
                    subpass: info.subpass,
                })
            }
            _ => None,
        };
        entry.error.lock().take();
        entry
            .buffer
            .begin(bi.flags, inheritance)
            .map_err(ffi::fail("vkBeginCommandBuffer"))
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkEndCommandBuffer(command_buffer: vk::CommandBuffer) -> vk::Result {
    guard_result(|| {
        let entry = unsafe { handle_store::command_buffer(command_buffer) }?;
        entry.buffer.end().map_err(ffi::fail("vkEndCommandBuffer"))?;
        let stashed = entry.error.lock().take();
        match stashed {
            Some(code) => Err(code),
            None => Ok(()),
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkResetCommandBuffer(
    command_buffer: vk::CommandBuffer,
    _flags: vk::CommandBufferResetFlags,
) -> vk::Result {
    guard_result(|| {
        let entry = unsafe { handle_store::command_buffer(command_buffer) }?;
        entry.buffer.reset();
        entry.error.lock().take();
        Ok(())
    })
}

// ── Recording ───────────────────────────────────────────────

/// Why a `vkCmd*` call recorded nothing.
enum Failure {
    /// A handle argument did not resolve.
    Lookup(vk::Result),
    Record(RecordError),
}

impl From<vk::Result> for Failure {
    fn from(code: vk::Result) -> Self {
        Failure::Lookup(code)
    }
}

impl From<RecordError> for Failure {
    fn from(e: RecordError) -> Self {
        Failure::Record(e)
    }
}

/// Run one `vkCmd*` body against the command buffer behind `handle`,
/// keeping the first failure for `vkEndCommandBuffer`.
///
/// # Safety
/// `handle` must be null or a live command buffer of this ICD.
unsafe fn record(
    handle: vk::CommandBuffer,
    call: &'static str,
    f: impl FnOnce(&CommandBufferEntry) -> Result<(), Failure>,
) {
    guard((), || {
        let entry = match unsafe { handle_store::command_buffer(handle) } {
            Ok(entry) => entry,
            Err(_) => {
                error!("{} called with an unknown command buffer", call);
                return;
            }
        };
        let code = match f(&entry) {
            Ok(()) => return,
            Err(Failure::Lookup(code)) => {
                error!("{} failed: invalid handle argument", call);
                code
            }
            Err(Failure::Record(e)) => {
                error!("{} failed: {}", call, e);
                e.to_vk_result()
            }
        };
        entry.record_error(code);
    })
}

// ── Binding ─────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCmdBindPipeline(
    command_buffer: vk::CommandBuffer,
    _pipeline_bind_point: vk::PipelineBindPoint,
    pipeline: vk::Pipeline,
) {
    unsafe {
        record(command_buffer, "vkCmdBindPipeline", |e| {
            let pipeline = handle_store::get_pipeline(pipeline.as_raw())?;
            Ok(e.buffer.bind_pipeline(pipeline)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdBindDescriptorSets(
    command_buffer: vk::CommandBuffer,
    pipeline_bind_point: vk::PipelineBindPoint,
    layout: vk::PipelineLayout,
    first_set: u32,
    descriptor_set_count: u32,
    p_descriptor_sets: *const vk::DescriptorSet,
    dynamic_offset_count: u32,
    p_dynamic_offsets: *const u32,
) {
    unsafe {
        record(command_buffer, "vkCmdBindDescriptorSets", |e| {
            let layout = handle_store::get_pipeline_layout(layout.as_raw())?;
            let sets = ffi::slice(p_descriptor_sets, descriptor_set_count)
                .iter()
                .map(|s| handle_store::get_desc_set(s.as_raw()))
                .collect::<Result<Vec<_>, _>>()?;
            let offsets = ffi::slice(p_dynamic_offsets, dynamic_offset_count);
            Ok(e.buffer
                .bind_descriptor_sets(pipeline_bind_point, &layout, first_set, &sets, offsets)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdPushConstants(
    command_buffer: vk::CommandBuffer,
    _layout: vk::PipelineLayout,
    stage_flags: vk::ShaderStageFlags,
    offset: u32,
    size: u32,
    p_values: *const std::ffi::c_void,
) {
    unsafe {
        record(command_buffer, "vkCmdPushConstants", |e| {
            let data = ffi::slice(p_values.cast::<u8>(), size);
            Ok(e.buffer.push_constants(stage_flags, offset, data)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdBindVertexBuffers(
    command_buffer: vk::CommandBuffer,
    first_binding: u32,
    binding_count: u32,
    p_buffers: *const vk::Buffer,
    p_offsets: *const vk::DeviceSize,
) {
    unsafe {
        record(command_buffer, "vkCmdBindVertexBuffers", |e| {
            let buffers = ffi::slice(p_buffers, binding_count)
                .iter()
                .zip(ffi::slice(p_offsets, binding_count))
                .map(|(b, &offset)| handle_store::get_buffer(b.as_raw()).map(|b| (b, offset)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(e.buffer.bind_vertex_buffers(first_binding, buffers)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdBindIndexBuffer(
    command_buffer: vk::CommandBuffer,
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    index_type: vk::IndexType,
) {
    unsafe {
        record(command_buffer, "vkCmdBindIndexBuffer", |e| {
            let buffer = handle_store::get_buffer(buffer.as_raw())?;
            Ok(e.buffer.bind_index_buffer(buffer, offset, index_type)?)
        })
    }
}

// ── Dynamic state ───────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCmdSetViewport(
    command_buffer: vk::CommandBuffer,
    first_viewport: u32,
    viewport_count: u32,
    p_viewports: *const vk::Viewport,
) {
    unsafe {
        record(command_buffer, "vkCmdSetViewport", |e| {
            Ok(e.buffer
                .set_viewport(first_viewport, ffi::slice(p_viewports, viewport_count))?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdSetScissor(
    command_buffer: vk::CommandBuffer,
    first_scissor: u32,
    scissor_count: u32,
    p_scissors: *const vk::Rect2D,
) {
    unsafe {
        record(command_buffer, "vkCmdSetScissor", |e| {
            Ok(e.buffer.set_scissor(first_scissor, ffi::slice(p_scissors, scissor_count))?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdSetBlendConstants(command_buffer: vk::CommandBuffer, blend_constants: *const [f32; 4]) {
    unsafe {
        record(command_buffer, "vkCmdSetBlendConstants", |e| {
            let constants = *ffi::reference(blend_constants)?;
            Ok(e.buffer.set_blend_constants(constants)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdSetStencilReference(
    command_buffer: vk::CommandBuffer,
    face_mask: vk::StencilFaceFlags,
    reference: u32,
) {
    unsafe {
        record(command_buffer, "vkCmdSetStencilReference", |e| {
            Ok(e.buffer.set_stencil_reference(face_mask, reference)?)
        })
    }
}

// ── Draws and dispatches ────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCmdDraw(
    command_buffer: vk::CommandBuffer,
    vertex_count: u32,
    instance_count: u32,
    first_vertex: u32,
    first_instance: u32,
) {
    unsafe {
        record(command_buffer, "vkCmdDraw", |e| {
            Ok(e.buffer
                .draw(vertex_count, instance_count, first_vertex, first_instance)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdDrawIndexed(
    command_buffer: vk::CommandBuffer,
    index_count: u32,
    instance_count: u32,
    first_index: u32,
    vertex_offset: i32,
    first_instance: u32,
) {
    unsafe {
        record(command_buffer, "vkCmdDrawIndexed", |e| {
            Ok(e.buffer
                .draw_indexed(index_count, instance_count, first_index, vertex_offset, first_instance)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdDrawIndirect(
    command_buffer: vk::CommandBuffer,
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    draw_count: u32,
    stride: u32,
) {
    unsafe {
        record(command_buffer, "vkCmdDrawIndirect", |e| {
            let buffer = handle_store::get_buffer(buffer.as_raw())?;
            Ok(e.buffer.draw_indirect(buffer, offset, draw_count, stride)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdDrawIndexedIndirect(
    command_buffer: vk::CommandBuffer,
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    draw_count: u32,
    stride: u32,
) {
    unsafe {
        record(command_buffer, "vkCmdDrawIndexedIndirect", |e| {
            let buffer = handle_store::get_buffer(buffer.as_raw())?;
            Ok(e.buffer.draw_indexed_indirect(buffer, offset, draw_count, stride)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdDispatch(
    command_buffer: vk::CommandBuffer,
    group_count_x: u32,
    group_count_y: u32,
    group_count_z: u32,
) {
    unsafe {
        record(command_buffer, "vkCmdDispatch", |e| {
            Ok(e.buffer.dispatch(group_count_x, group_count_y, group_count_z)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdDispatchIndirect(
    command_buffer: vk::CommandBuffer,
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
) {
    unsafe {
        record(command_buffer, "vkCmdDispatchIndirect", |e| {
            let buffer = handle_store::get_buffer(buffer.as_raw())?;
            Ok(e.buffer.dispatch_indirect(buffer, offset)?)
        })
    }
}

// ── Transfers ───────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCmdCopyBuffer(
    command_buffer: vk::CommandBuffer,
    src_buffer: vk::Buffer,
    dst_buffer: vk::Buffer,
    region_count: u32,
    p_regions: *const vk::BufferCopy,
) {
    unsafe {
        record(command_buffer, "vkCmdCopyBuffer", |e| {
            let src = handle_store::get_buffer(src_buffer.as_raw())?;
            let dst = handle_store::get_buffer(dst_buffer.as_raw())?;
            Ok(e.buffer.copy_buffer(src, dst, ffi::slice(p_regions, region_count))?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdCopyImage(
    command_buffer: vk::CommandBuffer,
    src_image: vk::Image,
    _src_image_layout: vk::ImageLayout,
    dst_image: vk::Image,
    _dst_image_layout: vk::ImageLayout,
    region_count: u32,
    p_regions: *const vk::ImageCopy,
) {
    unsafe {
        record(command_buffer, "vkCmdCopyImage", |e| {
            let src = handle_store::get_image(src_image.as_raw())?;
            let dst = handle_store::get_image(dst_image.as_raw())?;
            Ok(e.buffer.copy_image(src, dst, ffi::slice(p_regions, region_count))?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdCopyBufferToImage(
    command_buffer: vk::CommandBuffer,
    src_buffer: vk::Buffer,
    dst_image: vk::Image,
    _dst_image_layout: vk::ImageLayout,
    region_count: u32,
    p_regions: *const vk::BufferImageCopy,
) {
    unsafe {
        record(command_buffer, "vkCmdCopyBufferToImage", |e| {
            let buffer = handle_store::get_buffer(src_buffer.as_raw())?;
            let image = handle_store::get_image(dst_image.as_raw())?;
            Ok(e.buffer
                .copy_buffer_to_image(buffer, image, ffi::slice(p_regions, region_count))?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdCopyImageToBuffer(
    command_buffer: vk::CommandBuffer,
    src_image: vk::Image,
    _src_image_layout: vk::ImageLayout,
    dst_buffer: vk::Buffer,
    region_count: u32,
    p_regions: *const vk::BufferImageCopy,
) {
    unsafe {
        record(command_buffer, "vkCmdCopyImageToBuffer", |e| {
            let image = handle_store::get_image(src_image.as_raw())?;
            let buffer = handle_store::get_buffer(dst_buffer.as_raw())?;
            Ok(e.buffer
                .copy_image_to_buffer(image, buffer, ffi::slice(p_regions, region_count))?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdBlitImage(
    command_buffer: vk::CommandBuffer,
    src_image: vk::Image,
    _src_image_layout: vk::ImageLayout,
    dst_image: vk::Image,
    _dst_image_layout: vk::ImageLayout,
    region_count: u32,
    p_regions: *const vk::ImageBlit,
    _filter: vk::Filter,
) {
    unsafe {
        record(command_buffer, "vkCmdBlitImage", |e| {
            let src = handle_store::get_image(src_image.as_raw())?;
            let dst = handle_store::get_image(dst_image.as_raw())?;
            Ok(e.buffer
                .blit_image(&e.device, src, dst, ffi::slice(p_regions, region_count))?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdResolveImage(
    command_buffer: vk::CommandBuffer,
    src_image: vk::Image,
    _src_image_layout: vk::ImageLayout,
    dst_image: vk::Image,
    _dst_image_layout: vk::ImageLayout,
    region_count: u32,
    p_regions: *const vk::ImageResolve,
) {
    unsafe {
        record(command_buffer, "vkCmdResolveImage", |e| {
            let src = handle_store::get_image(src_image.as_raw())?;
            let dst = handle_store::get_image(dst_image.as_raw())?;
            Ok(e.buffer.resolve_image(src, dst, ffi::slice(p_regions, region_count))?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdUpdateBuffer(
    command_buffer: vk::CommandBuffer,
    dst_buffer: vk::Buffer,
    dst_offset: vk::DeviceSize,
    data_size: vk::DeviceSize,
    p_data: *const std::ffi::c_void,
) {
    unsafe {
        record(command_buffer, "vkCmdUpdateBuffer", |e| {
            let buffer = handle_store::get_buffer(dst_buffer.as_raw())?;
            let size = u32::try_from(data_size).map_err(|_| vk::Result::ERROR_VALIDATION_FAILED_EXT)?;
            Ok(e.buffer
                .update_buffer(buffer, dst_offset, ffi::slice(p_data.cast::<u8>(), size))?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdFillBuffer(
    command_buffer: vk::CommandBuffer,
    dst_buffer: vk::Buffer,
    dst_offset: vk::DeviceSize,
    size: vk::DeviceSize,
    data: u32,
) {
    unsafe {
        record(command_buffer, "vkCmdFillBuffer", |e| {
            let buffer = handle_store::get_buffer(dst_buffer.as_raw())?;
            Ok(e.buffer.fill_buffer(buffer, dst_offset, size, data)?)
        })
    }
}

// ── Clears ──────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCmdClearColorImage(
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    _image_layout: vk::ImageLayout,
    p_color: *const vk::ClearColorValue,
    range_count: u32,
    p_ranges: *const vk::ImageSubresourceRange,
) {
    unsafe {
        record(command_buffer, "vkCmdClearColorImage", |e| {
            let image = handle_store::get_image(image.as_raw())?;
            let color = ffi::reference(p_color)?;
            Ok(e.buffer
                .clear_color_image(&e.device, &image, color, ffi::slice(p_ranges, range_count))?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdClearDepthStencilImage(
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    _image_layout: vk::ImageLayout,
    p_depth_stencil: *const vk::ClearDepthStencilValue,
    range_count: u32,
    p_ranges: *const vk::ImageSubresourceRange,
) {
    unsafe {
        record(command_buffer, "vkCmdClearDepthStencilImage", |e| {
            let image = handle_store::get_image(image.as_raw())?;
            let value = *ffi::reference(p_depth_stencil)?;
            Ok(e.buffer
                .clear_depth_stencil_image(&e.device, &image, value, ffi::slice(p_ranges, range_count))?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdClearAttachments(
    command_buffer: vk::CommandBuffer,
    attachment_count: u32,
    p_attachments: *const vk::ClearAttachment,
    rect_count: u32,
    p_rects: *const vk::ClearRect,
) {
    unsafe {
        record(command_buffer, "vkCmdClearAttachments", |e| {
            Ok(e.buffer.clear_attachments(
                ffi::slice(p_attachments, attachment_count),
                ffi::slice(p_rects, rect_count),
            )?)
        })
    }
}

// ── Render passes ───────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCmdBeginRenderPass(
    command_buffer: vk::CommandBuffer,
    p_render_pass_begin: *const vk::RenderPassBeginInfo<'_>,
    _contents: vk::SubpassContents,
) {
    unsafe {
        record(command_buffer, "vkCmdBeginRenderPass", |e| {
            let begin = ffi::reference(p_render_pass_begin)?;
            let render_pass = handle_store::get_render_pass(begin.render_pass.as_raw())?;
            let framebuffer = handle_store::get_framebuffer(begin.framebuffer.as_raw())?;
            let clear_values = ffi::slice(begin.p_clear_values, begin.clear_value_count);
            Ok(e.buffer
                .begin_render_pass(render_pass, framebuffer, begin.render_area, clear_values)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdNextSubpass(command_buffer: vk::CommandBuffer, _contents: vk::SubpassContents) {
    unsafe { record(command_buffer, "vkCmdNextSubpass", |e| Ok(e.buffer.next_subpass()?)) }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdEndRenderPass(command_buffer: vk::CommandBuffer) {
    unsafe { record(command_buffer, "vkCmdEndRenderPass", |e| Ok(e.buffer.end_render_pass()?)) }
}

// ── Synchronisation ─────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCmdPipelineBarrier(
    command_buffer: vk::CommandBuffer,
    src_stage_mask: vk::PipelineStageFlags,
    dst_stage_mask: vk::PipelineStageFlags,
    _dependency_flags: vk::DependencyFlags,
    _memory_barrier_count: u32,
    _p_memory_barriers: *const vk::MemoryBarrier<'_>,
    _buffer_memory_barrier_count: u32,
    _p_buffer_memory_barriers: *const vk::BufferMemoryBarrier<'_>,
    _image_memory_barrier_count: u32,
    _p_image_memory_barriers: *const vk::ImageMemoryBarrier<'_>,
) {
    // Layout transitions and access masks have no native counterpart.
    unsafe {
        record(command_buffer, "vkCmdPipelineBarrier", |e| {
            Ok(e.buffer.pipeline_barrier(src_stage_mask, dst_stage_mask)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdSetEvent(
    command_buffer: vk::CommandBuffer,
    event: vk::Event,
    _stage_mask: vk::PipelineStageFlags,
) {
    unsafe {
        record(command_buffer, "vkCmdSetEvent", |e| {
            let event = handle_store::get_event(event.as_raw())?;
            Ok(e.buffer.set_event(event)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdResetEvent(
    command_buffer: vk::CommandBuffer,
    event: vk::Event,
    _stage_mask: vk::PipelineStageFlags,
) {
    unsafe {
        record(command_buffer, "vkCmdResetEvent", |e| {
            let event = handle_store::get_event(event.as_raw())?;
            Ok(e.buffer.reset_event(event)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdWaitEvents(
    command_buffer: vk::CommandBuffer,
    event_count: u32,
    p_events: *const vk::Event,
    _src_stage_mask: vk::PipelineStageFlags,
    _dst_stage_mask: vk::PipelineStageFlags,
    _memory_barrier_count: u32,
    _p_memory_barriers: *const vk::MemoryBarrier<'_>,
    _buffer_memory_barrier_count: u32,
    _p_buffer_memory_barriers: *const vk::BufferMemoryBarrier<'_>,
    _image_memory_barrier_count: u32,
    _p_image_memory_barriers: *const vk::ImageMemoryBarrier<'_>,
) {
    unsafe {
        record(command_buffer, "vkCmdWaitEvents", |e| {
            let events = ffi::slice(p_events, event_count)
                .iter()
                .map(|ev| handle_store::get_event(ev.as_raw()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(e.buffer.wait_events(events)?)
        })
    }
}

// ── Queries ─────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCmdBeginQuery(
    command_buffer: vk::CommandBuffer,
    query_pool: vk::QueryPool,
    query: u32,
    _flags: vk::QueryControlFlags,
) {
    unsafe {
        record(command_buffer, "vkCmdBeginQuery", |e| {
            let pool = handle_store::get_query_pool(query_pool.as_raw())?;
            Ok(e.buffer.begin_query(pool, query)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdEndQuery(command_buffer: vk::CommandBuffer, query_pool: vk::QueryPool, query: u32) {
    unsafe {
        record(command_buffer, "vkCmdEndQuery", |e| {
            let pool = handle_store::get_query_pool(query_pool.as_raw())?;
            Ok(e.buffer.end_query(pool, query)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdResetQueryPool(
    command_buffer: vk::CommandBuffer,
    query_pool: vk::QueryPool,
    first_query: u32,
    query_count: u32,
) {
    unsafe {
        record(command_buffer, "vkCmdResetQueryPool", |e| {
            let pool = handle_store::get_query_pool(query_pool.as_raw())?;
            Ok(e.buffer.reset_query_pool(pool, first_query, query_count)?)
        })
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkCmdWriteTimestamp(
    command_buffer: vk::CommandBuffer,
    _pipeline_stage: vk::PipelineStageFlags,
    query_pool: vk::QueryPool,
    query: u32,
) {
    unsafe {
        record(command_buffer, "vkCmdWriteTimestamp", |e| {
            let pool = handle_store::get_query_pool(query_pool.as_raw())?;
            Ok(e.buffer.write_timestamp(pool, query)?)
        })
    }
}

// ── Secondary buffers ───────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCmdExecuteCommands(
    command_buffer: vk::CommandBuffer,
    command_buffer_count: u32,
    p_command_buffers: *const vk::CommandBuffer,
) {
    unsafe {
        record(command_buffer, "vkCmdExecuteCommands", |e| {
            let secondaries = ffi::slice(p_command_buffers, command_buffer_count)
                .iter()
                .map(|&h| handle_store::command_buffer(h).map(|s| s.buffer.clone()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(e.buffer.execute_commands(&secondaries)?)
        })
    }
}
