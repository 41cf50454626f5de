//! Fence, semaphore, event, query pool and queue submission functions for
//! the Vulkan ICD.

use std::ffi::c_void;

use ash::vk;
use ash::vk::Handle;
use tracing::{debug, trace};
use vkbridge_d3d11::{wait_for_fences, Event, Fence, QueryPool, Semaphore, SubmitBatch};

use crate::ffi::{self, guard, guard_result};
use crate::handle_store;
use crate::memory;

// ── Fences ──────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCreateFence(
    device: vk::Device,
    p_create_info: *const vk::FenceCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_fence: *mut vk::Fence,
) -> vk::Result {
    guard_result(|| {
        let dev = unsafe { handle_store::device(device) }?;
        let ci = unsafe { ffi::reference(p_create_info) }?;
        let signaled = ci.flags.contains(vk::FenceCreateFlags::SIGNALED);
        let fence = Fence::new(&dev.device, signaled).map_err(ffi::fail("vkCreateFence"))?;
        let id = handle_store::store_fence(fence);
        unsafe { ffi::write(p_fence, vk::Fence::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyFence(
    _device: vk::Device,
    fence: vk::Fence,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_fence(fence.as_raw());
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkWaitForFences(
    device: vk::Device,
    fence_count: u32,
    p_fences: *const vk::Fence,
    wait_all: vk::Bool32,
    timeout: u64,
) -> vk::Result {
    guard(vk::Result::ERROR_UNKNOWN, || {
        let dev = match unsafe { handle_store::device(device) } {
            Ok(dev) => dev,
            Err(code) => return code,
        };
        let fences = match unsafe { ffi::slice(p_fences, fence_count) }
            .iter()
            .map(|f| handle_store::get_fence(f.as_raw()))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(fences) => fences,
            Err(code) => return code,
        };
        wait_for_fences(&dev.device, &fences, wait_all == vk::TRUE, timeout)
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkResetFences(_device: vk::Device, fence_count: u32, p_fences: *const vk::Fence) -> vk::Result {
    guard_result(|| {
        for fence in unsafe { ffi::slice(p_fences, fence_count) } {
            handle_store::get_fence(fence.as_raw())?.reset();
        }
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetFenceStatus(device: vk::Device, fence: vk::Fence) -> vk::Result {
    guard(vk::Result::ERROR_UNKNOWN, || {
        let dev = match unsafe { handle_store::device(device) } {
            Ok(dev) => dev,
            Err(code) => return code,
        };
        match handle_store::get_fence(fence.as_raw()) {
            Ok(fence) => fence.status(&dev.device),
            Err(code) => code,
        }
    })
}

// ── Semaphores ──────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCreateSemaphore(
    _device: vk::Device,
    p_create_info: *const vk::SemaphoreCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_semaphore: *mut vk::Semaphore,
) -> vk::Result {
    guard_result(|| {
        unsafe { ffi::reference(p_create_info) }?;
        let id = handle_store::store_semaphore(Semaphore::new());
        unsafe { ffi::write(p_semaphore, vk::Semaphore::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroySemaphore(
    _device: vk::Device,
    semaphore: vk::Semaphore,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_semaphore(semaphore.as_raw());
    })
}

// ── Events ──────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCreateEvent(
    _device: vk::Device,
    p_create_info: *const vk::EventCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_event: *mut vk::Event,
) -> vk::Result {
    guard_result(|| {
        unsafe { ffi::reference(p_create_info) }?;
        let id = handle_store::store_event(Event::new());
        unsafe { ffi::write(p_event, vk::Event::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyEvent(
    _device: vk::Device,
    event: vk::Event,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_event(event.as_raw());
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetEventStatus(_device: vk::Device, event: vk::Event) -> vk::Result {
    guard(vk::Result::ERROR_UNKNOWN, || match handle_store::get_event(event.as_raw()) {
        Ok(event) => event.status(),
        Err(code) => code,
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkSetEvent(_device: vk::Device, event: vk::Event) -> vk::Result {
    guard_result(|| {
        handle_store::get_event(event.as_raw())?.set();
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkResetEvent(_device: vk::Device, event: vk::Event) -> vk::Result {
    guard_result(|| {
        handle_store::get_event(event.as_raw())?.reset();
        Ok(())
    })
}

// ── Query pools ─────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCreateQueryPool(
    device: vk::Device,
    p_create_info: *const vk::QueryPoolCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_query_pool: *mut vk::QueryPool,
) -> vk::Result {
    guard_result(|| {
        let dev = unsafe { handle_store::device(device) }?;
        let ci = unsafe { ffi::reference(p_create_info) }?;
        let pool =
            QueryPool::new(&dev.device, ci.query_type, ci.query_count).map_err(ffi::fail("vkCreateQueryPool"))?;
        let id = handle_store::store_query_pool(pool);
        unsafe { ffi::write(p_query_pool, vk::QueryPool::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyQueryPool(
    _device: vk::Device,
    query_pool: vk::QueryPool,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_query_pool(query_pool.as_raw());
    })
}

/// Lay `results` out the way `vkGetQueryPoolResults` does: one record of
/// `stride` bytes per query, a value followed by an optional availability
/// word, each 32 or 64 bits wide. Returns `NOT_READY` when any result was
/// unavailable.
pub fn write_query_results(results: &[Option<u64>], out: &mut [u8], stride: usize, flags: vk::QueryResultFlags) -> vk::Result {
    let wide = flags.contains(vk::QueryResultFlags::TYPE_64);
    let with_availability = flags.contains(vk::QueryResultFlags::WITH_AVAILABILITY);
    let partial = flags.contains(vk::QueryResultFlags::PARTIAL);
    let word = if wide { 8 } else { 4 };

    let mut put = |at: usize, value: u64| {
        let Some(dst) = out.get_mut(at..at + word) else {
            return;
        };
        if wide {
            dst.copy_from_slice(&value.to_ne_bytes());
        } else {
            dst.copy_from_slice(&(value as u32).to_ne_bytes());
        }
    };

    let mut status = vk::Result::SUCCESS;
    for (i, result) in results.iter().enumerate() {
        let base = i * stride;
        match result {
            Some(value) => put(base, *value),
            None => {
                status = vk::Result::NOT_READY;
                if partial {
                    put(base, 0);
                }
            }
        }
        if with_availability {
            put(base + word, u64::from(result.is_some()));
        }
    }
    status
}

#[no_mangle]
pub unsafe extern "C" fn vkGetQueryPoolResults(
    device: vk::Device,
    query_pool: vk::QueryPool,
    first_query: u32,
    query_count: u32,
    data_size: usize,
    p_data: *mut c_void,
    stride: vk::DeviceSize,
    flags: vk::QueryResultFlags,
) -> vk::Result {
    guard(vk::Result::ERROR_UNKNOWN, || {
        let dev = match unsafe { handle_store::device(device) } {
            Ok(dev) => dev,
            Err(code) => return code,
        };
        let pool = match handle_store::get_query_pool(query_pool.as_raw()) {
            Ok(pool) => pool,
            Err(code) => return code,
        };
        if p_data.is_null() {
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        }
        let wait = flags.contains(vk::QueryResultFlags::WAIT);
        let results = pool.results(&dev.device, first_query, query_count, wait);
        trace!(first_query, query_count, ?flags, "reading query results");
        // SAFETY: the application provides `data_size` writable bytes.
        let out = unsafe { std::slice::from_raw_parts_mut(p_data.cast::<u8>(), data_size) };
        write_query_results(&results, out, stride as usize, flags)
    })
}

// ── Queue ───────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkQueueSubmit(
    queue: vk::Queue,
    submit_count: u32,
    p_submits: *const vk::SubmitInfo<'_>,
    fence: vk::Fence,
) -> vk::Result {
    guard_result(|| {
        let dev = unsafe { handle_store::queue(queue) }?;
        let fence = handle_store::optional(fence, handle_store::get_fence)?;
        let batches = unsafe { ffi::slice(p_submits, submit_count) }
            .iter()
            .map(|submit| {
                // Wait and signal semaphores need no work on a single in-order queue.
                let command_buffers = unsafe { ffi::slice(submit.p_command_buffers, submit.command_buffer_count) }
                    .iter()
                    .map(|&h| unsafe { handle_store::command_buffer(h) }.map(|e| e.buffer.clone()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SubmitBatch { command_buffers })
            })
            .collect::<Result<Vec<_>, vk::Result>>()?;

        memory::flush_coherent(&dev);
        debug!(batches = batches.len(), fence = fence.is_some(), "submitting");
        dev.queue
            .submit(&batches, fence.as_deref())
            .map_err(ffi::fail("vkQueueSubmit"))
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkQueueWaitIdle(queue: vk::Queue) -> vk::Result {
    guard_result(|| {
        let dev = unsafe { handle_store::queue(queue) }?;
        dev.queue.wait_idle();
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_results_pack_values_and_availability() {
        let mut out = [0xffu8; 16];
        let flags = vk::QueryResultFlags::WITH_AVAILABILITY;
        let status = write_query_results(&[Some(7), None], &mut out, 8, flags);
        assert_eq!(status, vk::Result::NOT_READY);
        assert_eq!(u32::from_ne_bytes(out[0..4].try_into().unwrap()), 7);
        assert_eq!(u32::from_ne_bytes(out[4..8].try_into().unwrap()), 1);
        // Unavailable without PARTIAL: value untouched, availability zero.
        assert_eq!(&out[8..12], &[0xff; 4]);
        assert_eq!(u32::from_ne_bytes(out[12..16].try_into().unwrap()), 0);
    }

    #[test]
    fn wide_results_use_64_bit_words() {
        let mut out = [0u8; 8];
        let status = write_query_results(&[Some(1 << 40)], &mut out, 8, vk::QueryResultFlags::TYPE_64);
        assert_eq!(status, vk::Result::SUCCESS);
        assert_eq!(u64::from_ne_bytes(out), 1 << 40);
    }
}
