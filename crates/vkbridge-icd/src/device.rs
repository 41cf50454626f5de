//! Logical device and queue functions for the Vulkan ICD.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use tracing::{debug, info};
use vkbridge_d3d11::{Device, Queue};

use crate::backend::BackendRegistry;
use crate::dispatch::DispatchableHandle;
use crate::ffi::{self, guard, guard_result};
use crate::handle_store::{self, DeviceState};

#[no_mangle]
pub unsafe extern "C" fn vkCreateDevice(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_device: *mut vk::Device,
) -> vk::Result {
    guard_result(|| {
        let pd = unsafe { handle_store::physical_device(physical_device) }?;
        let ci = unsafe { ffi::reference(p_create_info) }?;

        for qci in unsafe { ffi::slice(ci.p_queue_create_infos, ci.queue_create_info_count) } {
            if qci.queue_family_index != 0 || qci.queue_count > 1 {
                return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
            }
        }
        let enabled_extensions =
            unsafe { ffi::read_string_array(ci.pp_enabled_extension_names, ci.enabled_extension_count) };
        if let Some(name) = enabled_extensions.first() {
            debug!("device extension {} is not supported", name);
            return Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        }

        let config = pd.config.clone();
        let factory = BackendRegistry::global()
            .select(&config.device.backend)
            .map_err(ffi::fail("vkCreateDevice"))?;
        let native = factory(config.device.feature_level).map_err(ffi::fail("vkCreateDevice"))?;
        let device = Device::new(native, config).map_err(ffi::fail("vkCreateDevice"))?;
        info!(feature_level = device.feature_level().as_str(), "created device");

        let id = handle_store::store_device(Arc::new(DeviceState {
            queue: Arc::new(Queue::new(device.clone())),
            device,
            queue_handle: Mutex::new(None),
            memories: Mutex::new(Vec::new()),
        }));
        unsafe { ffi::write(p_device, DispatchableHandle::wrap(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyDevice(device: vk::Device, _p_allocator: *const vk::AllocationCallbacks<'_>) {
    guard((), || {
        let Some(id) = (unsafe { DispatchableHandle::id_of(device) }) else {
            return;
        };
        if let Some(state) = handle_store::remove_device(id) {
            state.device.wait_idle();
            let queue = state.queue_handle.lock().take();
            if let Some(queue) = queue {
                if let Some(queue_id) = unsafe { DispatchableHandle::id_of(queue) } {
                    handle_store::remove_queue(queue_id);
                }
                unsafe { DispatchableHandle::release(queue) };
            }
        }
        unsafe { DispatchableHandle::release(device) };
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetDeviceQueue(
    device: vk::Device,
    queue_family_index: u32,
    queue_index: u32,
    p_queue: *mut vk::Queue,
) {
    guard((), || {
        if queue_family_index != 0 || queue_index != 0 {
            return;
        }
        let Ok(state) = (unsafe { handle_store::device(device) }) else {
            return;
        };
        let queue = *state.queue_handle.lock().get_or_insert_with(|| {
            let id = handle_store::store_queue(state.clone());
            DispatchableHandle::wrap(id)
        });
        let _ = unsafe { ffi::write(p_queue, queue) };
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDeviceWaitIdle(device: vk::Device) -> vk::Result {
    guard_result(|| {
        let state = unsafe { handle_store::device(device) }?;
        state.queue.wait_idle();
        Ok(())
    })
}
