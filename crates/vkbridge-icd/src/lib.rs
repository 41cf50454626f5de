//! vkbridge Vulkan ICD (Installable Client Driver)
//!
//! This cdylib exposes a Vulkan 1.0 subset to the Vulkan loader and runs
//! it on a Direct3D 11-shaped native backend. Recording, descriptor
//! translation and replay live in `vkbridge-d3d11`; this crate owns the C
//! ABI: dispatchable handles, handle lookup, pointer marshalling and the
//! panic guard.

use std::ffi::{c_char, CStr};

use ash::vk;

pub mod backend;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod dispatch;
pub mod ffi;
pub mod graphics_pipeline;
pub mod handle_store;
pub mod image;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod renderpass;
pub mod sync;

/// Highest loader/ICD interface version this driver implements.
pub const LOADER_INTERFACE_VERSION: u32 = 5;

// ── ICD negotiation ─────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vk_icdNegotiateLoaderICDInterfaceVersion(p_supported_version: *mut u32) -> vk::Result {
    ffi::guard(vk::Result::ERROR_UNKNOWN, || {
        // SAFETY: the loader passes a valid pointer or null.
        let Some(version) = (unsafe { p_supported_version.as_mut() }) else {
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        };
        *version = (*version).min(LOADER_INTERFACE_VERSION);
        vk::Result::SUCCESS
    })
}

// ── Proc-address tables ─────────────────────────────────────

macro_rules! proc_table {
    ($lookup:ident: $($module:ident::$func:ident),* $(,)?) => {
        fn $lookup(name: &str) -> Option<*const ()> {
            match name {
                $(stringify!($func) => Some($module::$func as *const ()),)*
                _ => None,
            }
        }
    };
}

proc_table!(global_proc:
    instance::vkCreateInstance,
    instance::vkEnumerateInstanceExtensionProperties,
    instance::vkEnumerateInstanceLayerProperties,
);

proc_table!(instance_proc:
    instance::vkDestroyInstance,
    instance::vkEnumeratePhysicalDevices,
);

proc_table!(physical_device_proc:
    instance::vkEnumerateDeviceExtensionProperties,
    instance::vkEnumerateDeviceLayerProperties,
    device::vkCreateDevice,
    physical_device::vkGetPhysicalDeviceProperties,
    physical_device::vkGetPhysicalDeviceProperties2,
    physical_device::vkGetPhysicalDeviceFeatures,
    physical_device::vkGetPhysicalDeviceFeatures2,
    physical_device::vkGetPhysicalDeviceMemoryProperties,
    physical_device::vkGetPhysicalDeviceMemoryProperties2,
    physical_device::vkGetPhysicalDeviceQueueFamilyProperties,
    physical_device::vkGetPhysicalDeviceQueueFamilyProperties2,
    physical_device::vkGetPhysicalDeviceFormatProperties,
    physical_device::vkGetPhysicalDeviceFormatProperties2,
    physical_device::vkGetPhysicalDeviceImageFormatProperties,
    physical_device::vkGetPhysicalDeviceSparseImageFormatProperties,
);

proc_table!(device_proc:
    device::vkDestroyDevice,
    device::vkGetDeviceQueue,
    device::vkDeviceWaitIdle,
    // Memory and buffers
    memory::vkAllocateMemory,
    memory::vkFreeMemory,
    memory::vkMapMemory,
    memory::vkUnmapMemory,
    memory::vkFlushMappedMemoryRanges,
    memory::vkInvalidateMappedMemoryRanges,
    memory::vkCreateBuffer,
    memory::vkDestroyBuffer,
    memory::vkGetBufferMemoryRequirements,
    memory::vkGetBufferMemoryRequirements2,
    memory::vkBindBufferMemory,
    memory::vkBindBufferMemory2,
    memory::vkGetImageMemoryRequirements,
    memory::vkGetImageMemoryRequirements2,
    memory::vkBindImageMemory,
    memory::vkBindImageMemory2,
    // Images, views and samplers
    image::vkCreateImage,
    image::vkDestroyImage,
    image::vkGetImageSubresourceLayout,
    image::vkCreateImageView,
    image::vkDestroyImageView,
    image::vkCreateBufferView,
    image::vkDestroyBufferView,
    image::vkCreateSampler,
    image::vkDestroySampler,
    // Shaders and pipelines
    pipeline::vkCreateShaderModule,
    pipeline::vkDestroyShaderModule,
    pipeline::vkCreateDescriptorSetLayout,
    pipeline::vkDestroyDescriptorSetLayout,
    pipeline::vkCreatePipelineLayout,
    pipeline::vkDestroyPipelineLayout,
    pipeline::vkCreatePipelineCache,
    pipeline::vkDestroyPipelineCache,
    pipeline::vkGetPipelineCacheData,
    pipeline::vkCreateComputePipelines,
    pipeline::vkDestroyPipeline,
    graphics_pipeline::vkCreateGraphicsPipelines,
    // Render passes
    renderpass::vkCreateRenderPass,
    renderpass::vkDestroyRenderPass,
    renderpass::vkGetRenderAreaGranularity,
    renderpass::vkCreateFramebuffer,
    renderpass::vkDestroyFramebuffer,
    // Descriptors
    descriptor::vkCreateDescriptorPool,
    descriptor::vkDestroyDescriptorPool,
    descriptor::vkResetDescriptorPool,
    descriptor::vkAllocateDescriptorSets,
    descriptor::vkFreeDescriptorSets,
    descriptor::vkUpdateDescriptorSets,
    // Command pools and buffers
    command::vkCreateCommandPool,
    command::vkDestroyCommandPool,
    command::vkResetCommandPool,
    command::vkAllocateCommandBuffers,
    command::vkFreeCommandBuffers,
    command::vkBeginCommandBuffer,
    command::vkEndCommandBuffer,
    command::vkResetCommandBuffer,
    command::vkCmdBindPipeline,
    command::vkCmdBindDescriptorSets,
    command::vkCmdPushConstants,
    command::vkCmdBindVertexBuffers,
    command::vkCmdBindIndexBuffer,
    command::vkCmdSetViewport,
    command::vkCmdSetScissor,
    command::vkCmdSetBlendConstants,
    command::vkCmdSetStencilReference,
    command::vkCmdDraw,
    command::vkCmdDrawIndexed,
    command::vkCmdDrawIndirect,
    command::vkCmdDrawIndexedIndirect,
    command::vkCmdDispatch,
    command::vkCmdDispatchIndirect,
    command::vkCmdCopyBuffer,
    command::vkCmdCopyImage,
    command::vkCmdCopyBufferToImage,
    command::vkCmdCopyImageToBuffer,
    command::vkCmdBlitImage,
    command::vkCmdResolveImage,
    command::vkCmdUpdateBuffer,
    command::vkCmdFillBuffer,
    command::vkCmdClearColorImage,
    command::vkCmdClearDepthStencilImage,
    command::vkCmdClearAttachments,
    command::vkCmdBeginRenderPass,
    command::vkCmdNextSubpass,
    command::vkCmdEndRenderPass,
    command::vkCmdPipelineBarrier,
    command::vkCmdSetEvent,
    command::vkCmdResetEvent,
    command::vkCmdWaitEvents,
    command::vkCmdBeginQuery,
    command::vkCmdEndQuery,
    command::vkCmdResetQueryPool,
    command::vkCmdWriteTimestamp,
    command::vkCmdExecuteCommands,
    // Synchronisation, queries and the queue
    sync::vkCreateFence,
    sync::vkDestroyFence,
    sync::vkWaitForFences,
    sync::vkResetFences,
    sync::vkGetFenceStatus,
    sync::vkCreateSemaphore,
    sync::vkDestroySemaphore,
    sync::vkCreateEvent,
    sync::vkDestroyEvent,
    sync::vkGetEventStatus,
    sync::vkSetEvent,
    sync::vkResetEvent,
    sync::vkCreateQueryPool,
    sync::vkDestroyQueryPool,
    sync::vkGetQueryPoolResults,
    sync::vkQueueSubmit,
    sync::vkQueueWaitIdle,
);

/// Resolve `name` against the instance-level view: every function this
/// driver exports.
fn lookup_instance(name: &str) -> Option<*const ()> {
    match name {
        "vk_icdNegotiateLoaderICDInterfaceVersion" => Some(vk_icdNegotiateLoaderICDInterfaceVersion as *const ()),
        "vk_icdGetInstanceProcAddr" => Some(vk_icdGetInstanceProcAddr as *const ()),
        "vk_icdGetPhysicalDeviceProcAddr" => Some(vk_icdGetPhysicalDeviceProcAddr as *const ()),
        "vkGetInstanceProcAddr" => Some(vkGetInstanceProcAddr as *const ()),
        "vkGetDeviceProcAddr" => Some(vkGetDeviceProcAddr as *const ()),
        _ => global_proc(name)
            .or_else(|| instance_proc(name))
            .or_else(|| physical_device_proc(name))
            .or_else(|| device_proc(name)),
    }
}

fn lookup_device(name: &str) -> Option<*const ()> {
    match name {
        "vkGetDeviceProcAddr" => Some(vkGetDeviceProcAddr as *const ()),
        _ => device_proc(name),
    }
}

/// # Safety
/// `p_name` must be null or a NUL-terminated string.
unsafe fn resolve(p_name: *const c_char, lookup: fn(&str) -> Option<*const ()>) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated per the caller.
    let name = unsafe { CStr::from_ptr(p_name) }.to_str().ok()?;
    match lookup(name) {
        // SAFETY: every table entry is an `extern "C"` function; the loader
        // casts it back to the matching signature before calling.
        Some(f) => Some(unsafe { std::mem::transmute::<*const (), unsafe extern "system" fn()>(f) }),
        None => {
            tracing::trace!("{} is not exported", name);
            None
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn vk_icdGetInstanceProcAddr(
    _instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    ffi::guard(None, || unsafe { resolve(p_name, lookup_instance) })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetInstanceProcAddr(instance: vk::Instance, p_name: *const c_char) -> vk::PFN_vkVoidFunction {
    unsafe { vk_icdGetInstanceProcAddr(instance, p_name) }
}

#[no_mangle]
pub unsafe extern "C" fn vk_icdGetPhysicalDeviceProcAddr(
    _instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    ffi::guard(None, || unsafe { resolve(p_name, physical_device_proc) })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetDeviceProcAddr(_device: vk::Device, p_name: *const c_char) -> vk::PFN_vkVoidFunction {
    ffi::guard(None, || unsafe { resolve(p_name, lookup_device) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_clamps_to_supported_version() {
        let mut version = 7u32;
        let r = unsafe { vk_icdNegotiateLoaderICDInterfaceVersion(&mut version) };
        assert_eq!(r, vk::Result::SUCCESS);
        assert_eq!(version, LOADER_INTERFACE_VERSION);

        version = 3;
        unsafe { vk_icdNegotiateLoaderICDInterfaceVersion(&mut version) };
        assert_eq!(version, 3);
    }

    #[test]
    fn device_table_excludes_instance_functions() {
        assert!(unsafe { vkGetDeviceProcAddr(vk::Device::null(), c"vkCmdDraw".as_ptr()) }.is_some());
        assert!(unsafe { vkGetDeviceProcAddr(vk::Device::null(), c"vkCreateInstance".as_ptr()) }.is_none());
        assert!(unsafe { vk_icdGetInstanceProcAddr(vk::Instance::null(), c"vkCreateInstance".as_ptr()) }.is_some());
        assert!(unsafe { vk_icdGetInstanceProcAddr(vk::Instance::null(), c"vkQueueSubmit".as_ptr()) }.is_some());
    }

    #[test]
    fn unknown_names_resolve_to_none() {
        assert!(unsafe { vk_icdGetInstanceProcAddr(vk::Instance::null(), c"vkCreateSwapchainKHR".as_ptr()) }.is_none());
        assert!(unsafe { vk_icdGetInstanceProcAddr(vk::Instance::null(), std::ptr::null()) }.is_none());
    }
}
