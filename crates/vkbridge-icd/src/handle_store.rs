//! Handle registry for every Vulkan object the ICD hands out.
//!
//! Non-dispatchable handles are the raw ids of per-type [`HandleMap`]s.
//! Dispatchable handles point at a [`DispatchableHandle`] whose `local_id`
//! is the key into the matching map.

use std::sync::{Arc, OnceLock, Weak};

use ash::vk;
use ash::vk::Handle;
use parking_lot::Mutex;
use tracing::warn;
use vkbridge_core::{BridgeConfig, HandleMap};
use vkbridge_d3d11::{
    Buffer, BufferView, CommandBuffer, CommandPool, DescriptorPool, DescriptorSet, DescriptorSetLayout, Device,
    Event, Fence, Framebuffer, Image, ImageView, Pipeline, PipelineLayout, QueryPool, Queue, RenderPass, Sampler,
    Semaphore, ShaderModule,
};

use crate::dispatch::DispatchableHandle;
use crate::memory::DeviceMemory;

// ── Dispatchable object state ───────────────────────────────

pub struct InstanceState {
    pub config: BridgeConfig,
    pub physical_device: vk::PhysicalDevice,
}

pub struct PhysicalDeviceState {
    pub config: BridgeConfig,
}

pub struct DeviceState {
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
    /// Created on the first `vkGetDeviceQueue`.
    pub queue_handle: Mutex<Option<vk::Queue>>,
    /// Allocations flushed before each submission while mapped.
    pub memories: Mutex<Vec<Weak<DeviceMemory>>>,
}

pub struct CommandPoolState {
    pub pool: CommandPool,
    pub device: Arc<Device>,
    pub handles: Mutex<Vec<vk::CommandBuffer>>,
}

pub struct CommandBufferEntry {
    pub buffer: Arc<CommandBuffer>,
    pub device: Arc<Device>,
    /// First recording error since `vkBeginCommandBuffer`; reported by
    /// `vkEndCommandBuffer`.
    pub error: Mutex<Option<vk::Result>>,
}

impl CommandBufferEntry {
    pub fn record_error(&self, code: vk::Result) {
        self.error.lock().get_or_insert(code);
    }
}

pub struct DescriptorPoolState {
    pub pool: DescriptorPool,
    pub handles: Mutex<Vec<u64>>,
}

// ── Maps ────────────────────────────────────────────────────

macro_rules! handle_map {
    ($map_name:ident, $ty:ty, $kind:literal, $fn_store:ident, $fn_get:ident, $fn_remove:ident) => {
        static $map_name: OnceLock<HandleMap<$ty>> = OnceLock::new();

        pub fn $fn_store(value: $ty) -> u64 {
            $map_name.get_or_init(|| HandleMap::new($kind)).insert(value)
        }

        pub fn $fn_get(id: u64) -> Result<$ty, vk::Result> {
            $map_name
                .get_or_init(|| HandleMap::new($kind))
                .lookup(id)
                .map_err(|e| {
                    warn!("{}", e);
                    vk::Result::ERROR_UNKNOWN
                })
        }

        pub fn $fn_remove(id: u64) -> Option<$ty> {
            $map_name.get().and_then(|m| m.remove(id))
        }
    };
}

handle_map!(INSTANCE_MAP, Arc<InstanceState>, "VkInstance", store_instance, get_instance, remove_instance);
handle_map!(PHYS_DEV_MAP, Arc<PhysicalDeviceState>, "VkPhysicalDevice", store_physical_device, get_physical_device, remove_physical_device);
handle_map!(DEVICE_MAP, Arc<DeviceState>, "VkDevice", store_device, get_device, remove_device);
handle_map!(QUEUE_MAP, Arc<DeviceState>, "VkQueue", store_queue, get_queue, remove_queue);
handle_map!(CMD_BUF_MAP, Arc<CommandBufferEntry>, "VkCommandBuffer", store_cmd_buffer, get_cmd_buffer, remove_cmd_buffer);
handle_map!(MEMORY_MAP, Arc<DeviceMemory>, "VkDeviceMemory", store_memory, get_memory, remove_memory);
handle_map!(BUFFER_MAP, Arc<Buffer>, "VkBuffer", store_buffer, get_buffer, remove_buffer);
handle_map!(BUFFER_VIEW_MAP, Arc<BufferView>, "VkBufferView", store_buffer_view, get_buffer_view, remove_buffer_view);
handle_map!(IMAGE_MAP, Arc<Image>, "VkImage", store_image, get_image, remove_image);
handle_map!(IMAGE_VIEW_MAP, Arc<ImageView>, "VkImageView", store_image_view, get_image_view, remove_image_view);
handle_map!(SAMPLER_MAP, Arc<Sampler>, "VkSampler", store_sampler, get_sampler, remove_sampler);
handle_map!(SHADER_MAP, Arc<ShaderModule>, "VkShaderModule", store_shader_module, get_shader_module, remove_shader_module);
handle_map!(DESC_SET_LAYOUT_MAP, Arc<DescriptorSetLayout>, "VkDescriptorSetLayout", store_desc_set_layout, get_desc_set_layout, remove_desc_set_layout);
handle_map!(PIPELINE_LAYOUT_MAP, Arc<PipelineLayout>, "VkPipelineLayout", store_pipeline_layout, get_pipeline_layout, remove_pipeline_layout);
handle_map!(PIPELINE_CACHE_MAP, (), "VkPipelineCache", store_pipeline_cache, get_pipeline_cache, remove_pipeline_cache);
handle_map!(PIPELINE_MAP, Pipeline, "VkPipeline", store_pipeline, get_pipeline, remove_pipeline);
handle_map!(DESC_POOL_MAP, Arc<DescriptorPoolState>, "VkDescriptorPool", store_desc_pool, get_desc_pool, remove_desc_pool);
handle_map!(DESC_SET_MAP, Arc<DescriptorSet>, "VkDescriptorSet", store_desc_set, get_desc_set, remove_desc_set);
handle_map!(CMD_POOL_MAP, Arc<CommandPoolState>, "VkCommandPool", store_cmd_pool, get_cmd_pool, remove_cmd_pool);
handle_map!(RENDER_PASS_MAP, Arc<RenderPass>, "VkRenderPass", store_render_pass, get_render_pass, remove_render_pass);
handle_map!(FRAMEBUFFER_MAP, Arc<Framebuffer>, "VkFramebuffer", store_framebuffer, get_framebuffer, remove_framebuffer);
handle_map!(FENCE_MAP, Arc<Fence>, "VkFence", store_fence, get_fence, remove_fence);
handle_map!(SEMAPHORE_MAP, Arc<Semaphore>, "VkSemaphore", store_semaphore, get_semaphore, remove_semaphore);
handle_map!(EVENT_MAP, Arc<Event>, "VkEvent", store_event, get_event, remove_event);
handle_map!(QUERY_POOL_MAP, Arc<QueryPool>, "VkQueryPool", store_query_pool, get_query_pool, remove_query_pool);

// ── Dispatchable lookups ────────────────────────────────────

/// # Safety
/// `handle` must be null or a live handle returned by this ICD.
pub unsafe fn instance(handle: vk::Instance) -> Result<Arc<InstanceState>, vk::Result> {
    // SAFETY: guaranteed by the caller.
    let id = unsafe { DispatchableHandle::id_of(handle) }.ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
    get_instance(id)
}

/// # Safety
/// `handle` must be null or a live handle returned by this ICD.
pub unsafe fn physical_device(handle: vk::PhysicalDevice) -> Result<Arc<PhysicalDeviceState>, vk::Result> {
    // SAFETY: guaranteed by the caller.
    let id = unsafe { DispatchableHandle::id_of(handle) }.ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
    get_physical_device(id)
}

/// # Safety
/// `handle` must be null or a live handle returned by this ICD.
pub unsafe fn device(handle: vk::Device) -> Result<Arc<DeviceState>, vk::Result> {
    // SAFETY: guaranteed by the caller.
    let id = unsafe { DispatchableHandle::id_of(handle) }.ok_or(vk::Result::ERROR_DEVICE_LOST)?;
    get_device(id).map_err(|_| vk::Result::ERROR_DEVICE_LOST)
}

/// # Safety
/// `handle` must be null or a live handle returned by this ICD.
pub unsafe fn queue(handle: vk::Queue) -> Result<Arc<DeviceState>, vk::Result> {
    // SAFETY: guaranteed by the caller.
    let id = unsafe { DispatchableHandle::id_of(handle) }.ok_or(vk::Result::ERROR_DEVICE_LOST)?;
    get_queue(id).map_err(|_| vk::Result::ERROR_DEVICE_LOST)
}

/// # Safety
/// `handle` must be null or a live handle returned by this ICD.
pub unsafe fn command_buffer(handle: vk::CommandBuffer) -> Result<Arc<CommandBufferEntry>, vk::Result> {
    // SAFETY: guaranteed by the caller.
    let id = unsafe { DispatchableHandle::id_of(handle) }.ok_or(vk::Result::ERROR_UNKNOWN)?;
    get_cmd_buffer(id)
}

/// Look up an optional non-dispatchable handle: `VK_NULL_HANDLE` is `None`.
pub fn optional<H: Handle, T>(
    handle: H,
    get: impl FnOnce(u64) -> Result<T, vk::Result>,
) -> Result<Option<T>, vk::Result> {
    match handle.as_raw() {
        0 => Ok(None),
        id => get(id).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkbridge_core::FeatureLevel;
    use vkbridge_d3d11::native::null::NullDevice;

    #[test]
    fn stored_objects_round_trip_through_ids() {
        let device = Device::new(NullDevice::new(FeatureLevel::L11_0), BridgeConfig::default()).unwrap();
        let buffer = Buffer::new(&device, 64, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();
        let id = store_buffer(buffer.clone());
        assert!(Arc::ptr_eq(&get_buffer(id).unwrap(), &buffer));
        assert!(remove_buffer(id).is_some());
        assert_eq!(get_buffer(id).err(), Some(vk::Result::ERROR_UNKNOWN));
    }

    #[test]
    fn null_optional_handles_are_none() {
        let found = optional(vk::Sampler::null(), get_sampler).unwrap();
        assert!(found.is_none());
    }
}
