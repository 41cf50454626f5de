//! Integration test: ICD object lifecycle
//!
//! Calls the exported `vk*` entry points the way an application would,
//! on the headless null backend: instance and device creation, buffer
//! memory, command recording, submission with a fence, and the deferred
//! reporting of recording errors.
//!
//! Run with: cargo test --test icd_lifecycle_test -- --nocapture

use std::ptr;

use ash::vk;
use vkbridge_icd::{command, device, instance, memory, sync};

struct Setup {
    instance: vk::Instance,
    device: vk::Device,
    queue: vk::Queue,
}

fn setup() -> Setup {
    let mut inst = vk::Instance::null();
    let ci = vk::InstanceCreateInfo::default();
    let r = unsafe { instance::vkCreateInstance(&ci, ptr::null(), &mut inst) };
    assert_eq!(r, vk::Result::SUCCESS);

    let mut count = 0u32;
    unsafe { instance::vkEnumeratePhysicalDevices(inst, &mut count, ptr::null_mut()) };
    assert_eq!(count, 1);
    let mut physical = vk::PhysicalDevice::null();
    let r = unsafe { instance::vkEnumeratePhysicalDevices(inst, &mut count, &mut physical) };
    assert_eq!(r, vk::Result::SUCCESS);

    let priorities = [1.0f32];
    let queue_info = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(0)
        .queue_priorities(&priorities)];
    let dci = vk::DeviceCreateInfo::default().queue_create_infos(&queue_info);
    let mut dev = vk::Device::null();
    let r = unsafe { device::vkCreateDevice(physical, &dci, ptr::null(), &mut dev) };
    assert_eq!(r, vk::Result::SUCCESS);

    let mut queue = vk::Queue::null();
    unsafe { device::vkGetDeviceQueue(dev, 0, 0, &mut queue) };
    assert_ne!(queue, vk::Queue::null());

    Setup {
        instance: inst,
        device: dev,
        queue,
    }
}

fn teardown(s: Setup) {
    unsafe {
        assert_eq!(device::vkDeviceWaitIdle(s.device), vk::Result::SUCCESS);
        device::vkDestroyDevice(s.device, ptr::null());
        instance::vkDestroyInstance(s.instance, ptr::null());
    }
}

fn command_buffer(dev: vk::Device) -> (vk::CommandPool, vk::CommandBuffer) {
    let mut pool = vk::CommandPool::null();
    let ci = vk::CommandPoolCreateInfo::default().queue_family_index(0);
    assert_eq!(
        unsafe { command::vkCreateCommandPool(dev, &ci, ptr::null(), &mut pool) },
        vk::Result::SUCCESS
    );
    let ai = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let mut cb = vk::CommandBuffer::null();
    assert_eq!(
        unsafe { command::vkAllocateCommandBuffers(dev, &ai, &mut cb) },
        vk::Result::SUCCESS
    );
    (pool, cb)
}

fn bound_buffer(dev: vk::Device, size: u64) -> (vk::Buffer, vk::DeviceMemory) {
    let ci = vk::BufferCreateInfo::default()
        .size(size)
        .usage(vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::STORAGE_BUFFER);
    let mut buffer = vk::Buffer::null();
    assert_eq!(
        unsafe { memory::vkCreateBuffer(dev, &ci, ptr::null(), &mut buffer) },
        vk::Result::SUCCESS
    );
    let mut reqs = vk::MemoryRequirements::default();
    unsafe { memory::vkGetBufferMemoryRequirements(dev, buffer, &mut reqs) };
    assert!(reqs.size >= size);
    assert_eq!(reqs.memory_type_bits & 1, 1);

    let ai = vk::MemoryAllocateInfo::default()
        .allocation_size(reqs.size)
        .memory_type_index(0);
    let mut mem = vk::DeviceMemory::null();
    assert_eq!(
        unsafe { memory::vkAllocateMemory(dev, &ai, ptr::null(), &mut mem) },
        vk::Result::SUCCESS
    );
    assert_eq!(
        unsafe { memory::vkBindBufferMemory(dev, buffer, mem, 0) },
        vk::Result::SUCCESS
    );
    (buffer, mem)
}

#[test]
fn test_fill_submit_and_wait() {
    let s = setup();
    let (buffer, mem) = bound_buffer(s.device, 256);
    let (pool, cb) = command_buffer(s.device);

    unsafe {
        let bi = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        assert_eq!(command::vkBeginCommandBuffer(cb, &bi), vk::Result::SUCCESS);
        command::vkCmdFillBuffer(cb, buffer, 0, 256, 0xdead_beef);
        assert_eq!(command::vkEndCommandBuffer(cb), vk::Result::SUCCESS);

        let mut fence = vk::Fence::null();
        let fci = vk::FenceCreateInfo::default();
        assert_eq!(
            sync::vkCreateFence(s.device, &fci, ptr::null(), &mut fence),
            vk::Result::SUCCESS
        );
        assert_eq!(sync::vkGetFenceStatus(s.device, fence), vk::Result::NOT_READY);

        let cbs = [cb];
        let submit = vk::SubmitInfo::default().command_buffers(&cbs);
        assert_eq!(sync::vkQueueSubmit(s.queue, 1, &submit, fence), vk::Result::SUCCESS);
        assert_eq!(
            sync::vkWaitForFences(s.device, 1, &fence, vk::TRUE, u64::MAX),
            vk::Result::SUCCESS
        );
        assert_eq!(sync::vkGetFenceStatus(s.device, fence), vk::Result::SUCCESS);

        assert_eq!(sync::vkResetFences(s.device, 1, &fence), vk::Result::SUCCESS);
        assert_eq!(sync::vkGetFenceStatus(s.device, fence), vk::Result::NOT_READY);

        sync::vkDestroyFence(s.device, fence, ptr::null());
        command::vkDestroyCommandPool(s.device, pool, ptr::null());
        memory::vkDestroyBuffer(s.device, buffer, ptr::null());
        memory::vkFreeMemory(s.device, mem, ptr::null());
    }
    teardown(s);
}

#[test]
fn test_recording_error_reported_at_end() {
    let s = setup();
    let (pool, cb) = command_buffer(s.device);

    unsafe {
        let bi = vk::CommandBufferBeginInfo::default();
        assert_eq!(command::vkBeginCommandBuffer(cb, &bi), vk::Result::SUCCESS);
        // No render pass is active.
        command::vkCmdDraw(cb, 3, 1, 0, 0);
        assert_eq!(command::vkEndCommandBuffer(cb), vk::Result::ERROR_VALIDATION_FAILED_EXT);

        assert_eq!(
            command::vkResetCommandBuffer(cb, vk::CommandBufferResetFlags::empty()),
            vk::Result::SUCCESS
        );
        assert_eq!(command::vkBeginCommandBuffer(cb, &bi), vk::Result::SUCCESS);
        command::vkCmdPipelineBarrier(
            cb,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::DependencyFlags::empty(),
            0,
            ptr::null(),
            0,
            ptr::null(),
            0,
            ptr::null(),
        );
        assert_eq!(command::vkEndCommandBuffer(cb), vk::Result::SUCCESS);

        command::vkFreeCommandBuffers(s.device, pool, 1, &cb);
        command::vkDestroyCommandPool(s.device, pool, ptr::null());
    }
    teardown(s);
}

#[test]
fn test_mapped_memory_round_trip() {
    let s = setup();
    let (buffer, mem) = bound_buffer(s.device, 64);

    unsafe {
        let mut data: *mut std::ffi::c_void = ptr::null_mut();
        assert_eq!(
            memory::vkMapMemory(s.device, mem, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty(), &mut data),
            vk::Result::SUCCESS
        );
        assert!(!data.is_null());
        let bytes = std::slice::from_raw_parts_mut(data.cast::<u8>(), 64);
        bytes.fill(7);

        // A second map of the same allocation is rejected.
        let mut again: *mut std::ffi::c_void = ptr::null_mut();
        assert_eq!(
            memory::vkMapMemory(s.device, mem, 0, 16, vk::MemoryMapFlags::empty(), &mut again),
            vk::Result::ERROR_MEMORY_MAP_FAILED
        );
        memory::vkUnmapMemory(s.device, mem);

        memory::vkDestroyBuffer(s.device, buffer, ptr::null());
        memory::vkFreeMemory(s.device, mem, ptr::null());
    }
    teardown(s);
}

#[test]
fn test_unknown_queue_family_is_rejected() {
    let s = setup();
    let mut pool = vk::CommandPool::null();
    let ci = vk::CommandPoolCreateInfo::default().queue_family_index(3);
    let r = unsafe { command::vkCreateCommandPool(s.device, &ci, ptr::null(), &mut pool) };
    assert_eq!(r, vk::Result::ERROR_INITIALIZATION_FAILED);
    teardown(s);
}
