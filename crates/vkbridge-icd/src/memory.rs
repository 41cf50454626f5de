//! Device memory and buffer functions for the Vulkan ICD.
//!
//! Native buffers own their storage, so a `VkDeviceMemory` is a host shadow
//! allocation. Buffers bound to it receive the shadow's bytes with
//! `UpdateSubresource` when the application unmaps or flushes, and before
//! every queue submission while the memory stays mapped (the single memory
//! type is host-coherent).

use std::os::raw::c_void;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use parking_lot::Mutex;
use tracing::{debug, trace};
use vkbridge_d3d11::native::{NativeBox, NativeResource};
use vkbridge_d3d11::{Buffer, Device};

use crate::ffi::{self, guard, guard_result};
use crate::handle_store;

/// Required alignment of every buffer and image placed in device memory.
pub const MEMORY_ALIGNMENT: u64 = 256;

pub struct DeviceMemory {
    device: Arc<Device>,
    data: Mutex<Box<[u8]>>,
    buffers: Mutex<Vec<(Arc<Buffer>, u64)>>,
    /// `(offset, size)` of the live mapping.
    mapped: Mutex<Option<(u64, u64)>>,
}

impl DeviceMemory {
    pub fn new(device: Arc<Device>, size: u64) -> Result<Arc<Self>, vk::Result> {
        let len = usize::try_from(size).map_err(|_| vk::Result::ERROR_OUT_OF_HOST_MEMORY)?;
        Ok(Arc::new(Self {
            device,
            data: Mutex::new(vec![0u8; len].into_boxed_slice()),
            buffers: Mutex::new(Vec::new()),
            mapped: Mutex::new(None),
        }))
    }

    pub fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }

    pub fn bind_buffer(&self, buffer: Arc<Buffer>, offset: u64) -> Result<(), vk::Result> {
        if offset % MEMORY_ALIGNMENT != 0 || offset.saturating_add(buffer.size()) > self.size() {
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }
        self.buffers.lock().push((buffer, offset));
        Ok(())
    }

    /// Pointer to byte `offset` of the shadow allocation.
    pub fn map(&self, offset: u64, size: u64) -> Result<*mut u8, vk::Result> {
        let mut mapped = self.mapped.lock();
        if mapped.is_some() {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        let total = self.size();
        if offset >= total && total != 0 {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        let size = if size == vk::WHOLE_SIZE { total - offset } else { size };
        *mapped = Some((offset, size));
        // The boxed slice is never reallocated, so the pointer stays valid
        // until the memory is freed.
        Ok(self.data.lock().as_mut_ptr().wrapping_add(offset as usize))
    }

    pub fn unmap(&self) {
        if let Some((offset, size)) = self.mapped.lock().take() {
            self.flush(offset, size);
        }
    }

    pub fn mapped_range(&self) -> Option<(u64, u64)> {
        *self.mapped.lock()
    }

    /// Upload the bytes in `[offset, offset + size)` to every bound buffer
    /// that overlaps the range.
    pub fn flush(&self, offset: u64, size: u64) {
        let data = self.data.lock();
        let end = if size == vk::WHOLE_SIZE {
            data.len() as u64
        } else {
            offset.saturating_add(size).min(data.len() as u64)
        };
        let buffers = self.buffers.lock();
        if buffers.is_empty() {
            return;
        }
        let mut ctx = self.device.lock_context();
        for (buffer, base) in buffers.iter() {
            let start = offset.max(*base);
            let stop = end.min(base + buffer.size());
            if start >= stop {
                continue;
            }
            trace!(start, stop, "uploading mapped range");
            ctx.update_subresource(
                NativeResource::Buffer(buffer.get_buffer()),
                0,
                Some(NativeBox {
                    left: (start - base) as u32,
                    right: (stop - base) as u32,
                    top: 0,
                    bottom: 1,
                    front: 0,
                    back: 1,
                }),
                &data[start as usize..stop as usize],
                0,
                0,
            );
        }
    }
}

fn requirements(size: u64) -> vk::MemoryRequirements {
    vk::MemoryRequirements {
        size: size.div_ceil(MEMORY_ALIGNMENT) * MEMORY_ALIGNMENT,
        alignment: MEMORY_ALIGNMENT,
        memory_type_bits: 1,
    }
}

// ── vkAllocateMemory ────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkAllocateMemory(
    device: vk::Device,
    p_allocate_info: *const vk::MemoryAllocateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_memory: *mut vk::DeviceMemory,
) -> vk::Result {
    guard_result(|| {
        let dev = unsafe { handle_store::device(device) }?;
        let ai = unsafe { ffi::reference(p_allocate_info) }?;
        if ai.memory_type_index != 0 {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let memory = DeviceMemory::new(dev.device.clone(), ai.allocation_size)?;
        dev.memories.lock().push(Arc::downgrade(&memory));
        let id = handle_store::store_memory(memory);
        debug!(id, size = ai.allocation_size, "allocated device memory");
        unsafe { ffi::write(p_memory, vk::DeviceMemory::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkFreeMemory(
    _device: vk::Device,
    memory: vk::DeviceMemory,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_memory(memory.as_raw());
    })
}

// ── Mapping ─────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkMapMemory(
    _device: vk::Device,
    memory: vk::DeviceMemory,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    _flags: vk::MemoryMapFlags,
    pp_data: *mut *mut c_void,
) -> vk::Result {
    guard_result(|| {
        let memory = handle_store::get_memory(memory.as_raw()).map_err(|_| vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let ptr = memory.map(offset, size)?;
        unsafe { ffi::write(pp_data, ptr as *mut c_void) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkUnmapMemory(_device: vk::Device, memory: vk::DeviceMemory) {
    guard((), || {
        if let Ok(memory) = handle_store::get_memory(memory.as_raw()) {
            memory.unmap();
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkFlushMappedMemoryRanges(
    _device: vk::Device,
    memory_range_count: u32,
    p_memory_ranges: *const vk::MappedMemoryRange<'_>,
) -> vk::Result {
    guard_result(|| {
        for range in unsafe { ffi::slice(p_memory_ranges, memory_range_count) } {
            let memory = handle_store::get_memory(range.memory.as_raw())?;
            memory.flush(range.offset, range.size);
        }
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkInvalidateMappedMemoryRanges(
    _device: vk::Device,
    memory_range_count: u32,
    _p_memory_ranges: *const vk::MappedMemoryRange<'_>,
) -> vk::Result {
    // Native buffers cannot be read back into the shadow; device writes stay
    // invisible to the host.
    debug!(memory_range_count, "vkInvalidateMappedMemoryRanges is a no-op");
    vk::Result::SUCCESS
}

/// Flush every mapped allocation of `dev` so coherent writes reach the
/// native buffers before a submission.
pub fn flush_coherent(dev: &handle_store::DeviceState) {
    let mut memories = dev.memories.lock();
    memories.retain(|m| m.strong_count() > 0);
    for memory in memories.iter().filter_map(|m| m.upgrade()) {
        if let Some((offset, size)) = memory.mapped_range() {
            memory.flush(offset, size);
        }
    }
}

// ── Buffers ─────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCreateBuffer(
    device: vk::Device,
    p_create_info: *const vk::BufferCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_buffer: *mut vk::Buffer,
) -> vk::Result {
    guard_result(|| {
        let dev = unsafe { handle_store::device(device) }?;
        let ci = unsafe { ffi::reference(p_create_info) }?;
        let buffer = Buffer::new(&dev.device, ci.size, ci.usage).map_err(ffi::fail("vkCreateBuffer"))?;
        let id = handle_store::store_buffer(buffer);
        unsafe { ffi::write(p_buffer, vk::Buffer::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyBuffer(
    _device: vk::Device,
    buffer: vk::Buffer,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_buffer(buffer.as_raw());
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetBufferMemoryRequirements(
    _device: vk::Device,
    buffer: vk::Buffer,
    p_memory_requirements: *mut vk::MemoryRequirements,
) {
    guard((), || {
        if let Ok(buffer) = handle_store::get_buffer(buffer.as_raw()) {
            let _ = unsafe { ffi::write(p_memory_requirements, requirements(buffer.size())) };
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetBufferMemoryRequirements2(
    device: vk::Device,
    p_info: *const vk::BufferMemoryRequirementsInfo2<'_>,
    p_memory_requirements: *mut vk::MemoryRequirements2<'_>,
) {
    if p_info.is_null() || p_memory_requirements.is_null() {
        return;
    }
    unsafe {
        vkGetBufferMemoryRequirements(
            device,
            (*p_info).buffer,
            &mut (*p_memory_requirements).memory_requirements,
        )
    };
}

#[no_mangle]
pub unsafe extern "C" fn vkBindBufferMemory(
    _device: vk::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    memory_offset: vk::DeviceSize,
) -> vk::Result {
    guard_result(|| {
        let buffer = handle_store::get_buffer(buffer.as_raw())?;
        let memory = handle_store::get_memory(memory.as_raw())?;
        memory.bind_buffer(buffer, memory_offset)
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkBindBufferMemory2(
    device: vk::Device,
    bind_info_count: u32,
    p_bind_infos: *const vk::BindBufferMemoryInfo<'_>,
) -> vk::Result {
    for info in unsafe { ffi::slice(p_bind_infos, bind_info_count) } {
        let result = unsafe { vkBindBufferMemory(device, info.buffer, info.memory, info.memory_offset) };
        if result != vk::Result::SUCCESS {
            return result;
        }
    }
    vk::Result::SUCCESS
}

// ── Images ──────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkGetImageMemoryRequirements(
    _device: vk::Device,
    image: vk::Image,
    p_memory_requirements: *mut vk::MemoryRequirements,
) {
    guard((), || {
        if let Ok(image) = handle_store::get_image(image.as_raw()) {
            let desc = image.desc();
            let mut size = 0u64;
            for level in 0..image.mip_levels() {
                let extent = image.level_extent(level);
                let rows = u64::from(extent.height.div_ceil(vkbridge_d3d11::format::block_extent(desc.format).1));
                let pitch = u64::from(vkbridge_d3d11::format::row_pitch(desc.format, extent.width));
                size += pitch * rows * u64::from(extent.depth);
            }
            size *= u64::from(image.array_layers()) * u64::from(desc.samples.as_raw().max(1));
            let _ = unsafe { ffi::write(p_memory_requirements, requirements(size.max(1))) };
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetImageMemoryRequirements2(
    device: vk::Device,
    p_info: *const vk::ImageMemoryRequirementsInfo2<'_>,
    p_memory_requirements: *mut vk::MemoryRequirements2<'_>,
) {
    if p_info.is_null() || p_memory_requirements.is_null() {
        return;
    }
    unsafe {
        vkGetImageMemoryRequirements(
            device,
            (*p_info).image,
            &mut (*p_memory_requirements).memory_requirements,
        )
    };
}

#[no_mangle]
pub unsafe extern "C" fn vkBindImageMemory(
    _device: vk::Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    memory_offset: vk::DeviceSize,
) -> vk::Result {
    guard_result(|| {
        handle_store::get_image(image.as_raw())?;
        handle_store::get_memory(memory.as_raw())?;
        // Textures own their storage; host writes through the memory do not
        // reach them.
        debug!(memory_offset, "image bound to device memory");
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkBindImageMemory2(
    device: vk::Device,
    bind_info_count: u32,
    p_bind_infos: *const vk::BindImageMemoryInfo<'_>,
) -> vk::Result {
    for info in unsafe { ffi::slice(p_bind_infos, bind_info_count) } {
        let result = unsafe { vkBindImageMemory(device, info.image, info.memory, info.memory_offset) };
        if result != vk::Result::SUCCESS {
            return result;
        }
    }
    vk::Result::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkbridge_core::{BridgeConfig, FeatureLevel};
    use vkbridge_d3d11::native::null::NullDevice;

    #[test]
    fn unmap_uploads_bound_buffer_range() {
        let null = NullDevice::new(FeatureLevel::L11_0);
        let device = Device::new(null.clone(), BridgeConfig::default()).unwrap();
        let buffer = Buffer::new(&device, 16, vk::BufferUsageFlags::VERTEX_BUFFER).unwrap();
        let memory = DeviceMemory::new(device, 512).unwrap();
        memory.bind_buffer(buffer.clone(), 256).unwrap();

        let ptr = memory.map(256, vk::WHOLE_SIZE).unwrap();
        unsafe { std::ptr::copy_nonoverlapping([7u8; 4].as_ptr(), ptr.add(4), 4) };
        memory.unmap();

        let contents = null.buffer_contents(buffer.get_buffer()).unwrap();
        assert_eq!(&contents[..8], &[0, 0, 0, 0, 7, 7, 7, 7]);
        assert!(memory.mapped_range().is_none());
    }

    #[test]
    fn misaligned_bind_is_rejected() {
        let device = Device::new(NullDevice::new(FeatureLevel::L11_0), BridgeConfig::default()).unwrap();
        let buffer = Buffer::new(&device, 16, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();
        let memory = DeviceMemory::new(device, 512).unwrap();
        assert!(memory.bind_buffer(buffer.clone(), 8).is_err());
        assert!(memory.bind_buffer(buffer, 512).is_err());
    }

    #[test]
    fn double_map_fails() {
        let device = Device::new(NullDevice::new(FeatureLevel::L11_0), BridgeConfig::default()).unwrap();
        let memory = DeviceMemory::new(device, 64).unwrap();
        memory.map(0, 64).unwrap();
        assert_eq!(memory.map(0, 64).err(), Some(vk::Result::ERROR_MEMORY_MAP_FAILED));
    }
}
