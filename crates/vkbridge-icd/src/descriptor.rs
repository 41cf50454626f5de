//! Descriptor pool and descriptor set functions for the Vulkan ICD.

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use parking_lot::Mutex;
use tracing::{debug, error};
use vkbridge_d3d11::descriptor::{DescriptorCopy, DescriptorResource, DescriptorWrite};
use vkbridge_d3d11::DescriptorPool;

use crate::ffi::{self, guard, guard_result};
use crate::handle_store::{self, DescriptorPoolState};

#[no_mangle]
pub unsafe extern "C" fn vkCreateDescriptorPool(
    _device: vk::Device,
    p_create_info: *const vk::DescriptorPoolCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_descriptor_pool: *mut vk::DescriptorPool,
) -> vk::Result {
    guard_result(|| {
        let ci = unsafe { ffi::reference(p_create_info) }?;
        debug!(max_sets = ci.max_sets, "creating descriptor pool");
        let id = handle_store::store_desc_pool(Arc::new(DescriptorPoolState {
            pool: DescriptorPool::new(),
            handles: Mutex::new(Vec::new()),
        }));
        unsafe { ffi::write(p_descriptor_pool, vk::DescriptorPool::from_raw(id)) }
    })
}

fn retire_all(state: &DescriptorPoolState) {
    state.pool.reset();
    for id in state.handles.lock().drain(..) {
        handle_store::remove_desc_set(id);
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyDescriptorPool(
    _device: vk::Device,
    descriptor_pool: vk::DescriptorPool,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        if let Some(state) = handle_store::remove_desc_pool(descriptor_pool.as_raw()) {
            retire_all(&state);
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkResetDescriptorPool(
    _device: vk::Device,
    descriptor_pool: vk::DescriptorPool,
    _flags: vk::DescriptorPoolResetFlags,
) -> vk::Result {
    guard_result(|| {
        let state = handle_store::get_desc_pool(descriptor_pool.as_raw())?;
        retire_all(&state);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkAllocateDescriptorSets(
    _device: vk::Device,
    p_allocate_info: *const vk::DescriptorSetAllocateInfo<'_>,
    p_descriptor_sets: *mut vk::DescriptorSet,
) -> vk::Result {
    guard_result(|| {
        let ai = unsafe { ffi::reference(p_allocate_info) }?;
        let state = handle_store::get_desc_pool(ai.descriptor_pool.as_raw())?;
        let layouts = unsafe { ffi::slice(ai.p_set_layouts, ai.descriptor_set_count) }
            .iter()
            .map(|l| handle_store::get_desc_set_layout(l.as_raw()))
            .collect::<Result<Vec<_>, _>>()?;
        let out = unsafe { ffi::slice_mut(p_descriptor_sets, ai.descriptor_set_count) };
        if out.len() != layouts.len() {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        let mut handles = state.handles.lock();
        for (layout, slot) in layouts.into_iter().zip(out.iter_mut()) {
            let id = handle_store::store_desc_set(state.pool.allocate(layout));
            handles.push(id);
            *slot = vk::DescriptorSet::from_raw(id);
        }
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkFreeDescriptorSets(
    _device: vk::Device,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set_count: u32,
    p_descriptor_sets: *const vk::DescriptorSet,
) -> vk::Result {
    guard_result(|| {
        let state = handle_store::get_desc_pool(descriptor_pool.as_raw())?;
        let mut handles = state.handles.lock();
        for set in unsafe { ffi::slice(p_descriptor_sets, descriptor_set_count) } {
            let id = set.as_raw();
            if let Some(set) = handle_store::remove_desc_set(id) {
                state.pool.free(&set);
                handles.retain(|h| *h != id);
            }
        }
        Ok(())
    })
}

/// Collect the resources of one `VkWriteDescriptorSet`.
///
/// # Safety
/// The info array matching `write.descriptor_type` must be valid for
/// `write.descriptor_count` elements.
unsafe fn write_resources(write: &vk::WriteDescriptorSet<'_>) -> Result<Vec<DescriptorResource>, vk::Result> {
    let count = write.descriptor_count;
    let images = || unsafe { ffi::slice(write.p_image_info, count) };
    let sampler_of = |info: &vk::DescriptorImageInfo| {
        handle_store::optional(info.sampler, handle_store::get_sampler)
    };
    let view_of = |info: &vk::DescriptorImageInfo| handle_store::get_image_view(info.image_view.as_raw());

    match write.descriptor_type {
        vk::DescriptorType::SAMPLER => images()
            .iter()
            .map(|info| handle_store::get_sampler(info.sampler.as_raw()).map(DescriptorResource::Sampler))
            .collect(),
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER => images()
            .iter()
            .map(|info| {
                Ok(DescriptorResource::CombinedImageSampler {
                    view: view_of(info)?,
                    sampler: sampler_of(info)?,
                })
            })
            .collect(),
        vk::DescriptorType::SAMPLED_IMAGE | vk::DescriptorType::STORAGE_IMAGE | vk::DescriptorType::INPUT_ATTACHMENT => {
            images().iter().map(|info| view_of(info).map(DescriptorResource::Image)).collect()
        }
        vk::DescriptorType::UNIFORM_TEXEL_BUFFER | vk::DescriptorType::STORAGE_TEXEL_BUFFER => {
            unsafe { ffi::slice(write.p_texel_buffer_view, count) }
                .iter()
                .map(|v| handle_store::get_buffer_view(v.as_raw()).map(DescriptorResource::TexelBuffer))
                .collect()
        }
        vk::DescriptorType::UNIFORM_BUFFER
        | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        | vk::DescriptorType::STORAGE_BUFFER
        | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => unsafe { ffi::slice(write.p_buffer_info, count) }
            .iter()
            .map(|info| {
                Ok(DescriptorResource::Buffer {
                    buffer: handle_store::get_buffer(info.buffer.as_raw())?,
                    offset: info.offset,
                    range: info.range,
                })
            })
            .collect(),
        other => {
            debug!("descriptor type {:?} is not supported", other);
            Err(vk::Result::ERROR_FEATURE_NOT_PRESENT)
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkUpdateDescriptorSets(
    _device: vk::Device,
    descriptor_write_count: u32,
    p_descriptor_writes: *const vk::WriteDescriptorSet<'_>,
    descriptor_copy_count: u32,
    p_descriptor_copies: *const vk::CopyDescriptorSet<'_>,
) {
    let result = guard_result(|| {
        for write in unsafe { ffi::slice(p_descriptor_writes, descriptor_write_count) } {
            let set = handle_store::get_desc_set(write.dst_set.as_raw())?;
            let resources = unsafe { write_resources(write) }?;
            set.update(&[DescriptorWrite {
                dst_binding: write.dst_binding,
                dst_array_element: write.dst_array_element,
                descriptor_type: write.descriptor_type,
                resources,
            }])
            .map_err(ffi::fail("vkUpdateDescriptorSets"))?;
        }
        for copy in unsafe { ffi::slice(p_descriptor_copies, descriptor_copy_count) } {
            let src = handle_store::get_desc_set(copy.src_set.as_raw())?;
            let dst = handle_store::get_desc_set(copy.dst_set.as_raw())?;
            dst.copy_from(
                &src,
                &DescriptorCopy {
                    src_binding: copy.src_binding,
                    src_array_element: copy.src_array_element,
                    dst_binding: copy.dst_binding,
                    dst_array_element: copy.dst_array_element,
                    count: copy.descriptor_count,
                },
            )
            .map_err(ffi::fail("vkUpdateDescriptorSets"))?;
        }
        Ok(())
    });
    if result != vk::Result::SUCCESS {
        error!("vkUpdateDescriptorSets stopped early: {:?}", result);
    }
}
