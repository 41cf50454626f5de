//! Image, view and sampler functions for the Vulkan ICD.

use ash::vk;
use ash::vk::Handle;
use vkbridge_d3d11::resource::ImageDesc;
use vkbridge_d3d11::{BufferView, Image, ImageView, Sampler};

use crate::ffi::{self, guard, guard_result};
use crate::handle_store;

// ── Images ──────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCreateImage(
    device: vk::Device,
    p_create_info: *const vk::ImageCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_image: *mut vk::Image,
) -> vk::Result {
    guard_result(|| {
        let dev = unsafe { handle_store::device(device) }?;
        let ci = unsafe { ffi::reference(p_create_info) }?;
        let image = Image::new(
            &dev.device,
            ImageDesc {
                image_type: ci.image_type,
                format: ci.format,
                extent: ci.extent,
                mip_levels: ci.mip_levels,
                array_layers: ci.array_layers,
                samples: ci.samples,
                usage: ci.usage,
                flags: ci.flags,
            },
        )
        .map_err(ffi::fail("vkCreateImage"))?;
        let id = handle_store::store_image(image);
        unsafe { ffi::write(p_image, vk::Image::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyImage(
    _device: vk::Device,
    image: vk::Image,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_image(image.as_raw());
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetImageSubresourceLayout(
    _device: vk::Device,
    image: vk::Image,
    p_subresource: *const vk::ImageSubresource,
    p_layout: *mut vk::SubresourceLayout,
) {
    guard((), || {
        let (Ok(image), Ok(sub)) = (handle_store::get_image(image.as_raw()), unsafe { ffi::reference(p_subresource) })
        else {
            return;
        };
        // Only optimal tiling is supported; report a tightly packed layout.
        let extent = image.level_extent(sub.mip_level);
        let row_pitch = u64::from(vkbridge_d3d11::format::row_pitch(image.format(), extent.width));
        let depth_pitch = row_pitch * u64::from(extent.height);
        let _ = unsafe {
            ffi::write(
                p_layout,
                vk::SubresourceLayout {
                    offset: 0,
                    size: depth_pitch * u64::from(extent.depth),
                    row_pitch,
                    array_pitch: depth_pitch * u64::from(extent.depth),
                    depth_pitch,
                },
            )
        };
    })
}

// ── Image views ─────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCreateImageView(
    device: vk::Device,
    p_create_info: *const vk::ImageViewCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_view: *mut vk::ImageView,
) -> vk::Result {
    guard_result(|| {
        let dev = unsafe { handle_store::device(device) }?;
        let ci = unsafe { ffi::reference(p_create_info) }?;
        let image = handle_store::get_image(ci.image.as_raw())?;
        let view = ImageView::new(&dev.device, image, ci.view_type, ci.format, ci.subresource_range)
            .map_err(ffi::fail("vkCreateImageView"))?;
        let id = handle_store::store_image_view(view);
        unsafe { ffi::write(p_view, vk::ImageView::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyImageView(
    _device: vk::Device,
    image_view: vk::ImageView,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_image_view(image_view.as_raw());
    })
}

// ── Buffer views ────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCreateBufferView(
    device: vk::Device,
    p_create_info: *const vk::BufferViewCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_view: *mut vk::BufferView,
) -> vk::Result {
    guard_result(|| {
        let dev = unsafe { handle_store::device(device) }?;
        let ci = unsafe { ffi::reference(p_create_info) }?;
        let buffer = handle_store::get_buffer(ci.buffer.as_raw())?;
        let view = BufferView::new(&dev.device, buffer, ci.format, ci.offset, ci.range)
            .map_err(ffi::fail("vkCreateBufferView"))?;
        let id = handle_store::store_buffer_view(view);
        unsafe { ffi::write(p_view, vk::BufferView::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyBufferView(
    _device: vk::Device,
    buffer_view: vk::BufferView,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_buffer_view(buffer_view.as_raw());
    })
}

// ── Samplers ────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCreateSampler(
    device: vk::Device,
    p_create_info: *const vk::SamplerCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_sampler: *mut vk::Sampler,
) -> vk::Result {
    guard_result(|| {
        let dev = unsafe { handle_store::device(device) }?;
        let ci = unsafe { ffi::reference(p_create_info) }?;
        let sampler = Sampler::new(&dev.device, ci).map_err(ffi::fail("vkCreateSampler"))?;
        let id = handle_store::store_sampler(sampler);
        unsafe { ffi::write(p_sampler, vk::Sampler::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroySampler(
    _device: vk::Device,
    sampler: vk::Sampler,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_sampler(sampler.as_raw());
    })
}
