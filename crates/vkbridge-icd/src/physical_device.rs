//! Physical device query functions for the Vulkan ICD.
//!
//! Properties, limits and features are derived from the configured native
//! feature level; the device has one memory heap and one queue family.

use std::os::raw::c_void;

use ash::vk;
use vkbridge_core::FeatureLevel;
use vkbridge_d3d11::format;
use vkbridge_d3d11::layout::{ResourceClass, PUSH_CONSTANT_SLOT};

use crate::ffi::{self, guard};
use crate::handle_store;

pub const VENDOR_ID: u32 = 0x10005;
pub const DEVICE_NAME: &str = "vkbridge (Direct3D 11)";
/// Host-visible shadow heap size reported to applications.
pub const HEAP_SIZE: u64 = 1 << 31;

fn feature_level_of(physical_device: vk::PhysicalDevice) -> Option<FeatureLevel> {
    unsafe { handle_store::physical_device(physical_device) }
        .ok()
        .map(|pd| pd.config.device.feature_level)
}

pub fn limits(level: FeatureLevel, push_constant_size: u32) -> vk::PhysicalDeviceLimits {
    let (max_2d, max_cube, max_layers) = match level {
        FeatureLevel::L11_0 | FeatureLevel::L11_1 => (16384, 16384, 2048),
        FeatureLevel::L10_0 | FeatureLevel::L10_1 => (8192, 8192, 512),
        FeatureLevel::L9_3 => (4096, 4096, 1),
        FeatureLevel::L9_1 | FeatureLevel::L9_2 => (2048, 512, 1),
    };
    let compute = level.supports_uav();
    vk::PhysicalDeviceLimits {
        max_image_dimension1_d: max_2d,
        max_image_dimension2_d: max_2d,
        max_image_dimension3_d: if level.supports_geometry() { 2048 } else { 256 },
        max_image_dimension_cube: max_cube,
        max_image_array_layers: max_layers,
        max_texel_buffer_elements: 1 << 27,
        max_uniform_buffer_range: 4096 * 16,
        max_storage_buffer_range: 1 << 27,
        max_push_constants_size: push_constant_size,
        max_memory_allocation_count: 4096,
        max_sampler_allocation_count: 4000,
        buffer_image_granularity: 1,
        max_bound_descriptor_sets: 8,
        max_per_stage_descriptor_samplers: ResourceClass::Sampler.limit(level),
        max_per_stage_descriptor_uniform_buffers: PUSH_CONSTANT_SLOT,
        max_per_stage_descriptor_storage_buffers: ResourceClass::UnorderedAccess.limit(level),
        max_per_stage_descriptor_sampled_images: ResourceClass::ShaderResource.limit(level),
        max_per_stage_descriptor_storage_images: ResourceClass::UnorderedAccess.limit(level),
        max_per_stage_descriptor_input_attachments: 0,
        max_per_stage_resources: 128 + PUSH_CONSTANT_SLOT + ResourceClass::UnorderedAccess.limit(level),
        max_descriptor_set_samplers: ResourceClass::Sampler.limit(level),
        max_descriptor_set_uniform_buffers: PUSH_CONSTANT_SLOT,
        max_descriptor_set_uniform_buffers_dynamic: PUSH_CONSTANT_SLOT,
        max_descriptor_set_storage_buffers: ResourceClass::UnorderedAccess.limit(level),
        max_descriptor_set_storage_buffers_dynamic: ResourceClass::UnorderedAccess.limit(level),
        max_descriptor_set_sampled_images: ResourceClass::ShaderResource.limit(level),
        max_descriptor_set_storage_images: ResourceClass::UnorderedAccess.limit(level),
        max_vertex_input_attributes: 16,
        max_vertex_input_bindings: 16,
        max_vertex_input_attribute_offset: 2047,
        max_vertex_input_binding_stride: 2048,
        max_vertex_output_components: 128,
        max_tessellation_generation_level: if level.supports_tessellation() { 64 } else { 0 },
        max_tessellation_patch_size: if level.supports_tessellation() { 32 } else { 0 },
        max_geometry_shader_invocations: if level.supports_geometry() { 32 } else { 0 },
        max_geometry_output_vertices: if level.supports_geometry() { 1024 } else { 0 },
        max_fragment_input_components: 128,
        max_fragment_output_attachments: 8,
        max_fragment_combined_output_resources: 8 + ResourceClass::UnorderedAccess.limit(level),
        max_compute_shared_memory_size: if compute { 32768 } else { 0 },
        max_compute_work_group_count: if compute { [65535; 3] } else { [0; 3] },
        max_compute_work_group_invocations: if compute { 1024 } else { 0 },
        max_compute_work_group_size: if compute { [1024, 1024, 64] } else { [0; 3] },
        sub_pixel_precision_bits: 8,
        sub_texel_precision_bits: 8,
        mipmap_precision_bits: 8,
        max_draw_indexed_index_value: u32::MAX,
        max_draw_indirect_count: 1 << 16,
        max_sampler_lod_bias: 15.99,
        max_sampler_anisotropy: 16.0,
        max_viewports: 16,
        max_viewport_dimensions: [max_2d, max_2d],
        viewport_bounds_range: [-32768.0, 32767.0],
        viewport_sub_pixel_bits: 8,
        min_memory_map_alignment: 64,
        min_texel_buffer_offset_alignment: 16,
        min_uniform_buffer_offset_alignment: 256,
        min_storage_buffer_offset_alignment: 16,
        min_texel_offset: -8,
        max_texel_offset: 7,
        max_framebuffer_width: max_2d,
        max_framebuffer_height: max_2d,
        max_framebuffer_layers: max_layers,
        framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4,
        framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4,
        framebuffer_stencil_sample_counts: vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4,
        framebuffer_no_attachments_sample_counts: vk::SampleCountFlags::TYPE_1,
        max_color_attachments: 8,
        sampled_image_color_sample_counts: vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4,
        sampled_image_integer_sample_counts: vk::SampleCountFlags::TYPE_1,
        sampled_image_depth_sample_counts: vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4,
        sampled_image_stencil_sample_counts: vk::SampleCountFlags::TYPE_1,
        storage_image_sample_counts: vk::SampleCountFlags::TYPE_1,
        max_sample_mask_words: 1,
        timestamp_compute_and_graphics: vk::TRUE,
        timestamp_period: 1.0,
        max_clip_distances: 8,
        max_cull_distances: 8,
        max_combined_clip_and_cull_distances: 8,
        discrete_queue_priorities: 2,
        point_size_range: [1.0, 1.0],
        line_width_range: [1.0, 1.0],
        point_size_granularity: 0.0,
        line_width_granularity: 0.0,
        strict_lines: vk::FALSE,
        standard_sample_locations: vk::TRUE,
        optimal_buffer_copy_offset_alignment: 16,
        optimal_buffer_copy_row_pitch_alignment: 256,
        non_coherent_atom_size: 64,
        ..Default::default()
    }
}

pub fn features(level: FeatureLevel) -> vk::PhysicalDeviceFeatures {
    let flag = |b: bool| if b { vk::TRUE } else { vk::FALSE };
    vk::PhysicalDeviceFeatures {
        full_draw_index_uint32: vk::TRUE,
        image_cube_array: flag(level >= FeatureLevel::L10_1),
        independent_blend: flag(level >= FeatureLevel::L10_0),
        geometry_shader: flag(level.supports_geometry()),
        tessellation_shader: flag(level.supports_tessellation()),
        dual_src_blend: flag(level >= FeatureLevel::L10_0),
        multi_draw_indirect: flag(level.supports_uav()),
        draw_indirect_first_instance: flag(level.supports_uav()),
        depth_clamp: vk::TRUE,
        depth_bias_clamp: vk::TRUE,
        fill_mode_non_solid: vk::TRUE,
        sampler_anisotropy: vk::TRUE,
        texture_compression_bc: vk::TRUE,
        occlusion_query_precise: vk::TRUE,
        fragment_stores_and_atomics: flag(level.supports_uav()),
        shader_image_gather_extended: flag(level.supports_uav()),
        shader_clip_distance: vk::TRUE,
        shader_cull_distance: vk::TRUE,
        ..Default::default()
    }
}

pub fn format_properties(vk_format: vk::Format) -> vk::FormatProperties {
    if format::to_native(vk_format).is_unknown() {
        return vk::FormatProperties::default();
    }
    let mut optimal = vk::FormatFeatureFlags::SAMPLED_IMAGE
        | vk::FormatFeatureFlags::TRANSFER_SRC
        | vk::FormatFeatureFlags::TRANSFER_DST
        | vk::FormatFeatureFlags::BLIT_SRC;
    if format::is_depth_or_stencil(vk_format) {
        optimal |= vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
    } else if !format::is_compressed(vk_format) {
        optimal |= vk::FormatFeatureFlags::COLOR_ATTACHMENT
            | vk::FormatFeatureFlags::BLIT_DST
            | vk::FormatFeatureFlags::STORAGE_IMAGE;
        if !format::is_integer(vk_format) {
            optimal |= vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
                | vk::FormatFeatureFlags::COLOR_ATTACHMENT_BLEND;
        }
    }
    let buffer = if format::is_depth_or_stencil(vk_format) || format::is_compressed(vk_format) {
        vk::FormatFeatureFlags::empty()
    } else {
        vk::FormatFeatureFlags::VERTEX_BUFFER
            | vk::FormatFeatureFlags::UNIFORM_TEXEL_BUFFER
            | vk::FormatFeatureFlags::STORAGE_TEXEL_BUFFER
    };
    vk::FormatProperties {
        linear_tiling_features: vk::FormatFeatureFlags::empty(),
        optimal_tiling_features: optimal,
        buffer_features: buffer,
    }
}

// ── Properties ──────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkGetPhysicalDeviceProperties(
    physical_device: vk::PhysicalDevice,
    p_properties: *mut vk::PhysicalDeviceProperties,
) {
    guard((), || {
        let Ok(pd) = (unsafe { handle_store::physical_device(physical_device) }) else {
            return;
        };
        let Some(props) = (unsafe { p_properties.as_mut() }) else {
            return;
        };
        *props = vk::PhysicalDeviceProperties {
            api_version: vk::API_VERSION_1_0,
            driver_version: vk::make_api_version(0, 0, 1, 0),
            vendor_id: VENDOR_ID,
            device_id: pd.config.device.feature_level as u32,
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            limits: limits(pd.config.device.feature_level, pd.config.device.push_constant_size),
            ..Default::default()
        };
        ffi::copy_name(&mut props.device_name, DEVICE_NAME);
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetPhysicalDeviceProperties2(
    physical_device: vk::PhysicalDevice,
    p_properties: *mut vk::PhysicalDeviceProperties2<'_>,
) {
    if p_properties.is_null() {
        return;
    }
    // Extension structs in the pNext chain are left untouched
    unsafe { vkGetPhysicalDeviceProperties(physical_device, &mut (*p_properties).properties) };
}

// ── Features ────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkGetPhysicalDeviceFeatures(
    physical_device: vk::PhysicalDevice,
    p_features: *mut vk::PhysicalDeviceFeatures,
) {
    guard((), || {
        if let Some(level) = feature_level_of(physical_device) {
            let _ = unsafe { ffi::write(p_features, features(level)) };
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetPhysicalDeviceFeatures2(
    physical_device: vk::PhysicalDevice,
    p_features: *mut vk::PhysicalDeviceFeatures2<'_>,
) {
    if p_features.is_null() {
        return;
    }
    unsafe { vkGetPhysicalDeviceFeatures(physical_device, &mut (*p_features).features) };
}

// ── Memory ──────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkGetPhysicalDeviceMemoryProperties(
    _physical_device: vk::PhysicalDevice,
    p_memory_properties: *mut vk::PhysicalDeviceMemoryProperties,
) {
    guard((), || {
        let Some(props) = (unsafe { p_memory_properties.as_mut() }) else {
            return;
        };
        *props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = 1;
        props.memory_types[0] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 0,
        };
        props.memory_heap_count = 1;
        props.memory_heaps[0] = vk::MemoryHeap {
            size: HEAP_SIZE,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetPhysicalDeviceMemoryProperties2(
    physical_device: vk::PhysicalDevice,
    p_memory_properties: *mut vk::PhysicalDeviceMemoryProperties2<'_>,
) {
    if p_memory_properties.is_null() {
        return;
    }
    unsafe { vkGetPhysicalDeviceMemoryProperties(physical_device, &mut (*p_memory_properties).memory_properties) };
}

// ── Queue families ──────────────────────────────────────────

pub fn queue_family() -> vk::QueueFamilyProperties {
    vk::QueueFamilyProperties {
        queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        queue_count: 1,
        timestamp_valid_bits: 64,
        min_image_transfer_granularity: vk::Extent3D {
            width: 1,
            height: 1,
            depth: 1,
        },
    }
}

#[no_mangle]
pub unsafe extern "C" fn vkGetPhysicalDeviceQueueFamilyProperties(
    _physical_device: vk::PhysicalDevice,
    p_queue_family_property_count: *mut u32,
    p_queue_family_properties: *mut vk::QueueFamilyProperties,
) {
    guard((), || {
        let _ = unsafe { ffi::enumerate(&[queue_family()], p_queue_family_property_count, p_queue_family_properties) };
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetPhysicalDeviceQueueFamilyProperties2(
    _physical_device: vk::PhysicalDevice,
    p_queue_family_property_count: *mut u32,
    p_queue_family_properties: *mut vk::QueueFamilyProperties2<'_>,
) {
    guard((), || {
        let Some(count) = (unsafe { p_queue_family_property_count.as_mut() }) else {
            return;
        };
        if p_queue_family_properties.is_null() {
            *count = 1;
            return;
        }
        if *count >= 1 {
            unsafe { (*p_queue_family_properties).queue_family_properties = queue_family() };
            *count = 1;
        }
    })
}

// ── Formats ─────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkGetPhysicalDeviceFormatProperties(
    _physical_device: vk::PhysicalDevice,
    format: vk::Format,
    p_format_properties: *mut vk::FormatProperties,
) {
    guard((), || {
        let _ = unsafe { ffi::write(p_format_properties, format_properties(format)) };
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetPhysicalDeviceFormatProperties2(
    physical_device: vk::PhysicalDevice,
    format: vk::Format,
    p_format_properties: *mut vk::FormatProperties2<'_>,
) {
    if p_format_properties.is_null() {
        return;
    }
    unsafe { vkGetPhysicalDeviceFormatProperties(physical_device, format, &mut (*p_format_properties).format_properties) };
}

#[no_mangle]
pub unsafe extern "C" fn vkGetPhysicalDeviceImageFormatProperties(
    physical_device: vk::PhysicalDevice,
    format: vk::Format,
    image_type: vk::ImageType,
    tiling: vk::ImageTiling,
    usage: vk::ImageUsageFlags,
    _flags: vk::ImageCreateFlags,
    p_image_format_properties: *mut vk::ImageFormatProperties,
) -> vk::Result {
    guard(vk::Result::ERROR_UNKNOWN, || {
        let Some(level) = feature_level_of(physical_device) else {
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        };
        let features = format_properties(format).optimal_tiling_features;
        if features.is_empty() || tiling != vk::ImageTiling::OPTIMAL {
            return vk::Result::ERROR_FORMAT_NOT_SUPPORTED;
        }
        if usage.contains(vk::ImageUsageFlags::STORAGE) && !level.supports_uav() {
            return vk::Result::ERROR_FORMAT_NOT_SUPPORTED;
        }
        let l = limits(level, 0);
        let max_extent = match image_type {
            vk::ImageType::TYPE_1D => vk::Extent3D {
                width: l.max_image_dimension1_d,
                height: 1,
                depth: 1,
            },
            vk::ImageType::TYPE_3D => vk::Extent3D {
                width: l.max_image_dimension3_d,
                height: l.max_image_dimension3_d,
                depth: l.max_image_dimension3_d,
            },
            _ => vk::Extent3D {
                width: l.max_image_dimension2_d,
                height: l.max_image_dimension2_d,
                depth: 1,
            },
        };
        let props = vk::ImageFormatProperties {
            max_extent,
            max_mip_levels: 32 - max_extent.width.max(1).leading_zeros(),
            max_array_layers: if image_type == vk::ImageType::TYPE_3D { 1 } else { l.max_image_array_layers },
            sample_counts: if image_type == vk::ImageType::TYPE_2D {
                l.framebuffer_color_sample_counts
            } else {
                vk::SampleCountFlags::TYPE_1
            },
            max_resource_size: HEAP_SIZE,
        };
        match unsafe { ffi::write(p_image_format_properties, props) } {
            Ok(()) => vk::Result::SUCCESS,
            Err(code) => code,
        }
    })
}

// ── Sparse images (unsupported) ─────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkGetPhysicalDeviceSparseImageFormatProperties(
    _physical_device: vk::PhysicalDevice,
    _format: vk::Format,
    _type_: vk::ImageType,
    _samples: vk::SampleCountFlags,
    _usage: vk::ImageUsageFlags,
    _tiling: vk::ImageTiling,
    p_property_count: *mut u32,
    _p_properties: *mut c_void,
) {
    if let Some(count) = unsafe { p_property_count.as_mut() } {
        *count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_limits_follow_uav_support() {
        assert_eq!(limits(FeatureLevel::L11_0, 256).max_compute_work_group_invocations, 1024);
        assert_eq!(limits(FeatureLevel::L10_0, 256).max_compute_work_group_invocations, 0);
        assert_eq!(limits(FeatureLevel::L11_0, 128).max_push_constants_size, 128);
        assert_eq!(features(FeatureLevel::L10_1).tessellation_shader, vk::FALSE);
        assert_eq!(features(FeatureLevel::L11_0).tessellation_shader, vk::TRUE);
    }

    #[test]
    fn unknown_formats_have_no_features() {
        assert!(format_properties(vk::Format::UNDEFINED).optimal_tiling_features.is_empty());
        let depth = format_properties(vk::Format::D32_SFLOAT).optimal_tiling_features;
        assert!(depth.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(!depth.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT));
    }
}
