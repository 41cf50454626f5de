//! Shader module, layout and compute pipeline functions for the Vulkan ICD.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use tracing::debug;
use vkbridge_d3d11::layout::{PushConstantRange, SetLayoutBinding};
use vkbridge_d3d11::pipeline::ShaderStageInfo;
use vkbridge_d3d11::shader::SpecializationConstant;
use vkbridge_d3d11::{ComputePipeline, DescriptorSetLayout, Pipeline, PipelineLayout, ShaderModule};

use crate::ffi::{self, guard, guard_result};
use crate::handle_store;

// ── Shader modules ──────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCreateShaderModule(
    _device: vk::Device,
    p_create_info: *const vk::ShaderModuleCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_shader_module: *mut vk::ShaderModule,
) -> vk::Result {
    guard_result(|| {
        let ci = unsafe { ffi::reference(p_create_info) }?;
        if ci.p_code.is_null() {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        // code_size is in bytes
        let code = unsafe { std::slice::from_raw_parts(ci.p_code as *const u8, ci.code_size) };
        let module = ShaderModule::new(code).map_err(ffi::fail("vkCreateShaderModule"))?;
        let id = handle_store::store_shader_module(Arc::new(module));
        unsafe { ffi::write(p_shader_module, vk::ShaderModule::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyShaderModule(
    _device: vk::Device,
    shader_module: vk::ShaderModule,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_shader_module(shader_module.as_raw());
    })
}

/// Resolve one `VkPipelineShaderStageCreateInfo`, slicing the
/// specialization data into per-constant byte strings.
///
/// # Safety
/// Every pointer in `info` must be valid per the Vulkan valid-usage rules.
pub unsafe fn stage_info(info: &vk::PipelineShaderStageCreateInfo<'_>) -> Result<ShaderStageInfo, vk::Result> {
    let module = handle_store::get_shader_module(info.module.as_raw())?;
    let entry_point = if info.p_name.is_null() {
        "main".to_string()
    } else {
        unsafe { CStr::from_ptr(info.p_name) }.to_string_lossy().into_owned()
    };

    let mut specialization = Vec::new();
    if let Some(spec) = unsafe { info.p_specialization_info.as_ref() } {
        let data: &[u8] = if spec.p_data.is_null() {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(spec.p_data as *const u8, spec.data_size) }
        };
        for entry in unsafe { ffi::slice(spec.p_map_entries, spec.map_entry_count) } {
            let start = entry.offset as usize;
            let bytes = data
                .get(start..start + entry.size)
                .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
            specialization.push(SpecializationConstant {
                id: entry.constant_id,
                data: bytes.to_vec(),
            });
        }
    }

    Ok(ShaderStageInfo {
        stage: info.stage,
        module,
        entry_point,
        specialization,
    })
}

// ── Descriptor set layouts ──────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCreateDescriptorSetLayout(
    _device: vk::Device,
    p_create_info: *const vk::DescriptorSetLayoutCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_set_layout: *mut vk::DescriptorSetLayout,
) -> vk::Result {
    guard_result(|| {
        let ci = unsafe { ffi::reference(p_create_info) }?;
        let mut bindings = Vec::with_capacity(ci.binding_count as usize);
        for b in unsafe { ffi::slice(ci.p_bindings, ci.binding_count) } {
            let samplers = unsafe { ffi::slice(b.p_immutable_samplers, b.descriptor_count) };
            let immutable_samplers = samplers
                .iter()
                .map(|s| handle_store::get_sampler(s.as_raw()))
                .collect::<Result<Vec<_>, _>>()?;
            bindings.push(SetLayoutBinding {
                binding: b.binding,
                descriptor_type: b.descriptor_type,
                count: b.descriptor_count,
                stages: b.stage_flags,
                immutable_samplers,
            });
        }
        let layout = DescriptorSetLayout::new(&bindings).map_err(ffi::fail("vkCreateDescriptorSetLayout"))?;
        let id = handle_store::store_desc_set_layout(Arc::new(layout));
        unsafe { ffi::write(p_set_layout, vk::DescriptorSetLayout::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyDescriptorSetLayout(
    _device: vk::Device,
    descriptor_set_layout: vk::DescriptorSetLayout,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_desc_set_layout(descriptor_set_layout.as_raw());
    })
}

// ── Pipeline layouts ────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCreatePipelineLayout(
    device: vk::Device,
    p_create_info: *const vk::PipelineLayoutCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_pipeline_layout: *mut vk::PipelineLayout,
) -> vk::Result {
    guard_result(|| {
        let dev = unsafe { handle_store::device(device) }?;
        let ci = unsafe { ffi::reference(p_create_info) }?;
        let set_layouts = unsafe { ffi::slice(ci.p_set_layouts, ci.set_layout_count) }
            .iter()
            .map(|l| handle_store::get_desc_set_layout(l.as_raw()))
            .collect::<Result<Vec<_>, _>>()?;
        let push_constants = unsafe { ffi::slice(ci.p_push_constant_ranges, ci.push_constant_range_count) }
            .iter()
            .map(|r| PushConstantRange {
                stages: r.stage_flags,
                offset: r.offset,
                size: r.size,
            })
            .collect::<Vec<_>>();
        if let Some(end) = push_constants.iter().map(|r| r.offset + r.size).max() {
            if end > dev.device.push_constant_size() {
                debug!(end, "push constant ranges exceed the reserved buffer");
                return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
            }
        }
        let layout = PipelineLayout::new(set_layouts, push_constants, dev.device.feature_level())
            .map_err(ffi::fail("vkCreatePipelineLayout"))?;
        let id = handle_store::store_pipeline_layout(Arc::new(layout));
        unsafe { ffi::write(p_pipeline_layout, vk::PipelineLayout::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyPipelineLayout(
    _device: vk::Device,
    pipeline_layout: vk::PipelineLayout,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_pipeline_layout(pipeline_layout.as_raw());
    })
}

// ── Pipeline caches ─────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn vkCreatePipelineCache(
    _device: vk::Device,
    _p_create_info: *const vk::PipelineCacheCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_pipeline_cache: *mut vk::PipelineCache,
) -> vk::Result {
    guard_result(|| {
        // Compiled shaders are not cached; the handle only has to be distinct.
        let id = handle_store::store_pipeline_cache(());
        unsafe { ffi::write(p_pipeline_cache, vk::PipelineCache::from_raw(id)) }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyPipelineCache(
    _device: vk::Device,
    pipeline_cache: vk::PipelineCache,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_pipeline_cache(pipeline_cache.as_raw());
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkGetPipelineCacheData(
    _device: vk::Device,
    _pipeline_cache: vk::PipelineCache,
    p_data_size: *mut usize,
    _p_data: *mut std::os::raw::c_void,
) -> vk::Result {
    guard_result(|| unsafe { ffi::write(p_data_size, 0) })
}

// ── Compute pipelines ───────────────────────────────────────

/// Create `count` pipelines with `create`, writing null handles for every
/// entry after the first failure.
///
/// # Safety
/// `p_pipelines` must have room for `count` handles.
pub unsafe fn create_pipelines<T>(
    call: &'static str,
    infos: &[T],
    p_pipelines: *mut vk::Pipeline,
    mut create: impl FnMut(&T) -> Result<Pipeline, vk::Result>,
) -> vk::Result {
    let out = unsafe { ffi::slice_mut(p_pipelines, infos.len() as u32) };
    if out.len() != infos.len() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    let mut result = vk::Result::SUCCESS;
    for (info, slot) in infos.iter().zip(out.iter_mut()) {
        *slot = vk::Pipeline::null();
        if result != vk::Result::SUCCESS {
            continue;
        }
        match create(info) {
            Ok(pipeline) => *slot = vk::Pipeline::from_raw(handle_store::store_pipeline(pipeline)),
            Err(code) => {
                debug!("{} failed with {:?}", call, code);
                result = code;
            }
        }
    }
    result
}

#[no_mangle]
pub unsafe extern "C" fn vkCreateComputePipelines(
    device: vk::Device,
    _pipeline_cache: vk::PipelineCache,
    create_info_count: u32,
    p_create_infos: *const vk::ComputePipelineCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_pipelines: *mut vk::Pipeline,
) -> vk::Result {
    guard(vk::Result::ERROR_UNKNOWN, || {
        let dev = match unsafe { handle_store::device(device) } {
            Ok(dev) => dev,
            Err(code) => return code,
        };
        let infos = unsafe { ffi::slice(p_create_infos, create_info_count) };
        unsafe {
            create_pipelines("vkCreateComputePipelines", infos, p_pipelines, |ci| {
                let stage = stage_info(&ci.stage)?;
                let layout = handle_store::get_pipeline_layout(ci.layout.as_raw())?;
                let pipeline = ComputePipeline::new(&dev.device, &stage, layout, ci.flags)
                    .map_err(ffi::fail("vkCreateComputePipelines"))?;
                Ok(Pipeline::Compute(pipeline))
            })
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkDestroyPipeline(
    _device: vk::Device,
    pipeline: vk::Pipeline,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    guard((), || {
        handle_store::remove_pipeline(pipeline.as_raw());
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specialization_data_is_sliced_per_entry() {
        let module = ShaderModule::new(b"float4 main() : SV_Target { return 0; }").unwrap();
        let id = handle_store::store_shader_module(Arc::new(module));
        let entries = [
            vk::SpecializationMapEntry {
                constant_id: 3,
                offset: 4,
                size: 4,
            },
            vk::SpecializationMapEntry {
                constant_id: 1,
                offset: 0,
                size: 4,
            },
        ];
        let data = [1u8, 0, 0, 0, 9, 0, 0, 0];
        let spec = vk::SpecializationInfo::default().map_entries(&entries).data(&data);
        let info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(vk::ShaderModule::from_raw(id))
            .name(c"main")
            .specialization_info(&spec);

        let stage = unsafe { stage_info(&info) }.unwrap();
        assert_eq!(stage.entry_point, "main");
        assert_eq!(
            stage.specialization,
            vec![
                SpecializationConstant {
                    id: 3,
                    data: vec![9, 0, 0, 0],
                },
                SpecializationConstant {
                    id: 1,
                    data: vec![1, 0, 0, 0],
                },
            ]
        );
    }

    #[test]
    fn entries_after_a_failure_are_null() {
        let infos = [1, 2, 3];
        let mut out = [vk::Pipeline::from_raw(99); 3];
        let result = unsafe {
            create_pipelines("test", &infos, out.as_mut_ptr(), |i| {
                if *i == 2 {
                    Err(vk::Result::ERROR_INVALID_SHADER_NV)
                } else {
                    Err(vk::Result::ERROR_UNKNOWN)
                }
            })
        };
        assert_eq!(result, vk::Result::ERROR_UNKNOWN);
        assert!(out.iter().all(|p| *p == vk::Pipeline::null()));
    }
}
