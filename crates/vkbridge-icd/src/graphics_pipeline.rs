//! `vkCreateGraphicsPipelines`: flatten the create-info tree into a
//! [`GraphicsPipelineDesc`].

use ash::vk;
use ash::vk::Handle;
use vkbridge_d3d11::pipeline::{ColorBlendInfo, DepthStencilInfo, GraphicsPipelineDesc, RasterizationInfo};
use vkbridge_d3d11::shader::{VertexAttribute, VertexBinding, VertexInputState};
use vkbridge_d3d11::{GraphicsPipeline, Pipeline};

use crate::ffi::{self, guard};
use crate::handle_store;
use crate::pipeline::{create_pipelines, stage_info};

/// # Safety
/// Every pointer reachable from `ci` must be valid per the Vulkan
/// valid-usage rules for `vkCreateGraphicsPipelines`.
pub unsafe fn describe(ci: &vk::GraphicsPipelineCreateInfo<'_>) -> Result<GraphicsPipelineDesc, vk::Result> {
    let stages = unsafe { ffi::slice(ci.p_stages, ci.stage_count) }
        .iter()
        .map(|s| unsafe { stage_info(s) })
        .collect::<Result<Vec<_>, _>>()?;

    let dynamic_states = unsafe { ci.p_dynamic_state.as_ref() }
        .map(|d| unsafe { ffi::slice(d.p_dynamic_states, d.dynamic_state_count) }.to_vec())
        .unwrap_or_default();
    let is_dynamic = |state| dynamic_states.contains(&state);

    let vertex_input = match unsafe { ci.p_vertex_input_state.as_ref() } {
        Some(vis) => VertexInputState {
            bindings: unsafe { ffi::slice(vis.p_vertex_binding_descriptions, vis.vertex_binding_description_count) }
                .iter()
                .map(|b| VertexBinding {
                    binding: b.binding,
                    stride: b.stride,
                    input_rate: b.input_rate,
                })
                .collect(),
            attributes: unsafe {
                ffi::slice(vis.p_vertex_attribute_descriptions, vis.vertex_attribute_description_count)
            }
            .iter()
            .map(|a| VertexAttribute {
                location: a.location,
                binding: a.binding,
                format: a.format,
                offset: a.offset,
            })
            .collect(),
        },
        None => VertexInputState::default(),
    };

    let topology = unsafe { ci.p_input_assembly_state.as_ref() }
        .map(|ia| ia.topology)
        .unwrap_or(vk::PrimitiveTopology::TRIANGLE_LIST);
    let patch_control_points = unsafe { ci.p_tessellation_state.as_ref() }
        .map(|t| t.patch_control_points)
        .unwrap_or(0);

    let (viewports, scissors) = match unsafe { ci.p_viewport_state.as_ref() } {
        Some(vp) => (
            if is_dynamic(vk::DynamicState::VIEWPORT) {
                Vec::new()
            } else {
                unsafe { ffi::slice(vp.p_viewports, vp.viewport_count) }.to_vec()
            },
            if is_dynamic(vk::DynamicState::SCISSOR) {
                Vec::new()
            } else {
                unsafe { ffi::slice(vp.p_scissors, vp.scissor_count) }.to_vec()
            },
        ),
        None => (Vec::new(), Vec::new()),
    };

    let rasterization = match unsafe { ci.p_rasterization_state.as_ref() } {
        Some(rs) => RasterizationInfo {
            depth_clamp: rs.depth_clamp_enable == vk::TRUE,
            polygon_mode: rs.polygon_mode,
            cull_mode: rs.cull_mode,
            front_face: rs.front_face,
            depth_bias_enable: rs.depth_bias_enable == vk::TRUE,
            depth_bias_constant: rs.depth_bias_constant_factor,
            depth_bias_clamp: rs.depth_bias_clamp,
            depth_bias_slope: rs.depth_bias_slope_factor,
        },
        None => RasterizationInfo::default(),
    };

    let (samples, sample_mask, alpha_to_coverage) = match unsafe { ci.p_multisample_state.as_ref() } {
        Some(ms) => (
            ms.rasterization_samples,
            unsafe { ms.p_sample_mask.as_ref() }.copied().unwrap_or(u32::MAX),
            ms.alpha_to_coverage_enable == vk::TRUE,
        ),
        None => (vk::SampleCountFlags::TYPE_1, u32::MAX, false),
    };

    let depth_stencil = match unsafe { ci.p_depth_stencil_state.as_ref() } {
        Some(ds) => DepthStencilInfo {
            depth_test: ds.depth_test_enable == vk::TRUE,
            depth_write: ds.depth_write_enable == vk::TRUE,
            depth_compare: ds.depth_compare_op,
            stencil_test: ds.stencil_test_enable == vk::TRUE,
            front: ds.front,
            back: ds.back,
        },
        None => DepthStencilInfo::default(),
    };

    let color_blend = match unsafe { ci.p_color_blend_state.as_ref() } {
        Some(cb) => ColorBlendInfo {
            attachments: unsafe { ffi::slice(cb.p_attachments, cb.attachment_count) }.to_vec(),
            constants: cb.blend_constants,
        },
        None => ColorBlendInfo::default(),
    };

    Ok(GraphicsPipelineDesc {
        flags: ci.flags,
        stages,
        vertex_input,
        topology,
        patch_control_points,
        viewports,
        scissors,
        rasterization,
        samples,
        sample_mask,
        alpha_to_coverage,
        depth_stencil,
        color_blend,
        layout: handle_store::get_pipeline_layout(ci.layout.as_raw())?,
        render_pass: handle_store::get_render_pass(ci.render_pass.as_raw())?,
        subpass: ci.subpass,
        dynamic_states,
    })
}

#[no_mangle]
pub unsafe extern "C" fn vkCreateGraphicsPipelines(
    device: vk::Device,
    _pipeline_cache: vk::PipelineCache,
    create_info_count: u32,
    p_create_infos: *const vk::GraphicsPipelineCreateInfo<'_>,
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
            create_pipelines("vkCreateGraphicsPipelines", infos, p_pipelines, |ci| {
                let desc = describe(ci)?;
                let pipeline =
                    GraphicsPipeline::new(&dev.device, &desc).map_err(ffi::fail("vkCreateGraphicsPipelines"))?;
                Ok(Pipeline::Graphics(pipeline))
            })
        }
    })
}
