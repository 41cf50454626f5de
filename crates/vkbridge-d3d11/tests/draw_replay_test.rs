//! Integration test: draw replay
//!
//! Records a render pass with a graphics pipeline, a dynamic uniform buffer
//! and one draw, submits it through the queue and checks the native call
//! sequence the null backend saw.
//!
//! Run with: cargo test --test draw_replay_test -- --nocapture

use std::sync::Arc;

use ash::vk;
use vkbridge_core::{BridgeConfig, FeatureLevel};
use vkbridge_d3d11::command::{BeginRenderPass, BeginSubpass, Replay};
use vkbridge_d3d11::descriptor::{DescriptorResource, DescriptorWrite};
use vkbridge_d3d11::layout::SetLayoutBinding;
use vkbridge_d3d11::native::null::{NativeCall, NullDevice};
use vkbridge_d3d11::native::{NativeStage, Rect, UnorderedAccessView};
use vkbridge_d3d11::pipeline::{ColorBlendInfo, DepthStencilInfo, GraphicsPipelineDesc, RasterizationInfo, ShaderStageInfo};
use vkbridge_d3d11::renderpass::{AttachmentDesc, SubpassDesc};
use vkbridge_d3d11::resource::ImageDesc;
use vkbridge_d3d11::shader::VertexInputState;
use vkbridge_d3d11::{
    Buffer, CommandBuffer, CommandBufferState, Context, DescriptorSet, DescriptorSetLayout, Device, Fence, Framebuffer,
    GraphicsPipeline, Image, ImageView, Pipeline, PipelineLayout, Queue, RenderPass, ShaderModule, SubmitBatch,
};

const VERTEX_SHADER: &[u8] = b"float4 main(uint id : SV_VertexID) : SV_Position { return float4(0, 0, 0, 1); }";
const PIXEL_SHADER: &[u8] = b"cbuffer Tint : register(b0) { float4 tint; }\n\
float4 main() : SV_Target { return tint; }";

struct Scene {
    null: Arc<NullDevice>,
    device: Arc<Device>,
    render_pass: Arc<RenderPass>,
    framebuffer: Arc<Framebuffer>,
    layout: Arc<PipelineLayout>,
    pipeline: Arc<GraphicsPipeline>,
    set: Arc<DescriptorSet>,
}

fn stage(stage: vk::ShaderStageFlags, code: &[u8]) -> ShaderStageInfo {
    ShaderStageInfo {
        stage,
        module: Arc::new(ShaderModule::new(code).unwrap()),
        entry_point: "main".to_string(),
        specialization: Vec::new(),
    }
}

fn build_scene() -> Scene {
    vkbridge_common::logging::init_logging();
    let null = NullDevice::new(FeatureLevel::L11_1);
    let device = Device::new(null.clone(), BridgeConfig::default()).unwrap();

    let render_pass = Arc::new(RenderPass::new(
        vec![AttachmentDesc {
            format: vk::Format::R8G8B8A8_UNORM,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        }],
        vec![SubpassDesc {
            colors: vec![Some(0)],
            ..Default::default()
        }],
    ));
    let extent = vk::Extent2D { width: 64, height: 64 };
    let image = Image::new(
        &device,
        ImageDesc {
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::R8G8B8A8_UNORM,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            flags: vk::ImageCreateFlags::empty(),
        },
    )
    .unwrap();
    let view = ImageView::new(
        &device,
        image,
        vk::ImageViewType::TYPE_2D,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
    )
    .unwrap();
    let framebuffer = Arc::new(Framebuffer::new(vec![view], extent, 1));

    let set_layout = Arc::new(
        DescriptorSetLayout::new(&[SetLayoutBinding {
            binding: 2,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            count: 1,
            stages: vk::ShaderStageFlags::FRAGMENT,
            immutable_samplers: Vec::new(),
        }])
        .unwrap(),
    );
    let layout = Arc::new(PipelineLayout::new(vec![set_layout.clone()], Vec::new(), FeatureLevel::L11_1).unwrap());

    let pipeline = GraphicsPipeline::new(
        &device,
        &GraphicsPipelineDesc {
            flags: vk::PipelineCreateFlags::empty(),
            stages: vec![
                stage(vk::ShaderStageFlags::VERTEX, VERTEX_SHADER),
                stage(vk::ShaderStageFlags::FRAGMENT, PIXEL_SHADER),
            ],
            vertex_input: VertexInputState::default(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            patch_control_points: 0,
            viewports: vec![vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: 64.0,
                height: 64.0,
                min_depth: 0.0,
                max_depth: 1.0,
            }],
            scissors: vec![vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            }],
            rasterization: RasterizationInfo::default(),
            samples: vk::SampleCountFlags::TYPE_1,
            sample_mask: u32::MAX,
            alpha_to_coverage: false,
            depth_stencil: DepthStencilInfo::default(),
            color_blend: ColorBlendInfo {
                attachments: vec![vk::PipelineColorBlendAttachmentState {
                    color_write_mask: vk::ColorComponentFlags::RGBA,
                    ..Default::default()
                }],
                constants: [0.0; 4],
            },
            dynamic_states: Vec::new(),
            layout: layout.clone(),
            render_pass: render_pass.clone(),
            subpass: 0,
        },
    )
    .unwrap();

    let uniforms = Buffer::new(&device, 1024, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();
    let set = DescriptorSet::new(set_layout);
    set.update(&[DescriptorWrite {
        dst_binding: 2,
        dst_array_element: 0,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        resources: vec![DescriptorResource::Buffer {
            buffer: uniforms,
            offset: 0,
            range: 256,
        }],
    }])
    .unwrap();

    Scene {
        null,
        device,
        render_pass,
        framebuffer,
        layout,
        pipeline,
        set,
    }
}

fn record(scene: &Scene, flags: vk::CommandBufferUsageFlags) -> Arc<CommandBuffer> {
    let area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: scene.framebuffer.extent(),
    };
    record_in(scene, flags, area)
}

fn record_in(scene: &Scene, flags: vk::CommandBufferUsageFlags, area: vk::Rect2D) -> Arc<CommandBuffer> {
    let cmd = CommandBuffer::new(vk::CommandBufferLevel::PRIMARY);
    cmd.begin(flags, None).unwrap();
    cmd.begin_render_pass(
        scene.render_pass.clone(),
        scene.framebuffer.clone(),
        area,
        &[vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        }],
    )
    .unwrap();
    cmd.bind_pipeline(Pipeline::Graphics(scene.pipeline.clone())).unwrap();
    cmd.bind_descriptor_sets(
        vk::PipelineBindPoint::GRAPHICS,
        &scene.layout,
        0,
        &[scene.set.clone()],
        &[256],
    )
    .unwrap();
    cmd.draw(3, 1, 0, 0).unwrap();
    cmd.end_render_pass().unwrap();
    cmd.end().unwrap();
    cmd
}

fn position(calls: &[NativeCall], pred: impl Fn(&NativeCall) -> bool) -> usize {
    calls
        .iter()
        .position(pred)
        .unwrap_or_else(|| panic!("call not found in {:#?}", calls))
}

#[test]
fn test_draw_replays_in_record_order() {
    let scene = build_scene();
    let cmd = record(&scene, vk::CommandBufferUsageFlags::empty());
    assert_eq!(
        cmd.command_names(),
        vec![
            "BeginRenderPass",
            "BeginSubpass",
            "BindPipeline",
            "BindDescriptorSet",
            "Draw",
            "EndSubpass",
            "EndRenderPass",
        ]
    );

    scene.null.take_calls();
    let queue = Queue::new(scene.device.clone());
    let fence = Fence::new(&scene.device, false).unwrap();
    queue
        .submit(
            &[SubmitBatch {
                command_buffers: vec![cmd.clone()],
            }],
            Some(&fence),
        )
        .unwrap();
    assert_eq!(cmd.state(), CommandBufferState::Executable);

    let calls = scene.null.calls();
    let clear = position(&calls, |c| {
        matches!(c, NativeCall::ClearView { rects, .. } if rects == &[Rect { left: 0, top: 0, right: 64, bottom: 64 }])
    });
    let shader = position(&calls, |c| {
        matches!(
            c,
            NativeCall::SetShader {
                stage: NativeStage::Pixel,
                shader: Some(_),
            }
        )
    });
    let constants = position(&calls, |c| {
        matches!(
            c,
            NativeCall::SetConstantBuffers1 {
                stage: NativeStage::Pixel,
                start_slot: 0,
                first_constant,
                num_constants,
                ..
            } if first_constant == &[16] && num_constants == &[16]
        )
    });
    let draw = position(&calls, |c| {
        *c == NativeCall::Draw {
            vertex_count: 3,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }
    });
    assert!(clear < draw);
    assert!(shader < constants);
    assert!(constants < draw);

    // The set is unbound once the buffer finishes.
    let unbind = calls
        .iter()
        .rposition(|c| {
            matches!(
                c,
                NativeCall::SetConstantBuffers {
                    stage: NativeStage::Pixel,
                    start_slot: 0,
                    buffers,
                } if buffers == &[None]
            )
        })
        .unwrap();
    assert!(unbind > draw);
    assert!(scene.null.bound().stage(NativeStage::Pixel).constant_buffers.is_empty());
    assert!(scene.null.bound().render_targets.is_empty());

    assert_eq!(
        vkbridge_d3d11::wait_for_fences(&scene.device, &[fence], true, u64::MAX),
        vk::Result::SUCCESS
    );
}

#[test]
fn test_one_time_buffer_is_invalid_after_submit() {
    let scene = build_scene();
    let cmd = record(&scene, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    let queue = Queue::new(scene.device.clone());
    let batch = SubmitBatch {
        command_buffers: vec![cmd.clone()],
    };
    queue.submit(std::slice::from_ref(&batch), None).unwrap();
    assert_eq!(cmd.state(), CommandBufferState::Invalid);

    let err = queue.submit(&[batch], None).unwrap_err();
    assert_eq!(err.to_vk_result(), vk::Result::ERROR_VALIDATION_FAILED_EXT);
    assert!(cmd.begin(vk::CommandBufferUsageFlags::empty(), None).is_err());
    cmd.reset();
    assert_eq!(cmd.state(), CommandBufferState::Initial);
}

#[test]
fn test_draw_outside_render_pass_is_rejected() {
    let scene = build_scene();
    let cmd = CommandBuffer::new(vk::CommandBufferLevel::PRIMARY);
    cmd.begin(vk::CommandBufferUsageFlags::empty(), None).unwrap();
    cmd.bind_pipeline(Pipeline::Graphics(scene.pipeline.clone())).unwrap();
    let err = cmd.draw(3, 1, 0, 0).unwrap_err();
    assert_eq!(err.to_vk_result(), vk::Result::ERROR_VALIDATION_FAILED_EXT);
    assert_eq!(cmd.command_count(), 1);
}

#[test]
fn test_load_op_clear_is_limited_to_render_area() {
    let scene = build_scene();
    let area = vk::Rect2D {
        offset: vk::Offset2D { x: 8, y: 16 },
        extent: vk::Extent2D { width: 32, height: 24 },
    };
    let cmd = record_in(&scene, vk::CommandBufferUsageFlags::empty(), area);
    scene.null.take_calls();
    Queue::new(scene.device.clone())
        .submit(
            &[SubmitBatch {
                command_buffers: vec![cmd],
            }],
            None,
        )
        .unwrap();

    let calls = scene.null.calls();
    let rects: Vec<&Vec<Rect>> = calls
        .iter()
        .filter_map(|c| match c {
            NativeCall::ClearView { rects, .. } => Some(rects),
            _ => None,
        })
        .collect();
    assert_eq!(
        rects,
        vec![&vec![Rect {
            left: 8,
            top: 16,
            right: 40,
            bottom: 40,
        }]]
    );
    assert!(!calls.iter().any(|c| matches!(c, NativeCall::ClearRenderTargetView { .. })));
}

#[test]
fn test_fragment_uavs_follow_subpass_colour_count() {
    vkbridge_common::logging::init_logging();
    let null = NullDevice::new(FeatureLevel::L11_0);
    let device = Device::new(null.clone(), BridgeConfig::default()).unwrap();
    let colour = |load_op| AttachmentDesc {
        format: vk::Format::R8G8B8A8_UNORM,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
    };
    let render_pass = Arc::new(RenderPass::new(
        vec![colour(vk::AttachmentLoadOp::LOAD), colour(vk::AttachmentLoadOp::LOAD)],
        vec![
            SubpassDesc {
                colors: vec![Some(0)],
                ..Default::default()
            },
            SubpassDesc {
                colors: vec![Some(0), Some(1)],
                ..Default::default()
            },
        ],
    ));
    let extent = vk::Extent2D { width: 16, height: 16 };
    let framebuffer = Arc::new(Framebuffer::new(Vec::new(), extent, 1));

    let mut lock = device.lock_context();
    let mut ctx = Context::new(&device, &mut *lock);
    BeginRenderPass {
        render_pass,
        framebuffer,
        render_area: vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        },
        clear_values: Vec::new(),
    }
    .apply(&mut ctx)
    .unwrap();
    BeginSubpass { subpass: 0 }.apply(&mut ctx).unwrap();

    let uav = UnorderedAccessView(7);
    ctx.bind_unordered_access(vk::ShaderStageFlags::FRAGMENT, 0, Some(uav));
    assert_eq!(null.bound().uav_start, 1);
    null.take_calls();

    BeginSubpass { subpass: 1 }.apply(&mut ctx).unwrap();
    let calls = null.take_calls();
    assert!(calls.contains(&NativeCall::OmSetUnorderedAccessViews {
        uav_start: 2,
        views: vec![Some(uav)],
    }));
    assert_eq!(null.bound().uav_start, 2);
    assert_eq!(null.bound().pixel_uavs.get(&2), Some(&uav));
}
