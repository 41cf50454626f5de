//! Graphics and compute pipelines.
//!
//! Creation compiles every stage against the pipeline layout's binding map,
//! builds the input layout from the vertex shader's reflection and bakes the
//! fixed-function state into native state objects. Binding happens in
//! `BindPipeline` at replay.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::ShaderError;
use crate::layout::PipelineLayout;
use crate::native::{
    self, Blend, BlendDesc, BlendOp, BlendState, CullMode, DepthStencilDesc, DepthStencilState, InputLayout, NativeStage,
    Owned, PrimitiveTopology, RasterizerDesc, RasterizerState, Rect, RenderTargetBlend, StencilFace, StencilOp, Viewport,
};
use crate::renderpass::RenderPass;
use crate::resource::comparison_func;
use crate::shader::{reflect, CompileRequest, CompiledShader, ShaderModule, SpecializationConstant, VertexInputState};

/// One `VkPipelineShaderStageCreateInfo`.
#[derive(Clone)]
pub struct ShaderStageInfo {
    pub stage: vk::ShaderStageFlags,
    pub module: Arc<ShaderModule>,
    pub entry_point: String,
    pub specialization: Vec<SpecializationConstant>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizationInfo {
    pub depth_clamp: bool,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias_enable: bool,
    pub depth_bias_constant: f32,
    pub depth_bias_clamp: f32,
    pub depth_bias_slope: f32,
}

impl Default for RasterizationInfo {
    fn default() -> Self {
        Self {
            depth_clamp: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias_enable: false,
            depth_bias_constant: 0.0,
            depth_bias_clamp: 0.0,
            depth_bias_slope: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DepthStencilInfo {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub stencil_test: bool,
    pub front: vk::StencilOpState,
    pub back: vk::StencilOpState,
}

#[derive(Debug, Clone, Default)]
pub struct ColorBlendInfo {
    pub attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    pub constants: [f32; 4],
}

#[derive(Clone)]
pub struct GraphicsPipelineDesc {
    pub flags: vk::PipelineCreateFlags,
    pub stages: Vec<ShaderStageInfo>,
    pub vertex_input: VertexInputState,
    pub topology: vk::PrimitiveTopology,
    pub patch_control_points: u32,
    pub viewports: Vec<vk::Viewport>,
    pub scissors: Vec<vk::Rect2D>,
    pub rasterization: RasterizationInfo,
    pub samples: vk::SampleCountFlags,
    pub sample_mask: u32,
    pub alpha_to_coverage: bool,
    pub depth_stencil: DepthStencilInfo,
    pub color_blend: ColorBlendInfo,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub layout: Arc<PipelineLayout>,
    pub render_pass: Arc<RenderPass>,
    pub subpass: u32,
}

// ── Conversions ─────────────────────────────────────────────

fn topology(topology: vk::PrimitiveTopology, control_points: u32) -> PrimitiveTopology {
    match topology {
        vk::PrimitiveTopology::POINT_LIST => PrimitiveTopology::PointList,
        vk::PrimitiveTopology::LINE_LIST => PrimitiveTopology::LineList,
        vk::PrimitiveTopology::LINE_STRIP => PrimitiveTopology::LineStrip,
        vk::PrimitiveTopology::TRIANGLE_STRIP => PrimitiveTopology::TriangleStrip,
        vk::PrimitiveTopology::LINE_LIST_WITH_ADJACENCY => PrimitiveTopology::LineListAdj,
        vk::PrimitiveTopology::LINE_STRIP_WITH_ADJACENCY => PrimitiveTopology::LineStripAdj,
        vk::PrimitiveTopology::TRIANGLE_LIST_WITH_ADJACENCY => PrimitiveTopology::TriangleListAdj,
        vk::PrimitiveTopology::TRIANGLE_STRIP_WITH_ADJACENCY => PrimitiveTopology::TriangleStripAdj,
        vk::PrimitiveTopology::PATCH_LIST => PrimitiveTopology::PatchList(control_points.clamp(1, 32)),
        _ => PrimitiveTopology::TriangleList,
    }
}

fn blend_factor(factor: vk::BlendFactor) -> Blend {
    match factor {
        vk::BlendFactor::ZERO => Blend::Zero,
        vk::BlendFactor::SRC_COLOR => Blend::SrcColor,
        vk::BlendFactor::ONE_MINUS_SRC_COLOR => Blend::InvSrcColor,
        vk::BlendFactor::DST_COLOR => Blend::DestColor,
        vk::BlendFactor::ONE_MINUS_DST_COLOR => Blend::InvDestColor,
        vk::BlendFactor::SRC_ALPHA => Blend::SrcAlpha,
        vk::BlendFactor::ONE_MINUS_SRC_ALPHA => Blend::InvSrcAlpha,
        vk::BlendFactor::DST_ALPHA => Blend::DestAlpha,
        vk::BlendFactor::ONE_MINUS_DST_ALPHA => Blend::InvDestAlpha,
        vk::BlendFactor::CONSTANT_COLOR | vk::BlendFactor::CONSTANT_ALPHA => Blend::BlendFactor,
        vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR | vk::BlendFactor::ONE_MINUS_CONSTANT_ALPHA => {
            Blend::InvBlendFactor
        }
        vk::BlendFactor::SRC_ALPHA_SATURATE => Blend::SrcAlphaSat,
        vk::BlendFactor::SRC1_COLOR => Blend::Src1Color,
        vk::BlendFactor::ONE_MINUS_SRC1_COLOR => Blend::InvSrc1Color,
        vk::BlendFactor::SRC1_ALPHA => Blend::Src1Alpha,
        vk::BlendFactor::ONE_MINUS_SRC1_ALPHA => Blend::InvSrc1Alpha,
        _ => Blend::One,
    }
}

fn blend_op(op: vk::BlendOp) -> BlendOp {
    match op {
        vk::BlendOp::SUBTRACT => BlendOp::Subtract,
        vk::BlendOp::REVERSE_SUBTRACT => BlendOp::RevSubtract,
        vk::BlendOp::MIN => BlendOp::Min,
        vk::BlendOp::MAX => BlendOp::Max,
        _ => BlendOp::Add,
    }
}

fn stencil_op(op: vk::StencilOp) -> StencilOp {
    match op {
        vk::StencilOp::ZERO => StencilOp::Zero,
        vk::StencilOp::REPLACE => StencilOp::Replace,
        vk::StencilOp::INCREMENT_AND_CLAMP => StencilOp::IncrSat,
        vk::StencilOp::DECREMENT_AND_CLAMP => StencilOp::DecrSat,
        vk::StencilOp::INVERT => StencilOp::Invert,
        vk::StencilOp::INCREMENT_AND_WRAP => StencilOp::Incr,
        vk::StencilOp::DECREMENT_AND_WRAP => StencilOp::Decr,
        _ => StencilOp::Keep,
    }
}

fn stencil_face(state: &vk::StencilOpState) -> StencilFace {
    StencilFace {
        fail: stencil_op(state.fail_op),
        depth_fail: stencil_op(state.depth_fail_op),
        pass: stencil_op(state.pass_op),
        func: comparison_func(state.compare_op),
    }
}

fn rasterizer_desc(info: &RasterizationInfo, samples: vk::SampleCountFlags) -> RasterizerDesc {
    let cull = if info.cull_mode.contains(vk::CullModeFlags::FRONT_AND_BACK) {
        debug!("FRONT_AND_BACK culling has no native equivalent, culling back faces");
        CullMode::Back
    } else if info.cull_mode.contains(vk::CullModeFlags::FRONT) {
        CullMode::Front
    } else if info.cull_mode.contains(vk::CullModeFlags::BACK) {
        CullMode::Back
    } else {
        CullMode::None
    };
    let (depth_bias, depth_bias_clamp, slope_scaled_depth_bias) = if info.depth_bias_enable {
        (info.depth_bias_constant as i32, info.depth_bias_clamp, info.depth_bias_slope)
    } else {
        (0, 0.0, 0.0)
    };
    RasterizerDesc {
        wireframe: info.polygon_mode == vk::PolygonMode::LINE,
        cull,
        front_counter_clockwise: info.front_face == vk::FrontFace::COUNTER_CLOCKWISE,
        depth_bias,
        depth_bias_clamp,
        slope_scaled_depth_bias,
        depth_clip: !info.depth_clamp,
        scissor: true,
        multisample: samples != vk::SampleCountFlags::TYPE_1,
    }
}

fn blend_desc(info: &ColorBlendInfo, alpha_to_coverage: bool) -> BlendDesc {
    let mut desc = BlendDesc {
        alpha_to_coverage,
        independent: info.attachments.len() > 1,
        ..Default::default()
    };
    for (target, a) in desc.targets.iter_mut().zip(&info.attachments) {
        *target = RenderTargetBlend {
            enable: a.blend_enable == vk::TRUE,
            src: blend_factor(a.src_color_blend_factor),
            dst: blend_factor(a.dst_color_blend_factor),
            op: blend_op(a.color_blend_op),
            src_alpha: blend_factor(a.src_alpha_blend_factor),
            dst_alpha: blend_factor(a.dst_alpha_blend_factor),
            op_alpha: blend_op(a.alpha_blend_op),
            write_mask: (a.color_write_mask.as_raw() & 0xf) as u8,
        };
    }
    desc
}

fn depth_stencil_desc(info: &DepthStencilInfo) -> DepthStencilDesc {
    DepthStencilDesc {
        depth_enable: info.depth_test,
        depth_write: info.depth_write,
        depth_func: comparison_func(info.depth_compare),
        stencil_enable: info.stencil_test,
        stencil_read_mask: info.front.compare_mask as u8,
        stencil_write_mask: info.front.write_mask as u8,
        front: stencil_face(&info.front),
        back: stencil_face(&info.back),
    }
}

pub(crate) fn viewport(v: &vk::Viewport) -> Viewport {
    Viewport {
        x: v.x,
        y: v.y,
        width: v.width,
        height: v.height,
        min_depth: v.min_depth,
        max_depth: v.max_depth,
    }
}

pub(crate) fn rect(r: &vk::Rect2D) -> Rect {
    Rect {
        left: r.offset.x,
        top: r.offset.y,
        right: r.offset.x + r.extent.width as i32,
        bottom: r.offset.y + r.extent.height as i32,
    }
}

// ── Graphics pipeline ───────────────────────────────────────

pub struct GraphicsPipeline {
    shaders: [Option<CompiledShader>; 6],
    input_layout: Option<Owned<InputLayout>>,
    topology: PrimitiveTopology,
    rasterizer: Owned<RasterizerState>,
    blend: Owned<BlendState>,
    depth_stencil: Owned<DepthStencilState>,
    blend_constants: [f32; 4],
    stencil_reference: u32,
    sample_mask: u32,
    viewports: Vec<Viewport>,
    scissors: Vec<Rect>,
    dynamic_states: Vec<vk::DynamicState>,
    vertex_strides: HashMap<u32, u32>,
    layout: Arc<PipelineLayout>,
}

impl GraphicsPipeline {
    pub fn new(device: &Device, desc: &GraphicsPipelineDesc) -> Result<Arc<Self>, ShaderError> {
        let uav_offset = desc.render_pass.color_count(desc.subpass);
        let mut shaders: [Option<CompiledShader>; 6] = Default::default();
        for stage in &desc.stages {
            let compiled = stage.module.compile(
                device,
                &CompileRequest {
                    stage: stage.stage,
                    entry_point: &stage.entry_point,
                    specialization: &stage.specialization,
                    layout: &desc.layout,
                    flags: desc.flags,
                    uav_offset,
                },
            )?;
            let index = compiled.stage().index();
            shaders[index] = Some(compiled);
        }

        let input_layout = match &shaders[NativeStage::Vertex.index()] {
            Some(vs) => {
                let elements = reflect::input_elements(vs.reflection(), &desc.vertex_input)?;
                if elements.is_empty() {
                    None
                } else {
                    Some(native::create(device.native(), |d| {
                        d.create_input_layout(&elements, vs.bytecode())
                    })?)
                }
            }
            None => None,
        };

        let rasterizer = native::create(device.native(), |d| {
            d.create_rasterizer_state(&rasterizer_desc(&desc.rasterization, desc.samples))
        })?;
        let blend = native::create(device.native(), |d| {
            d.create_blend_state(&blend_desc(&desc.color_blend, desc.alpha_to_coverage))
        })?;
        let depth_stencil = native::create(device.native(), |d| {
            d.create_depth_stencil_state(&depth_stencil_desc(&desc.depth_stencil))
        })?;

        let dynamic = |state| desc.dynamic_states.contains(&state);
        let viewports = if dynamic(vk::DynamicState::VIEWPORT) {
            Vec::new()
        } else {
            desc.viewports.iter().map(viewport).collect()
        };
        let scissors = if dynamic(vk::DynamicState::SCISSOR) {
            Vec::new()
        } else {
            desc.scissors.iter().map(rect).collect()
        };

        info!(
            "created graphics pipeline with {} stages",
            shaders.iter().filter(|s| s.is_some()).count()
        );
        Ok(Arc::new(Self {
            shaders,
            input_layout,
            topology: topology(desc.topology, desc.patch_control_points),
            rasterizer,
            blend,
            depth_stencil,
            blend_constants: desc.color_blend.constants,
            stencil_reference: desc.depth_stencil.front.reference,
            sample_mask: desc.sample_mask,
            viewports,
            scissors,
            dynamic_states: desc.dynamic_states.clone(),
            vertex_strides: desc
                .vertex_input
                .bindings
                .iter()
                .map(|b| (b.binding, b.stride))
                .collect(),
            layout: desc.layout.clone(),
        }))
    }

    pub fn shader(&self, stage: NativeStage) -> Option<&CompiledShader> {
        self.shaders[stage.index()].as_ref()
    }

    pub fn input_layout(&self) -> Option<InputLayout> {
        self.input_layout.as_ref().map(Owned::get)
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn rasterizer_state(&self) -> RasterizerState {
        self.rasterizer.get()
    }

    pub fn blend_state(&self) -> BlendState {
        self.blend.get()
    }

    pub fn depth_stencil_state(&self) -> DepthStencilState {
        self.depth_stencil.get()
    }

    pub fn blend_constants(&self) -> [f32; 4] {
        self.blend_constants
    }

    pub fn stencil_reference(&self) -> u32 {
        self.stencil_reference
    }

    pub fn sample_mask(&self) -> u32 {
        self.sample_mask
    }

    pub fn is_dynamic(&self, state: vk::DynamicState) -> bool {
        self.dynamic_states.contains(&state)
    }

    /// Static viewports; empty when viewports are dynamic.
    pub fn viewports(&self) -> &[Viewport] {
        &self.viewports
    }

    pub fn scissors(&self) -> &[Rect] {
        &self.scissors
    }

    pub fn vertex_stride(&self, binding: u32) -> u32 {
        self.vertex_strides.get(&binding).copied().unwrap_or(0)
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

// ── Compute pipeline ────────────────────────────────────────

pub struct ComputePipeline {
    shader: CompiledShader,
    layout: Arc<PipelineLayout>,
}

impl ComputePipeline {
    pub fn new(
        device: &Device,
        stage: &ShaderStageInfo,
        layout: Arc<PipelineLayout>,
        flags: vk::PipelineCreateFlags,
    ) -> Result<Arc<Self>, ShaderError> {
        let shader = stage.module.compile(
            device,
            &CompileRequest {
                stage: vk::ShaderStageFlags::COMPUTE,
                entry_point: &stage.entry_point,
                specialization: &stage.specialization,
                layout: &layout,
                flags,
                uav_offset: 0,
            },
        )?;
        info!("created compute pipeline {}", shader.entry_point());
        Ok(Arc::new(Self { shader, layout }))
    }

    pub fn shader(&self) -> &CompiledShader {
        &self.shader
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

/// A pipeline as bound by `vkCmdBindPipeline`.
#[derive(Clone)]
pub enum Pipeline {
    Graphics(Arc<GraphicsPipeline>),
    Compute(Arc<ComputePipeline>),
}

impl Pipeline {
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        match self {
            Pipeline::Graphics(_) => vk::PipelineBindPoint::GRAPHICS,
            Pipeline::Compute(_) => vk::PipelineBindPoint::COMPUTE,
        }
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        match self {
            Pipeline::Graphics(p) => p.layout(),
            Pipeline::Compute(p) => p.layout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_lists_keep_control_points() {
        assert_eq!(
            topology(vk::PrimitiveTopology::PATCH_LIST, 3),
            PrimitiveTopology::PatchList(3)
        );
        assert_eq!(
            topology(vk::PrimitiveTopology::TRIANGLE_LIST, 0),
            PrimitiveTopology::TriangleList
        );
    }

    #[test]
    fn rasterizer_maps_cull_and_winding() {
        let desc = rasterizer_desc(
            &RasterizationInfo {
                cull_mode: vk::CullModeFlags::BACK,
                front_face: vk::FrontFace::CLOCKWISE,
                depth_clamp: true,
                ..Default::default()
            },
            vk::SampleCountFlags::TYPE_4,
        );
        assert_eq!(desc.cull, CullMode::Back);
        assert!(!desc.front_counter_clockwise);
        assert!(!desc.depth_clip);
        assert!(desc.multisample);
    }

    #[test]
    fn blend_attachments_fill_targets_in_order() {
        let attachment = vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::TRUE,
            src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
            dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        };
        let desc = blend_desc(
            &ColorBlendInfo {
                attachments: vec![attachment],
                constants: [0.0; 4],
            },
            false,
        );
        assert!(desc.targets[0].enable);
        assert_eq!(desc.targets[0].src, Blend::SrcAlpha);
        assert_eq!(desc.targets[0].dst, Blend::InvSrcAlpha);
        assert_eq!(desc.targets[0].write_mask, 0xf);
        assert!(!desc.targets[1].enable);
    }
}
