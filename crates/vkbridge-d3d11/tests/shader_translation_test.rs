//! Integration test: SPIR-V → HLSL translation
//!
//! Builds SPIR-V from WGSL with naga, translates it against a pipeline
//! layout and checks the flat registers in the generated HLSL.
//!
//! Run with: cargo test --test shader_translation_test -- --nocapture

use std::sync::Arc;

use ash::vk;
use vkbridge_core::{BridgeConfig, FeatureLevel};
use vkbridge_d3d11::layout::SetLayoutBinding;
use vkbridge_d3d11::native::null::NullDevice;
use vkbridge_d3d11::native::NativeStage;
use vkbridge_d3d11::shader::{translate, CompileRequest, TranslateRequest};
use vkbridge_d3d11::{DescriptorSetLayout, Device, PipelineLayout, ShaderError, ShaderModule};

fn compile_wgsl_to_spirv(wgsl_source: &str, stage: naga::ShaderStage, entry_point: &str) -> Vec<u8> {
    let module = naga::front::wgsl::parse_str(wgsl_source).expect("failed to parse WGSL");

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .expect("WGSL validation failed");

    let options = naga::back::spv::Options {
        lang_version: (1, 0),
        ..Default::default()
    };
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: stage,
        entry_point: entry_point.to_string(),
    };

    let mut writer = naga::back::spv::Writer::new(&options).expect("failed to create SPIR-V writer");
    let mut words = Vec::new();
    writer
        .write(&module, &info, Some(&pipeline_options), &None, &mut words)
        .expect("failed to generate SPIR-V");
    let mut spirv_bytes = Vec::new();
    for word in &words {
        spirv_bytes.extend_from_slice(&word.to_le_bytes());
    }
    spirv_bytes
}

fn set_layout(bindings: &[(u32, vk::DescriptorType)], stages: vk::ShaderStageFlags) -> Arc<DescriptorSetLayout> {
    let bindings: Vec<SetLayoutBinding> = bindings
        .iter()
        .map(|&(binding, descriptor_type)| SetLayoutBinding {
            binding,
            descriptor_type,
            count: 1,
            stages,
            immutable_samplers: Vec::new(),
        })
        .collect();
    Arc::new(DescriptorSetLayout::new(&bindings).unwrap())
}

const FRAGMENT_WGSL: &str = r#"
struct Tint {
    color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> tint: Tint;
@group(1) @binding(0) var<uniform> scale: Tint;
@group(1) @binding(1) var albedo: texture_2d<f32>;

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let texel = textureLoad(albedo, vec2<i32>(position.xy), 0);
    return tint.color * scale.color + texel;
}
"#;

const SAMPLED_WGSL: &str = r#"
struct Tint {
    color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> tint: Tint;
@group(0) @binding(1) var albedo: texture_2d<f32>;
@group(0) @binding(2) var linear_clamp: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(albedo, linear_clamp, uv) * tint.color;
}
"#;

const COMPUTE_WGSL: &str = r#"
@group(0) @binding(0) var<uniform> factor: vec4<f32>;
@group(0) @binding(1) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(64)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    data[id.x] = data[id.x] * factor.x;
}
"#;

const STORAGE_FRAGMENT_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read_write> counters: array<atomic<u32>>;

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    atomicAdd(&counters[0], 1u);
    return vec4<f32>(1.0);
}
"#;

fn fragment_layout() -> PipelineLayout {
    let stages = vk::ShaderStageFlags::FRAGMENT;
    PipelineLayout::new(
        vec![
            set_layout(&[(0, vk::DescriptorType::UNIFORM_BUFFER)], stages),
            set_layout(
                &[
                    (0, vk::DescriptorType::UNIFORM_BUFFER),
                    (1, vk::DescriptorType::SAMPLED_IMAGE),
                ],
                stages,
            ),
        ],
        Vec::new(),
        FeatureLevel::L11_0,
    )
    .unwrap()
}

#[test]
fn test_fragment_bindings_flatten_to_registers() {
    let spirv = compile_wgsl_to_spirv(FRAGMENT_WGSL, naga::ShaderStage::Fragment, "fs_main");
    let layout = fragment_layout();
    let translation = translate(
        &spirv,
        &TranslateRequest {
            stage: NativeStage::Pixel,
            entry_point: "fs_main",
            specialization: &[],
            bindings: layout.get_shader_bindings(),
            uav_offset: 1,
            tolerant: false,
        },
    )
    .unwrap();
    println!("{}", translation.source);

    assert!(translation.source.contains("register(b0"));
    assert!(translation.source.contains("register(b1"));
    assert!(translation.source.contains("register(t0"));
    assert!(!translation.source.contains("space1"));
    assert!(!translation.push_constants);
}

#[test]
fn test_classes_share_register_numbers() {
    let spirv = compile_wgsl_to_spirv(SAMPLED_WGSL, naga::ShaderStage::Fragment, "fs_main");
    let layout = PipelineLayout::new(
        vec![set_layout(
            &[
                (0, vk::DescriptorType::UNIFORM_BUFFER),
                (1, vk::DescriptorType::SAMPLED_IMAGE),
                (2, vk::DescriptorType::SAMPLER),
            ],
            vk::ShaderStageFlags::FRAGMENT,
        )],
        Vec::new(),
        FeatureLevel::L11_0,
    )
    .unwrap();
    let translation = translate(
        &spirv,
        &TranslateRequest {
            stage: NativeStage::Pixel,
            entry_point: "fs_main",
            specialization: &[],
            bindings: layout.get_shader_bindings(),
            uav_offset: 1,
            tolerant: false,
        },
    )
    .unwrap();
    println!("{}", translation.source);

    assert!(translation.source.contains("register(b0)"));
    assert!(translation.source.contains("register(t0)"));
    assert!(translation.source.contains("SamplerState"));
    assert!(translation.source.contains("register(s0)"));
    assert!(!translation.source.contains("nagaSamplerHeap"));
    assert!(!translation.source.contains(", space"));
}

#[test]
fn test_compute_storage_buffer_becomes_uav() {
    let spirv = compile_wgsl_to_spirv(COMPUTE_WGSL, naga::ShaderStage::Compute, "cs_main");
    let stages = vk::ShaderStageFlags::COMPUTE;
    let layout = PipelineLayout::new(
        vec![set_layout(
            &[
                (0, vk::DescriptorType::UNIFORM_BUFFER),
                (1, vk::DescriptorType::STORAGE_BUFFER),
            ],
            stages,
        )],
        Vec::new(),
        FeatureLevel::L11_0,
    )
    .unwrap();
    let translation = translate(
        &spirv,
        &TranslateRequest {
            stage: NativeStage::Compute,
            entry_point: "cs_main",
            specialization: &[],
            bindings: layout.get_shader_bindings(),
            uav_offset: 0,
            tolerant: false,
        },
    )
    .unwrap();

    assert!(translation.source.contains("register(b0"));
    assert!(translation.source.contains("register(u0"));
}

#[test]
fn test_fragment_uavs_follow_colour_targets() {
    let spirv = compile_wgsl_to_spirv(STORAGE_FRAGMENT_WGSL, naga::ShaderStage::Fragment, "fs_main");
    let layout = PipelineLayout::new(
        vec![set_layout(
            &[(0, vk::DescriptorType::STORAGE_BUFFER)],
            vk::ShaderStageFlags::FRAGMENT,
        )],
        Vec::new(),
        FeatureLevel::L11_0,
    )
    .unwrap();
    let request = |uav_offset| TranslateRequest {
        stage: NativeStage::Pixel,
        entry_point: "fs_main",
        specialization: &[],
        bindings: layout.get_shader_bindings(),
        uav_offset,
        tolerant: false,
    };

    let one_target = translate(&spirv, &request(1)).unwrap();
    assert!(one_target.source.contains("register(u1"));
    let three_targets = translate(&spirv, &request(3)).unwrap();
    assert!(three_targets.source.contains("register(u3"));
}

#[test]
fn test_binding_missing_from_layout() {
    let spirv = compile_wgsl_to_spirv(FRAGMENT_WGSL, naga::ShaderStage::Fragment, "fs_main");
    let layout = PipelineLayout::new(
        vec![set_layout(
            &[(0, vk::DescriptorType::UNIFORM_BUFFER)],
            vk::ShaderStageFlags::FRAGMENT,
        )],
        Vec::new(),
        FeatureLevel::L11_0,
    )
    .unwrap();
    let request = |tolerant| TranslateRequest {
        stage: NativeStage::Pixel,
        entry_point: "fs_main",
        specialization: &[],
        bindings: layout.get_shader_bindings(),
        uav_offset: 1,
        tolerant,
    };

    let err = translate(&spirv, &request(false)).unwrap_err();
    assert!(matches!(err, ShaderError::UnresolvedBinding { set: 1, .. }));
    assert!(translate(&spirv, &request(true)).is_ok());
}

#[test]
fn test_wrong_entry_point_is_reported() {
    let spirv = compile_wgsl_to_spirv(FRAGMENT_WGSL, naga::ShaderStage::Fragment, "fs_main");
    let layout = fragment_layout();
    let err = translate(
        &spirv,
        &TranslateRequest {
            stage: NativeStage::Vertex,
            entry_point: "fs_main",
            specialization: &[],
            bindings: layout.get_shader_bindings(),
            uav_offset: 0,
            tolerant: false,
        },
    )
    .unwrap_err();
    assert!(matches!(err, ShaderError::EntryPointNotFound { .. }));
}

#[test]
fn test_spirv_module_compiles_through_null_backend() {
    let device = Device::new(NullDevice::new(FeatureLevel::L11_0), BridgeConfig::default()).unwrap();
    let spirv = compile_wgsl_to_spirv(FRAGMENT_WGSL, naga::ShaderStage::Fragment, "fs_main");
    let module = ShaderModule::new(&spirv).unwrap();
    assert!(module.is_spirv());

    let layout = fragment_layout();
    let compiled = module
        .compile(
            &device,
            &CompileRequest {
                stage: vk::ShaderStageFlags::FRAGMENT,
                entry_point: "fs_main",
                specialization: &[],
                layout: &layout,
                flags: vk::PipelineCreateFlags::empty(),
                uav_offset: 1,
            },
        )
        .unwrap();
    assert_eq!(compiled.stage(), NativeStage::Pixel);
    assert!(compiled.bytecode().starts_with(b"// ps_5_0"));
}
