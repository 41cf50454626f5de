//! Shader modules: SPIR-V → HLSL cross-compilation with the binding rewrite,
//! native compilation and reflection.
//!
//! SPIR-V input goes through [`translate`]: entry-point lookup, the
//! specialization constants, the combined-sampler split, the flat register
//! rewrite from the pipeline layout's binding map and the push-constant
//! lowering, then naga's HLSL backend. Anything that does not start with the
//! SPIR-V magic is treated as HLSL source and compiled as-is.

mod hlsl;
pub mod reflect;
pub mod spirv;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use tracing::{debug, error, warn};
use vkbridge_core::FeatureLevel;

use crate::device::Device;
use crate::error::ShaderError;
use crate::layout::{PipelineLayout, ShaderBindings};
use crate::native::{self, NativeShader, NativeStage, Owned, ShaderReflection};

pub use reflect::{VertexAttribute, VertexBinding, VertexInputState};
pub use spirv::SpirvModule;

/// One `VkSpecializationMapEntry` with its bytes already sliced out of the
/// data blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecializationConstant {
    pub id: u32,
    pub data: Vec<u8>,
}

/// Native shader profile for `stage` at `feature_level`, or `None` when the
/// stage is not available there.
pub fn profile(feature_level: FeatureLevel, stage: NativeStage) -> Option<String> {
    let tessellation = matches!(stage, NativeStage::Hull | NativeStage::Domain);
    if tessellation && !feature_level.supports_tessellation() {
        return None;
    }
    if stage == NativeStage::Geometry && !feature_level.supports_geometry() {
        return None;
    }
    let model = match feature_level {
        FeatureLevel::L11_0 | FeatureLevel::L11_1 => "5_0",
        FeatureLevel::L10_1 => "4_1",
        FeatureLevel::L10_0 => "4_0",
        FeatureLevel::L9_3 | FeatureLevel::L9_1 | FeatureLevel::L9_2 => {
            if !matches!(stage, NativeStage::Vertex | NativeStage::Pixel) {
                return None;
            }
            if feature_level == FeatureLevel::L9_3 {
                "4_0_level_9_3"
            } else {
                "4_0_level_9_1"
            }
        }
    };
    Some(format!("{}_{}", stage.profile_prefix(), model))
}

fn naga_stage(stage: NativeStage) -> Option<naga::ShaderStage> {
    match stage {
        NativeStage::Vertex => Some(naga::ShaderStage::Vertex),
        NativeStage::Pixel => Some(naga::ShaderStage::Fragment),
        NativeStage::Compute => Some(naga::ShaderStage::Compute),
        NativeStage::Hull | NativeStage::Domain | NativeStage::Geometry => None,
    }
}

// ── SPIR-V translation ──────────────────────────────────────

pub struct TranslateRequest<'a> {
    pub stage: NativeStage,
    pub entry_point: &'a str,
    pub specialization: &'a [SpecializationConstant],
    pub bindings: &'a ShaderBindings,
    /// First fragment-stage UAV register (the colour attachment count).
    pub uav_offset: u32,
    /// Leave bindings missing from the layout unbound instead of failing.
    pub tolerant: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub source: String,
    pub entry_point: String,
    pub push_constants: bool,
}

/// Cross-compile a SPIR-V module to HLSL with flattened registers.
pub fn translate(code: &[u8], request: &TranslateRequest<'_>) -> Result<Translation, ShaderError> {
    let mut module = SpirvModule::parse(code)?;
    module.find_entry_point(request.stage, request.entry_point)?;

    let values: HashMap<u32, Vec<u8>> = request
        .specialization
        .iter()
        .map(|c| (c.id, c.data.clone()))
        .collect();
    module.specialize(&values);
    module.split_combined_samplers()?;
    let mut targets = module.remap_bindings(request.bindings, request.stage, request.uav_offset, request.tolerant)?;
    let push_constants = module.lower_push_constants();
    if push_constants {
        targets.push(spirv::push_constant_binding());
    }

    let stage = naga_stage(request.stage).ok_or_else(|| {
        ShaderError::Unsupported(format!("SPIR-V {:?} shaders", request.stage))
    })?;

    let options = naga::front::spv::Options {
        adjust_coordinate_space: true,
        strict_capabilities: false,
        ..Default::default()
    };
    let ir = naga::front::spv::parse_u8_slice(&module.to_bytes(), &options)
        .map_err(|e| ShaderError::InvalidSpirv(e.to_string()))?;
    let info = naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
        .validate(&ir)
        .map_err(|e| ShaderError::CrossCompile(e.into_inner().to_string()))?;

    let binding_map = targets
        .iter()
        .map(|t| {
            let binding = naga::ResourceBinding {
                group: t.group,
                binding: t.binding,
            };
            let target = naga::back::hlsl::BindTarget {
                space: 0,
                register: t.register,
                binding_array_size: None,
                dynamic_storage_buffer_offsets_index: None,
                restrict_indexing: false,
            };
            (binding, target)
        })
        .collect();
    let hlsl_options = naga::back::hlsl::Options {
        // naga's lowest model; the native profile is picked by `profile`.
        shader_model: naga::back::hlsl::ShaderModel::V5_0,
        binding_map,
        // The per-group sampler index buffers have no map entry.
        fake_missing_bindings: true,
        ..Default::default()
    };
    let pipeline_options = naga::back::hlsl::PipelineOptions {
        entry_point: Some((stage, request.entry_point.to_string())),
        ..Default::default()
    };
    let mut source = String::new();
    let reflection = naga::back::hlsl::Writer::new(&mut source, &hlsl_options, &pipeline_options)
        .write(&ir, &info, None)
        .map_err(|e| ShaderError::CrossCompile(e.to_string()))?;
    let source = hlsl::bind_samplers_directly(&source)?;
    let entry_point = reflection
        .entry_point_names
        .into_iter()
        .find_map(Result::ok)
        .ok_or_else(|| ShaderError::EntryPointNotFound {
            name: request.entry_point.to_string(),
            stage: request.stage.vk_flag(),
        })?;

    debug!(
        "translated {:?} entry {} ({} bytes of HLSL)",
        request.stage,
        entry_point,
        source.len()
    );
    Ok(Translation {
        source,
        entry_point,
        push_constants,
    })
}

// ── Shader module ───────────────────────────────────────────

enum ShaderCode {
    Spirv(Vec<u8>),
    Hlsl(String),
}

pub struct ShaderModule {
    code: ShaderCode,
}

pub struct CompileRequest<'a> {
    pub stage: vk::ShaderStageFlags,
    pub entry_point: &'a str,
    pub specialization: &'a [SpecializationConstant],
    pub layout: &'a PipelineLayout,
    pub flags: vk::PipelineCreateFlags,
    pub uav_offset: u32,
}

pub struct CompiledShader {
    stage: NativeStage,
    shader: Owned<NativeShader>,
    bytecode: Vec<u8>,
    source: String,
    entry_point: String,
    reflection: ShaderReflection,
    push_constants: bool,
    warnings: Option<String>,
}

static DUMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl ShaderModule {
    pub fn new(code: &[u8]) -> Result<Self, ShaderError> {
        let code = if spirv::is_spirv(code) {
            ShaderCode::Spirv(code.to_vec())
        } else {
            let text = std::str::from_utf8(code)
                .map_err(|_| ShaderError::InvalidSpirv("neither SPIR-V nor UTF-8 source".into()))?;
            ShaderCode::Hlsl(text.trim_end_matches('\0').to_string())
        };
        Ok(Self { code })
    }

    pub fn is_spirv(&self) -> bool {
        matches!(self.code, ShaderCode::Spirv(_))
    }

    pub fn compile(&self, device: &Device, request: &CompileRequest<'_>) -> Result<CompiledShader, ShaderError> {
        let feature_level = device.feature_level();
        let stage = NativeStage::from_vk(request.stage)
            .ok_or_else(|| ShaderError::Unsupported(format!("shader stage {:?}", request.stage)))?;
        let profile = profile(feature_level, stage).ok_or(ShaderError::UnsupportedStage {
            stage: request.stage,
            feature_level,
        })?;

        let (source, entry_point) = match &self.code {
            ShaderCode::Spirv(bytes) => {
                let tolerant = device.config().shader.tolerant_derivatives
                    && request.flags.contains(vk::PipelineCreateFlags::ALLOW_DERIVATIVES);
                let translation = translate(
                    bytes,
                    &TranslateRequest {
                        stage,
                        entry_point: request.entry_point,
                        specialization: request.specialization,
                        bindings: request.layout.get_shader_bindings(),
                        uav_offset: request.uav_offset,
                        tolerant,
                    },
                )?;
                (translation.source, translation.entry_point)
            }
            ShaderCode::Hlsl(text) => (text.clone(), request.entry_point.to_string()),
        };
        dump_source(device, &source, &entry_point, &profile);

        let compiler = device.native().shader_compiler();
        let output = compiler.compile(&source, &entry_point, &profile).map_err(|failure| {
            error!("{} compilation of {} failed:\n{}", profile, entry_point, failure.messages);
            ShaderError::Compilation {
                diagnostics: failure.messages,
                generated: source.clone(),
            }
        })?;
        let warnings = (!output.messages.is_empty()).then(|| {
            warn!(
                "{} compilation of {} produced warnings:\n{}\n--- source ---\n{}",
                profile, entry_point, output.messages, source
            );
            output.messages.clone()
        });

        let shader = native::create(device.native(), |d| d.create_shader(stage, &output.bytecode))?;
        let reflection = compiler.reflect(&output.bytecode)?;
        let push_constants = reflect::uses_push_constants(&source, &reflection);

        Ok(CompiledShader {
            stage,
            shader,
            bytecode: output.bytecode,
            source,
            entry_point,
            reflection,
            push_constants,
            warnings,
        })
    }
}

fn dump_source(device: &Device, source: &str, entry_point: &str, profile: &str) {
    let Some(dir) = device.config().shader.dump_dir.as_deref() else {
        return;
    };
    let n = DUMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = PathBuf::from(dir).join(format!("{:04}_{}_{}.hlsl", n, entry_point, profile));
    let written = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&path, source));
    match written {
        Ok(()) => debug!("wrote {}", path.display()),
        Err(e) => warn!("failed to dump shader to {}: {}", path.display(), e),
    }
}

impl CompiledShader {
    pub fn stage(&self) -> NativeStage {
        self.stage
    }

    pub fn get_native_handle(&self) -> NativeShader {
        self.shader.get()
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    pub fn uses_push_constants(&self) -> bool {
        self.push_constants
    }

    pub fn warnings(&self) -> Option<&str> {
        self.warnings.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::null::NullDevice;
    use std::sync::Arc;
    use vkbridge_core::BridgeConfig;

    #[test]
    fn profile_table_follows_feature_level() {
        assert_eq!(profile(FeatureLevel::L11_0, NativeStage::Hull).as_deref(), Some("hs_5_0"));
        assert_eq!(profile(FeatureLevel::L10_1, NativeStage::Geometry).as_deref(), Some("gs_4_1"));
        assert_eq!(profile(FeatureLevel::L10_0, NativeStage::Domain), None);
        assert_eq!(
            profile(FeatureLevel::L9_3, NativeStage::Pixel).as_deref(),
            Some("ps_4_0_level_9_3")
        );
        assert_eq!(
            profile(FeatureLevel::L9_1, NativeStage::Vertex).as_deref(),
            Some("vs_4_0_level_9_1")
        );
        assert_eq!(profile(FeatureLevel::L9_2, NativeStage::Compute), None);
    }

    fn empty_layout(level: FeatureLevel) -> PipelineLayout {
        PipelineLayout::new(Vec::new(), Vec::new(), level).unwrap()
    }

    fn device(level: FeatureLevel) -> Arc<Device> {
        Device::new(NullDevice::new(level), BridgeConfig::default()).unwrap()
    }

    fn request<'a>(layout: &'a PipelineLayout, stage: vk::ShaderStageFlags) -> CompileRequest<'a> {
        CompileRequest {
            stage,
            entry_point: "main",
            specialization: &[],
            layout,
            flags: vk::PipelineCreateFlags::empty(),
            uav_offset: 0,
        }
    }

    #[test]
    fn hlsl_source_passes_through() {
        let device = device(FeatureLevel::L11_0);
        let layout = empty_layout(FeatureLevel::L11_0);
        let module = ShaderModule::new(b"float4 main() : SV_Target { return 1; }").unwrap();
        assert!(!module.is_spirv());
        let compiled = module
            .compile(&device, &request(&layout, vk::ShaderStageFlags::FRAGMENT))
            .unwrap();
        assert_eq!(compiled.stage(), NativeStage::Pixel);
        assert!(compiled.bytecode().starts_with(b"// ps_5_0 main"));
        assert!(compiled.warnings().is_none());
    }

    #[test]
    fn compile_failure_carries_diagnostics_and_source() {
        let device = device(FeatureLevel::L11_0);
        let layout = empty_layout(FeatureLevel::L11_0);
        let module = ShaderModule::new(b"#error nope\nfloat4 main() : SV_Target { return 1; }").unwrap();
        match module.compile(&device, &request(&layout, vk::ShaderStageFlags::FRAGMENT)) {
            Err(ShaderError::Compilation { diagnostics, generated }) => {
                assert!(diagnostics.contains("nope"));
                assert!(generated.contains("SV_Target"));
            }
            _ => panic!("expected a compilation error"),
        }
    }

    #[test]
    fn warnings_are_surfaced() {
        let device = device(FeatureLevel::L11_0);
        let layout = empty_layout(FeatureLevel::L11_0);
        let module =
            ShaderModule::new(b"#pragma message \"slow path\"\nfloat4 main() : SV_Target { return 1; }").unwrap();
        let compiled = module
            .compile(&device, &request(&layout, vk::ShaderStageFlags::FRAGMENT))
            .unwrap();
        assert!(compiled.warnings().unwrap().contains("slow path"));
    }

    #[test]
    fn stage_outside_feature_level_is_rejected() {
        let device = device(FeatureLevel::L10_0);
        let layout = empty_layout(FeatureLevel::L10_0);
        let module = ShaderModule::new(b"void main() {}").unwrap();
        let err = module
            .compile(&device, &request(&layout, vk::ShaderStageFlags::TESSELLATION_CONTROL))
            .err()
            .unwrap();
        assert!(matches!(err, ShaderError::UnsupportedStage { .. }));
    }
}
