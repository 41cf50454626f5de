//! What pipelines need from a compiled shader's reflection: the vertex input
//! layout and whether a push-constant buffer was generated.

use ash::vk;

use crate::error::ShaderError;
use crate::format;
use crate::layout::PUSH_CONSTANT_SLOT;
use crate::native::{InputElement, ShaderReflection, SignatureParameter};

/// Semantic the HLSL generator gives `layout(location = N)` inputs.
pub const LOCATION_SEMANTIC: &str = "LOC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: vk::VertexInputRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

/// `VkPipelineVertexInputStateCreateInfo`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexInputState {
    pub bindings: Vec<VertexBinding>,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexInputState {
    pub fn binding(&self, binding: u32) -> Option<&VertexBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    pub fn attribute(&self, location: u32) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|a| a.location == location)
    }
}

/// Vertex attribute location an input parameter reads.
///
/// Generated shaders name inputs `LOC<n>`; hand-written sources are matched
/// by declaration order.
pub fn location_of(param: &SignatureParameter) -> u32 {
    if param.semantic == LOCATION_SEMANTIC {
        param.semantic_index
    } else {
        param.register
    }
}

/// Build the native input layout for a vertex shader.
pub fn input_elements(
    reflection: &ShaderReflection,
    input: &VertexInputState,
) -> Result<Vec<InputElement>, ShaderError> {
    reflection
        .inputs
        .iter()
        .map(|param| {
            let location = location_of(param);
            let attribute = input.attribute(location).ok_or_else(|| {
                ShaderError::Unsupported(format!("vertex input location {} has no attribute", location))
            })?;
            let per_instance = input
                .binding(attribute.binding)
                .is_some_and(|b| b.input_rate == vk::VertexInputRate::INSTANCE);
            let native = format::to_native(attribute.format);
            if native.is_unknown() {
                return Err(ShaderError::Native(crate::error::NativeError::UnsupportedFormat(
                    attribute.format,
                )));
            }
            Ok(InputElement {
                semantic: param.semantic.clone(),
                semantic_index: param.semantic_index,
                format: native,
                input_slot: attribute.binding,
                offset: attribute.offset,
                per_instance,
                step_rate: u32::from(per_instance),
            })
        })
        .collect()
}

/// Whether the shader declares the push-constant buffer. Generated
/// push-constant blocks carry no binding of their own, so the source text is
/// checked for the reserved register alongside the reflected bind point.
pub fn uses_push_constants(source: &str, reflection: &ShaderReflection) -> bool {
    let marker = format!("register(b{})", PUSH_CONSTANT_SLOT);
    source.contains(&marker)
        && reflection
            .constant_buffers
            .iter()
            .any(|cb| cb.bind_point == PUSH_CONSTANT_SLOT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::ConstantBufferDesc;

    fn param(semantic: &str, index: u32, register: u32) -> SignatureParameter {
        SignatureParameter {
            semantic: semantic.into(),
            semantic_index: index,
            register,
            components: 4,
        }
    }

    fn state() -> VertexInputState {
        VertexInputState {
            bindings: vec![
                VertexBinding {
                    binding: 0,
                    stride: 12,
                    input_rate: vk::VertexInputRate::VERTEX,
                },
                VertexBinding {
                    binding: 1,
                    stride: 16,
                    input_rate: vk::VertexInputRate::INSTANCE,
                },
            ],
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    binding: 0,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: 0,
                },
                VertexAttribute {
                    location: 3,
                    binding: 1,
                    format: vk::Format::R32G32B32A32_SFLOAT,
                    offset: 0,
                },
            ],
        }
    }

    #[test]
    fn location_semantics_pick_attributes() {
        let reflection = ShaderReflection {
            inputs: vec![param("LOC", 0, 0), param("LOC", 3, 1)],
            constant_buffers: Vec::new(),
        };
        let elements = input_elements(&reflection, &state()).unwrap();
        assert_eq!(elements.len(), 2);
        assert!(!elements[0].per_instance);
        assert_eq!(elements[1].input_slot, 1);
        assert!(elements[1].per_instance);
        assert_eq!(elements[1].step_rate, 1);
    }

    #[test]
    fn missing_attribute_is_reported() {
        let reflection = ShaderReflection {
            inputs: vec![param("LOC", 5, 0)],
            constant_buffers: Vec::new(),
        };
        assert!(matches!(
            input_elements(&reflection, &state()),
            Err(ShaderError::Unsupported(_))
        ));
    }

    #[test]
    fn push_constants_need_marker_and_bind_point() {
        let reflection = ShaderReflection {
            inputs: Vec::new(),
            constant_buffers: vec![ConstantBufferDesc {
                name: "pc".into(),
                bind_point: PUSH_CONSTANT_SLOT,
                size: 16,
            }],
        };
        assert!(uses_push_constants("cbuffer pc : register(b13) { float4 x; }", &reflection));
        assert!(!uses_push_constants("cbuffer pc { float4 x; }", &reflection));
        assert!(!uses_push_constants("register(b13)", &ShaderReflection::default()));
    }
}
