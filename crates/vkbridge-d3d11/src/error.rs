//! Error types for the translation engine.
//!
//! Every error converts to the `VkResult` an ABI wrapper should return via
//! `to_vk_result()`.

use ash::vk;
use vkbridge_core::FeatureLevel;

use crate::layout::ResourceClass;

/// Failure of a native backend call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NativeError {
    #[error("native {kind} creation failed: {reason}")]
    CreationFailed { kind: &'static str, reason: String },

    #[error("format {0:?} has no native equivalent")]
    UnsupportedFormat(vk::Format),

    #[error("mapping native buffer {0:#x} failed")]
    MapFailed(u64),

    #[error("{0} is not supported by the native backend")]
    Unsupported(String),

    #[error("{what} requires feature level {required}, device is {actual}")]
    FeatureLevel {
        what: &'static str,
        required: FeatureLevel,
        actual: FeatureLevel,
    },
}

impl NativeError {
    pub fn to_vk_result(&self) -> vk::Result {
        match self {
            NativeError::UnsupportedFormat(_) => vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            NativeError::FeatureLevel { .. } | NativeError::Unsupported(_) => vk::Result::ERROR_FEATURE_NOT_PRESENT,
            NativeError::MapFailed(_) => vk::Result::ERROR_MEMORY_MAP_FAILED,
            NativeError::CreationFailed { .. } => vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        }
    }
}

/// Failure while building descriptor-set or pipeline layouts, or while
/// writing descriptors into a set.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("set {set} binding {binding} exceeds the {limit} native {class:?} slots")]
    SlotExhausted {
        class: ResourceClass,
        set: u32,
        binding: u32,
        limit: u32,
    },

    #[error("descriptor type {0:?} is not supported")]
    UnsupportedDescriptorType(vk::DescriptorType),

    #[error("binding {0} is not declared in the descriptor set layout")]
    UnknownBinding(u32),

    #[error("binding {binding} is declared as {declared:?}, write uses {written:?}")]
    TypeMismatch {
        binding: u32,
        declared: vk::DescriptorType,
        written: vk::DescriptorType,
    },

    #[error("write to binding {binding} overflows the layout by {overflow} descriptors")]
    WriteOverflow { binding: u32, overflow: u32 },

    #[error("binding {0} declared twice")]
    DuplicateBinding(u32),
}

impl LayoutError {
    pub fn to_vk_result(&self) -> vk::Result {
        match self {
            LayoutError::UnsupportedDescriptorType(_) => vk::Result::ERROR_FEATURE_NOT_PRESENT,
            LayoutError::SlotExhausted { .. } => vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            _ => vk::Result::ERROR_VALIDATION_FAILED_EXT,
        }
    }
}

/// Failure of the shader adapter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShaderError {
    #[error("invalid SPIR-V: {0}")]
    InvalidSpirv(String),

    #[error("no entry point {name:?} for stage {stage:?}")]
    EntryPointNotFound {
        name: String,
        stage: vk::ShaderStageFlags,
    },

    #[error("set {set} binding {binding} is not declared in the pipeline layout")]
    UnresolvedBinding { set: u32, binding: u32 },

    #[error("stage {stage:?} is not available at feature level {feature_level}")]
    UnsupportedStage {
        stage: vk::ShaderStageFlags,
        feature_level: FeatureLevel,
    },

    #[error("unsupported shader feature: {0}")]
    Unsupported(String),

    #[error("cross-compilation failed: {0}")]
    CrossCompile(String),

    #[error("native compilation failed:\n{diagnostics}")]
    Compilation { diagnostics: String, generated: String },

    #[error(transparent)]
    Native(#[from] NativeError),
}

impl ShaderError {
    pub fn to_vk_result(&self) -> vk::Result {
        match self {
            ShaderError::Native(e) => e.to_vk_result(),
            ShaderError::UnsupportedStage { .. } | ShaderError::Unsupported(_) => {
                vk::Result::ERROR_FEATURE_NOT_PRESENT
            }
            _ => vk::Result::ERROR_INVALID_SHADER_NV,
        }
    }
}

/// Misuse of the command-buffer recording API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("command buffer is {actual:?}, expected {expected}")]
    InvalidState {
        actual: crate::cmdbuf::CommandBufferState,
        expected: &'static str,
    },

    #[error("one-time-submit command buffer must be reset before it is recorded again")]
    OneTimeSubmitNotReset,

    #[error("descriptor set {set} needs {expected} dynamic offsets, {actual} supplied")]
    DynamicOffsetCount {
        set: u32,
        expected: usize,
        actual: usize,
    },

    #[error("{0} recorded outside a render pass")]
    NotInRenderPass(&'static str),

    #[error("{0} recorded inside a render pass")]
    InsideRenderPass(&'static str),

    #[error("no graphics pipeline bound for {0}")]
    NoPipelineBound(&'static str),

    #[error("descriptor set index {index} out of range for layout with {count} sets")]
    SetOutOfRange { index: u32, count: usize },

    #[error(transparent)]
    Native(#[from] NativeError),
}

impl RecordError {
    pub fn to_vk_result(&self) -> vk::Result {
        match self {
            RecordError::Native(e) => e.to_vk_result(),
            _ => vk::Result::ERROR_VALIDATION_FAILED_EXT,
        }
    }
}

/// Internal invariant violation detected while replaying a command.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplayError {
    #[error("unsupported dynamic descriptor type {0:?}")]
    UnsupportedDynamicDescriptorType(vk::DescriptorType),

    #[error("binding {binding}: no dynamic offset at index {index}")]
    MissingDynamicOffset { binding: u32, index: u32 },

    #[error("{0} replayed without an active render pass")]
    NoActiveRenderPass(&'static str),

    #[error("command buffer submitted while {0:?}")]
    NotExecutable(crate::cmdbuf::CommandBufferState),

    #[error(transparent)]
    Native(#[from] NativeError),
}

impl ReplayError {
    pub fn to_vk_result(&self) -> vk::Result {
        match self {
            ReplayError::NotExecutable(_) => vk::Result::ERROR_VALIDATION_FAILED_EXT,
            _ => vk::Result::ERROR_DEVICE_LOST,
        }
    }
}
