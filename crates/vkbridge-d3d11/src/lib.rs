//! Vulkan-on-Direct3D 11 translation engine.
//!
//! Vulkan objects and commands are re-expressed in terms of a native
//! D3D11-shaped backend reached through the traits in [`native`]. Command
//! buffers record [`command::Command`] values which are replayed in order
//! against the device's single immediate context at submission time.

pub mod cmdbuf;
pub mod command;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod format;
pub mod layout;
pub mod native;
pub mod pipeline;
pub mod query;
pub mod queue;
pub mod renderpass;
pub mod resource;
pub mod shader;

pub use cmdbuf::{CommandBuffer, CommandBufferState, CommandPool, Inheritance};
pub use command::Command;
pub use context::Context;
pub use descriptor::{DescriptorPool, DescriptorSet};
pub use device::Device;
pub use error::{LayoutError, NativeError, RecordError, ReplayError, ShaderError};
pub use layout::{DescriptorSetLayout, PipelineLayout, ShaderBindings};
pub use pipeline::{ComputePipeline, GraphicsPipeline, Pipeline};
pub use query::QueryPool;
pub use queue::{wait_for_fences, Event, Fence, Queue, Semaphore, SubmitBatch};
pub use renderpass::{Framebuffer, RenderPass};
pub use resource::{Buffer, BufferView, Image, ImageView, Sampler};
pub use shader::ShaderModule;
