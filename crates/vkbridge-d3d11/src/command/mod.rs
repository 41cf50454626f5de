//! Recorded commands.
//!
//! Every `vkCmd*` call captures its arguments into one [`Command`] value at
//! record time. Replay walks the list in order calling [`Command::apply`]
//! against a [`Context`]; binding commands also implement `remove`, the
//! symmetric unbind, since the native context has no "unbind everything"
//! call.

pub mod bind;
pub mod clear;
pub mod draw;
pub mod pass;
pub mod sync;
pub mod transfer;

use crate::context::Context;
use crate::error::ReplayError;

pub use bind::{
    BindDescriptorSet, BindIndexBuffer, BindPipeline, BindVertexBuffers, PushConstants, SetBlendConstants,
    SetScissor, SetStencilReference, SetViewport,
};
pub use clear::{ClearAttachments, ClearColorImage, ClearDepthStencilImage};
pub use draw::{Dispatch, DispatchIndirect, Draw, DrawIndexed, DrawIndexedIndirect, DrawIndirect};
pub use pass::{BeginRenderPass, BeginSubpass, EndRenderPass, EndSubpass};
pub use sync::{BeginQuery, EndQuery, PipelineBarrier, ResetEvent, ResetQueryPool, SetEvent, WaitEvents, WriteTimestamp};
pub use transfer::{
    BlitImage, CopyBuffer, CopyBufferToImage, CopyImage, CopyImageToBuffer, FillBuffer, GenerateMips, ResolveImage,
    UpdateBuffer,
};

/// Replay behaviour shared by every command payload.
pub trait Replay {
    const NAME: &'static str;

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError>;

    /// Undo what `apply` bound. Commands that bind nothing keep the default.
    fn remove(&self, _ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        Ok(())
    }
}

macro_rules! commands {
    ($($variant:ident),* $(,)?) => {
        /// A recorded command. Cloning yields an independent copy; shared
        /// pieces are immutable `Arc`s.
        #[derive(Clone)]
        pub enum Command {
            $($variant($variant),)*
        }

        impl Command {
            pub fn name(&self) -> &'static str {
                match self {
                    $(Command::$variant(_) => <$variant as Replay>::NAME,)*
                }
            }

            pub fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
                match self {
                    $(Command::$variant(c) => c.apply(ctx),)*
                }
            }

            pub fn remove(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
                match self {
                    $(Command::$variant(c) => c.remove(ctx),)*
                }
            }
        }

        $(
            impl From<$variant> for Command {
                fn from(c: $variant) -> Self {
                    Command::$variant(c)
                }
            }
        )*
    };
}

commands! {
    BindPipeline,
    BindDescriptorSet,
    PushConstants,
    BindVertexBuffers,
    BindIndexBuffer,
    SetViewport,
    SetScissor,
    SetBlendConstants,
    SetStencilReference,
    Draw,
    DrawIndexed,
    DrawIndirect,
    DrawIndexedIndirect,
    Dispatch,
    DispatchIndirect,
    CopyBuffer,
    CopyImage,
    CopyBufferToImage,
    CopyImageToBuffer,
    BlitImage,
    ResolveImage,
    UpdateBuffer,
    FillBuffer,
    GenerateMips,
    ClearColorImage,
    ClearDepthStencilImage,
    ClearAttachments,
    BeginRenderPass,
    BeginSubpass,
    EndSubpass,
    EndRenderPass,
    PipelineBarrier,
    SetEvent,
    ResetEvent,
    WaitEvents,
    BeginQuery,
    EndQuery,
    ResetQueryPool,
    WriteTimestamp,
}
