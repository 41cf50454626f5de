//! Draw and dispatch commands.

use std::sync::Arc;

use super::Replay;
use crate::context::Context;
use crate::error::ReplayError;
use crate::resource::Buffer;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Draw {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl Replay for Draw {
    const NAME: &'static str = "Draw";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        ctx.native().draw_instanced(
            self.vertex_count,
            self.instance_count,
            self.first_vertex,
            self.first_instance,
        );
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawIndexed {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

impl Replay for DrawIndexed {
    const NAME: &'static str = "DrawIndexed";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        ctx.native().draw_indexed_instanced(
            self.index_count,
            self.instance_count,
            self.first_index,
            self.vertex_offset,
            self.first_instance,
        );
        Ok(())
    }
}

/// Argument offsets of `draw_count` indirect draws `stride` bytes apart.
fn indirect_offsets(offset: u64, draw_count: u32, stride: u32) -> impl Iterator<Item = u32> {
    (0..u64::from(draw_count)).map(move |i| (offset + i * u64::from(stride)) as u32)
}

#[derive(Clone)]
pub struct DrawIndirect {
    pub buffer: Arc<Buffer>,
    pub offset: u64,
    pub draw_count: u32,
    pub stride: u32,
}

impl Replay for DrawIndirect {
    const NAME: &'static str = "DrawIndirect";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        let args = self.buffer.get_buffer();
        for offset in indirect_offsets(self.offset, self.draw_count, self.stride) {
            ctx.native().draw_instanced_indirect(args, offset);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct DrawIndexedIndirect {
    pub buffer: Arc<Buffer>,
    pub offset: u64,
    pub draw_count: u32,
    pub stride: u32,
}

impl Replay for DrawIndexedIndirect {
    const NAME: &'static str = "DrawIndexedIndirect";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        let args = self.buffer.get_buffer();
        for offset in indirect_offsets(self.offset, self.draw_count, self.stride) {
            ctx.native().draw_indexed_instanced_indirect(args, offset);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispatch {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Replay for Dispatch {
    const NAME: &'static str = "Dispatch";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        ctx.native().dispatch(self.x, self.y, self.z);
        Ok(())
    }
}

#[derive(Clone)]
pub struct DispatchIndirect {
    pub buffer: Arc<Buffer>,
    pub offset: u64,
}

impl Replay for DispatchIndirect {
    const NAME: &'static str = "DispatchIndirect";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        ctx.native()
            .dispatch_indirect(self.buffer.get_buffer(), self.offset as u32);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indirect_draws_honour_stride() {
        let offsets: Vec<u32> = indirect_offsets(8, 3, 20).collect();
        assert_eq!(offsets, vec![8, 28, 48]);
        assert_eq!(indirect_offsets(0, 0, 16).count(), 0);
    }
}
