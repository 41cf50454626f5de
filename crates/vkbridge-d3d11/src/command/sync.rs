//! Barriers, events and queries.
//!
//! Replay is strictly in record order against one context, so barriers and
//! event waits have nothing to do; they are recorded so the command list
//! mirrors what the application asked for.

use std::sync::Arc;

use ash::vk;

use super::Replay;
use crate::context::Context;
use crate::error::ReplayError;
use crate::query::QueryPool;
use crate::queue::Event;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineBarrier {
    pub src_stages: vk::PipelineStageFlags,
    pub dst_stages: vk::PipelineStageFlags,
}

impl Replay for PipelineBarrier {
    const NAME: &'static str = "PipelineBarrier";

    fn apply(&self, _ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct SetEvent {
    pub event: Arc<Event>,
}

impl Replay for SetEvent {
    const NAME: &'static str = "SetEvent";

    fn apply(&self, _ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        self.event.set();
        Ok(())
    }
}

#[derive(Clone)]
pub struct ResetEvent {
    pub event: Arc<Event>,
}

impl Replay for ResetEvent {
    const NAME: &'static str = "ResetEvent";

    fn apply(&self, _ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        self.event.reset();
        Ok(())
    }
}

#[derive(Clone)]
pub struct WaitEvents {
    pub events: Vec<Arc<Event>>,
}

impl Replay for WaitEvents {
    const NAME: &'static str = "WaitEvents";

    fn apply(&self, _ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct BeginQuery {
    pub pool: Arc<QueryPool>,
    pub query: u32,
}

impl Replay for BeginQuery {
    const NAME: &'static str = "BeginQuery";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        self.pool.begin(ctx.native(), self.query);
        Ok(())
    }
}

#[derive(Clone)]
pub struct EndQuery {
    pub pool: Arc<QueryPool>,
    pub query: u32,
}

impl Replay for EndQuery {
    const NAME: &'static str = "EndQuery";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        self.pool.end(ctx.native(), self.query);
        Ok(())
    }
}

#[derive(Clone)]
pub struct ResetQueryPool {
    pub pool: Arc<QueryPool>,
    pub first: u32,
    pub count: u32,
}

impl Replay for ResetQueryPool {
    const NAME: &'static str = "ResetQueryPool";

    fn apply(&self, _ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        self.pool.reset(self.first, self.count);
        Ok(())
    }
}

#[derive(Clone)]
pub struct WriteTimestamp {
    pub pool: Arc<QueryPool>,
    pub query: u32,
}

impl Replay for WriteTimestamp {
    const NAME: &'static str = "WriteTimestamp";

    fn apply(&self, ctx: &mut Context<'_>) -> Result<(), ReplayError> {
        self.pool.write_timestamp(ctx.native(), self.query);
        Ok(())
    }
}
