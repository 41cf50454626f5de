//! The queue and the host-visible synchronisation objects.
//!
//! Submission replays command buffers in order against the immediate
//! context while holding the context lock. Fences complete through a native
//! event query issued after the batch; waiting on them polls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk;
use tracing::{debug, trace};

use crate::cmdbuf::CommandBuffer;
use crate::device::Device;
use crate::error::{NativeError, ReplayError};
use crate::native::{self, DeviceContext, NativeQuery, Owned, QueryKind};

// ── Fence ───────────────────────────────────────────────────

pub struct Fence {
    signaled: AtomicBool,
    /// An event query is outstanding for the last submission.
    pending: AtomicBool,
    query: Owned<NativeQuery>,
}

impl Fence {
    pub fn new(device: &Device, signaled: bool) -> Result<Arc<Self>, NativeError> {
        let query = native::create(device.native(), |d| d.create_query(QueryKind::Event))?;
        Ok(Arc::new(Self {
            signaled: AtomicBool::new(signaled),
            pending: AtomicBool::new(false),
            query,
        }))
    }

    fn signal_after(&self, ctx: &mut dyn DeviceContext) {
        self.signaled.store(false, Ordering::Release);
        self.pending.store(true, Ordering::Release);
        ctx.end_query(self.query.get());
        ctx.flush();
    }

    /// `SUCCESS` once signalled, `NOT_READY` otherwise. Never blocks on
    /// the GPU.
    pub fn status(&self, device: &Device) -> vk::Result {
        if self.signaled.load(Ordering::Acquire) {
            return vk::Result::SUCCESS;
        }
        if self.pending.load(Ordering::Acquire) && device.lock_context().query_data(self.query.get()).is_some() {
            self.pending.store(false, Ordering::Release);
            self.signaled.store(true, Ordering::Release);
            return vk::Result::SUCCESS;
        }
        vk::Result::NOT_READY
    }

    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
        self.pending.store(false, Ordering::Release);
    }
}

/// `vkWaitForFences`: poll until all (or any) fences are signalled or the
/// timeout expires.
pub fn wait_for_fences(device: &Device, fences: &[Arc<Fence>], wait_all: bool, timeout_ns: u64) -> vk::Result {
    let start = Instant::now();
    let timeout = Duration::from_nanos(timeout_ns);
    let mut polls = 0u64;
    loop {
        let done = fences
            .iter()
            .filter(|f| f.status(device) == vk::Result::SUCCESS)
            .count();
        let complete = if wait_all { done == fences.len() } else { done > 0 || fences.is_empty() };
        if complete {
            trace!("fences signalled after {} polls", polls);
            return vk::Result::SUCCESS;
        }
        if timeout_ns != u64::MAX && start.elapsed() >= timeout {
            debug!("fence wait timed out after {} polls", polls);
            return vk::Result::TIMEOUT;
        }
        polls += 1;
        std::thread::sleep(device.poll_interval());
    }
}

// ── Semaphore and event ─────────────────────────────────────

/// Accepted and ignored: there is a single queue and it executes in order.
#[derive(Debug, Default)]
pub struct Semaphore;

impl Semaphore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[derive(Debug, Default)]
pub struct Event {
    set: AtomicBool,
}

impl Event {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self) {
        self.set.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.set.store(false, Ordering::Release);
    }

    pub fn status(&self) -> vk::Result {
        if self.set.load(Ordering::Acquire) {
            vk::Result::EVENT_SET
        } else {
            vk::Result::EVENT_RESET
        }
    }
}

// ── Queue ───────────────────────────────────────────────────

/// One `VkSubmitInfo`. Semaphores are not carried; see [`Semaphore`].
#[derive(Clone, Default)]
pub struct SubmitBatch {
    pub command_buffers: Vec<Arc<CommandBuffer>>,
}

pub struct Queue {
    device: Arc<Device>,
}

impl Queue {
    pub fn new(device: Arc<Device>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Replay every command buffer of every batch in order under one
    /// acquisition of the context. The first replay failure stops the
    /// submission; the fence is then never signalled.
    pub fn submit(&self, batches: &[SubmitBatch], fence: Option<&Fence>) -> Result<(), ReplayError> {
        let mut ctx = self.device.lock_context();
        for batch in batches {
            for cmd in &batch.command_buffers {
                cmd.submit(&self.device, &mut *ctx)?;
            }
        }
        if let Some(fence) = fence {
            fence.signal_after(&mut *ctx);
        }
        Ok(())
    }

    pub fn wait_idle(&self) {
        self.device.wait_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::null::NullDevice;
    use vkbridge_core::{BridgeConfig, FeatureLevel};

    fn setup() -> (Arc<NullDevice>, Arc<Device>) {
        let null = NullDevice::new(FeatureLevel::L11_0);
        let device = Device::new(null.clone(), BridgeConfig::default()).unwrap();
        (null, device)
    }

    #[test]
    fn fence_signals_once_query_completes() {
        let (null, device) = setup();
        null.set_query_latency(2);
        let queue = Queue::new(device.clone());
        let fence = Fence::new(&device, false).unwrap();
        assert_eq!(fence.status(&device), vk::Result::NOT_READY);

        queue.submit(&[], Some(&fence)).unwrap();
        assert_eq!(fence.status(&device), vk::Result::NOT_READY);
        assert_eq!(
            wait_for_fences(&device, &[fence.clone()], true, u64::MAX),
            vk::Result::SUCCESS
        );
        fence.reset();
        assert_eq!(fence.status(&device), vk::Result::NOT_READY);
    }

    #[test]
    fn unsubmitted_fence_times_out() {
        let (_null, device) = setup();
        let fence = Fence::new(&device, false).unwrap();
        assert_eq!(wait_for_fences(&device, &[fence], true, 1_000), vk::Result::TIMEOUT);
    }

    #[test]
    fn wait_any_returns_on_first_signalled() {
        let (_null, device) = setup();
        let signalled = Fence::new(&device, true).unwrap();
        let waiting = Fence::new(&device, false).unwrap();
        assert_eq!(
            wait_for_fences(&device, &[signalled, waiting], false, 0),
            vk::Result::SUCCESS
        );
    }

    #[test]
    fn events_toggle() {
        let event = Event::new();
        assert_eq!(event.status(), vk::Result::EVENT_RESET);
        event.set();
        assert_eq!(event.status(), vk::Result::EVENT_SET);
        event.reset();
        assert_eq!(event.status(), vk::Result::EVENT_RESET);
    }
}
