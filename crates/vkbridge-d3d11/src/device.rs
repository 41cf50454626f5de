//! Logical device: owns the native device, its single immediate context and
//! the objects every submission shares.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};
use vkbridge_core::{BridgeConfig, FeatureLevel};

use crate::error::NativeError;
use crate::native::{
    self, BindFlags, BufferDesc, DeviceContext, MiscFlags, NativeBuffer, NativeDevice, NativeQuery, Owned,
    QueryKind,
};

pub struct Device {
    native: Arc<dyn NativeDevice>,
    context: Mutex<Box<dyn DeviceContext>>,
    config: BridgeConfig,
    push_constants: Owned<NativeBuffer>,
    idle_query: Owned<NativeQuery>,
}

/// Exclusive, scoped access to the immediate context. Held for the whole of
/// one submission and released on every exit path.
pub struct DeviceContextLock<'a> {
    guard: MutexGuard<'a, Box<dyn DeviceContext>>,
}

impl Deref for DeviceContextLock<'_> {
    type Target = dyn DeviceContext;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for DeviceContextLock<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

impl Device {
    pub fn new(native: Arc<dyn NativeDevice>, config: BridgeConfig) -> Result<Arc<Self>, NativeError> {
        let feature_level = native.feature_level();
        info!(
            "creating device at feature level {} (push constants: {} bytes)",
            feature_level, config.device.push_constant_size
        );

        let push_constants = native::create(&native, |d| {
            d.create_buffer(
                &BufferDesc {
                    size: config.device.push_constant_size,
                    bind: BindFlags::CONSTANT_BUFFER,
                    misc: MiscFlags::empty(),
                    dynamic: true,
                },
                None,
            )
        })?;
        let idle_query = native::create(&native, |d| d.create_query(QueryKind::Event))?;
        let context = Mutex::new(native.immediate_context());

        Ok(Arc::new(Self {
            native,
            context,
            config,
            push_constants,
            idle_query,
        }))
    }

    pub fn native(&self) -> &Arc<dyn NativeDevice> {
        &self.native
    }

    pub fn feature_level(&self) -> FeatureLevel {
        self.native.feature_level()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The reserved constant buffer push constants are written to.
    pub fn push_constant_buffer(&self) -> NativeBuffer {
        self.push_constants.get()
    }

    pub fn push_constant_size(&self) -> u32 {
        self.config.device.push_constant_size
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.config.queue.poll_interval_us)
    }

    pub fn lock_context(&self) -> DeviceContextLock<'_> {
        DeviceContextLock {
            guard: self.context.lock(),
        }
    }

    /// Block until all submitted work has completed: issue an event query
    /// behind the outstanding work and poll it.
    pub fn wait_idle(&self) {
        let mut ctx = self.lock_context();
        let query = self.idle_query.get();
        ctx.end_query(query);
        ctx.flush();
        let mut polls = 0u64;
        while ctx.query_data(query).is_none() {
            polls += 1;
            std::thread::sleep(self.poll_interval());
        }
        debug!("device idle after {} polls", polls);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::null::{NativeCall, NullDevice};

    #[test]
    fn wait_idle_polls_until_event_query_completes() {
        let null = NullDevice::new(FeatureLevel::L11_0);
        null.set_query_latency(3);
        let device = Device::new(null.clone(), BridgeConfig::default()).unwrap();
        device.wait_idle();
        let calls = null.calls();
        assert!(matches!(calls[0], NativeCall::EndQuery(_)));
        assert_eq!(calls[1], NativeCall::Flush);
    }

    #[test]
    fn push_constant_buffer_is_dynamic_and_sized_from_config() {
        let null = NullDevice::new(FeatureLevel::L11_0);
        let mut config = BridgeConfig::default();
        config.device.push_constant_size = 128;
        let device = Device::new(null.clone(), config).unwrap();
        let contents = null.buffer_contents(device.push_constant_buffer()).unwrap();
        assert_eq!(contents.len(), 128);
    }
}
