//! Query pools backed by one native query per Vulkan query.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use tracing::trace;

use crate::device::Device;
use crate::error::NativeError;
use crate::native::{self, DeviceContext, NativeQuery, Owned, QueryKind};

pub struct QueryPool {
    kind: QueryKind,
    queries: Vec<Owned<NativeQuery>>,
    /// Whether each query has been ended since its last reset.
    issued: Mutex<Vec<bool>>,
}

impl QueryPool {
    pub fn new(device: &Device, query_type: vk::QueryType, count: u32) -> Result<Arc<Self>, NativeError> {
        let kind = match query_type {
            vk::QueryType::OCCLUSION => QueryKind::Occlusion,
            vk::QueryType::TIMESTAMP => QueryKind::Timestamp,
            other => return Err(NativeError::Unsupported(format!("query type {:?}", other))),
        };
        let queries = (0..count)
            .map(|_| native::create(device.native(), |d| d.create_query(kind)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arc::new(Self {
            kind,
            queries,
            issued: Mutex::new(vec![false; count as usize]),
        }))
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    fn query(&self, index: u32) -> Option<NativeQuery> {
        self.queries.get(index as usize).map(Owned::get)
    }

    pub fn begin(&self, ctx: &mut dyn DeviceContext, index: u32) {
        if let Some(query) = self.query(index) {
            ctx.begin_query(query);
        }
    }

    pub fn end(&self, ctx: &mut dyn DeviceContext, index: u32) {
        if let Some(query) = self.query(index) {
            ctx.end_query(query);
            if let Some(issued) = self.issued.lock().get_mut(index as usize) {
                *issued = true;
            }
        }
    }

    /// Timestamps are single-ended queries.
    pub fn write_timestamp(&self, ctx: &mut dyn DeviceContext, index: u32) {
        self.end(ctx, index);
    }

    pub fn reset(&self, first: u32, count: u32) {
        let mut issued = self.issued.lock();
        for i in first..first.saturating_add(count) {
            if let Some(flag) = issued.get_mut(i as usize) {
                *flag = false;
            }
        }
    }

    /// Results of `count` queries from `first`; `None` where a result is not
    /// available. With `wait`, polls every issued query until it completes.
    pub fn results(&self, device: &Device, first: u32, count: u32, wait: bool) -> Vec<Option<u64>> {
        let issued = self.issued.lock().clone();
        let mut ctx = device.lock_context();
        let mut out = Vec::with_capacity(count as usize);
        for index in first..first.saturating_add(count) {
            let Some(query) = self.query(index) else {
                out.push(None);
                continue;
            };
            if !issued.get(index as usize).copied().unwrap_or(false) {
                trace!("query {} has not been issued", index);
                out.push(None);
                continue;
            }
            let mut value = ctx.query_data(query);
            while value.is_none() && wait {
                std::thread::sleep(device.poll_interval());
                value = ctx.query_data(query);
            }
            out.push(value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::null::NullDevice;
    use vkbridge_core::{BridgeConfig, FeatureLevel};

    #[test]
    fn unissued_queries_have_no_result() {
        let native = NullDevice::new(FeatureLevel::L11_0);
        let device = Device::new(native, BridgeConfig::default()).unwrap();
        let pool = QueryPool::new(&device, vk::QueryType::TIMESTAMP, 2).unwrap();
        {
            let mut ctx = device.lock_context();
            pool.write_timestamp(&mut *ctx, 1);
        }
        let results = pool.results(&device, 0, 2, true);
        assert_eq!(results[0], None);
        assert!(results[1].is_some());

        pool.reset(0, 2);
        assert_eq!(pool.results(&device, 0, 2, false), vec![None, None]);
    }

    #[test]
    fn pipeline_statistics_are_unsupported() {
        let native = NullDevice::new(FeatureLevel::L11_0);
        let device = Device::new(native, BridgeConfig::default()).unwrap();
        let result = QueryPool::new(&device, vk::QueryType::PIPELINE_STATISTICS, 1);
        assert!(matches!(result, Err(NativeError::Unsupported(_))));
    }
}
