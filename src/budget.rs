use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StreamError};
use crate::types::VideoKey;

#[derive(Debug, Default)]
struct BudgetInner {
    default_limit: Option<u64>,
    limits: HashMap<u32, u64>,
    used: Mutex<HashMap<u32, u64>>,
}

impl BudgetInner {
    fn limit(&self, device_id: u32) -> Option<u64> {
        self.limits.get(&device_id).copied().or(self.default_limit)
    }
}

/// 按设备记账的显存预算，克隆后共享同一份账本
#[derive(Debug, Clone, Default)]
pub struct DeviceMemoryBudget {
    inner: Arc<BudgetInner>,
}

impl DeviceMemoryBudget {
    /// 不限额，只记账
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// 所有设备使用同一个上限
    pub fn with_limit(bytes: u64) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                default_limit: Some(bytes),
                ..Default::default()
            }),
        }
    }

    /// 按设备单独设置上限，未列出的设备不限额
    pub fn with_device_limits(limits: impl IntoIterator<Item = (u32, u64)>) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                limits: limits.into_iter().collect(),
                ..Default::default()
            }),
        }
    }

    pub fn limit(&self, device_id: u32) -> Option<u64> {
        self.inner.limit(device_id)
    }

    pub fn in_use(&self, device_id: u32) -> u64 {
        self.inner.used.lock().get(&device_id).copied().unwrap_or(0)
    }

    pub fn reserve(&self, key: &VideoKey, device_id: u32, bytes: u64) -> Result<Reservation> {
        let mut used = self.inner.used.lock();
        let in_use = used.get(&device_id).copied().unwrap_or(0);
        if let Some(limit) = self.inner.limit(device_id) {
            if in_use.saturating_add(bytes) > limit {
                return Err(StreamError::ResourceExhausted {
                    key: key.clone(),
                    device_id,
                    requested: bytes,
                    in_use,
                    limit,
                });
            }
        }
        used.insert(device_id, in_use + bytes);
        Ok(Reservation {
            inner: Arc::clone(&self.inner),
            device_id,
            bytes,
        })
    }
}

/// 一段已预留的显存，drop 时归还
#[derive(Debug)]
pub struct Reservation {
    inner: Arc<BudgetInner>,
    device_id: u32,
    bytes: u64,
}

impl Reservation {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut used = self.inner.used.lock();
        if let Some(in_use) = used.get_mut(&self.device_id) {
            *in_use = in_use.saturating_sub(self.bytes);
        }
    }
}
