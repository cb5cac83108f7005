use crate::address::PlcAddress;
use crate::drivers::traits::{DeviceDriver, DriverConfig, DriverResult, TagRequest};
use crate::tags::structures::{Quality, TagValue, ValueVariant};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// In-memory device image addressed like a real data block.
///
/// Used by the binary for `driver_type = "simulated"` devices and by tests
/// to inject values and connection faults.
#[derive(Debug)]
pub struct SimulatedDriver {
    config: DriverConfig,
    memory: DashMap<String, ValueVariant>,
    connected: AtomicBool,
    online: AtomicBool,
    connect_attempts: AtomicU64,
    read_cycles: AtomicU64,
    writes: Mutex<Vec<(String, ValueVariant)>>,
    connect_delay: Mutex<Duration>,
}

/// Canonical key so `db1.dbw2` and `DB1.DBW2` share a slot.
fn memory_key(address: &str) -> String {
    PlcAddress::parse(address)
        .map(|a| a.to_string())
        .unwrap_or_else(|| address.trim().to_string())
}

impl SimulatedDriver {
    pub fn new(config: DriverConfig) -> Self {
        SimulatedDriver {
            config,
            memory: DashMap::new(),
            connected: AtomicBool::new(false),
            online: AtomicBool::new(true),
            connect_attempts: AtomicU64::new(0),
            read_cycles: AtomicU64::new(0),
            writes: Mutex::new(Vec::new()),
            connect_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_value(&self, address: &str, value: ValueVariant) {
        self.memory.insert(memory_key(address), value);
    }

    pub fn value(&self, address: &str) -> Option<ValueVariant> {
        self.memory.get(&memory_key(address)).map(|v| v.value().clone())
    }

    /// Simulate cable pulls: while offline every call fails.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if !online {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Make every connection attempt take `delay` before it completes.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn read_cycles(&self) -> u64 {
        self.read_cycles.load(Ordering::SeqCst)
    }

    /// Writes received so far, as (address, value).
    pub fn writes(&self) -> Vec<(String, ValueVariant)> {
        self.writes.lock().clone()
    }

    fn ensure_online(&self) -> DriverResult<()> {
        if !self.online.load(Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(format!("device '{}' is unreachable", self.config.id).into());
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(format!("device '{}' is not connected", self.config.id).into());
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceDriver for SimulatedDriver {
    fn config(&self) -> &DriverConfig {
        &self.config
    }

    async fn connect(&self) -> DriverResult<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            warn!("Simulated device '{}' refused connection", self.config.id);
            return Err(format!("connection to {} refused", self.config.address).into());
        }
        self.connected.store(true, Ordering::SeqCst);
        info!("Simulated driver connected to {}", self.config.address);
        Ok(())
    }

    async fn disconnect(&self) -> DriverResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn check_status(&self) -> DriverResult<()> {
        self.ensure_online()
    }

    async fn read_tags(&self, tags: &[TagRequest]) -> DriverResult<HashMap<String, TagValue>> {
        self.ensure_online()?;
        self.read_cycles.fetch_add(1, Ordering::SeqCst);

        let mut result = HashMap::with_capacity(tags.len());
        for req in tags {
            let value = self
                .memory
                .get(&memory_key(&req.address))
                .and_then(|v| v.value().coerce_to(req.data_type));
            let tag_value = match value {
                Some(v) => TagValue::new(v, Quality::Good),
                None => TagValue::bad(Quality::Bad),
            };
            result.insert(req.name.clone(), tag_value);
        }
        debug!(
            "Simulated read of {} tags from {}",
            result.len(),
            self.config.id
        );
        Ok(result)
    }

    async fn write_tag(&self, tag: &TagRequest, value: ValueVariant) -> DriverResult<()> {
        self.ensure_online()?;
        let key = memory_key(&tag.address);
        self.memory.insert(key.clone(), value.clone());
        self.writes.lock().push((key, value));
        Ok(())
    }
}
