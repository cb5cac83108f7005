#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use plc_gateway::channel::{Channel, TagWriter};
use plc_gateway::drivers::simulated::SimulatedDriver;
use plc_gateway::drivers::traits::{DriverConfig, DriverResult};
use plc_gateway::tags::engine::TagEngine;
use plc_gateway::tags::structures::{Tag, ValueVariant};
use plc_gateway::tags::transform::ValueTransformer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

/// Fast-cycling simulated device configuration.
pub fn device_config(id: &str) -> DriverConfig {
    DriverConfig {
        id: id.to_string(),
        name: format!("Test Device {}", id),
        driver_type: "simulated".to_string(),
        address: format!("sim://{}", id),
        scan_rate_ms: Some(20),
        retry_delay_ms: Some(50),
        connect_timeout_ms: None,
    }
}

/// Engine, simulated driver and channel wired together.
pub struct PlcFixture {
    pub engine: TagEngine,
    pub driver: Arc<SimulatedDriver>,
    pub channel: Arc<Channel>,
}

impl PlcFixture {
    pub fn new(device_id: &str, tags: Vec<Tag>) -> Self {
        Self::with_engine(TagEngine::new(), device_id, tags)
    }

    pub fn with_engine(engine: TagEngine, device_id: &str, tags: Vec<Tag>) -> Self {
        let driver = Arc::new(SimulatedDriver::new(device_config(device_id)));
        let tags = tags
            .into_iter()
            .map(|tag| engine.register_tag(tag))
            .collect();
        let channel = Arc::new(Channel::new(
            driver.clone(),
            tags,
            Arc::new(ValueTransformer::new()),
            engine.clone(),
        ));
        PlcFixture {
            engine,
            driver,
            channel,
        }
    }
}

/// Records writes instead of sending them to a device.
#[derive(Default)]
pub struct RecordingWriter {
    writes: Mutex<Vec<(String, ValueVariant)>>,
    fail: AtomicBool,
}

impl RecordingWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn writes(&self) -> Vec<(String, ValueVariant)> {
        self.writes.lock().clone()
    }

    pub fn last_value(&self, name: &str) -> Option<ValueVariant> {
        self.writes
            .lock()
            .iter()
            .rev()
            .find(|(tag, _)| tag == name)
            .map(|(_, value)| value.clone())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TagWriter for RecordingWriter {
    async fn write_tag(&self, name: &str, value: ValueVariant) -> DriverResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("write rejected".into());
        }
        self.writes.lock().push((name.to_string(), value));
        Ok(())
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
