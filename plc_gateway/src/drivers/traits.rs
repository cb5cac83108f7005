use crate::tags::structures::{DataType, TagValue, ValueVariant};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;

/// Driver types this build can instantiate.
pub const SUPPORTED_DRIVER_TYPES: &[&str] = &["simulated"];

fn default_driver_type() -> String {
    "simulated".to_string()
}

/// Configuration for one device connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverConfig {
    pub id: String,      // Unique identifier for this device instance
    pub name: String,    // User-friendly name
    #[serde(default = "default_driver_type")]
    pub driver_type: String,
    pub address: String, // e.g., IP address or host name of the PLC
    #[serde(default)]
    pub scan_rate_ms: Option<u64>, // Delay between poll cycles
    #[serde(default)]
    pub retry_delay_ms: Option<u64>, // Delay after a failed cycle
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

/// Represents a request to read or write a tag
#[derive(Debug, Clone)]
pub struct TagRequest {
    pub name: String,    // Tag name, used as key in read results
    pub address: String, // Data block address, e.g. "DB100.DBD2"
    pub data_type: DataType,
}

// Type alias for results from driver operations
pub type DriverResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Protocol boundary for a PLC connection.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Get the configuration of this driver instance.
    fn config(&self) -> &DriverConfig;

    /// Connect to the underlying device.
    async fn connect(&self) -> DriverResult<()>;

    /// Disconnect from the underlying device.
    async fn disconnect(&self) -> DriverResult<()>;

    /// Check the connection status.
    async fn check_status(&self) -> DriverResult<()>; // Returns Ok(()) if connected, Err otherwise

    /// Read a batch of tags.
    /// Returns a map of tag name to TagValue; tags missing from the map were not read.
    async fn read_tags(&self, tags: &[TagRequest]) -> DriverResult<HashMap<String, TagValue>>;

    /// Write a single value.
    async fn write_tag(&self, tag: &TagRequest, value: ValueVariant) -> DriverResult<()>;
}
