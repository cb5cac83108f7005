pub mod simulated;
pub mod traits;

use crate::drivers::simulated::SimulatedDriver;
use crate::drivers::traits::{DeviceDriver, DriverConfig};
use crate::error::ConfigError;
use std::sync::Arc;

/// Instantiate the driver named by `config.driver_type`.
pub fn create_driver(config: &DriverConfig) -> Result<Arc<dyn DeviceDriver>, ConfigError> {
    match config.driver_type.to_ascii_lowercase().as_str() {
        "simulated" => Ok(Arc::new(SimulatedDriver::new(config.clone()))),
        other => Err(ConfigError::UnsupportedDriver {
            device: config.id.clone(),
            driver_type: other.to_string(),
        }),
    }
}
