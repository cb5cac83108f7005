use crate::address::PlcAddress;
use crate::drivers::traits::{DriverConfig, SUPPORTED_DRIVER_TYPES};
use crate::error::{ConfigError, SchemaError};
use crate::schema::rules::AddressRule;
use crate::schema::{flatten_block, generate, ScannedTag};
use crate::tags::structures::{AccessRights, DataType, Tag};
use crate::triggers::dispatcher::TriggerPriority;
use crate::triggers::processor::{WorkOrderStatus, WorkstationType};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

fn default_array_length() -> u32 {
    1
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TagConfig {
    pub name: String,      // Unique name for the tag (e.g., "Station1.Ready")
    pub driver_id: String, // ID of the driver this tag belongs to (must match a device ID)
    pub address: String,   // Data block address (e.g., "DB100.DBX0.0")
    pub data_type: DataType,
    #[serde(default)]
    pub access: AccessRights,
    #[serde(default = "default_array_length")]
    pub array_length: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>, // Expression over {value}
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TagConfig {
    fn from_scanned(driver_id: &str, prefix: Option<&str>, scanned: ScannedTag) -> Self {
        TagConfig {
            name: format!("{}{}", prefix.unwrap_or_default(), scanned.name),
            driver_id: driver_id.to_string(),
            address: scanned.address,
            data_type: scanned.data_type,
            access: scanned.access,
            array_length: scanned.length,
            transform: None,
            description: None,
        }
    }

    /// Runtime tag with an initial Bad snapshot.
    pub fn to_tag(&self) -> Tag {
        let mut tag = Tag::new(&self.name, &self.driver_id, &self.address, self.data_type)
            .with_access(self.access)
            .with_array_length(self.array_length);
        if let Some(expression) = &self.transform {
            tag = tag.with_transform(expression);
        }
        if let Some(description) = &self.description {
            tag = tag.with_description(description);
        }
        tag
    }
}

/// A block definition file flattened into tags at startup.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchemaImportConfig {
    pub driver_id: String,
    pub path: String,
    #[serde(default)]
    pub prefix: Option<String>, // Prepended to generated names, e.g. "Station1."
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuleConfig {
    pub driver_id: String,
    #[serde(flatten)]
    pub rule: AddressRule,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TriggerConfig {
    pub equipment_code: String,
    pub tag: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub priority: TriggerPriority,
    #[serde(default)]
    pub result_tag: Option<String>,
    #[serde(default)]
    pub message_tag: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkstationConfig {
    pub code: String,
    pub workstation_type: WorkstationType,
    #[serde(default)]
    pub equipment: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    Acknowledge,
    WorkOrderCheck,
}

fn default_serial_tag() -> String {
    "{equipment}.SerialNumber".to_string()
}

fn default_lookup_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProcessorConfig {
    pub workstation_type: WorkstationType,
    pub kind: ProcessorKind,
    #[serde(default = "default_serial_tag")]
    pub serial_tag: String,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DispatcherSettings {
    #[serde(default)]
    pub reset_result_on_idle: bool,
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkOrderConfig {
    pub serial_number: String,
    pub status: WorkOrderStatus,
}

fn default_api_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiSettings {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            enabled: default_api_enabled(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)] // Clone needed for passing around
pub struct Settings {
    pub devices: Vec<DriverConfig>, // A list of device configurations
    #[serde(default)] // Make tags optional in the config file
    pub tags: Vec<TagConfig>, // A list of tag configurations
    #[serde(default)]
    pub schemas: Vec<SchemaImportConfig>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub workstations: Vec<WorkstationConfig>,
    #[serde(default)]
    pub work_orders: Vec<WorkOrderConfig>,
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load from a TOML file, with `PLC_GATEWAY_`-prefixed environment overrides
    /// (`PLC_GATEWAY_API__BIND_ADDRESS`).
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(config_path))
            .add_source(
                Environment::with_prefix("PLC_GATEWAY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        // Deserialize the entire configuration
        Ok(s.try_deserialize()?)
    }

    /// Parse settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(text, config::FileFormat::Toml))
            .build()?;
        Ok(s.try_deserialize()?)
    }

    /// Reject settings that cannot be run. Schema imports and rule offsets
    /// are checked again when they are expanded.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut device_ids = HashSet::new();
        for (index, device) in self.devices.iter().enumerate() {
            if device.id.trim().is_empty() {
                return Err(ConfigError::EmptyDeviceId(index));
            }
            if device.address.trim().is_empty() {
                return Err(ConfigError::EmptyDeviceAddress(device.id.clone()));
            }
            let driver_type = device.driver_type.to_ascii_lowercase();
            if !SUPPORTED_DRIVER_TYPES.contains(&driver_type.as_str()) {
                return Err(ConfigError::UnsupportedDriver {
                    device: device.id.clone(),
                    driver_type: device.driver_type.clone(),
                });
            }
            if !device_ids.insert(device.id.as_str()) {
                return Err(ConfigError::DuplicateDevice(device.id.clone()));
            }
        }

        for tag in &self.tags {
            if !device_ids.contains(tag.driver_id.as_str()) {
                return Err(ConfigError::UnknownDevice {
                    tag: tag.name.clone(),
                    device: tag.driver_id.clone(),
                });
            }
            if let Err(source) = tag.address.parse::<PlcAddress>() {
                return Err(ConfigError::InvalidAddress {
                    tag: tag.name.clone(),
                    address: tag.address.clone(),
                    source,
                });
            }
        }

        let imports = self
            .schemas
            .iter()
            .map(|s| (s.path.as_str(), s.driver_id.as_str()))
            .chain(self.rules.iter().map(|r| ("rule", r.driver_id.as_str())));
        for rule in &self.rules {
            if let Some(bit) = rule.rule.bit_index.filter(|bit| *bit > 7) {
                return Err(ConfigError::Rule {
                    device: rule.driver_id.clone(),
                    source: SchemaError::InvalidRule {
                        template: rule.rule.name_template.clone(),
                        reason: format!("bit index {} is out of range 0..=7", bit),
                    },
                });
            }
        }
        for (source, driver_id) in imports {
            if !device_ids.contains(driver_id) {
                return Err(ConfigError::UnknownDevice {
                    tag: source.to_string(),
                    device: driver_id.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Check trigger tags against the full set of tag names once imports
    /// have been expanded.
    pub fn validate_triggers<'a>(
        &self,
        known_tags: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ConfigError> {
        let known: HashSet<&str> = known_tags.into_iter().collect();
        for trigger in &self.triggers {
            if !known.contains(trigger.tag.as_str()) {
                return Err(ConfigError::UnknownTriggerTag {
                    equipment: trigger.equipment_code.clone(),
                    tag: trigger.tag.clone(),
                });
            }
        }
        Ok(())
    }

    /// Configured tags plus every tag generated from schema imports and
    /// address rules. Later definitions of a name replace earlier ones.
    pub fn expanded_tags(&self) -> Result<Vec<TagConfig>, ConfigError> {
        let mut rows: Vec<TagConfig> = self.tags.clone();

        for import in &self.schemas {
            let text = std::fs::read_to_string(&import.path).map_err(|e| ConfigError::Schema {
                path: import.path.clone(),
                reason: e.to_string(),
            })?;
            let scanned = flatten_block(&text).map_err(|e| ConfigError::Schema {
                path: import.path.clone(),
                reason: e.to_string(),
            })?;
            info!("Imported {} tags from {}", scanned.len(), import.path);
            rows.extend(scanned.into_iter().map(|tag| {
                TagConfig::from_scanned(&import.driver_id, import.prefix.as_deref(), tag)
            }));
        }

        for rule in &self.rules {
            let generated = generate(&rule.rule).map_err(|source| ConfigError::Rule {
                device: rule.driver_id.clone(),
                source,
            })?;
            rows.extend(
                generated
                    .into_iter()
                    .map(|tag| TagConfig::from_scanned(&rule.driver_id, None, tag)),
            );
        }

        // Generated rows get the same address check as configured ones.
        for row in &rows[self.tags.len()..] {
            if let Err(source) = row.address.parse::<PlcAddress>() {
                return Err(ConfigError::InvalidAddress {
                    tag: row.name.clone(),
                    address: row.address.clone(),
                    source,
                });
            }
        }

        let mut seen = HashSet::new();
        let mut deduped = Vec::with_capacity(rows.len());
        for row in rows.into_iter().rev() {
            if seen.insert(row.name.clone()) {
                deduped.push(row);
            } else {
                warn!("Tag '{}' defined more than once; keeping the last definition", row.name);
            }
        }
        deduped.reverse();
        Ok(deduped)
    }
}
