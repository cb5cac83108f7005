use thiserror::Error;

/// Why an address string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressParseError {
    #[error("address is empty")]
    Empty,
    #[error("'{0}' does not start with a DB block prefix")]
    MissingBlock(String),
    #[error("'{0}' uses an unknown area designator")]
    UnknownArea(String),
    #[error("'{0}' has an invalid number")]
    InvalidNumber(String),
    #[error("bit index {0} is out of range 0..=7")]
    BitOutOfRange(u32),
}

/// Failures while reading a block definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("no DATA_BLOCK declaration found")]
    MissingDataBlock,
    #[error("data block name '{0}' carries no block number")]
    MissingBlockId(String),
    #[error("unbalanced STRUCT/END_STRUCT at line {0}")]
    UnbalancedStruct(usize),
    #[error("type '{0}' references itself")]
    RecursiveType(String),
    #[error("unknown type '{0}' used as data block body")]
    UnknownType(String),
    #[error("field '{0}' does not fit in the block address range")]
    Oversized(String),
    #[error("rule '{template}' is invalid: {reason}")]
    InvalidRule { template: String, reason: String },
    #[error("failed to render tag rows: {0}")]
    Export(String),
}

/// Configuration problems detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("device #{0} has an empty id")]
    EmptyDeviceId(usize),
    #[error("device '{0}' has an empty address")]
    EmptyDeviceAddress(String),
    #[error("device id '{0}' is declared more than once")]
    DuplicateDevice(String),
    #[error("device '{device}' uses unsupported driver type '{driver_type}'")]
    UnsupportedDriver { device: String, driver_type: String },
    #[error("tag '{tag}' references unknown device '{device}'")]
    UnknownDevice { tag: String, device: String },
    #[error("tag '{tag}' has invalid address '{address}': {source}")]
    InvalidAddress {
        tag: String,
        address: String,
        source: AddressParseError,
    },
    #[error("address rule for device '{device}' rejected: {source}")]
    Rule { device: String, source: SchemaError },
    #[error("schema '{path}' could not be imported: {reason}")]
    Schema { path: String, reason: String },
    #[error("trigger for equipment '{equipment}' references unknown tag '{tag}'")]
    UnknownTriggerTag { equipment: String, tag: String },
}

/// Raised by workstation processors; converted into an Error result write.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{0}")]
    Failed(String),
    #[error("tag '{0}' has no usable value")]
    MissingValue(String),
    #[error("work order lookup failed: {0}")]
    Lookup(String),
    #[error("result write failed: {0}")]
    Write(String),
}
