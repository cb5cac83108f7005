use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Represents the quality of a tag's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Quality {
    Good,
    Uncertain,
    #[default]
    Bad,
}

/// Generic data type of a tag, independent of the PLC's own type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    String,
    DateTime,
}

impl DataType {
    /// Fixed storage size in bytes; strings are sized by their declaration.
    pub fn byte_size(self) -> Option<u32> {
        match self {
            DataType::Bool | DataType::Byte => Some(1),
            DataType::Int16 | DataType::UInt16 => Some(2),
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => Some(4),
            DataType::Int64 | DataType::UInt64 | DataType::Float64 | DataType::DateTime => Some(8),
            DataType::String => None,
        }
    }
}

/// Read/write permission for a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccessRights {
    Read,
    Write,
    #[default]
    ReadWrite,
}

impl AccessRights {
    pub fn is_readable(self) -> bool {
        matches!(self, AccessRights::Read | AccessRights::ReadWrite)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, AccessRights::Write | AccessRights::ReadWrite)
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Represents the value, quality, and timestamp of a tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagValue {
    pub value: ValueVariant,
    pub quality: Quality,
    pub timestamp: u64, // Unix timestamp milliseconds
}

impl TagValue {
    // Helper to create a new TagValue with current time
    pub fn new(value: ValueVariant, quality: Quality) -> Self {
        TagValue {
            value,
            quality,
            timestamp: now_millis(),
        }
    }

    pub fn good(value: ValueVariant) -> Self {
        Self::new(value, Quality::Good)
    }

    // Helper for bad quality
    pub fn bad(reason: Quality) -> Self {
        Self::new(ValueVariant::Null, reason)
    }
}

/// Possible data types for a tag's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum ValueVariant {
    #[default]
    Null, // Representing no value or initial state
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
}

impl ValueVariant {
    pub fn is_null(&self) -> bool {
        matches!(self, ValueVariant::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueVariant::Int(_) | ValueVariant::UInt(_) | ValueVariant::Float(_)
        )
    }

    /// Numeric view. Text is parsed, booleans map to 1/0.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ValueVariant::Int(i) => Some(*i as f64),
            ValueVariant::UInt(u) => Some(*u as f64),
            ValueVariant::Float(f) => Some(*f),
            ValueVariant::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ValueVariant::String(s) => s.trim().parse::<f64>().ok(),
            ValueVariant::Null | ValueVariant::DateTime(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ValueVariant::Int(i) => Some(*i),
            ValueVariant::UInt(u) => i64::try_from(*u).ok(),
            ValueVariant::String(s) => s
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| float_to_i64(s.trim().parse::<f64>().ok()?)),
            other => float_to_i64(other.as_f64()?),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ValueVariant::UInt(u) => Some(*u),
            ValueVariant::Int(i) => u64::try_from(*i).ok(),
            ValueVariant::String(s) => s
                .trim()
                .parse::<u64>()
                .ok()
                .or_else(|| float_to_u64(s.trim().parse::<f64>().ok()?)),
            other => float_to_u64(other.as_f64()?),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ValueVariant::Bool(b) => Some(*b),
            ValueVariant::Int(i) => Some(*i != 0),
            ValueVariant::UInt(u) => Some(*u != 0),
            ValueVariant::Float(f) => Some(*f != 0.0),
            ValueVariant::String(s) => {
                let s = s.trim();
                if s.eq_ignore_ascii_case("true") {
                    Some(true)
                } else if s.eq_ignore_ascii_case("false") {
                    Some(false)
                } else {
                    s.parse::<f64>().ok().map(|f| f != 0.0)
                }
            }
            ValueVariant::Null | ValueVariant::DateTime(_) => None,
        }
    }
}

impl ValueVariant {
    /// Convert to the representation used for `data_type`.
    pub fn coerce_to(&self, data_type: DataType) -> Option<ValueVariant> {
        if self.is_null() {
            return None;
        }
        let coerced = match data_type {
            DataType::Bool => ValueVariant::Bool(bool::from_variant(self)?),
            DataType::Byte => ValueVariant::UInt(u8::from_variant(self)? as u64),
            DataType::Int16 => ValueVariant::Int(i16::from_variant(self)? as i64),
            DataType::UInt16 => ValueVariant::UInt(u16::from_variant(self)? as u64),
            DataType::Int32 => ValueVariant::Int(i32::from_variant(self)? as i64),
            DataType::UInt32 => ValueVariant::UInt(u32::from_variant(self)? as u64),
            DataType::Int64 => ValueVariant::Int(self.as_i64()?),
            DataType::UInt64 => ValueVariant::UInt(self.as_u64()?),
            DataType::Float32 => ValueVariant::Float(f32::from_variant(self)? as f64),
            DataType::Float64 => ValueVariant::Float(self.as_f64()?),
            DataType::String => ValueVariant::String(self.to_string()),
            DataType::DateTime => ValueVariant::DateTime(DateTime::<Utc>::from_variant(self)?),
        };
        Some(coerced)
    }
}

fn float_to_i64(f: f64) -> Option<i64> {
    let r = f.round();
    (r.is_finite() && r >= i64::MIN as f64 && r <= i64::MAX as f64).then_some(r as i64)
}

fn float_to_u64(f: f64) -> Option<u64> {
    let r = f.round();
    (r.is_finite() && r >= 0.0 && r <= u64::MAX as f64).then_some(r as u64)
}

impl fmt::Display for ValueVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueVariant::Null => Ok(()),
            ValueVariant::Bool(b) => write!(f, "{}", b),
            ValueVariant::Int(i) => write!(f, "{}", i),
            ValueVariant::UInt(u) => write!(f, "{}", u),
            ValueVariant::Float(v) => write!(f, "{}", v),
            ValueVariant::String(s) => f.write_str(s),
            ValueVariant::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}

/// Conversion used by [`Tag::get_value`].
pub trait FromTagValue: Sized {
    fn from_variant(value: &ValueVariant) -> Option<Self>;
}

impl FromTagValue for bool {
    fn from_variant(value: &ValueVariant) -> Option<Self> {
        value.as_bool()
    }
}

impl FromTagValue for f64 {
    fn from_variant(value: &ValueVariant) -> Option<Self> {
        value.as_f64()
    }
}

impl FromTagValue for f32 {
    fn from_variant(value: &ValueVariant) -> Option<Self> {
        value.as_f64().map(|f| f as f32)
    }
}

impl FromTagValue for String {
    fn from_variant(value: &ValueVariant) -> Option<Self> {
        Some(value.to_string())
    }
}

impl FromTagValue for DateTime<Utc> {
    fn from_variant(value: &ValueVariant) -> Option<Self> {
        match value {
            ValueVariant::DateTime(dt) => Some(*dt),
            ValueVariant::String(s) => s.parse().ok(),
            other => DateTime::from_timestamp_millis(other.as_i64()?),
        }
    }
}

macro_rules! signed_from_tag_value {
    ($($t:ty),*) => {$(
        impl FromTagValue for $t {
            fn from_variant(value: &ValueVariant) -> Option<Self> {
                <$t>::try_from(value.as_i64()?).ok()
            }
        }
    )*};
}

macro_rules! unsigned_from_tag_value {
    ($($t:ty),*) => {$(
        impl FromTagValue for $t {
            fn from_variant(value: &ValueVariant) -> Option<Self> {
                <$t>::try_from(value.as_u64()?).ok()
            }
        }
    )*};
}

signed_from_tag_value!(i8, i16, i32, i64);
unsigned_from_tag_value!(u8, u16, u32, u64);

/// Represents a single tag in the system.
#[derive(Debug)]
pub struct Tag {
    /// Unique name identifying the tag (e.g., "Station1.Ready").
    pub name: String,
    /// Source driver ID providing this tag's value.
    pub driver_id: String,
    /// Data block address of the tag on the source device.
    pub address: String,
    pub data_type: DataType,
    pub array_length: u32,
    pub access: AccessRights,
    /// Optional expression applied to raw readings.
    pub transform: Option<String>,
    pub description: Option<String>,
    snapshot: RwLock<TagValue>,
}

impl Tag {
    pub fn new(
        name: impl Into<String>,
        driver_id: impl Into<String>,
        address: impl Into<String>,
        data_type: DataType,
    ) -> Self {
        Tag {
            name: name.into(),
            driver_id: driver_id.into(),
            address: address.into(),
            data_type,
            array_length: 1,
            access: AccessRights::ReadWrite,
            transform: None,
            description: None,
            snapshot: RwLock::new(TagValue::bad(Quality::Bad)),
        }
    }

    pub fn with_access(mut self, access: AccessRights) -> Self {
        self.access = access;
        self
    }

    pub fn with_transform(mut self, expression: impl Into<String>) -> Self {
        self.transform = Some(expression.into());
        self
    }

    pub fn with_array_length(mut self, length: u32) -> Self {
        self.array_length = length;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Store a new reading. Returns true when value or quality changed.
    pub fn update(&self, value: ValueVariant, quality: Quality) -> bool {
        self.replace(value, quality).is_some()
    }

    /// Store a new reading. On change, returns `(previous, current)` taken
    /// under the same write lock, so the pair belongs to this update.
    pub fn replace(&self, value: ValueVariant, quality: Quality) -> Option<(TagValue, TagValue)> {
        let mut snapshot = self.snapshot.write();
        let changed = snapshot.value != value || snapshot.quality != quality;
        let current = TagValue::new(value, quality);
        if changed {
            let previous = std::mem::replace(&mut *snapshot, current.clone());
            Some((previous, current))
        } else {
            *snapshot = current;
            None
        }
    }

    pub fn snapshot(&self) -> TagValue {
        self.snapshot.read().clone()
    }

    /// Typed read; `default` unless the value is Good and convertible.
    pub fn get_value<T: FromTagValue>(&self, default: T) -> T {
        let snapshot = self.snapshot.read();
        if snapshot.quality != Quality::Good || snapshot.value.is_null() {
            return default;
        }
        T::from_variant(&snapshot.value).unwrap_or(default)
    }

    pub fn is_expired(&self, timeout_seconds: u64) -> bool {
        let last = self.snapshot.read().timestamp;
        now_millis().saturating_sub(last) > timeout_seconds.saturating_mul(1000)
    }
}

/// Serializable view of a tag for the API.
#[derive(Debug, Clone, Serialize)]
pub struct TagSnapshot {
    pub name: String,
    pub driver_id: String,
    pub address: String,
    pub data_type: DataType,
    pub access: AccessRights,
    #[serde(flatten)]
    pub value: TagValue,
}

impl From<&Tag> for TagSnapshot {
    fn from(tag: &Tag) -> Self {
        TagSnapshot {
            name: tag.name.clone(),
            driver_id: tag.driver_id.clone(),
            address: tag.address.clone(),
            data_type: tag.data_type,
            access: tag.access,
            value: tag.snapshot(),
        }
    }
}
