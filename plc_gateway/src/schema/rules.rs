use crate::error::SchemaError;
use crate::schema::{address_for, ScannedTag};
use crate::tags::structures::{AccessRights, DataType};
use serde::{Deserialize, Serialize};

/// Replaced by the zero-based index in generated names.
pub const INDEX_PLACEHOLDER: &str = "{i}";

/// Describes `count` equally spaced tags of one type.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddressRule {
    pub block_id: u32,
    pub name_template: String, // e.g. "Station{i}.Weight"
    pub start_offset: u32,
    pub stride: u32,
    pub count: u32,
    pub data_type: DataType,
    #[serde(default)]
    pub string_length: Option<u32>,
    #[serde(default)]
    pub bit_index: Option<u8>,
}

impl AddressRule {
    fn invalid(&self, reason: impl Into<String>) -> SchemaError {
        SchemaError::InvalidRule {
            template: self.name_template.clone(),
            reason: reason.into(),
        }
    }
}

/// Expand a rule into tag rows. Generated tags are always read-only.
///
/// Fails when a bit index is outside 0..=7 or an offset leaves the `u32`
/// address range.
pub fn generate(rule: &AddressRule) -> Result<Vec<ScannedTag>, SchemaError> {
    if let Some(bit) = rule.bit_index {
        if bit > 7 {
            return Err(rule.invalid(format!("bit index {} is out of range 0..=7", bit)));
        }
    }

    (0..rule.count)
        .map(|i| {
            let offset = i
                .checked_mul(rule.stride)
                .and_then(|step| rule.start_offset.checked_add(step))
                .ok_or_else(|| rule.invalid(format!("offset of entry {} overflows", i)))?;
            let address = address_for(
                rule.block_id,
                offset,
                rule.bit_index,
                rule.data_type,
                rule.string_length,
            );
            Ok(ScannedTag {
                name: rule.name_template.replace(INDEX_PLACEHOLDER, &i.to_string()),
                address: address.to_string(),
                data_type: rule.data_type,
                length: match rule.data_type {
                    DataType::String => rule.string_length.unwrap_or(254),
                    _ => 1,
                },
                access: AccessRights::Read,
            })
        })
        .collect()
}
