//! Offline tag generation: block definition flattening and address rules.

pub mod flatten;
pub mod rules;

use crate::address::{AddressKind, PlcAddress};
use crate::config::settings::TagConfig;
use crate::error::SchemaError;
use crate::tags::structures::{AccessRights, DataType};
use serde::{Deserialize, Serialize};

pub use flatten::{flatten_block, parse_block, BlockSchema, FieldDefinition};
pub use rules::{generate, AddressRule};

/// One generated tag row, ready to be handed to configuration storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedTag {
    pub name: String,
    pub address: String,
    pub data_type: DataType,
    pub length: u32,
    pub access: AccessRights,
}

/// Address for a value of `data_type` stored at `byte_offset`.
///
/// 64-bit values are addressed by their first double word.
pub fn address_for(
    block_id: u32,
    byte_offset: u32,
    bit_index: Option<u8>,
    data_type: DataType,
    string_length: Option<u32>,
) -> PlcAddress {
    match data_type {
        DataType::Bool => PlcAddress::bit(block_id, byte_offset, bit_index.unwrap_or(0)),
        DataType::String => PlcAddress::string(block_id, byte_offset, string_length),
        DataType::Byte => PlcAddress::new(block_id, AddressKind::Byte, byte_offset),
        DataType::Int16 | DataType::UInt16 => {
            PlcAddress::new(block_id, AddressKind::Word, byte_offset)
        }
        _ => PlcAddress::new(block_id, AddressKind::DWord, byte_offset),
    }
}

#[derive(Serialize)]
struct TagRows<'a> {
    tags: &'a [TagConfig],
}

/// Render generated rows as `[[tags]]` entries for the settings file.
pub fn to_toml_rows(driver_id: &str, tags: &[ScannedTag]) -> Result<String, SchemaError> {
    let rows: Vec<TagConfig> = tags
        .iter()
        .map(|tag| TagConfig {
            name: tag.name.clone(),
            driver_id: driver_id.to_string(),
            address: tag.address.clone(),
            data_type: tag.data_type,
            access: tag.access,
            array_length: tag.length,
            transform: None,
            description: None,
        })
        .collect();
    toml::to_string_pretty(&TagRows { tags: &rows }).map_err(|e| SchemaError::Export(e.to_string()))
}
