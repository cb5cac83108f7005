use crate::error::AddressParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Memory area designator inside a data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    Bit,
    Byte,
    Word,
    DWord,
    String,
}

impl AddressKind {
    fn designator(self) -> &'static str {
        match self {
            AddressKind::Bit => "DBX",
            AddressKind::Byte => "DBB",
            AddressKind::Word => "DBW",
            AddressKind::DWord => "DBD",
            AddressKind::String => "DBS",
        }
    }
}

/// Structured form of a data block address such as `DB100.DBX0.3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlcAddress {
    pub block_id: u32,
    pub kind: AddressKind,
    pub byte_offset: u32,
    pub bit_index: Option<u8>,
    pub string_length: Option<u32>,
}

impl PlcAddress {
    pub fn bit(block_id: u32, byte_offset: u32, bit_index: u8) -> Self {
        PlcAddress {
            block_id,
            kind: AddressKind::Bit,
            byte_offset,
            bit_index: Some(bit_index),
            string_length: None,
        }
    }

    pub fn new(block_id: u32, kind: AddressKind, byte_offset: u32) -> Self {
        PlcAddress {
            block_id,
            kind,
            byte_offset,
            bit_index: None,
            string_length: None,
        }
    }

    pub fn string(block_id: u32, byte_offset: u32, length: Option<u32>) -> Self {
        PlcAddress {
            block_id,
            kind: AddressKind::String,
            byte_offset,
            bit_index: None,
            string_length: length,
        }
    }

    /// Non-failing parse; `None` for anything outside the grammar.
    pub fn parse(text: &str) -> Option<PlcAddress> {
        text.parse().ok()
    }

    /// Number of bytes the address spans in the block.
    pub fn byte_size(&self) -> u32 {
        match self.kind {
            AddressKind::Bit | AddressKind::Byte => 1,
            AddressKind::Word => 2,
            AddressKind::DWord => 4,
            // Two header bytes: max length and actual length.
            AddressKind::String => self.string_length.unwrap_or(254).saturating_add(2),
        }
    }
}

/// Render an address in canonical form.
///
/// Bit addresses without a bit index render as bit 0; the string length
/// suffix is only written when present.
pub fn format_address(
    block_id: u32,
    kind: AddressKind,
    byte_offset: u32,
    bit_index: Option<u8>,
    string_length: Option<u32>,
) -> String {
    let designator = kind.designator();
    match kind {
        AddressKind::Bit => format!(
            "DB{}.{}{}.{}",
            block_id,
            designator,
            byte_offset,
            bit_index.unwrap_or(0)
        ),
        AddressKind::String => match string_length {
            Some(len) => format!("DB{}.{}{}[{}]", block_id, designator, byte_offset, len),
            None => format!("DB{}.{}{}", block_id, designator, byte_offset),
        },
        _ => format!("DB{}.{}{}", block_id, designator, byte_offset),
    }
}

impl fmt::Display for PlcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_address(
            self.block_id,
            self.kind,
            self.byte_offset,
            self.bit_index,
            self.string_length,
        ))
    }
}

/// Splits a leading run of ASCII digits off `s`.
fn take_number<'a>(s: &'a str, original: &str) -> Result<(u32, &'a str), AddressParseError> {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    if end == 0 {
        return Err(AddressParseError::InvalidNumber(original.to_string()));
    }
    let value = s[..end]
        .parse::<u32>()
        .map_err(|_| AddressParseError::InvalidNumber(original.to_string()))?;
    Ok((value, &s[end..]))
}

impl FromStr for PlcAddress {
    type Err = AddressParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(AddressParseError::Empty);
        }
        let upper = trimmed.to_ascii_uppercase();

        let rest = upper
            .strip_prefix("DB")
            .ok_or_else(|| AddressParseError::MissingBlock(trimmed.to_string()))?;
        let (block_id, rest) = take_number(rest, trimmed)?;
        let rest = rest
            .strip_prefix(".DB")
            .ok_or_else(|| AddressParseError::UnknownArea(trimmed.to_string()))?;

        let mut chars = rest.chars();
        let area = chars
            .next()
            .ok_or_else(|| AddressParseError::UnknownArea(trimmed.to_string()))?;
        let kind = match area {
            'X' => AddressKind::Bit,
            'B' => AddressKind::Byte,
            'W' => AddressKind::Word,
            'D' => AddressKind::DWord,
            'S' => AddressKind::String,
            _ => return Err(AddressParseError::UnknownArea(trimmed.to_string())),
        };
        let (byte_offset, rest) = take_number(chars.as_str(), trimmed)?;

        let mut address = PlcAddress::new(block_id, kind, byte_offset);
        let rest = match kind {
            AddressKind::Bit => {
                let rest = rest
                    .strip_prefix('.')
                    .ok_or_else(|| AddressParseError::InvalidNumber(trimmed.to_string()))?;
                let (bit, rest) = take_number(rest, trimmed)?;
                if bit > 7 {
                    return Err(AddressParseError::BitOutOfRange(bit));
                }
                address.bit_index = Some(bit as u8);
                rest
            }
            AddressKind::String => match rest.strip_prefix('[') {
                Some(inner) => {
                    let (len, rest) = take_number(inner, trimmed)?;
                    address.string_length = Some(len);
                    rest.strip_prefix(']')
                        .ok_or_else(|| AddressParseError::InvalidNumber(trimmed.to_string()))?
                }
                None => rest,
            },
            _ => rest,
        };

        if !rest.is_empty() {
            return Err(AddressParseError::InvalidNumber(trimmed.to_string()));
        }
        Ok(address)
    }
}
