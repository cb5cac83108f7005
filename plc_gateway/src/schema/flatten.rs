use crate::error::SchemaError;
use crate::schema::{address_for, ScannedTag};
use crate::tags::structures::{AccessRights, DataType};
use std::collections::HashMap;
use tracing::{debug, warn};

/// A declared field; structures carry their members in `children`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    pub raw_type_name: String,
    pub is_struct: bool,
    pub children: Vec<FieldDefinition>,
}

impl FieldDefinition {
    fn scalar(name: String, raw_type_name: String) -> Self {
        FieldDefinition {
            name,
            raw_type_name,
            is_struct: false,
            children: Vec::new(),
        }
    }

    fn structure(name: String, raw_type_name: String) -> Self {
        FieldDefinition {
            name,
            raw_type_name,
            is_struct: true,
            children: Vec::new(),
        }
    }

    fn is_array(&self) -> bool {
        self.raw_type_name
            .trim_start()
            .to_ascii_uppercase()
            .starts_with("ARRAY")
    }
}

/// Parsed block definition: named types plus the data block body.
#[derive(Debug, Clone)]
pub struct BlockSchema {
    pub block_id: u32,
    pub block_name: String,
    pub types: HashMap<String, Vec<FieldDefinition>>,
    pub fields: Vec<FieldDefinition>,
}

/// Byte/bit position of the next field.
#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    byte: u32,
    bit: u8,
}

// Every move returns `None` once the offset would leave the `u32` range.
impl Cursor {
    fn advance(&mut self, bytes: u32) -> Option<()> {
        self.byte = self.byte.checked_add(bytes)?;
        Some(())
    }

    fn next_bit(&mut self) -> Option<()> {
        self.bit += 1;
        if self.bit > 7 {
            self.bit = 0;
            self.advance(1)?;
        }
        Some(())
    }

    fn flush_bits(&mut self) -> Option<()> {
        if self.bit > 0 {
            self.bit = 0;
            self.advance(1)?;
        }
        Some(())
    }

    fn align_even(&mut self) -> Option<()> {
        self.flush_bits()?;
        if self.byte % 2 == 1 {
            self.advance(1)?;
        }
        Some(())
    }
}

/// Parse and flatten a block definition in one step.
pub fn flatten_block(text: &str) -> Result<Vec<ScannedTag>, SchemaError> {
    parse_block(text)?.flatten()
}

impl BlockSchema {
    /// Lay out every scalar field in declaration order.
    pub fn flatten(&self) -> Result<Vec<ScannedTag>, SchemaError> {
        let mut out = Vec::new();
        let mut cursor = Cursor::default();
        let mut visiting = Vec::new();
        self.walk(&self.fields, "", &mut cursor, &mut out, &mut visiting)?;
        debug!(
            "Flattened block {} ({}) into {} tags",
            self.block_id,
            self.block_name,
            out.len()
        );
        Ok(out)
    }

    fn walk(
        &self,
        fields: &[FieldDefinition],
        prefix: &str,
        cursor: &mut Cursor,
        out: &mut Vec<ScannedTag>,
        visiting: &mut Vec<String>,
    ) -> Result<(), SchemaError> {
        for field in fields {
            let qualified = if prefix.is_empty() {
                field.name.clone()
            } else {
                format!("{}.{}", prefix, field.name)
            };
            let oversized = || SchemaError::Oversized(qualified.clone());

            if field.is_array() {
                warn!(
                    "Skipping array field '{}' ({}); arrays are not laid out",
                    qualified, field.raw_type_name
                );
                continue;
            }

            if field.is_struct {
                cursor.align_even().ok_or_else(oversized)?;
                self.walk(&field.children, &qualified, cursor, out, visiting)?;
                cursor.align_even().ok_or_else(oversized)?;
                continue;
            }

            if let Some(children) = self.types.get(&field.raw_type_name) {
                if visiting.contains(&field.raw_type_name) {
                    return Err(SchemaError::RecursiveType(field.raw_type_name.clone()));
                }
                visiting.push(field.raw_type_name.clone());
                cursor.align_even().ok_or_else(oversized)?;
                self.walk(children, &qualified, cursor, out, visiting)?;
                cursor.align_even().ok_or_else(oversized)?;
                visiting.pop();
                continue;
            }

            let Some(layout) = builtin_layout(&field.raw_type_name) else {
                warn!(
                    "Skipping field '{}' with unknown type '{}'",
                    qualified, field.raw_type_name
                );
                continue;
            };

            let address = if layout.data_type == DataType::Bool {
                let address = address_for(
                    self.block_id,
                    cursor.byte,
                    Some(cursor.bit),
                    DataType::Bool,
                    None,
                );
                cursor.next_bit().ok_or_else(oversized)?;
                address
            } else {
                let size = layout.size().ok_or_else(oversized)?;
                cursor.flush_bits().ok_or_else(oversized)?;
                if size != 1 {
                    cursor.align_even().ok_or_else(oversized)?;
                }
                let address = address_for(
                    self.block_id,
                    cursor.byte,
                    None,
                    layout.data_type,
                    layout.string_length,
                );
                cursor.advance(size).ok_or_else(oversized)?;
                address
            };

            out.push(ScannedTag {
                name: qualified,
                address: address.to_string(),
                data_type: layout.data_type,
                length: layout.string_length.unwrap_or(1),
                access: AccessRights::ReadWrite,
            });
        }
        Ok(())
    }
}

struct Layout {
    data_type: DataType,
    fixed_size: u32,
    string_length: Option<u32>,
}

impl Layout {
    /// Bytes occupied; strings carry two header bytes.
    fn size(&self) -> Option<u32> {
        match self.string_length {
            Some(length) => length.checked_add(2),
            None => Some(self.fixed_size),
        }
    }
}

/// Generic type and storage size for an elementary PLC type name.
fn builtin_layout(raw: &str) -> Option<Layout> {
    let upper = raw.trim().to_ascii_uppercase();
    if let Some(rest) = upper.strip_prefix("STRING") {
        let rest = rest.trim();
        let length = if rest.is_empty() {
            254
        } else {
            rest.strip_prefix('[')?
                .strip_suffix(']')?
                .trim()
                .parse::<u32>()
                .ok()?
        };
        return Some(Layout {
            data_type: DataType::String,
            fixed_size: 0,
            string_length: Some(length),
        });
    }

    let data_type = match upper.as_str() {
        "BOOL" => DataType::Bool,
        "BYTE" | "USINT" | "SINT" | "CHAR" => DataType::Byte,
        "INT" => DataType::Int16,
        "WORD" | "UINT" | "DATE" | "S5TIME" | "WCHAR" => DataType::UInt16,
        "DINT" | "TIME" => DataType::Int32,
        "DWORD" | "UDINT" | "TIME_OF_DAY" | "TOD" => DataType::UInt32,
        "REAL" => DataType::Float32,
        "LREAL" => DataType::Float64,
        "LINT" | "LTIME" => DataType::Int64,
        "ULINT" | "LWORD" | "LTIME_OF_DAY" | "LTOD" => DataType::UInt64,
        "DATE_AND_TIME" | "DT" | "LDT" => DataType::DateTime,
        _ => return None,
    };
    Some(Layout {
        data_type,
        fixed_size: data_type.byte_size()?,
        string_length: None,
    })
}

/// Drop comments and `{ ... }` attribute blocks, keeping line breaks.
fn strip_comments_and_attributes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '(' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && next == ')' {
                        break;
                    }
                    prev = next;
                }
            }
            '{' => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                    }
                    if next == '}' {
                        break;
                    }
                }
            }
            '\'' => {
                out.push(c);
                for next in chars.by_ref() {
                    out.push(next);
                    if next == '\'' {
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn unquote(s: &str) -> String {
    s.trim().trim_matches('"').trim().to_string()
}

/// Leading keyword of a line, upper-cased and without a trailing `;`.
fn keyword(line: &str) -> String {
    line.split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches(';')
        .to_ascii_uppercase()
}

/// Split `"Name" : Type := init;` into name and type.
fn parse_field(line: &str) -> Option<(String, String)> {
    let (name, rest) = line.split_once(':')?;
    if rest.starts_with('=') {
        return None;
    }
    let rest = rest.trim().trim_end_matches(';');
    let type_text = match rest.find(":=") {
        Some(pos) => &rest[..pos],
        None => rest,
    };
    let name = unquote(name);
    let type_name = unquote(type_text);
    if name.is_empty() || type_name.is_empty() {
        return None;
    }
    Some((name, type_name))
}

/// Split cleaned text into `(line number, statement)` pairs. A statement
/// ends at `;` or at the end of a line, and `STRUCT` / `END_STRUCT` always
/// stand on their own.
fn statements(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    for (index, line) in text.lines().enumerate() {
        for piece in split_outside_quotes(line, ';') {
            let mut rest = piece.trim();
            while !rest.is_empty() {
                let (head, tail) = split_struct_keyword(rest);
                out.push((index + 1, head.trim().to_string()));
                rest = tail.trim();
            }
        }
    }
    out
}

fn split_outside_quotes(line: &str, separator: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        match quote {
            Some(open) if c == open => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == separator => {
                pieces.push(&line[start..i]);
                start = i + c.len_utf8();
            }
            None => {}
        }
    }
    pieces.push(&line[start..]);
    pieces
}

/// Peel a leading `STRUCT` / `END_STRUCT` keyword, or a `name : Struct`
/// header followed by more text, off the front of a statement.
fn split_struct_keyword(text: &str) -> (&str, &str) {
    for word in ["END_STRUCT", "STRUCT"] {
        if let Some(tail) = strip_keyword(text, word) {
            // `Struct : Int` declares a field that happens to be named Struct.
            if !tail.trim_start().starts_with(':') {
                return (&text[..word.len()], tail);
            }
        }
    }
    if let Some(colon) = text.find(':') {
        let after = &text[colon + 1..];
        let type_text = after.trim_start();
        if let Some(tail) = strip_keyword(type_text, "STRUCT") {
            if !tail.trim().is_empty() {
                let end = colon + 1 + (after.len() - type_text.len()) + "STRUCT".len();
                return (&text[..end], tail);
            }
        }
    }
    (text, "")
}

/// Remainder after `word` when `text` starts with it as a whole word.
fn strip_keyword<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let head = text.get(..word.len())?;
    if !head.eq_ignore_ascii_case(word) {
        return None;
    }
    let tail = &text[word.len()..];
    match tail.chars().next() {
        None => Some(tail),
        Some(c) if c.is_whitespace() => Some(tail),
        _ => None,
    }
}

/// First run of decimal digits in a block name.
fn block_number(name: &str) -> Option<u32> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let digits: String = name[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[derive(Debug, Clone, PartialEq)]
enum Section {
    None,
    Type(String),
    Block,
}

struct Frame {
    field: Option<FieldDefinition>,
    children: Vec<FieldDefinition>,
}

/// Parse type declarations and the data block body into field trees.
pub fn parse_block(text: &str) -> Result<BlockSchema, SchemaError> {
    let cleaned = strip_comments_and_attributes(text);

    let mut types: HashMap<String, Vec<FieldDefinition>> = HashMap::new();
    let mut block_name: Option<String> = None;
    let mut block_fields: Option<Vec<FieldDefinition>> = None;
    let mut block_type_ref: Option<String> = None;
    let mut section = Section::None;
    let mut in_initial_values = false;
    let mut stack: Vec<Frame> = Vec::new();

    for (line_no, statement) in statements(&cleaned) {
        let line = statement.as_str();
        let word = keyword(line);

        if in_initial_values {
            if word == "END_DATA_BLOCK" {
                in_initial_values = false;
                section = Section::None;
            }
            continue;
        }

        let is_field = !stack.is_empty() && parse_field(line).is_some();

        match word.as_str() {
            _ if is_field => {}
            "TYPE" => {
                section = Section::Type(unquote(&line[4..]));
                continue;
            }
            "DATA_BLOCK" => {
                block_name = Some(unquote(&line[10..]));
                section = Section::Block;
                continue;
            }
            "END_TYPE" | "END_DATA_BLOCK" | "BEGIN" => {
                if !stack.is_empty() {
                    return Err(SchemaError::UnbalancedStruct(line_no));
                }
                if word == "BEGIN" && section == Section::Block {
                    in_initial_values = true;
                } else {
                    section = Section::None;
                }
                continue;
            }
            "STRUCT" if stack.is_empty() => {
                stack.push(Frame {
                    field: None,
                    children: Vec::new(),
                });
                continue;
            }
            "END_STRUCT" => {
                let frame = stack
                    .pop()
                    .ok_or(SchemaError::UnbalancedStruct(line_no))?;
                match (frame.field, stack.last_mut()) {
                    (Some(mut field), Some(parent)) => {
                        field.children = frame.children;
                        parent.children.push(field);
                    }
                    (None, None) => match &section {
                        Section::Type(name) => {
                            types.insert(name.clone(), frame.children);
                        }
                        Section::Block => block_fields = Some(frame.children),
                        Section::None => {
                            debug!("Structure outside of a declaration at line {}", line_no)
                        }
                    },
                    _ => return Err(SchemaError::UnbalancedStruct(line_no)),
                }
                continue;
            }
            _ => {}
        }

        if stack.is_empty() {
            // Header lines (VERSION, TITLE, NON_RETAIN ...) or an instance
            // data block naming its type.
            if section == Section::Block && line.starts_with('"') && !line.contains(':') {
                block_type_ref = Some(unquote(line.trim_end_matches(';')));
            }
            continue;
        }

        let Some((name, type_name)) = parse_field(line) else {
            debug!("Ignoring line {}: {}", line_no, line);
            continue;
        };
        let upper_type = type_name.to_ascii_uppercase();
        let opens_struct = upper_type == "STRUCT"
            || (upper_type.starts_with("ARRAY") && upper_type.ends_with("STRUCT"));
        if opens_struct {
            stack.push(Frame {
                field: Some(FieldDefinition::structure(name, type_name)),
                children: Vec::new(),
            });
        } else if let Some(frame) = stack.last_mut() {
            frame.children.push(FieldDefinition::scalar(name, type_name));
        }
    }

    if !stack.is_empty() {
        return Err(SchemaError::UnbalancedStruct(cleaned.lines().count()));
    }

    let block_name = block_name.ok_or(SchemaError::MissingDataBlock)?;
    let block_id =
        block_number(&block_name).ok_or_else(|| SchemaError::MissingBlockId(block_name.clone()))?;

    let fields = match (block_fields, block_type_ref) {
        (Some(fields), _) => fields,
        (None, Some(type_name)) => types
            .get(&type_name)
            .cloned()
            .ok_or(SchemaError::UnknownType(type_name))?,
        (None, None) => Vec::new(),
    };

    Ok(BlockSchema {
        block_id,
        block_name,
        types,
        fields,
    })
}
