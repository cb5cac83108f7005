use plc_gateway::error::SchemaError;
use plc_gateway::schema::{flatten_block, parse_block, ScannedTag};
use plc_gateway::tags::structures::{AccessRights, DataType};

const STATION_BLOCK: &str = r#"
TYPE "UDT_Pallet"
VERSION : 0.1
   STRUCT
      Present : Bool;   // pallet detected
      Id : Int;
   END_STRUCT;

END_TYPE

DATA_BLOCK "DB100_Station"
{ S7_Optimized_Access := 'FALSE' }
VERSION : 0.1
NON_RETAIN
   STRUCT
      Ready : Bool;
      Weight : Real;   (* kg *)
      Busy : Bool;
      Done : Bool;
      Counter : Int;
      Status : Byte;
      Code : String[10];
      Info : Struct
         Flag : Bool;
         Value : DInt;
      END_STRUCT;
      Pallet : "UDT_Pallet";
      Spare : Array[0..3] of Int;
      Last : Bool;
   END_STRUCT;

BEGIN
   Ready := FALSE;
   Code := 'A:B';
END_DATA_BLOCK
"#;

fn find<'a>(tags: &'a [ScannedTag], name: &str) -> &'a ScannedTag {
    tags.iter()
        .find(|t| t.name == name)
        .unwrap_or_else(|| panic!("tag {} not generated", name))
}

#[test]
fn lays_out_fields_with_alignment_and_bit_packing() {
    let tags = flatten_block(STATION_BLOCK).expect("block should flatten");
    let layout: Vec<(&str, &str)> = tags
        .iter()
        .map(|t| (t.name.as_str(), t.address.as_str()))
        .collect();
    assert_eq!(
        layout,
        vec![
            ("Ready", "DB100.DBX0.0"),
            ("Weight", "DB100.DBD2"),
            ("Busy", "DB100.DBX6.0"),
            ("Done", "DB100.DBX6.1"),
            ("Counter", "DB100.DBW8"),
            ("Status", "DB100.DBB10"),
            ("Code", "DB100.DBS12[10]"),
            ("Info.Flag", "DB100.DBX24.0"),
            ("Info.Value", "DB100.DBD26"),
            ("Pallet.Present", "DB100.DBX30.0"),
            ("Pallet.Id", "DB100.DBW32"),
            ("Last", "DB100.DBX34.0"),
        ]
    );
}

#[test]
fn maps_plc_types_to_generic_types() {
    let tags = flatten_block(STATION_BLOCK).unwrap();
    assert_eq!(find(&tags, "Ready").data_type, DataType::Bool);
    assert_eq!(find(&tags, "Weight").data_type, DataType::Float32);
    assert_eq!(find(&tags, "Counter").data_type, DataType::Int16);
    assert_eq!(find(&tags, "Status").data_type, DataType::Byte);
    assert_eq!(find(&tags, "Info.Value").data_type, DataType::Int32);

    let code = find(&tags, "Code");
    assert_eq!(code.data_type, DataType::String);
    assert_eq!(code.length, 10);
    assert!(tags.iter().all(|t| t.access == AccessRights::ReadWrite));
}

#[test]
fn skips_arrays() {
    let tags = flatten_block(STATION_BLOCK).unwrap();
    assert!(tags.iter().all(|t| !t.name.starts_with("Spare")));
}

#[test]
fn flattening_is_deterministic() {
    let first = flatten_block(STATION_BLOCK).unwrap();
    let second = flatten_block(STATION_BLOCK).unwrap();
    assert_eq!(first, second);
}

#[test]
fn parse_keeps_field_tree_and_types() {
    let schema = parse_block(STATION_BLOCK).unwrap();
    assert_eq!(schema.block_id, 100);
    assert_eq!(schema.block_name, "DB100_Station");
    assert!(schema.types.contains_key("UDT_Pallet"));

    let info = schema
        .fields
        .iter()
        .find(|f| f.name == "Info")
        .expect("Info field");
    assert!(info.is_struct);
    let children: Vec<&str> = info.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(children, vec!["Flag", "Value"]);

    let pallet = schema.fields.iter().find(|f| f.name == "Pallet").unwrap();
    assert!(!pallet.is_struct);
    assert_eq!(pallet.raw_type_name, "UDT_Pallet");
}

#[test]
fn bits_wrap_into_next_byte() {
    let text = r#"
DATA_BLOCK "DB5"
   STRUCT
      B0 : Bool;
      B1 : Bool;
      B2 : Bool;
      B3 : Bool;
      B4 : Bool;
      B5 : Bool;
      B6 : Bool;
      B7 : Bool;
      B8 : Bool;
      Small : Byte;
      Word : Int;
   END_STRUCT;
BEGIN
END_DATA_BLOCK
"#;
    let tags = flatten_block(text).unwrap();
    assert_eq!(find(&tags, "B7").address, "DB5.DBX0.7");
    assert_eq!(find(&tags, "B8").address, "DB5.DBX1.0");
    // Single bytes may sit on odd offsets; words may not.
    assert_eq!(find(&tags, "Small").address, "DB5.DBB2");
    assert_eq!(find(&tags, "Word").address, "DB5.DBW4");
}

#[test]
fn plain_string_uses_default_length() {
    let text = r#"
DATA_BLOCK "DB9"
   STRUCT
      Flag : Bool;
      Name : String;
      After : Int;
   END_STRUCT;
BEGIN
END_DATA_BLOCK
"#;
    let tags = flatten_block(text).unwrap();
    let name = find(&tags, "Name");
    assert_eq!(name.address, "DB9.DBS2[254]");
    assert_eq!(name.length, 254);
    assert_eq!(find(&tags, "After").address, "DB9.DBW258");
}

#[test]
fn instance_block_uses_named_type() {
    let text = r#"
TYPE "UDT_Pallet"
   STRUCT
      Present : Bool;
      Id : Int;
   END_STRUCT;
END_TYPE

DATA_BLOCK "Station_DB7"
"UDT_Pallet"
BEGIN
END_DATA_BLOCK
"#;
    let tags = flatten_block(text).unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0].name, "Present");
    assert_eq!(tags[0].address, "DB7.DBX0.0");
    assert_eq!(tags[1].name, "Id");
    assert_eq!(tags[1].address, "DB7.DBW2");
}

#[test]
fn field_named_like_a_keyword_is_a_field() {
    let text = r#"
DATA_BLOCK "DB3"
   STRUCT
      Type : Int;
      Begin : Bool;
   END_STRUCT;
BEGIN
END_DATA_BLOCK
"#;
    let tags = flatten_block(text).unwrap();
    assert_eq!(find(&tags, "Type").address, "DB3.DBW0");
    assert_eq!(find(&tags, "Begin").address, "DB3.DBX2.0");
}

#[test]
fn unknown_types_are_skipped() {
    let text = r#"
DATA_BLOCK "DB4"
   STRUCT
      Timer : IEC_TIMER;
      Count : Int;
   END_STRUCT;
BEGIN
END_DATA_BLOCK
"#;
    let tags = flatten_block(text).unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].address, "DB4.DBW0");
}

#[test]
fn reports_malformed_blocks() {
    assert_eq!(
        flatten_block("TYPE \"X\"\nSTRUCT\na : Int;\nEND_STRUCT;\nEND_TYPE\n"),
        Err(SchemaError::MissingDataBlock)
    );
    assert_eq!(
        flatten_block("DATA_BLOCK \"Station\"\nSTRUCT\na : Int;\nEND_STRUCT;\nBEGIN\nEND_DATA_BLOCK\n"),
        Err(SchemaError::MissingBlockId("Station".to_string()))
    );
    assert!(matches!(
        flatten_block("DATA_BLOCK \"DB1\"\nSTRUCT\na : Int;\nBEGIN\nEND_DATA_BLOCK\n"),
        Err(SchemaError::UnbalancedStruct(_))
    ));
    assert_eq!(
        flatten_block("DATA_BLOCK \"DB1\"\n\"Missing\"\nBEGIN\nEND_DATA_BLOCK\n"),
        Err(SchemaError::UnknownType("Missing".to_string()))
    );
}

#[test]
fn recursive_types_are_rejected() {
    let text = r#"
TYPE "Loop"
   STRUCT
      Next : "Loop";
   END_STRUCT;
END_TYPE

DATA_BLOCK "DB1"
   STRUCT
      Head : "Loop";
   END_STRUCT;
BEGIN
END_DATA_BLOCK
"#;
    assert_eq!(
        flatten_block(text),
        Err(SchemaError::RecursiveType("Loop".to_string()))
    );
}

#[test]
fn several_declarations_on_one_line() {
    let text = "DATA_BLOCK \"DB100\"\nSTRUCT\n\"Ready\":Bool; \"Weight\":Real;\nEND_STRUCT;\nBEGIN\nEND_DATA_BLOCK\n";
    let tags = flatten_block(text).unwrap();
    let layout: Vec<(&str, &str)> = tags
        .iter()
        .map(|t| (t.name.as_str(), t.address.as_str()))
        .collect();
    assert_eq!(
        layout,
        vec![("Ready", "DB100.DBX0.0"), ("Weight", "DB100.DBD2")]
    );
}

#[test]
fn struct_keywords_share_a_line_with_fields() {
    let text = r#"
DATA_BLOCK "DB5"
STRUCT "A" : Bool; "Info" : Struct "Flag" : Bool; "Value" : Int; END_STRUCT; "B" : Int;
END_STRUCT;
BEGIN
   A := TRUE; B := 3;
END_DATA_BLOCK
"#;
    let tags = flatten_block(text).unwrap();
    let layout: Vec<(&str, &str)> = tags
        .iter()
        .map(|t| (t.name.as_str(), t.address.as_str()))
        .collect();
    assert_eq!(
        layout,
        vec![
            ("A", "DB5.DBX0.0"),
            ("Info.Flag", "DB5.DBX2.0"),
            ("Info.Value", "DB5.DBW4"),
            ("B", "DB5.DBW6"),
        ]
    );
}

#[test]
fn quoted_names_with_attributes() {
    let text = r#"
DATA_BLOCK "DB12_Cell"
{ S7_Optimized_Access := 'FALSE' }
VERSION : 0.1
   STRUCT
      "Ready" {ExternalAccessible := 'False'; ExternalVisible := 'False'} : Bool;
      "Part Count" { ExternalWritable := 'False'} : Int := 0;
      "Label" : String[8] := 'a;b';   // quoted `;` stays in the initial value
      "Gap" {S7_SetPoint := 'True'} : Real;
   END_STRUCT;
BEGIN
END_DATA_BLOCK
"#;
    let tags = flatten_block(text).unwrap();
    assert_eq!(find(&tags, "Ready").address, "DB12.DBX0.0");
    assert_eq!(find(&tags, "Part Count").address, "DB12.DBW2");
    assert_eq!(find(&tags, "Label").address, "DB12.DBS4[8]");
    assert_eq!(find(&tags, "Gap").address, "DB12.DBD14");
    assert_eq!(tags.len(), 4);
}

#[test]
fn fields_past_the_address_range_are_errors() {
    let huge = "DATA_BLOCK \"DB1\"\nSTRUCT\nS : String[4294967295];\nEND_STRUCT;\nBEGIN\nEND_DATA_BLOCK\n";
    assert_eq!(
        flatten_block(huge),
        Err(SchemaError::Oversized("S".to_string()))
    );

    let spill = "DATA_BLOCK \"DB1\"\nSTRUCT\nS : String[4294967293];\nNext : Int;\nEND_STRUCT;\nBEGIN\nEND_DATA_BLOCK\n";
    assert_eq!(
        flatten_block(spill),
        Err(SchemaError::Oversized("Next".to_string()))
    );
}
