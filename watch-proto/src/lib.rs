//! # pprof Wire Messages
//!
//! Protobuf messages for the `perftools.profiles` format consumed by `go tool
//! pprof`, Pyroscope and friends. Written as `prost` derives so the workspace
//! builds without `protoc`.
//!
//! ## Layout
//!
//! Every string in a [`Profile`] is an index into [`Profile::string_table`],
//! whose first entry must be the empty string. IDs (`Function::id`,
//! `Location::id`, `Mapping::id`) are non-zero; zero means "unset".
//!
//! ## Key Types
//!
//! - [`Profile`] - Top level container
//! - [`Sample`] - One stack with its values (leaf frame first)
//! - [`Location`] / [`Line`] - Stack frame and the function(s) inlined at it
//! - [`Function`] - Function name table entry

// ============================================================================
// Profile
// ============================================================================

/// A complete profile.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Profile {
    /// Meaning of each entry in `Sample::value`
    #[prost(message, repeated, tag = "1")]
    pub sample_type: Vec<ValueType>,
    #[prost(message, repeated, tag = "2")]
    pub sample: Vec<Sample>,
    #[prost(message, repeated, tag = "3")]
    pub mapping: Vec<Mapping>,
    #[prost(message, repeated, tag = "4")]
    pub location: Vec<Location>,
    #[prost(message, repeated, tag = "5")]
    pub function: Vec<Function>,
    /// String table, index 0 must be ""
    #[prost(string, repeated, tag = "6")]
    pub string_table: Vec<String>,
    #[prost(int64, tag = "7")]
    pub drop_frames: i64,
    #[prost(int64, tag = "8")]
    pub keep_frames: i64,
    /// Collection start, unix nanoseconds
    #[prost(int64, tag = "9")]
    pub time_nanos: i64,
    #[prost(int64, tag = "10")]
    pub duration_nanos: i64,
    #[prost(message, optional, tag = "11")]
    pub period_type: Option<ValueType>,
    #[prost(int64, tag = "12")]
    pub period: i64,
    #[prost(int64, repeated, tag = "13")]
    pub comment: Vec<i64>,
    /// Index into the string table of the preferred sample type
    #[prost(int64, tag = "14")]
    pub default_sample_type: i64,
}

/// `(type, unit)` pair, both string table indices.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct ValueType {
    #[prost(int64, tag = "1")]
    pub r#type: i64,
    #[prost(int64, tag = "2")]
    pub unit: i64,
}

// ============================================================================
// Samples
// ============================================================================

/// One recorded stack.
///
/// `location_id[0]` is the leaf, the last entry is the root. `value` has one
/// entry per [`Profile::sample_type`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Sample {
    #[prost(uint64, repeated, tag = "1")]
    pub location_id: Vec<u64>,
    #[prost(int64, repeated, tag = "2")]
    pub value: Vec<i64>,
    #[prost(message, repeated, tag = "3")]
    pub label: Vec<Label>,
}

#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Label {
    #[prost(int64, tag = "1")]
    pub key: i64,
    #[prost(int64, tag = "2")]
    pub str: i64,
    #[prost(int64, tag = "3")]
    pub num: i64,
    #[prost(int64, tag = "4")]
    pub num_unit: i64,
}

// ============================================================================
// Symbol Tables
// ============================================================================

/// Binary mapping. Unused for script profiles but part of the format.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Mapping {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub memory_start: u64,
    #[prost(uint64, tag = "3")]
    pub memory_limit: u64,
    #[prost(uint64, tag = "4")]
    pub file_offset: u64,
    #[prost(int64, tag = "5")]
    pub filename: i64,
    #[prost(int64, tag = "6")]
    pub build_id: i64,
    #[prost(bool, tag = "7")]
    pub has_functions: bool,
    #[prost(bool, tag = "8")]
    pub has_filenames: bool,
    #[prost(bool, tag = "9")]
    pub has_line_numbers: bool,
    #[prost(bool, tag = "10")]
    pub has_inline_frames: bool,
}

/// A stack frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Location {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub mapping_id: u64,
    #[prost(uint64, tag = "3")]
    pub address: u64,
    /// Innermost inlined function first
    #[prost(message, repeated, tag = "4")]
    pub line: Vec<Line>,
    #[prost(bool, tag = "5")]
    pub is_folded: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Line {
    #[prost(uint64, tag = "1")]
    pub function_id: u64,
    #[prost(int64, tag = "2")]
    pub line: i64,
}

#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Function {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(int64, tag = "2")]
    pub name: i64,
    #[prost(int64, tag = "3")]
    pub system_name: i64,
    #[prost(int64, tag = "4")]
    pub filename: i64,
    #[prost(int64, tag = "5")]
    pub start_line: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_profile_wire_roundtrip_keeps_stacks() {
        let profile = Profile {
            string_table: vec![String::new(), "tick".to_string()],
            function: vec![Function { id: 1, name: 1, system_name: 1, ..Function::default() }],
            location: vec![Location {
                id: 1,
                line: vec![Line { function_id: 1, line: 0 }],
                ..Location::default()
            }],
            sample: vec![Sample { location_id: vec![1], value: vec![10, 1], label: vec![] }],
            ..Profile::default()
        };

        let bytes = profile.encode_to_vec();
        let decoded = Profile::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, profile);
    }

    #[test]
    fn test_default_profile_is_empty_on_the_wire() {
        assert!(Profile::default().encode_to_vec().is_empty());
    }
}
