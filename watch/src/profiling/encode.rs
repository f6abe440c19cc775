//! Artifact → pprof wire form.

use std::collections::HashMap;
use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use prost::Message;
use screeps_watch_proto as pprof;

use super::convert::ConversionArtifact;

/// Sample value types, in `Sample::value` order
pub const SAMPLE_TYPES: [(&str, &str); 2] = [("cpu", "nanoseconds"), ("samples", "count")];

/// Deduplicating string table. Index 0 is always "".
struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, i64>,
}

impl StringTable {
    fn new() -> Self {
        let mut table = Self { strings: Vec::new(), index: HashMap::new() };
        table.intern("");
        table
    }

    #[allow(clippy::cast_possible_wrap)]
    fn intern(&mut self, value: &str) -> i64 {
        if let Some(&at) = self.index.get(value) {
            return at;
        }
        let at = self.strings.len() as i64;
        self.strings.push(value.to_string());
        self.index.insert(value.to_string(), at);
        at
    }
}

/// Build the protobuf profile, uncompressed.
pub fn to_pprof(artifact: &ConversionArtifact) -> pprof::Profile {
    let mut strings = StringTable::new();

    let sample_type = SAMPLE_TYPES
        .iter()
        .map(|(kind, unit)| pprof::ValueType {
            r#type: strings.intern(kind),
            unit: strings.intern(unit),
        })
        .collect();

    let function = artifact
        .functions()
        .iter()
        .map(|function| pprof::Function {
            id: function.id.0,
            name: strings.intern(&function.name),
            system_name: strings.intern(&function.system_name),
            filename: 0,
            start_line: 0,
        })
        .collect();

    let location = artifact
        .locations()
        .iter()
        .map(|location| pprof::Location {
            id: location.id.0,
            mapping_id: 0,
            address: 0,
            line: vec![pprof::Line { function_id: location.function_id.0, line: 0 }],
            is_folded: false,
        })
        .collect();

    let sample = artifact
        .samples()
        .iter()
        .map(|sample| pprof::Sample {
            location_id: sample.locations.iter().map(|location| location.0).collect(),
            value: vec![sample.self_cost_nanos, sample.count],
            label: Vec::new(),
        })
        .collect();

    let default_sample_type = strings.intern(SAMPLE_TYPES[0].0);

    pprof::Profile {
        sample_type,
        sample,
        location,
        function,
        time_nanos: artifact.start_time_nanos,
        duration_nanos: artifact.duration_nanos,
        default_sample_type,
        string_table: strings.strings,
        ..Default::default()
    }
}

/// Serialize and gzip, the layout `go tool pprof` reads from disk.
///
/// # Errors
/// Only fails if the compressor's writer does.
pub fn encode(artifact: &ConversionArtifact) -> io::Result<Vec<u8>> {
    let raw = to_pprof(artifact).encode_to_vec();
    let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::default());
    encoder.write_all(&raw)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiling::convert::Converter;
    use crate::profiling::node::ProfileNode;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn tick() -> ProfileNode {
        ProfileNode {
            key: "main".into(),
            start: 0.0,
            cpu_cost: 10.0,
            children: vec![ProfileNode {
                key: "run".into(),
                start: 0.0,
                cpu_cost: 4.0,
                children: Vec::new(),
                unix_milli: None,
            }],
            unix_milli: Some(1_700_000_000_000),
        }
    }

    fn string<'a>(profile: &'a pprof::Profile, at: i64) -> &'a str {
        &profile.string_table[usize::try_from(at).unwrap()]
    }

    #[test]
    fn test_string_table_and_sample_types() {
        let artifact = Converter::default().convert(&[tick(), tick()]);
        let profile = to_pprof(&artifact);

        assert_eq!(profile.string_table[0], "");
        let unique: std::collections::HashSet<_> = profile.string_table.iter().collect();
        assert_eq!(unique.len(), profile.string_table.len());

        assert_eq!(string(&profile, profile.sample_type[0].r#type), "cpu");
        assert_eq!(string(&profile, profile.sample_type[0].unit), "nanoseconds");
        assert_eq!(string(&profile, profile.sample_type[1].r#type), "samples");
        assert_eq!(string(&profile, profile.default_sample_type), "cpu");
    }

    #[test]
    fn test_samples_reference_tables() {
        let artifact = Converter::default().convert(&[tick()]);
        let profile = to_pprof(&artifact);

        assert_eq!(profile.sample.len(), 2);
        assert_eq!(profile.sample[0].value, vec![6_000_000, 1]);
        assert_eq!(profile.sample[1].value, vec![4_000_000, 1]);
        assert_eq!(profile.time_nanos, 1_700_000_000_000_000_000);

        let leaf = profile.sample[1].location_id[0];
        let location = profile.location.iter().find(|loc| loc.id == leaf).unwrap();
        let function =
            profile.function.iter().find(|f| f.id == location.line[0].function_id).unwrap();
        assert_eq!(string(&profile, function.name), "run");
    }

    #[test]
    fn test_encode_is_gzipped_protobuf() {
        let artifact = Converter::default().convert(&[tick()]);
        let bytes = encode(&artifact).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

        let mut raw = Vec::new();
        GzDecoder::new(bytes.as_slice()).read_to_end(&mut raw).unwrap();
        let decoded = pprof::Profile::decode(raw.as_slice()).unwrap();
        assert_eq!(decoded, to_pprof(&artifact));
    }
}
