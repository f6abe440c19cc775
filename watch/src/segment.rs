//! Memory segment envelope decoding
//!
//! The memory-segment endpoint answers `{"ok":1,"data":"..."}`. Large
//! segments are shipped as `gz:` followed by base64 of a gzip stream; small
//! ones are the raw string.

use std::io::Read;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use serde::Deserialize;

use crate::domain::DecodeError;

const GZIP_PREFIX: &str = "gz:";

#[derive(Deserialize)]
struct SegmentEnvelope {
    #[serde(default)]
    data: Option<String>,
}

/// Decode a raw memory segment response body into the payload bytes.
///
/// # Errors
/// Returns `DecodeError::EmptyPayload` for a missing/empty payload, and the
/// matching variant when the envelope, base64 or gzip stage fails.
pub fn decode(raw: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let envelope: SegmentEnvelope = serde_json::from_slice(raw).map_err(DecodeError::Envelope)?;
    let payload = envelope.data.unwrap_or_default();

    if payload.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }

    let Some(encoded) = payload.strip_prefix(GZIP_PREFIX) else {
        return Ok(payload.into_bytes());
    };

    let compressed = STANDARD.decode(encoded)?;
    let mut decoded = Vec::with_capacity(compressed.len() * 4);
    GzDecoder::new(compressed.as_slice()).read_to_end(&mut decoded).map_err(DecodeError::Gzip)?;
    Ok(decoded)
}
