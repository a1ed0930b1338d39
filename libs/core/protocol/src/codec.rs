//! Wire codec: `encode(envelope) -> bytes` / `decode(bytes) -> envelope`.
//!
//! The wire representation is self-describing JSON. `encode` always stamps
//! `timestamp`; `decode` rejects anything missing `id`/`kind` or carrying an
//! unrecognized `kind` string as [`ProtocolError::Malformed`] — a
//! communication-class error one layer up.

use chrono::Utc;
use thiserror::Error;

use crate::envelope::Envelope;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Encode an envelope to its wire form, stamping `timestamp` first.
pub fn encode(mut envelope: Envelope) -> Result<Vec<u8>, ProtocolError> {
    envelope.timestamp = Some(Utc::now());
    serde_json::to_vec(&envelope).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Encode directly to a single line of JSON text (no embedded newline),
/// suitable for the line-delimited subprocess channel (SPEC_FULL.md §1).
pub fn encode_line(envelope: Envelope) -> Result<String, ProtocolError> {
    let bytes = encode(envelope)?;
    String::from_utf8(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Decode a wire-form envelope, validating required fields and the `kind` tag.
pub fn decode(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if value.get("id").and_then(|v| v.as_str()).is_none() {
        return Err(ProtocolError::Malformed("missing required field `id`".into()));
    }
    if value.get("kind").is_none() {
        return Err(ProtocolError::Malformed("missing required field `kind`".into()));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(format!("unknown or invalid `kind`: {e}")))
}

/// Decode a single line of wire text.
pub fn decode_line(line: &str) -> Result<Envelope, ProtocolError> {
    decode(line.as_bytes())
}
