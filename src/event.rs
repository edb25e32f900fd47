//! The Event Record: the normalized representation of one HTTP request.
//!
//! Created once by the capture server per inbound request, read-only
//! downstream. Persisted as one line of newline-delimited JSON; loaded
//! unchanged for replay.
//!
//! # Body invariant
//! At most one of `json`/`raw` is meaningfully populated. `json` holds the
//! parsed body when it is valid JSON; otherwise `raw` holds the UTF-8 text,
//! or a base64 rendition when the bytes are not valid UTF-8. Both are empty
//! when the request had no body.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bodies beyond this size are summarized instead of decoded.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Binary bodies beyond this size are base64-encoded from a sample only.
const BINARY_SAMPLE_SIZE: usize = 1024;

// ---------------------------------------------------------------------------
// EventRecord
// ---------------------------------------------------------------------------

/// One captured HTTP request, immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// ISO-8601 UTC instant with millisecond precision, `Z`-suffixed.
    pub timestamp: String,
    /// HTTP method token, uppercase.
    pub method: String,
    /// Request path starting with `/`; excludes the query string.
    pub path: String,
    /// Header name (lowercased) to value. `host` is stripped on re-send.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Query parameter name to value; last value wins on duplicates.
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Parsed JSON body, or `None` if the body was empty or not valid JSON.
    #[serde(default)]
    pub json: Option<serde_json::Value>,
    /// Body fallback: UTF-8 text, or base64 when not decodable. Populated
    /// only when `json` is `None`.
    #[serde(default)]
    pub raw: String,
    /// Best-effort source address; `"unknown"` if unavailable.
    #[serde(default = "unknown_ip")]
    pub ip: String,
}

fn unknown_ip() -> String {
    "unknown".to_owned()
}

impl EventRecord {
    /// Parse the `timestamp` field for replay timing. `None` when the
    /// field is not a valid ISO-8601 instant.
    pub fn parse_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Current UTC instant formatted as the Event Record `timestamp` field.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Body decoding
// ---------------------------------------------------------------------------

/// Parse a request body as JSON. Empty, non-UTF-8, or syntactically
/// invalid bodies all yield `None`.
pub fn parse_json_body(body: &[u8]) -> Option<serde_json::Value> {
    if body.is_empty() {
        return None;
    }
    let text = std::str::from_utf8(body).ok()?;
    serde_json::from_str(text).ok()
}

/// Decode a request body to its `raw` string form.
///
/// UTF-8 text is returned as-is. Binary bodies are base64-encoded (a 1 KiB
/// sample for large bodies). Oversized bodies are summarized, not decoded.
pub fn decode_raw_body(body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    if body.len() > MAX_BODY_SIZE {
        return format!(
            "<body too large: {} bytes, max {} bytes>",
            body.len(),
            MAX_BODY_SIZE
        );
    }
    match std::str::from_utf8(body) {
        Ok(text) => text.to_owned(),
        Err(_) => {
            if body.len() > BINARY_SAMPLE_SIZE {
                let sample = BASE64.encode(&body[..BINARY_SAMPLE_SIZE]);
                format!("<binary data: {} bytes, sample: {}...>", body.len(), sample)
            } else {
                BASE64.encode(body)
            }
        }
    }
}
