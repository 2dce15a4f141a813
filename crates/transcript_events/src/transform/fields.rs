use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::format::TranscriptFormat;
use crate::model::{ContentBlock, Metadata};

/// Anything below this is a seconds-based epoch (it would be 1973 in millis).
const SECONDS_CUTOFF: i64 = 100_000_000_000;

pub(super) fn extract_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub(super) fn extract_str_from_keys<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| extract_str(value, key))
}

/// Like [`extract_str`] but keeps surrounding whitespace, for message bodies.
pub(super) fn raw_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

pub(super) fn message_id(
    format: TranscriptFormat,
    line_number: usize,
    candidates: &[Option<&str>],
) -> String {
    candidates
        .iter()
        .flatten()
        .map(|id| id.trim())
        .find(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{format}-line-{line_number}"))
}

/// Epoch milliseconds from an RFC 3339 string or a numeric epoch in seconds
/// or milliseconds.
pub(super) fn timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::String(raw) => {
            let parsed = OffsetDateTime::parse(raw.trim(), &Rfc3339).ok()?;
            i64::try_from(parsed.unix_timestamp_nanos() / 1_000_000).ok()
        }
        Value::Number(number) => {
            let raw = number
                .as_i64()
                .or_else(|| number.as_f64().map(|f| f as i64))?;
            Some(if raw.abs() < SECONDS_CUTOFF {
                raw.saturating_mul(1000)
            } else {
                raw
            })
        }
        _ => None,
    }
}

pub(super) fn timestamp_from_keys(value: &Value, keys: &[&str]) -> i64 {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find_map(timestamp_ms)
        .unwrap_or(0)
}

pub(super) fn insert_str(metadata: &mut Metadata, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        metadata.insert(key.to_string(), Value::String(value.to_string()));
    }
}

pub(super) fn insert_value(metadata: &mut Metadata, key: &str, value: Option<&Value>) {
    if let Some(value) = value.filter(|v| !v.is_null()) {
        metadata.insert(key.to_string(), value.clone());
    }
}

pub(super) fn insert_flag(metadata: &mut Metadata, key: &str, value: Option<&Value>) {
    if value.and_then(Value::as_bool) == Some(true) {
        metadata.insert(key.to_string(), Value::Bool(true));
    }
}

/// Tool arguments arrive as JSON-encoded strings in Codex records. Decode
/// them when possible and keep the raw text otherwise.
pub(super) fn decode_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| raw.clone()),
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    }
}

pub(super) fn text_block(text: &str) -> Option<ContentBlock> {
    (!text.is_empty()).then(|| ContentBlock::text(text))
}
