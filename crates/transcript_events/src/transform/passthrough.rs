use serde_json::Value;

use super::fields::{extract_str, message_id, text_block, timestamp_from_keys};
use crate::format::TranscriptFormat;
use crate::model::{ContentBlock, Metadata, RawRecord, Role, SessionMessage};

/// Accepts records already shaped like [`SessionMessage`]. Unknown block
/// types are dropped individually rather than rejecting the record.
pub(super) fn transform(record: &RawRecord) -> Option<SessionMessage> {
    let value = &record.value;
    let role = Role::parse(extract_str(value, "role")?)?;
    let content = match value.get("content")? {
        Value::String(text) => text_block(text).into_iter().collect(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| serde_json::from_value::<ContentBlock>(part.clone()).ok())
            .collect(),
        _ => return None,
    };
    let metadata: Metadata = value
        .get("metadata")
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    let id = message_id(
        TranscriptFormat::Passthrough,
        record.line_number,
        &[extract_str(value, "id")],
    );
    Some(
        SessionMessage::new(id, role, content)
            .with_timestamp(timestamp_from_keys(value, &["timestamp"]))
            .with_metadata(metadata),
    )
}
