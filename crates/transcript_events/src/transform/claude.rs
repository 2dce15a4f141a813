use serde_json::Value;

use super::fields::{
    extract_str, extract_str_from_keys, insert_flag, insert_str, insert_value, message_id,
    raw_str, text_block, timestamp_from_keys,
};
use crate::format::TranscriptFormat;
use crate::model::{ContentBlock, Metadata, RawRecord, Role, SessionMessage};

/// Only `user` and `assistant` records carry conversation. `system`,
/// `summary`, `result`, `file-history-snapshot`, `queue-operation` and
/// partial `stream_event` records are bookkeeping.
pub(super) fn transform(record: &RawRecord) -> Option<SessionMessage> {
    let value = &record.value;
    let record_type = extract_str(value, "type")?;
    if !matches!(record_type, "user" | "assistant") {
        return None;
    }
    let message = value.get("message").filter(|m| m.is_object())?;
    let role = extract_str(message, "role")
        .and_then(Role::parse)
        .or_else(|| Role::parse(record_type))?;

    let content = match message.get("content") {
        Some(Value::String(text)) => text_block(text).into_iter().collect(),
        Some(Value::Array(parts)) => parts.iter().filter_map(content_block).collect(),
        _ => Vec::new(),
    };

    let id = message_id(
        TranscriptFormat::ClaudeCode,
        record.line_number,
        &[extract_str(value, "uuid"), extract_str(message, "id")],
    );

    Some(
        SessionMessage::new(id, role, content)
            .with_timestamp(timestamp_from_keys(value, &["timestamp"]))
            .with_metadata(metadata(value, message)),
    )
}

fn content_block(part: &Value) -> Option<ContentBlock> {
    match extract_str(part, "type")? {
        "text" => text_block(raw_str(part, "text")?),
        "thinking" => {
            let thinking = raw_str(part, "thinking")?;
            (!thinking.is_empty()).then(|| ContentBlock::Thinking {
                thinking: thinking.to_string(),
            })
        }
        "tool_use" | "server_tool_use" => Some(ContentBlock::ToolUse {
            id: extract_str(part, "id")?.to_string(),
            name: extract_str(part, "name").unwrap_or("unknown").to_string(),
            input: part
                .get("input")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default())),
        }),
        "tool_result" | "web_search_tool_result" => Some(ContentBlock::ToolResult {
            tool_use_id: extract_str(part, "tool_use_id")?.to_string(),
            content: part
                .get("content")
                .cloned()
                .unwrap_or_else(|| Value::String(String::new())),
            is_error: part.get("is_error").and_then(Value::as_bool),
        }),
        // Images, documents and redacted reasoning have no unified block.
        _ => None,
    }
}

fn metadata(record: &Value, message: &Value) -> Metadata {
    let mut metadata = Metadata::new();
    insert_str(&mut metadata, "model", extract_str(message, "model"));
    insert_value(&mut metadata, "usage", message.get("usage"));
    insert_str(&mut metadata, "stop_reason", extract_str(message, "stop_reason"));
    insert_str(
        &mut metadata,
        "session_id",
        extract_str_from_keys(record, &["sessionId", "session_id"]),
    );
    insert_str(&mut metadata, "parent_id", extract_str(record, "parentUuid"));
    insert_str(&mut metadata, "request_id", extract_str(record, "requestId"));
    insert_str(&mut metadata, "cwd", extract_str(record, "cwd"));
    insert_str(&mut metadata, "git_branch", extract_str(record, "gitBranch"));
    insert_str(&mut metadata, "version", extract_str(record, "version"));
    insert_flag(&mut metadata, "is_sidechain", record.get("isSidechain"));
    insert_flag(&mut metadata, "is_meta", record.get("isMeta"));
    insert_value(&mut metadata, "tool_use_result", record.get("toolUseResult"));
    metadata
}
