use serde_json::{json, Value};

use super::fields::{
    decode_arguments, extract_str, extract_str_from_keys, insert_str, message_id, raw_str,
    text_block, timestamp_from_keys,
};
use crate::format::TranscriptFormat;
use crate::model::{ContentBlock, Metadata, RawRecord, Role, SessionMessage};

const FORMAT: TranscriptFormat = TranscriptFormat::CodexRollout;

/// Maps one rollout line. `response_item` envelopes carry the conversation;
/// `event_msg` entries mirror the same turns for the TUI and are skipped so
/// nothing is counted twice. Legacy rollouts store the item itself as the line.
pub(super) fn transform(record: &RawRecord) -> Option<SessionMessage> {
    let value = &record.value;
    let item = match extract_str(value, "type") {
        Some("response_item") => value.get("payload")?,
        Some("session_meta" | "event_msg" | "turn_context" | "compacted") => return None,
        Some(_) => value,
        None => return None,
    };
    let timestamp = timestamp_from_keys(value, &["timestamp"]);

    let (role, content) = match extract_str(item, "type")? {
        "message" => message(item)?,
        "reasoning" => (Role::Assistant, vec![reasoning(item)?]),
        "function_call" => (
            Role::Assistant,
            vec![ContentBlock::ToolUse {
                id: call_id(item)?,
                name: extract_str(item, "name").unwrap_or("unknown").to_string(),
                input: decode_arguments(item.get("arguments").unwrap_or(&Value::Null)),
            }],
        ),
        "custom_tool_call" => (
            Role::Assistant,
            vec![ContentBlock::ToolUse {
                id: call_id(item)?,
                name: extract_str(item, "name").unwrap_or("unknown").to_string(),
                input: item.get("input").cloned().unwrap_or(Value::Null),
            }],
        ),
        "local_shell_call" => (
            Role::Assistant,
            vec![ContentBlock::ToolUse {
                id: call_id(item)?,
                name: "shell".to_string(),
                input: item.get("action").cloned().unwrap_or(Value::Null),
            }],
        ),
        "web_search_call" => (
            Role::Assistant,
            vec![ContentBlock::ToolUse {
                id: call_id(item)?,
                name: "web_search".to_string(),
                input: item.get("action").cloned().unwrap_or(Value::Null),
            }],
        ),
        "function_call_output" | "custom_tool_call_output" => {
            (Role::User, vec![tool_output(item)?])
        }
        _ => return None,
    };

    let mut metadata = Metadata::new();
    insert_str(&mut metadata, "item_type", extract_str(item, "type"));
    insert_str(&mut metadata, "status", extract_str(item, "status"));

    let id = message_id(FORMAT, record.line_number, &[extract_str(item, "id")]);
    Some(
        SessionMessage::new(id, role, content)
            .with_timestamp(timestamp)
            .with_metadata(metadata),
    )
}

fn call_id(item: &Value) -> Option<String> {
    extract_str_from_keys(item, &["call_id", "id"]).map(str::to_string)
}

fn message(item: &Value) -> Option<(Role, Vec<ContentBlock>)> {
    let role = Role::parse(extract_str(item, "role")?)?;
    let content = match item.get("content") {
        Some(Value::String(text)) => text_block(text).into_iter().collect(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|part| {
                matches!(
                    extract_str(part, "type"),
                    Some("input_text" | "output_text" | "text")
                )
            })
            .filter_map(|part| text_block(raw_str(part, "text")?))
            .collect(),
        _ => Vec::new(),
    };
    Some((role, content))
}

/// Readable reasoning lives in `summary`; newer rollouts may also carry raw
/// `content`. Encrypted-only reasoning yields nothing.
fn reasoning(item: &Value) -> Option<ContentBlock> {
    let mut parts = texts(item, "summary");
    if parts.is_empty() {
        parts = texts(item, "content");
    }
    if parts.is_empty() {
        return None;
    }
    Some(ContentBlock::Thinking {
        thinking: parts.join("\n\n"),
    })
}

fn texts<'a>(item: &'a Value, key: &str) -> Vec<&'a str> {
    item.get(key)
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| raw_str(part, "text"))
                .filter(|text| !text.trim().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Shell outputs are JSON-encoded `{output, metadata: {exit_code}}` strings;
/// other tools return plain text.
fn tool_output(item: &Value) -> Option<ContentBlock> {
    let tool_use_id = extract_str(item, "call_id")?.to_string();
    let raw = item.get("output").cloned().unwrap_or(Value::Null);

    let decoded = raw
        .as_str()
        .and_then(|text| serde_json::from_str::<Value>(text).ok())
        .filter(Value::is_object);
    let (content, is_error) = match decoded {
        Some(object) => {
            let exit_code = object.pointer("/metadata/exit_code").and_then(Value::as_i64);
            let output = object.get("output").cloned().unwrap_or(json!(""));
            (output, exit_code.map(|code| code != 0))
        }
        None => {
            let failed = item.get("success").and_then(Value::as_bool).map(|ok| !ok);
            (raw, failed)
        }
    };

    Some(ContentBlock::ToolResult {
        tool_use_id,
        content,
        is_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line_number: usize, value: Value) -> RawRecord {
        RawRecord { line_number, value }
    }

    #[test]
    fn function_calls_decode_their_arguments() {
        let message = transform(&record(
            4,
            json!({
                "timestamp": "2025-01-02T03:04:05.000Z",
                "type": "response_item",
                "payload": {
                    "type": "function_call",
                    "name": "shell",
                    "arguments": "{\"command\":[\"bash\",\"-lc\",\"ls\"]}",
                    "call_id": "call_1"
                }
            }),
        ))
        .unwrap();

        assert_eq!(message.id, "codex_rollout-line-4");
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(
            message.content,
            vec![ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "shell".into(),
                input: json!({"command": ["bash", "-lc", "ls"]}),
            }]
        );
    }

    #[test]
    fn shell_output_exit_code_sets_the_error_flag() {
        let message = transform(&record(
            1,
            json!({
                "type": "response_item",
                "payload": {
                    "type": "function_call_output",
                    "call_id": "call_1",
                    "output": "{\"output\":\"ls: cannot access\",\"metadata\":{\"exit_code\":2}}"
                }
            }),
        ))
        .unwrap();

        assert_eq!(message.role, Role::User);
        assert_eq!(
            message.content,
            vec![ContentBlock::ToolResult {
                tool_use_id: "call_1".into(),
                content: json!("ls: cannot access"),
                is_error: Some(true),
            }]
        );
    }

    #[test]
    fn developer_messages_and_event_mirrors_are_skipped() {
        let developer = json!({
            "type": "response_item",
            "payload": {"type": "message", "role": "developer", "content": [{"type": "input_text", "text": "rules"}]}
        });
        let mirror = json!({"type": "event_msg", "payload": {"type": "user_message", "message": "hi"}});
        assert!(transform(&record(1, developer)).is_none());
        assert!(transform(&record(2, mirror)).is_none());
    }

    #[test]
    fn legacy_bare_items_are_understood() {
        let message = transform(&record(
            2,
            json!({"type": "reasoning", "id": "rs_1", "summary": [{"type": "summary_text", "text": "Plan"}]}),
        ))
        .unwrap();
        assert_eq!(message.id, "rs_1");
        assert_eq!(
            message.content,
            vec![ContentBlock::Thinking {
                thinking: "Plan".into()
            }]
        );
    }
}
