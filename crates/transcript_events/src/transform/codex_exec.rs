use serde_json::{json, Value};

use super::fields::{
    decode_arguments, extract_str, extract_str_from_keys, insert_str, message_id, raw_str,
    text_block, timestamp_from_keys,
};
use crate::format::TranscriptFormat;
use crate::model::{ContentBlock, Metadata, RawRecord, Role, SessionMessage};

/// Only finished items become messages; `item.started`/`item.updated` are
/// progress snapshots of the same item and `thread.*`/`turn.*` are lifecycle.
pub(super) fn transform(record: &RawRecord) -> Option<SessionMessage> {
    let value = &record.value;
    if extract_str(value, "type")? != "item.completed" {
        return None;
    }
    let item = value.get("item").filter(|item| item.is_object())?;
    // Older CLIs spelled the discriminator `item_type` and nested text under `content`.
    let item_type = extract_str_from_keys(item, &["type", "item_type"])?;
    let item_id = extract_str(item, "id");

    let content: Vec<ContentBlock> = match item_type {
        "agent_message" | "assistant_message" => text_block(item_text(item)?)
            .into_iter()
            .collect(),
        "reasoning" => {
            let text = item_text(item)?;
            if text.trim().is_empty() {
                return None;
            }
            vec![ContentBlock::Thinking {
                thinking: text.to_string(),
            }]
        }
        "command_execution" => command_execution(item, item_id?),
        "mcp_tool_call" => mcp_tool_call(item, item_id?),
        "file_change" => file_change(item, item_id?),
        "web_search" => vec![ContentBlock::ToolUse {
            id: item_id?.to_string(),
            name: "web_search".to_string(),
            input: json!({"query": item.get("query").cloned().unwrap_or(Value::Null)}),
        }],
        "error" => text_block(extract_str(item, "message")?).into_iter().collect(),
        // Plan updates restate the todo list on every change.
        _ => return None,
    };

    let mut metadata = Metadata::new();
    insert_str(&mut metadata, "item_type", Some(item_type));
    insert_str(&mut metadata, "thread_id", extract_str(value, "thread_id"));
    insert_str(&mut metadata, "turn_id", extract_str(value, "turn_id"));

    let id = message_id(TranscriptFormat::CodexExec, record.line_number, &[item_id]);
    Some(
        SessionMessage::new(id, Role::Assistant, content)
            .with_timestamp(timestamp_from_keys(value, &["timestamp"]))
            .with_metadata(metadata),
    )
}

fn item_text(item: &Value) -> Option<&str> {
    raw_str(item, "text").or_else(|| item.get("content").and_then(|c| raw_str(c, "text")))
}

fn failed(item: &Value) -> bool {
    extract_str(item, "status") == Some("failed")
}

/// A finished command carries both the invocation and its output, so it
/// becomes a paired use/result within one message.
fn command_execution(item: &Value, id: &str) -> Vec<ContentBlock> {
    let exit_code = item.get("exit_code").and_then(Value::as_i64);
    vec![
        ContentBlock::ToolUse {
            id: id.to_string(),
            name: "command_execution".to_string(),
            input: json!({"command": item.get("command").cloned().unwrap_or(Value::Null)}),
        },
        ContentBlock::ToolResult {
            tool_use_id: id.to_string(),
            content: item
                .get("aggregated_output")
                .cloned()
                .unwrap_or_else(|| json!("")),
            is_error: Some(failed(item) || exit_code.is_some_and(|code| code != 0)),
        },
    ]
}

fn mcp_tool_call(item: &Value, id: &str) -> Vec<ContentBlock> {
    let name = match (extract_str(item, "server"), extract_str(item, "tool")) {
        (Some(server), Some(tool)) => format!("{server}/{tool}"),
        (None, Some(tool)) => tool.to_string(),
        _ => "mcp_tool_call".to_string(),
    };
    let mut blocks = vec![ContentBlock::ToolUse {
        id: id.to_string(),
        name,
        input: decode_arguments(item.get("arguments").unwrap_or(&Value::Null)),
    }];

    let error = item.get("error").filter(|e| !e.is_null());
    let result = item.get("result").filter(|r| !r.is_null());
    if let Some(content) = error.or(result) {
        blocks.push(ContentBlock::ToolResult {
            tool_use_id: id.to_string(),
            content: content.clone(),
            is_error: Some(error.is_some() || failed(item)),
        });
    }
    blocks
}

fn file_change(item: &Value, id: &str) -> Vec<ContentBlock> {
    vec![
        ContentBlock::ToolUse {
            id: id.to_string(),
            name: "file_change".to_string(),
            input: json!({"changes": item.get("changes").cloned().unwrap_or_else(|| json!([]))}),
        },
        ContentBlock::ToolResult {
            tool_use_id: id.to_string(),
            content: json!(extract_str(item, "status").unwrap_or("completed")),
            is_error: Some(failed(item)),
        },
    ]
}
