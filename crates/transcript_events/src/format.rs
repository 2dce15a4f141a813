use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::RawRecord;

/// The closed set of transcript shapes this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptFormat {
    /// Claude Code session files (`~/.claude/projects/<project>/<session>.jsonl`)
    /// and `--output-format stream-json` output.
    ClaudeCode,
    /// Codex rollout files (`~/.codex/sessions/**/rollout-*.jsonl`), both the
    /// `{type, payload}` envelope and the older bare-item layout.
    CodexRollout,
    /// `codex exec --json` event streams (`thread.*`, `turn.*`, `item.*`).
    CodexExec,
    /// Records already in the unified message shape, or unrecognized input.
    Passthrough,
}

impl TranscriptFormat {
    pub const ALL: [Self; 4] = [
        Self::ClaudeCode,
        Self::CodexRollout,
        Self::CodexExec,
        Self::Passthrough,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude_code",
            Self::CodexRollout => "codex_rollout",
            Self::CodexExec => "codex_exec",
            Self::Passthrough => "passthrough",
        }
    }
}

impl fmt::Display for TranscriptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transcript format `{0}` (expected claude_code, codex_rollout, codex_exec or passthrough)")]
pub struct UnknownFormat(pub String);

impl FromStr for TranscriptFormat {
    type Err = UnknownFormat;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "claude" | "claude_code" => Ok(Self::ClaudeCode),
            "codex" | "codex_rollout" => Ok(Self::CodexRollout),
            "codex_exec" => Ok(Self::CodexExec),
            "passthrough" | "unified" => Ok(Self::Passthrough),
            _ => Err(UnknownFormat(raw.to_string())),
        }
    }
}

const ROLLOUT_ENVELOPE_TYPES: &[&str] = &[
    "session_meta",
    "response_item",
    "event_msg",
    "turn_context",
    "compacted",
];

const ROLLOUT_ITEM_TYPES: &[&str] = &[
    "reasoning",
    "function_call",
    "function_call_output",
    "custom_tool_call",
    "custom_tool_call_output",
    "local_shell_call",
];

const EXEC_PREFIXES: &[&str] = &["thread.", "turn.", "item."];

/// Picks the format of a whole transcript from its leading records.
///
/// The first record carrying a recognizable signature decides; records that
/// look alike across formats (plain errors, blank objects) are skipped. With
/// no signature anywhere the transcript is treated as passthrough.
pub fn detect_format(records: &[RawRecord]) -> TranscriptFormat {
    records
        .iter()
        .find_map(|record| signature(&record.value))
        .unwrap_or(TranscriptFormat::Passthrough)
}

fn signature(value: &Value) -> Option<TranscriptFormat> {
    let object = value.as_object()?;
    let record_type = object.get("type").and_then(Value::as_str);

    if let Some(record_type) = record_type {
        if ROLLOUT_ENVELOPE_TYPES.contains(&record_type) && object.contains_key("payload") {
            return Some(TranscriptFormat::CodexRollout);
        }
        if EXEC_PREFIXES
            .iter()
            .any(|prefix| record_type.starts_with(prefix))
        {
            return Some(TranscriptFormat::CodexExec);
        }
        if matches!(record_type, "user" | "assistant")
            && object.get("message").is_some_and(Value::is_object)
        {
            return Some(TranscriptFormat::ClaudeCode);
        }
        if record_type == "summary" && object.contains_key("leafUuid") {
            return Some(TranscriptFormat::ClaudeCode);
        }
        if ROLLOUT_ITEM_TYPES.contains(&record_type) {
            return Some(TranscriptFormat::CodexRollout);
        }
        if record_type == "message" && has_rollout_content(object) {
            return Some(TranscriptFormat::CodexRollout);
        }
    }

    if object.contains_key("parentUuid") || object.contains_key("sessionId") {
        return Some(TranscriptFormat::ClaudeCode);
    }
    // Older rollouts open with `{id, timestamp, instructions}` and persist
    // `{"record_type": "state"}` markers between items.
    if object.contains_key("record_type")
        || (record_type.is_none() && object.contains_key("instructions"))
    {
        return Some(TranscriptFormat::CodexRollout);
    }
    None
}

fn has_rollout_content(object: &Map<String, Value>) -> bool {
    object
        .get("content")
        .and_then(Value::as_array)
        .is_some_and(|parts| {
            parts.iter().any(|part| {
                matches!(
                    part.get("type").and_then(Value::as_str),
                    Some("input_text" | "output_text" | "input_image")
                )
            })
        })
}
