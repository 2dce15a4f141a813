use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One parsed transcript line, before any format-specific interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub line_number: usize,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Maps the role spellings agent tools use onto the two conversational
    /// roles. System and developer prompts have no place in a replay.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" | "human" => Some(Self::User),
            "assistant" | "model" | "agent" => Some(Self::Assistant),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Tool traffic and reasoning are never treated as noise.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Thinking { .. } | Self::ToolUse { .. } | Self::ToolResult { .. }
        )
    }
}

pub type Metadata = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: String,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    /// Milliseconds since the Unix epoch; `0` when the source had no usable time.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl SessionMessage {
    pub fn new(id: impl Into<String>, role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            id: id.into(),
            role,
            content,
            timestamp: 0,
            metadata: Metadata::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Concatenated text blocks, separated by blank lines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultEntry {
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResultEntry {
    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }
}

/// Tool results keyed by the id of the invocation that produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolResultIndex(BTreeMap<String, ToolResultEntry>);

impl ToolResultIndex {
    /// Scans every tool-result block. A later result for the same id replaces
    /// an earlier one.
    pub fn from_messages<'a>(messages: impl IntoIterator<Item = &'a SessionMessage>) -> Self {
        let mut index = BTreeMap::new();
        for message in messages {
            for block in &message.content {
                if let ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } = block
                {
                    index.insert(
                        tool_use_id.clone(),
                        ToolResultEntry {
                            content: content.clone(),
                            is_error: *is_error,
                        },
                    );
                }
            }
        }
        Self(index)
    }

    pub fn get(&self, tool_use_id: &str) -> Option<&ToolResultEntry> {
        self.0.get(tool_use_id)
    }

    pub fn contains(&self, tool_use_id: &str) -> bool {
        self.0.contains_key(tool_use_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ToolResultEntry)> {
        self.0.iter().map(|(id, entry)| (id.as_str(), entry))
    }
}
