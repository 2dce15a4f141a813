use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::{ContentBlock, SessionMessage};

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid noise policy: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Text signatures of machine-generated chatter that agent tools inject into
/// the user channel (reminders, slash-command echoes, continuation prompts).
///
/// A message is noise only when every one of its blocks is noise. Tool
/// traffic and reasoning never are, and neither is an empty message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NoisePolicy {
    /// Whole-text matches, compared after trimming.
    pub exact: Vec<String>,
    /// Leading-text matches, compared after trimming.
    pub prefixes: Vec<String>,
    /// Tag names whose `<tag>...</tag>` wrapping, possibly repeated, makes up
    /// the entire text.
    pub wrapped_tags: Vec<String>,
    /// Treat JSON arrays of `{content, status}` objects (todo snapshots) as noise.
    pub subtask_lists: bool,
}

impl Default for NoisePolicy {
    fn default() -> Self {
        Self {
            exact: vec!["Warmup".to_string()],
            prefixes: [
                "This session is being continued from a previous conversation",
                "Caveat: The messages below were generated by the user while running local commands",
                "API Error:",
            ]
            .map(String::from)
            .to_vec(),
            wrapped_tags: [
                "system-reminder",
                "command-name",
                "command-message",
                "command-args",
                "local-command-stdout",
                "local-command-stderr",
                "environment_context",
                "user_instructions",
            ]
            .map(String::from)
            .to_vec(),
            subtask_lists: true,
        }
    }
}

impl NoisePolicy {
    /// A policy that keeps everything.
    pub fn none() -> Self {
        Self {
            exact: Vec::new(),
            prefixes: Vec::new(),
            wrapped_tags: Vec::new(),
            subtask_lists: false,
        }
    }

    /// Parses a policy table. Omitted keys fall back to the defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, PolicyError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn is_noise_text(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.exact.iter().any(|exact| text == exact)
            || self
                .prefixes
                .iter()
                .any(|prefix| text.starts_with(prefix.as_str()))
            || self.is_fully_wrapped(text)
            || (self.subtask_lists && is_subtask_list(text))
    }

    pub fn is_noise_block(&self, block: &ContentBlock) -> bool {
        match block {
            ContentBlock::Text { text } => self.is_noise_text(text),
            _ => false,
        }
    }

    pub fn is_noise_message(&self, message: &SessionMessage) -> bool {
        !message.content.is_empty()
            && message
                .content
                .iter()
                .all(|block| self.is_noise_block(block))
    }

    fn is_fully_wrapped(&self, text: &str) -> bool {
        let mut rest = text;
        let mut wrapped = false;
        while !rest.is_empty() {
            let Some((tag, inner)) = self.wrapped_tags.iter().find_map(|tag| {
                rest.strip_prefix('<')?
                    .strip_prefix(tag.as_str())?
                    .strip_prefix('>')
                    .map(|inner| (tag, inner))
            }) else {
                return false;
            };
            let close = format!("</{tag}>");
            let Some(end) = inner.find(&close) else {
                return false;
            };
            rest = inner[end + close.len()..].trim_start();
            wrapped = true;
        }
        wrapped
    }
}

fn is_subtask_list(text: &str) -> bool {
    if !text.starts_with('[') {
        return false;
    }
    match serde_json::from_str::<Vec<Value>>(text) {
        Ok(items) => {
            !items.is_empty()
                && items
                    .iter()
                    .all(|item| item.get("content").is_some() && item.get("status").is_some())
        }
        Err(_) => false,
    }
}
