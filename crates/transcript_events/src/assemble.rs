use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::format::TranscriptFormat;
use crate::model::{SessionMessage, ToolResultEntry, ToolResultIndex};
use crate::normalize::TranscriptNormalizer;
use crate::source::{SourceError, TranscriptSource};

/// A session ready for replay: ordered messages plus the results of the tool
/// calls they make.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledSession {
    pub format: TranscriptFormat,
    pub messages: Vec<SessionMessage>,
    pub tool_results: ToolResultIndex,
}

/// A tool call joined with its result, if one was recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolInvocation<'a> {
    pub message_id: &'a str,
    pub id: &'a str,
    pub name: &'a str,
    pub input: &'a Value,
    pub result: Option<&'a ToolResultEntry>,
}

impl AssembledSession {
    pub fn result_for(&self, tool_use_id: &str) -> Option<&ToolResultEntry> {
        self.tool_results.get(tool_use_id)
    }

    /// Every tool call in message order.
    pub fn tool_invocations(&self) -> impl Iterator<Item = ToolInvocation<'_>> {
        self.messages.iter().flat_map(move |message| {
            message
                .tool_uses()
                .map(move |(id, name, input)| ToolInvocation {
                    message_id: &message.id,
                    id,
                    name,
                    input,
                    result: self.tool_results.get(id),
                })
        })
    }

    /// Calls with no recorded result, typically an interrupted final turn.
    pub fn pending_tool_calls(&self) -> impl Iterator<Item = ToolInvocation<'_>> {
        self.tool_invocations()
            .filter(|invocation| invocation.result.is_none())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionAssembler {
    normalizer: TranscriptNormalizer,
}

impl SessionAssembler {
    pub fn new(normalizer: TranscriptNormalizer) -> Self {
        Self { normalizer }
    }

    pub fn normalizer(&self) -> &TranscriptNormalizer {
        &self.normalizer
    }

    pub fn assemble(&self, text: &str) -> AssembledSession {
        let normalized = self.normalizer.normalize(text);
        AssembledSession {
            format: normalized.format,
            messages: normalized.messages,
            tool_results: normalized.tool_results,
        }
    }

    /// Reads and assembles one session. A session the source does not know
    /// assembles as an empty transcript.
    pub fn load<S>(
        &self,
        source: &S,
        project: &str,
        session: &str,
    ) -> Result<AssembledSession, SourceError>
    where
        S: TranscriptSource + ?Sized,
    {
        let text = source.read(project, session)?.unwrap_or_else(|| {
            debug!(project, session, "transcript not found");
            String::new()
        });
        Ok(self.assemble(&text))
    }

    #[cfg(feature = "tokio")]
    pub async fn load_async(
        &self,
        source: &crate::source::FsTranscriptSource,
        project: &str,
        session: &str,
    ) -> Result<AssembledSession, SourceError> {
        let text = source
            .read_async(project, session)
            .await?
            .unwrap_or_else(|| {
                debug!(project, session, "transcript not found");
                String::new()
            });
        Ok(self.assemble(&text))
    }
}
