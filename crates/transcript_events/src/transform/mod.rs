mod claude;
mod codex_exec;
mod codex_rollout;
mod fields;
mod passthrough;

use crate::format::TranscriptFormat;
use crate::model::{RawRecord, SessionMessage};

impl TranscriptFormat {
    /// Maps one raw record to at most one message. Records that carry no
    /// conversational content (lifecycle, bookkeeping, unknown shapes) yield
    /// `None`; transforms never fail.
    pub fn transform(self, record: &RawRecord) -> Option<SessionMessage> {
        match self {
            Self::ClaudeCode => claude::transform(record),
            Self::CodexRollout => codex_rollout::transform(record),
            Self::CodexExec => codex_exec::transform(record),
            Self::Passthrough => passthrough::transform(record),
        }
    }
}
