use serde::Serialize;
use tracing::{debug, warn};

use crate::config::IngestConfig;
use crate::format::{detect_format, TranscriptFormat};
use crate::ingest::RecordIngestor;
use crate::line_parser::JsonRecordParser;
use crate::model::{RawRecord, SessionMessage, ToolResultIndex};
use crate::noise::NoisePolicy;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedTranscript {
    pub format: TranscriptFormat,
    pub messages: Vec<SessionMessage>,
    /// Built from every transformed message, including ones later dropped as
    /// noise, so results stay resolvable for surviving invocations.
    pub tool_results: ToolResultIndex,
    /// Lines that could not be read or parsed as JSON objects.
    pub skipped_lines: usize,
}

/// Turns raw JSONL transcript text into ordered [`SessionMessage`]s.
///
/// The pipeline is ingest, detect once, transform per record, index tool
/// results, then filter noise. It is pure: the same text and settings always
/// produce the same output.
#[derive(Debug, Clone, Default)]
pub struct TranscriptNormalizer {
    policy: NoisePolicy,
    ingest: IngestConfig,
    forced_format: Option<TranscriptFormat>,
}

impl TranscriptNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: NoisePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_ingest_config(mut self, config: IngestConfig) -> Self {
        self.ingest = config;
        self
    }

    /// Skips detection and applies `format` to every record.
    pub fn with_format(mut self, format: TranscriptFormat) -> Self {
        self.forced_format = Some(format);
        self
    }

    pub fn policy(&self) -> &NoisePolicy {
        &self.policy
    }

    /// Parses every line, returning the records that are JSON objects and the
    /// number of lines skipped.
    pub fn read_records(&self, text: &str) -> (Vec<RawRecord>, usize) {
        let mut records = Vec::new();
        let mut skipped = 0;
        for line in RecordIngestor::new(text.as_bytes(), JsonRecordParser, self.ingest.clone()) {
            match line.outcome {
                Ok(record) => records.push(record),
                Err(err) => {
                    skipped += 1;
                    warn!(line_number = line.line_number, error = %err, "skipping unreadable transcript line");
                }
            }
        }
        (records, skipped)
    }

    pub fn detect(&self, text: &str) -> TranscriptFormat {
        match self.forced_format {
            Some(format) => format,
            None => detect_format(&self.read_records(text).0),
        }
    }

    pub fn normalize(&self, text: &str) -> NormalizedTranscript {
        let (records, skipped_lines) = self.read_records(text);
        let format = self
            .forced_format
            .unwrap_or_else(|| detect_format(&records));

        let transformed: Vec<SessionMessage> = records
            .iter()
            .filter_map(|record| format.transform(record))
            .collect();
        let tool_results = ToolResultIndex::from_messages(&transformed);

        let total = transformed.len();
        let messages: Vec<SessionMessage> = transformed
            .into_iter()
            .filter(|message| !self.policy.is_noise_message(message))
            .collect();

        debug!(
            %format,
            records = records.len(),
            messages = messages.len(),
            noise = total - messages.len(),
            skipped_lines,
            "normalized transcript"
        );

        NormalizedTranscript {
            format,
            messages,
            tool_results,
            skipped_lines,
        }
    }
}

/// Normalizes with the default noise policy and ingestion limits.
pub fn normalize_transcript(text: &str) -> NormalizedTranscript {
    TranscriptNormalizer::default().normalize(text)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::model::ContentBlock;

    fn jsonl(records: &[Value]) -> String {
        records
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn user(uuid: &str, content: Value) -> Value {
        json!({"type": "user", "uuid": uuid, "message": {"role": "user", "content": content}})
    }

    fn assistant(uuid: &str, content: Value) -> Value {
        json!({"type": "assistant", "uuid": uuid, "message": {"role": "assistant", "content": content}})
    }

    #[test]
    fn warmup_alone_yields_nothing() {
        let warmup = user("w", json!("Warmup"));
        assert!(normalize_transcript(&jsonl(&[warmup.clone()]))
            .messages
            .is_empty());

        let hello = assistant("a", json!([{"type": "text", "text": "Hello"}]));
        let transcript = normalize_transcript(&jsonl(&[warmup, hello]));
        assert_eq!(transcript.messages.len(), 1);
        assert_eq!(transcript.messages[0].id, "a");
    }

    #[test]
    fn mixed_reminder_and_text_is_kept_whole() {
        let mixed = user(
            "u",
            json!([
                {"type": "text", "text": "Fix the test"},
                {"type": "text", "text": "<system-reminder>todo list is empty</system-reminder>"}
            ]),
        );
        let transcript = normalize_transcript(&jsonl(&[mixed]));
        assert_eq!(transcript.messages.len(), 1);
        assert_eq!(transcript.messages[0].content.len(), 2);
    }

    #[test]
    fn empty_content_is_not_noise() {
        let transcript = normalize_transcript(&jsonl(&[user("e", json!([]))]));
        assert_eq!(transcript.messages.len(), 1);
        assert!(transcript.messages[0].content.is_empty());
    }

    #[test]
    fn tool_results_are_indexed_by_invocation_id() {
        let call = assistant(
            "a",
            json!([{"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "ls"}}]),
        );
        let result = user(
            "u",
            json!([{"type": "tool_result", "tool_use_id": "t1", "content": "done", "is_error": false}]),
        );
        let transcript = normalize_transcript(&jsonl(&[call, result]));

        let entry = transcript.tool_results.get("t1").expect("t1 indexed");
        assert_eq!(entry.content, json!("done"));
        assert!(!entry.is_error());
        assert!(matches!(
            transcript.messages[1].content[0],
            ContentBlock::ToolResult { .. }
        ));
    }

    #[test]
    fn empty_transcript_is_empty_passthrough() {
        let transcript = normalize_transcript("");
        assert_eq!(transcript.format, TranscriptFormat::Passthrough);
        assert!(transcript.messages.is_empty());
        assert!(transcript.tool_results.is_empty());
        assert_eq!(transcript.skipped_lines, 0);
    }

    #[test]
    fn skipped_lines_are_counted_without_stopping() {
        let text = format!(
            "{}\nnot json\n[1, 2]\n{}",
            user("u", json!("first")),
            user("v", json!("second"))
        );
        let transcript = normalize_transcript(&text);
        assert_eq!(transcript.skipped_lines, 2);
        assert_eq!(transcript.messages.len(), 2);
    }
}
