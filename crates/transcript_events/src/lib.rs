#![forbid(unsafe_code)]
//! Format-detecting normalization for coding-agent session transcripts.
//!
//! Agent CLIs persist sessions as JSONL, one record per line, and the record
//! shapes differ between tools and between versions of the same tool. This
//! crate provides:
//! - A bounded-memory, line-oriented ingestion loop that skips bad lines.
//! - A detector that picks one [`TranscriptFormat`] per transcript.
//! - Per-format transforms into the unified [`SessionMessage`] model.
//! - A configurable [`NoisePolicy`] and a [`ToolResultIndex`] for replay.
//!
//! ```
//! use transcript_events::{normalize_transcript, TranscriptFormat};
//!
//! let text = r#"{"type":"user","uuid":"u1","message":{"role":"user","content":"hi"}}"#;
//! let transcript = normalize_transcript(text);
//! assert_eq!(transcript.format, TranscriptFormat::ClaudeCode);
//! assert_eq!(transcript.messages[0].text(), "hi");
//! ```

mod assemble;
mod config;
mod error;
mod format;
mod ingest;
mod line_parser;
mod model;
mod noise;
mod normalize;
mod reader;
mod source;
mod transform;

pub use assemble::{AssembledSession, SessionAssembler, ToolInvocation};
pub use config::{ErrorDetailCapture, IngestConfig, IngestLimits, DEFAULT_MAX_LINE_BYTES};
pub use error::{ErrorDetail, ErrorDetailSink, LineRecord, LineRecordError, RecordErrorCode};
pub use format::{detect_format, TranscriptFormat, UnknownFormat};
pub use ingest::RecordIngestor;
pub use line_parser::{ClassifiedParserError, JsonRecordError, JsonRecordParser, LineParser};
pub use model::{
    ContentBlock, Metadata, RawRecord, Role, SessionMessage, ToolResultEntry, ToolResultIndex,
};
pub use noise::{NoisePolicy, PolicyError};
pub use normalize::{normalize_transcript, NormalizedTranscript, TranscriptNormalizer};
pub use reader::{BoundedLine, BoundedLineReader};
pub use source::{FsTranscriptSource, SourceError, TranscriptSource};
