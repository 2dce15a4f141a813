use thiserror::Error;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RecordErrorCode {
    JsonParse,
    NotAnObject,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LineRecordError {
    #[error("I/O error while reading transcript: {0}")]
    Io(String),
    #[error("invalid UTF-8 in transcript line")]
    InvalidUtf8,
    #[error("line too long (observed_bytes={observed_bytes}, max_line_bytes={max_line_bytes})")]
    LineTooLong {
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    #[error("record parse failure ({code:?}): {summary}")]
    Parse {
        code: RecordErrorCode,
        summary: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineRecord<T> {
    /// 1-based physical line number in the transcript.
    pub line_number: usize,
    pub outcome: Result<T, LineRecordError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub line_number: usize,
    pub code: RecordErrorCode,
    pub details: String,
}

pub trait ErrorDetailSink: Send + Sync + 'static {
    fn on_error(&self, detail: ErrorDetail);
}
