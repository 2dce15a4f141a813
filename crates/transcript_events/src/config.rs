use std::fmt;
use std::sync::Arc;

use crate::error::ErrorDetailSink;

/// Default per-line cap. Claude transcripts inline base64 images, so single
/// records legitimately reach several megabytes.
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum ErrorDetailCapture {
    #[default]
    RedactedSummaryOnly,
    FullDetails,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IngestLimits {
    pub max_line_bytes: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

#[derive(Clone, Default)]
pub struct IngestConfig {
    pub limits: IngestLimits,
    pub error_detail_capture: ErrorDetailCapture,
    /// Receives full parser diagnostics when `error_detail_capture` is
    /// [`ErrorDetailCapture::FullDetails`]. Details may contain transcript text.
    pub error_sink: Option<Arc<dyn ErrorDetailSink>>,
}

impl IngestConfig {
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.limits.max_line_bytes = max_line_bytes;
        self
    }

    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorDetailSink>) -> Self {
        self.error_detail_capture = ErrorDetailCapture::FullDetails;
        self.error_sink = Some(sink);
        self
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("limits", &self.limits)
            .field("error_detail_capture", &self.error_detail_capture)
            .field("error_sink", &self.error_sink.is_some())
            .finish()
    }
}
