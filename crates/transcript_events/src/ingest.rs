use std::io::BufRead;

use tracing::debug;

use crate::config::{ErrorDetailCapture, IngestConfig};
use crate::error::{ErrorDetail, LineRecord, LineRecordError, RecordErrorCode};
use crate::line_parser::{ClassifiedParserError, LineParser};
use crate::reader::{BoundedLine, BoundedLineReader};

/// Drives a [`LineParser`] over a transcript, one [`LineRecord`] per
/// non-blank line. Failures are reported in-band and never end iteration
/// early, except for an I/O error which is always the last record.
pub struct RecordIngestor<R: BufRead, P: LineParser> {
    reader: BoundedLineReader<R>,
    parser: P,
    config: IngestConfig,
}

impl<R: BufRead, P: LineParser> RecordIngestor<R, P> {
    pub fn new(reader: R, parser: P, config: IngestConfig) -> Self {
        Self {
            reader: BoundedLineReader::new(reader, config.limits.max_line_bytes),
            parser,
            config,
        }
    }

    pub fn into_parser(self) -> P {
        self.parser
    }

    fn failed<T>(line_number: usize, err: LineRecordError) -> LineRecord<T> {
        debug!(line_number, error = %err, "skipping transcript line");
        LineRecord {
            line_number,
            outcome: Err(err),
        }
    }

    fn parse_failed<T>(
        &self,
        line_number: usize,
        code: RecordErrorCode,
        summary: String,
        full_details: String,
    ) -> LineRecord<T> {
        if self.config.error_detail_capture == ErrorDetailCapture::FullDetails {
            if let Some(sink) = self.config.error_sink.as_ref() {
                sink.on_error(ErrorDetail {
                    line_number,
                    code,
                    details: full_details,
                });
            }
        }
        Self::failed(line_number, LineRecordError::Parse { code, summary })
    }
}

impl<R: BufRead, P: LineParser> Iterator for RecordIngestor<R, P> {
    type Item = LineRecord<P::Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (line_number, bytes) = match self.reader.next()? {
                BoundedLine::Line { line_number, bytes } => (line_number, bytes),
                BoundedLine::LineTooLong {
                    line_number,
                    observed_bytes,
                    max_line_bytes,
                } => {
                    return Some(Self::failed(
                        line_number,
                        LineRecordError::LineTooLong {
                            observed_bytes,
                            max_line_bytes,
                        },
                    ));
                }
                BoundedLine::IoError {
                    line_number,
                    message,
                } => return Some(Self::failed(line_number, LineRecordError::Io(message))),
            };

            let Ok(text) = String::from_utf8(bytes) else {
                return Some(Self::failed(line_number, LineRecordError::InvalidUtf8));
            };
            let line = text.trim();
            if line.is_empty() {
                continue;
            }

            match self.parser.parse_line(line, line_number) {
                Ok(None) => continue,
                Ok(Some(record)) => {
                    return Some(LineRecord {
                        line_number,
                        outcome: Ok(record),
                    })
                }
                Err(err) => {
                    return Some(self.parse_failed(
                        line_number,
                        err.code(),
                        err.redacted_summary(),
                        err.full_details(),
                    ))
                }
            }
        }
    }
}
