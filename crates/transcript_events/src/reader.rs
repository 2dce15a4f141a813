use std::io::{BufRead, ErrorKind};

#[derive(Debug)]
pub enum BoundedLine {
    Line {
        line_number: usize,
        bytes: Vec<u8>,
    },
    LineTooLong {
        line_number: usize,
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    IoError {
        line_number: usize,
        message: String,
    },
}

/// Splits a byte stream on `\n` without ever buffering more than
/// `max_line_bytes` of a single line. Oversized lines are drained and
/// reported so iteration can continue with the next line.
pub struct BoundedLineReader<R: BufRead> {
    reader: R,
    max_line_bytes: usize,
    line_number: usize,
    done: bool,
}

struct PendingLine {
    bytes: Vec<u8>,
    observed_bytes: usize,
    overflowed: bool,
}

impl<R: BufRead> BoundedLineReader<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            max_line_bytes,
            line_number: 0,
            done: false,
        }
    }

    fn read_pending(&mut self) -> std::io::Result<Option<PendingLine>> {
        let max_line_bytes = self.max_line_bytes;
        let mut pending = PendingLine {
            bytes: Vec::new(),
            observed_bytes: 0,
            overflowed: false,
        };
        let mut saw_bytes = false;

        loop {
            let available = match self.reader.fill_buf() {
                Ok(available) => available,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if available.is_empty() {
                return Ok(saw_bytes.then_some(pending));
            }
            saw_bytes = true;

            let newline = available.iter().position(|b| *b == b'\n');
            let segment_len = newline.unwrap_or(available.len());
            pending.observed_bytes = pending.observed_bytes.saturating_add(segment_len);
            if pending.observed_bytes > max_line_bytes {
                if !pending.overflowed {
                    pending.overflowed = true;
                    pending.bytes = Vec::new();
                }
            } else {
                pending.bytes.extend_from_slice(&available[..segment_len]);
            }

            let consumed = newline.map_or(segment_len, |idx| idx + 1);
            self.reader.consume(consumed);
            if newline.is_some() {
                return Ok(Some(pending));
            }
        }
    }
}

impl<R: BufRead> Iterator for BoundedLineReader<R> {
    type Item = BoundedLine;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_pending() {
            Ok(None) => {
                self.done = true;
                None
            }
            Ok(Some(pending)) => {
                self.line_number += 1;
                let line_number = self.line_number;
                if pending.overflowed {
                    Some(BoundedLine::LineTooLong {
                        line_number,
                        observed_bytes: pending.observed_bytes,
                        max_line_bytes: self.max_line_bytes,
                    })
                } else {
                    Some(BoundedLine::Line {
                        line_number,
                        bytes: pending.bytes,
                    })
                }
            }
            Err(err) => {
                self.done = true;
                self.line_number += 1;
                Some(BoundedLine::IoError {
                    line_number: self.line_number,
                    message: err.to_string(),
                })
            }
        }
    }
}
