use std::error::Error;

use serde_json::Value;

use crate::error::RecordErrorCode;
use crate::model::RawRecord;

pub trait LineParser {
    type Record;
    type Error: ClassifiedParserError;

    /// Parses one trimmed, non-blank line. `Ok(None)` skips the line silently.
    fn parse_line(
        &mut self,
        line: &str,
        line_number: usize,
    ) -> Result<Option<Self::Record>, Self::Error>;
}

pub trait ClassifiedParserError: Error {
    fn code(&self) -> RecordErrorCode;
    fn redacted_summary(&self) -> String;
    fn full_details(&self) -> String;
}

/// Parses every line as a standalone JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecordParser;

#[derive(Debug, thiserror::Error)]
pub enum JsonRecordError {
    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("record is a JSON {found}, expected an object")]
    NotAnObject { found: &'static str },
}

impl ClassifiedParserError for JsonRecordError {
    fn code(&self) -> RecordErrorCode {
        match self {
            Self::Json(_) => RecordErrorCode::JsonParse,
            Self::NotAnObject { .. } => RecordErrorCode::NotAnObject,
        }
    }

    fn redacted_summary(&self) -> String {
        match self {
            Self::Json(err) => format!("invalid JSON at column {}", err.column()),
            Self::NotAnObject { found } => format!("expected an object, found {found}"),
        }
    }

    fn full_details(&self) -> String {
        self.to_string()
    }
}

impl LineParser for JsonRecordParser {
    type Record = RawRecord;
    type Error = JsonRecordError;

    fn parse_line(
        &mut self,
        line: &str,
        line_number: usize,
    ) -> Result<Option<RawRecord>, JsonRecordError> {
        let value: Value = serde_json::from_str(line).map_err(JsonRecordError::Json)?;
        if !value.is_object() {
            return Err(JsonRecordError::NotAnObject {
                found: json_kind(&value),
            });
        }
        Ok(Some(RawRecord { line_number, value }))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
