use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sent by the server once per connection when it is ready for traffic.
pub const EVENT_CONNECTED: &str = "global.connected";
/// Emitted locally on transport failures and terminal connection states.
pub const EVENT_ERROR: &str = "global.error";

/// The only wire unit in either direction: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    pub fn topic(&self) -> Topic {
        Topic::parse(&self.kind)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Structured view of a `.`-separated event name.
///
/// `session.<id>.<action>` and `shell.<id>.<action>` address one session or
/// shell; `global.<action>` is connection-wide. Actions may themselves contain
/// dots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Session { id: String, action: String },
    Shell { id: String, action: String },
    Global { action: String },
    Other(String),
}

impl Topic {
    pub fn session(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self::Session {
            id: id.into(),
            action: action.into(),
        }
    }

    pub fn shell(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self::Shell {
            id: id.into(),
            action: action.into(),
        }
    }

    pub fn global(action: impl Into<String>) -> Self {
        Self::Global {
            action: action.into(),
        }
    }

    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.splitn(3, '.');
        let scope = parts.next().unwrap_or_default();
        let second = parts.next().filter(|s| !s.is_empty());
        let third = parts.next().filter(|s| !s.is_empty());

        match (scope, second, third) {
            ("session", Some(id), Some(action)) => Self::session(id, action),
            ("shell", Some(id), Some(action)) => Self::shell(id, action),
            ("global", Some(first), rest) => Self::global(match rest {
                Some(rest) => format!("{first}.{rest}"),
                None => first.to_string(),
            }),
            _ => Self::Other(raw.to_string()),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session { id, action } => write!(f, "session.{id}.{action}"),
            Self::Shell { id, action } => write!(f, "shell.{id}.{action}"),
            Self::Global { action } => write!(f, "global.{action}"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_uses_type_on_the_wire() {
        let envelope = Envelope::new("session.abc.input", json!({"text": "ls"}));
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"type": "session.abc.input", "data": {"text": "ls"}})
        );
        let parsed = Envelope::from_json(r#"{"type":"global.connected"}"#).unwrap();
        assert_eq!(parsed.kind, EVENT_CONNECTED);
        assert_eq!(parsed.data, Value::Null);
    }

    #[test]
    fn topics_parse_and_print_back() {
        for raw in [
            "session.abc.output",
            "shell.7.resize",
            "global.connected",
            "session.abc.tool.result",
            "heartbeat",
            "session.abc",
        ] {
            assert_eq!(Topic::parse(raw).to_string(), raw);
        }
        assert_eq!(
            Topic::parse("session.abc.tool.result"),
            Topic::session("abc", "tool.result")
        );
        assert_eq!(Topic::parse("global.error"), Topic::global("error"));
        assert_eq!(
            Topic::parse("session.abc"),
            Topic::Other("session.abc".to_string())
        );
    }
}
