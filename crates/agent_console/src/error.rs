use std::io;
use std::path::PathBuf;

use session_transport::{ConfigError, TransportError};
use thiserror::Error;
use transcript_events::SourceError;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file: {0}")]
    ConfigParse(#[source] toml::de::Error),
    #[error("invalid connection settings: {0}")]
    Connection(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("invalid --send `{0}`: expected TYPE=JSON")]
    InvalidSend(String),
    #[error("connection ended: {0}")]
    ConnectionEnded(String),
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}
