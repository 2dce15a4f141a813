use std::fs;
use std::path::Path;

use serde::Deserialize;
use session_transport::ConnectionConfig;
use transcript_events::{IngestConfig, NoisePolicy, TranscriptNormalizer, DEFAULT_MAX_LINE_BYTES};

use crate::error::ConsoleError;

/// Settings file passed with `--config`. Every table is optional.
///
/// ```toml
/// [connection]
/// url = "wss://console.example.com/ws"
/// backoff_ms = [500, 1000, 2000]
///
/// [noise]
/// exact = ["Warmup"]
/// wrapped_tags = ["system-reminder"]
///
/// [ingest]
/// max_line_bytes = 1048576
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsoleConfig {
    pub connection: ConnectionConfig,
    pub noise: NoisePolicy,
    pub ingest: IngestSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestSettings {
    pub max_line_bytes: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl ConsoleConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConsoleError> {
        let config: Self = toml::from_str(raw).map_err(ConsoleError::ConfigParse)?;
        config.connection.validate()?;
        Ok(config)
    }

    /// Loads `path`, or the defaults when no path was given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConsoleError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path).map_err(|source| ConsoleError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn normalizer(&self) -> TranscriptNormalizer {
        TranscriptNormalizer::new()
            .with_policy(self.noise.clone())
            .with_ingest_config(
                IngestConfig::default().with_max_line_bytes(self.ingest.max_line_bytes),
            )
    }
}
