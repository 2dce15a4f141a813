use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid {kind} identifier `{value}`")]
    InvalidId { kind: &'static str, value: String },
    #[error("failed to read transcript `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where raw transcript text comes from. `Ok(None)` means the session does
/// not exist, which is not an error.
pub trait TranscriptSource {
    fn read(&self, project: &str, session: &str) -> Result<Option<String>, SourceError>;
}

/// Reads `<root>/<project>/<session>.jsonl`, the layout Claude Code uses under
/// `~/.claude/projects`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsTranscriptSource {
    root: PathBuf,
}

impl FsTranscriptSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn transcript_path(&self, project: &str, session: &str) -> Result<PathBuf, SourceError> {
        validate_id("project", project)?;
        validate_id("session", session)?;
        Ok(self.root.join(project).join(format!("{session}.jsonl")))
    }

    #[cfg(feature = "tokio")]
    pub async fn read_async(
        &self,
        project: &str,
        session: &str,
    ) -> Result<Option<String>, SourceError> {
        let path = self.transcript_path(project, session)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SourceError::Read { path, source }),
        }
    }
}

impl TranscriptSource for FsTranscriptSource {
    fn read(&self, project: &str, session: &str) -> Result<Option<String>, SourceError> {
        let path = self.transcript_path(project, session)?;
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SourceError::Read { path, source }),
        }
    }
}

/// Identifiers become single path components; anything that could escape
/// the root is rejected.
fn validate_id(kind: &'static str, value: &str) -> Result<(), SourceError> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if invalid {
        return Err(SourceError::InvalidId {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}
