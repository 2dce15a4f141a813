#![forbid(unsafe_code)]
//! Library half of the `agent-console` binary: settings loading and the
//! subcommand bodies, kept here so they can be driven from tests with an
//! in-memory writer.

pub mod commands;
mod config;
mod error;

pub use config::{ConsoleConfig, IngestSettings};
pub use error::ConsoleError;
