use std::fs;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;
use serde_json::Value;
use session_transport::{ConnectionManager, Envelope, EventBus, Handler, WsConnector, EVENT_ERROR};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use transcript_events::{FsTranscriptSource, NoisePolicy, SessionAssembler, TranscriptFormat};

use crate::config::ConsoleConfig;
use crate::error::ConsoleError;

#[derive(Debug, Args)]
pub struct DetectArgs {
    /// JSONL transcript to inspect.
    pub path: PathBuf,
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// JSONL transcript to normalize.
    pub path: PathBuf,

    /// Skip detection and read the transcript as this format
    /// (`claude_code`, `codex_rollout`, `codex_exec`, `passthrough`).
    #[arg(long)]
    pub format: Option<TranscriptFormat>,

    /// Keep messages the noise policy would drop.
    #[arg(long)]
    pub keep_noise: bool,

    #[arg(long)]
    pub pretty: bool,
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Directory holding `<project>/<session>.jsonl` transcripts.
    #[arg(long)]
    pub root: PathBuf,

    #[arg(long)]
    pub project: String,

    #[arg(long)]
    pub session: String,

    #[arg(long)]
    pub pretty: bool,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Endpoint override; defaults to `[connection].url`.
    #[arg(long)]
    pub url: Option<String>,

    /// Credential sent as the token query parameter.
    #[arg(long)]
    pub token: String,

    /// Event types to print, e.g. `session.abc.output`. Repeatable.
    #[arg(long = "event", required = true)]
    pub events: Vec<String>,

    /// Envelope to send once connected, as `TYPE=JSON`. Repeatable.
    #[arg(long = "send")]
    pub sends: Vec<String>,
}

fn read_transcript(path: &Path) -> Result<String, ConsoleError> {
    fs::read_to_string(path).map_err(|source| ConsoleError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<W: Write, T: Serialize>(
    out: &mut W,
    value: &T,
    pretty: bool,
) -> Result<(), ConsoleError> {
    if pretty {
        serde_json::to_writer_pretty(&mut *out, value)?;
    } else {
        serde_json::to_writer(&mut *out, value)?;
    }
    writeln!(out)?;
    Ok(())
}

/// Prints the detected format name.
pub fn detect<W: Write>(
    args: &DetectArgs,
    config: &ConsoleConfig,
    out: &mut W,
) -> Result<TranscriptFormat, ConsoleError> {
    let text = read_transcript(&args.path)?;
    let format = config.normalizer().detect(&text);
    writeln!(out, "{format}")?;
    Ok(format)
}

pub fn normalize<W: Write>(
    args: &NormalizeArgs,
    config: &ConsoleConfig,
    out: &mut W,
) -> Result<(), ConsoleError> {
    let text = read_transcript(&args.path)?;
    let mut normalizer = config.normalizer();
    if args.keep_noise {
        normalizer = normalizer.with_policy(NoisePolicy::none());
    }
    if let Some(format) = args.format {
        normalizer = normalizer.with_format(format);
    }
    let transcript = normalizer.normalize(&text);
    if transcript.skipped_lines > 0 {
        warn!(
            skipped = transcript.skipped_lines,
            path = %args.path.display(),
            "some transcript lines were unreadable"
        );
    }
    write_json(out, &transcript, args.pretty)
}

pub async fn replay<W: Write>(
    args: &ReplayArgs,
    config: &ConsoleConfig,
    out: &mut W,
) -> Result<(), ConsoleError> {
    let source = FsTranscriptSource::new(&args.root);
    let assembler = SessionAssembler::new(config.normalizer());
    let session = assembler
        .load_async(&source, &args.project, &args.session)
        .await?;
    if session.messages.is_empty() {
        warn!(project = %args.project, session = %args.session, "no messages to replay");
    }

    let pending = session.pending_tool_calls().count();
    if pending > 0 {
        info!(pending, "tool calls without a recorded result");
    }
    write_json(out, &session, args.pretty)
}

/// Splits `TYPE=JSON`. A value that is not valid JSON is sent as a string.
pub fn parse_send(raw: &str) -> Result<Envelope, ConsoleError> {
    let Some((kind, data)) = raw.split_once('=') else {
        return Err(ConsoleError::InvalidSend(raw.to_string()));
    };
    if kind.is_empty() {
        return Err(ConsoleError::InvalidSend(raw.to_string()));
    }
    let data = serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.to_string()));
    Ok(Envelope::new(kind, data))
}

/// Streams the requested events as JSON lines until `stop` resolves or the
/// connection fails for good.
pub async fn watch_events<W, S>(
    args: &WatchArgs,
    config: &ConsoleConfig,
    out: &mut W,
    stop: S,
) -> Result<(), ConsoleError>
where
    W: Write,
    S: Future<Output = ()>,
{
    let outbound = args
        .sends
        .iter()
        .map(|raw| parse_send(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let mut connection = config.connection.clone();
    if let Some(url) = &args.url {
        connection.url = url.clone();
    }

    let bus = EventBus::new();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut topics = args.events.clone();
    if !topics.iter().any(|topic| topic == EVENT_ERROR) {
        topics.push(EVENT_ERROR.to_string());
    }
    for topic in topics {
        let tx = events_tx.clone();
        let name = topic.clone();
        bus.on(
            topic,
            &Handler::infallible(move |data| {
                let _ = tx.send(Envelope::new(name.clone(), data.clone()));
            }),
        );
    }
    drop(events_tx);

    let (_credentials, credentials_rx) = watch::channel(Some(args.token.clone()));
    let manager = ConnectionManager::start(connection, credentials_rx, WsConnector, bus)?;
    for envelope in outbound {
        manager.send(envelope.kind, envelope.data)?;
    }

    tokio::pin!(stop);
    let outcome = loop {
        tokio::select! {
            () = &mut stop => {
                debug!("watch interrupted");
                break Ok(());
            }
            event = events.recv() => {
                let Some(envelope) = event else {
                    break Ok(());
                };
                if let Err(err) = writeln!(out, "{}", envelope.to_json()?) {
                    break Err(err.into());
                }
                if envelope.kind == EVENT_ERROR && envelope.data["terminal"] == true {
                    let message = envelope.data["message"]
                        .as_str()
                        .unwrap_or("connection failed")
                        .to_string();
                    break Err(ConsoleError::ConnectionEnded(message));
                }
            }
        }
    };
    manager.shutdown().await;
    outcome
}
