//! # sessync
//!
//! Command-line watcher: loads a session, follows its event connection and
//! prints every published record as one JSON line on stdout. Logs go to
//! stderr.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{info, warn};

use sessync_client::HttpSessionResource;
use sessync_core::{ChangeRecord, SessionId, SessionResource};
use sessync_settings::{SyncSettings, load_settings, load_settings_from_path};
use sessync_sync::{
    ConnectionConfig, ConnectionState, SessionEventService, SyncFailure, events_base_from_rest,
    load_session_data,
};

/// Session event synchronization tools.
#[derive(Parser, Debug)]
#[command(name = "sessync", version, about = "Mirror change events of a remote analysis session")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow a session and print its change records as JSON lines.
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Session to open.
    #[arg(long)]
    session: String,

    /// Bearer token for the REST API and the event connection.
    #[arg(long)]
    token: String,

    /// REST base URL (overrides settings).
    #[arg(long)]
    rest_url: Option<String>,

    /// WebSocket base URL (overrides settings; derived from the REST URL
    /// when unset).
    #[arg(long)]
    events_url: Option<String>,

    /// Settings file (defaults to `~/.sessync/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[derive(Serialize)]
struct Line<'a, T: Serialize> {
    stream: &'static str,
    #[serde(flatten)]
    record: &'a ChangeRecord<T>,
}

fn print_record<T: Serialize>(
    stream: &'static str,
    received: Result<ChangeRecord<T>, RecvError>,
) -> Result<()> {
    match received {
        Ok(record) => {
            let line = serde_json::to_string(&Line {
                stream,
                record: &record,
            })?;
            println!("{line}");
        }
        Err(RecvError::Lagged(skipped)) => warn!(stream, skipped, "output lagged"),
        Err(RecvError::Closed) => bail!("{stream} sequence closed"),
    }
    Ok(())
}

fn failure_line(failure: &SyncFailure) -> serde_json::Value {
    json!({
        "stream": "failure",
        "event": failure.event,
        "stage": format!("{:?}", failure.stage),
        "error": failure.error.to_string(),
        "kind": failure.error_kind(),
        "retryable": failure.is_retryable(),
    })
}

fn print_failure(received: Result<SyncFailure, RecvError>) -> Result<()> {
    match received {
        Ok(failure) => println!("{}", failure_line(&failure)),
        Err(RecvError::Lagged(skipped)) => warn!(skipped, "failure output lagged"),
        Err(RecvError::Closed) => bail!("failure sequence closed"),
    }
    Ok(())
}

/// Marks the current state as seen, so a failure that happened before the
/// receiver existed is not missed.
fn connection_lost(state: &mut watch::Receiver<ConnectionState>) -> bool {
    *state.borrow_and_update() == ConnectionState::Disconnected
}

fn resolve_settings(args: &WatchArgs) -> Result<SyncSettings> {
    let mut settings = match &args.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings().context("failed to load settings")?,
    };
    if let Some(url) = &args.rest_url {
        settings.server.rest_url.clone_from(url);
    }
    if let Some(url) = &args.events_url {
        settings.server.events_url = Some(url.clone());
    }
    Ok(settings)
}

async fn watch(args: WatchArgs) -> Result<()> {
    let settings = resolve_settings(&args)?;
    sessync_logging::init_subscriber(&settings.logging);

    let token = SecretString::from(args.token);
    let session_id = SessionId::from_raw(args.session);

    let mut client = HttpSessionResource::new(&settings.server.rest_url, token.clone())?;
    if let Some(url) = &settings.server.type_service_url {
        client = client.with_type_service(url)?;
    }
    if let Some(limit) = settings.sync.fetch_timeout() {
        client = client.with_request_timeout(limit)?;
    }
    let resource: Arc<dyn SessionResource> = Arc::new(client);

    let data = load_session_data(resource.as_ref(), &session_id)
        .await
        .with_context(|| format!("failed to load session {session_id}"))?;
    info!(
        %session_id,
        datasets = data.datasets().len(),
        jobs = data.jobs().len(),
        "session ready"
    );

    let events_url = match &settings.server.events_url {
        Some(url) => url.clone(),
        None => events_base_from_rest(&settings.server.rest_url)?,
    };
    let config = ConnectionConfig {
        ping_interval: settings.connection.ping_interval(),
        connect_timeout: settings.connection.connect_timeout(),
        ..ConnectionConfig::new(events_url)
    };

    let service = SessionEventService::builder(Arc::new(data), resource)
        .fetch_timeout(settings.sync.fetch_timeout())
        .broadcast_capacity(settings.sync.broadcast_capacity)
        .connect(config, token)
        .on_connection_error(|error| eprintln!("{} ({error})", error.user_message()))
        .start()?;

    let mut datasets = service.subscribe_datasets();
    let mut jobs = service.subscribe_jobs();
    let mut sessions = service.subscribe_sessions();
    let mut authorization = service.subscribe_authorization();
    let mut failures = service.subscribe_failures();
    let mut state = service
        .watch_connection_state()
        .context("event connection not configured")?;
    if connection_lost(&mut state) {
        service.shutdown().await;
        bail!("event connection lost");
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break Ok(());
            }
            received = datasets.recv() => print_record("dataset", received)?,
            received = jobs.recv() => print_record("job", received)?,
            received = sessions.recv() => print_record("session", received)?,
            received = authorization.recv() => {
                print_record("authorization", received)?;
                warn!(%session_id, "authorization revoked, stopping");
                break Ok(());
            }
            received = failures.recv() => print_failure(received)?,
            changed = state.changed() => {
                if changed.is_err() || connection_lost(&mut state) {
                    break Err(anyhow::anyhow!("event connection lost"));
                }
            }
        }
    };

    service.shutdown().await;
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Watch(args) => watch(args).await,
    }
}
