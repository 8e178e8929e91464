//! msync - command-line front end of the synchronization core
//!
//! `watch` opens a scope and prints sync events and collection snapshots as
//! JSON lines until interrupted. `create`, `update` and `delete` apply one
//! optimistic mutation and print its outcome.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use msync_common::config::{load_config, TomlConfig};
use msync_common::events::SyncEvent;
use msync_common::{EntityType, MutationKind};
use msync_core::{Record, SyncEngine, SyncScope};
use serde_json::{json, Value};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for msync
#[derive(Parser, Debug)]
#[command(name = "msync")]
#[command(about = "Dual-backend synchronization client")]
#[command(version)]
struct Cli {
    /// Path to config file (overrides MSYNC_CONFIG and the default locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow one collection and print events until Ctrl-C
    Watch(Target),
    /// Create an entity
    Create(MutationArgs),
    /// Patch an entity
    Update(MutationArgs),
    /// Delete an entity
    Delete(MutationArgs),
}

#[derive(Args, Debug)]
struct Target {
    /// Project id
    #[arg(short, long, env = "MSYNC_PROJECT")]
    project: String,

    /// Entity type (task, message, voice_note, ...)
    #[arg(short, long, value_parser = parse_entity_type)]
    entity: EntityType,
}

#[derive(Args, Debug)]
struct MutationArgs {
    #[command(flatten)]
    target: Target,

    /// Target entity id (update, delete)
    #[arg(long)]
    id: Option<String>,

    /// Field as key=value; values that parse as JSON are sent as JSON
    #[arg(short, long = "field", value_parser = parse_field)]
    fields: Vec<(String, Value)>,
}

fn parse_entity_type(s: &str) -> std::result::Result<EntityType, String> {
    s.parse().map_err(|e: msync_common::Error| e.to_string())
}

fn parse_field(s: &str) -> std::result::Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.trim().is_empty() {
        return Err(format!("empty field name in '{}'", s));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config)?;

    let engine = SyncEngine::from_config(&config).context("Failed to initialize sync engine")?;
    info!(
        poll_interval_ms = config.sync.poll_interval_ms,
        attempt_timeout_ms = config.sync.attempt_timeout_ms,
        "Configuration loaded"
    );

    match cli.command {
        Command::Watch(target) => watch(&engine, target).await,
        Command::Create(args) => mutate(&engine, MutationKind::Create, args).await,
        Command::Update(args) => mutate(&engine, MutationKind::Update, args).await,
        Command::Delete(args) => mutate(&engine, MutationKind::Delete, args).await,
    }
}

/// Logs go to stderr (or the configured file) so stdout stays JSON lines
fn init_logging(config: &TomlConfig) -> Result<()> {
    let level = &config.logging.level;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("msync_core={level},msync_common={level}").into());

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };
    let stderr_layer = file_layer
        .is_none()
        .then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

async fn watch(engine: &SyncEngine, target: Target) -> Result<()> {
    let mut events = engine.events().subscribe();
    let mut scope = engine
        .open_scope(&target.project, target.entity)
        .await
        .context("Failed to open scope")?;

    print_collection(&scope).await?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = events.recv() => match received {
                Ok(event) => {
                    if event.scope() != (target.project.as_str(), target.entity) {
                        continue;
                    }
                    println!("{}", serde_json::to_string(&event)?);
                    if changes_collection(&event) {
                        print_collection(&scope).await?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged");
                    print_collection(&scope).await?;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    scope.teardown().await;
    Ok(())
}

fn changes_collection(event: &SyncEvent) -> bool {
    match event {
        SyncEvent::ReconcileApplied { counts, .. } => !counts.is_noop(),
        SyncEvent::EntityStaged { .. }
        | SyncEvent::MutationConfirmed { .. }
        | SyncEvent::MutationRolledBack { .. } => true,
        _ => false,
    }
}

async fn print_collection(scope: &SyncScope) -> Result<()> {
    let line = json!({
        "type": "Collection",
        "scope": scope.key().to_string(),
        "entities": scope.entities().await,
    });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

async fn mutate(engine: &SyncEngine, kind: MutationKind, args: MutationArgs) -> Result<()> {
    let mut payload: Record = args.fields.into_iter().collect();
    match (kind, args.id) {
        (MutationKind::Create, Some(_)) => bail!("create does not take --id; the backend assigns it"),
        (MutationKind::Create, None) => {}
        (_, Some(id)) => {
            payload.insert("id".to_string(), Value::String(id));
        }
        (_, None) => bail!("{} needs --id", kind),
    }

    let mut scope = engine
        .open_scope(&args.target.project, args.target.entity)
        .await
        .context("Failed to open scope")?;

    let result = match scope.apply(kind, payload).await {
        Ok(ticket) => {
            info!(id = %ticket.id, kind = %kind, "Mutation staged");
            ticket.outcome().await
        }
        Err(e) => Err(e),
    };
    scope.teardown().await;

    match result {
        Ok(entity) => {
            let line = json!({
                "type": "MutationOutcome",
                "kind": kind,
                "entity": entity,
            });
            println!("{}", serde_json::to_string(&line)?);
            Ok(())
        }
        Err(e) => Err(anyhow!(e).context(format!("{} failed", kind))),
    }
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field_json_and_text() {
        assert_eq!(parse_field("priority=3").unwrap(), ("priority".to_string(), json!(3)));
        assert_eq!(
            parse_field("title=Write report").unwrap(),
            ("title".to_string(), json!("Write report"))
        );
        assert_eq!(parse_field("done=true").unwrap(), ("done".to_string(), json!(true)));
        assert!(parse_field("novalue").is_err());
        assert!(parse_field("=x").is_err());
    }

    #[test]
    fn test_parse_entity_type_accepts_table_names() {
        assert_eq!(parse_entity_type("voice-notes").unwrap(), EntityType::VoiceNote);
        assert!(parse_entity_type("widgets").is_err());
    }

    #[test]
    fn test_cli_parses_mutation() {
        let cli = Cli::try_parse_from([
            "msync", "update", "--project", "p1", "--entity", "task", "--id", "t-1", "-f", "status=done",
        ])
        .unwrap();
        match cli.command {
            Command::Update(args) => {
                assert_eq!(args.id.as_deref(), Some("t-1"));
                assert_eq!(args.fields, vec![("status".to_string(), json!("done"))]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
