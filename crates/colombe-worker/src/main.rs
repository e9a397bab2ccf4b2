//! Colombe offline worker host.
//!
//! Runs the worker against a live origin over HTTP, or performs one-off
//! operations: an update check, a routing decision, badge maintenance.

mod host;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colombe_common::{init_logging, LogConfig, LogFormat, WorkerConfig};
use colombe_store::RecordStore;
use colombe_sw::{
    CacheStorage, Destination, EventResult, HttpNetwork, Request, ServiceWorker, WorkerEvent,
    WorkerHost,
};
use serde_json::{json, Value as JsonValue};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::host::{HeadlessClients, LogSurface};

/// Colombe - offline cache and notification worker for the parent portal
#[derive(Parser, Debug)]
#[command(name = "colombe-worker")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log output format (pretty, compact, json)
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install and activate, then keep checking for updates until Ctrl-C
    Run,
    /// Check the manifest once and print the result
    Check,
    /// Print how a URL would be routed
    Route {
        url: String,
        /// Treat the request as a navigation
        #[arg(long)]
        document: bool,
    },
    /// Read or change the notification badge
    Badge {
        #[command(subcommand)]
        action: BadgeAction,
    },
}

#[derive(Subcommand, Debug)]
enum BadgeAction {
    Get,
    Set { count: u64 },
    Clear,
}

fn load_config(path: Option<&PathBuf>) -> Result<WorkerConfig> {
    match path {
        Some(path) => WorkerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(WorkerConfig::default()),
    }
}

fn build_worker(config: WorkerConfig) -> Result<ServiceWorker> {
    let network = HttpNetwork::new(config.origin.clone(), config.fetch_timeout())
        .context("creating HTTP client")?;
    let records = RecordStore::open(&config.store);

    let host = WorkerHost {
        network: Arc::new(network),
        clients: Arc::new(HeadlessClients),
        surface: Arc::new(LogSurface),
        records: Arc::new(records),
        caches: CacheStorage::shared(&config.cache),
    };
    Ok(ServiceWorker::new(config, host)?)
}

async fn send(worker: &ServiceWorker, message: JsonValue) -> Option<JsonValue> {
    match worker.dispatch(WorkerEvent::Message(message)).await {
        EventResult::Reply(reply) => reply,
        _ => None,
    }
}

fn print(value: &JsonValue) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(worker: ServiceWorker) -> Result<()> {
    let report = worker.install().await;
    info!(cached = report.cached, failed = report.failed.len(), "Installed");
    worker.activate().await;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    info!("Shutting down");
    worker.retire().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(LogConfig::from_verbosity(args.verbose).with_format(args.log_format))?;

    let config = load_config(args.config.as_ref())?;
    info!(origin = %config.origin, version = %config.default_version, "Starting Colombe worker");
    let worker = build_worker(config)?;

    match args.command {
        Command::Run => run(worker).await?,
        Command::Check => {
            let reply = send(&worker, json!({ "type": "CHECK_FOR_UPDATES" })).await;
            print(&reply.unwrap_or(JsonValue::Null))?;
        }
        Command::Route { url, document } => {
            let url = worker
                .config()
                .origin
                .join(&url)
                .with_context(|| format!("invalid URL {url}"))?;
            let request = if document {
                Request::navigate(url.clone())
            } else {
                Request::get(url.clone()).destination(Destination::Empty)
            };
            let class = worker.classify(&request);
            print(&json!({
                "url": url.as_str(),
                "class": format!("{class:?}"),
                "strategy": format!("{:?}", class.strategy()),
            }))?;
        }
        Command::Badge { action } => {
            let message = match action {
                BadgeAction::Get => json!({ "type": "GET_BADGE_COUNT" }),
                BadgeAction::Set { count } => json!({ "type": "SET_BADGE_COUNT", "data": { "count": count } }),
                BadgeAction::Clear => json!({ "type": "CLEAR_BADGE" }),
            };
            worker.badge().initialize();
            print(&send(&worker, message).await.unwrap_or(JsonValue::Null))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["colombe-worker", "-vv", "--log-format", "json", "badge", "set", "3"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.log_format, LogFormat::Json);
        assert!(matches!(
            args.command,
            Command::Badge {
                action: BadgeAction::Set { count: 3 }
            }
        ));
    }

    #[test]
    fn test_route_args() {
        let args = Args::try_parse_from(["colombe-worker", "route", "/parent.html", "--document"]).unwrap();
        assert!(matches!(args.command, Command::Route { document: true, .. }));
    }

    #[test]
    fn test_default_config_without_path() {
        let config = load_config(None).unwrap();
        assert_eq!(config.default_version, "2.2.0");
    }
}
