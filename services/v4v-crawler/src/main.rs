//!
//! src/main.rs  Oct 18, 2026
//!
//! Command line entry for the value-for-value feed crawler: ingest feeds,
//! resolve their remote items, export the catalog and serve it. Live
//! upstream test benches live at the bottom
//!

mod api;
mod catalog;
mod config;
mod errors;
mod fetch;
mod logging;
mod model;
mod persistent;
mod repair;
mod resolver;
mod rss;
mod sink;
mod store;
mod types;

use std::{net::SocketAddr, sync::Arc};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::CrawlerError;
use crate::persistent::{JobType, Persistent};
use crate::resolver::{PodcastIndexSource, Resolver};
use crate::store::JsonStore;

#[derive(Parser)]
#[command(name = "v4v-crawler", about = "Value-for-value music feed crawler and catalog api")]
struct Cli {
    #[command(subcommand)]
    command: Command
}

#[derive(Subcommand)]
enum Command {
    /// Ingest feeds, resolve what they reference, then export
    Ingest {
        #[arg(required = true)]
        urls: Vec<String>
    },
    /// Drain pending resolve jobs, then export
    Resolve {
        /// Put failed items back in the queue first
        #[arg(long)]
        retry_failed: bool
    },
    /// Run feed and resolve workers until Ctrl-C
    Crawl,
    /// Write resolved songs into the track document
    Export,
    /// Normalize and de-duplicate music-tracks.json
    Repair,
    /// Serve the catalog api
    Serve {
        #[arg(long, env = "BIND_ADDR")]
        bind: Option<SocketAddr>
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CrawlerError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_db(cfgs: &AppConfig) -> Result<Persistent, CrawlerError> {
    Persistent::init(&cfgs.persistence.db_url).await
}

async fn build_resolver(cfgs: &AppConfig, store: JsonStore) ->
    Result<Resolver<PodcastIndexSource>, CrawlerError> {
    let source = PodcastIndexSource::new(cfgs, cfgs.podcast_index()?)?;
    let db = open_db(cfgs).await?;
    Ok(Resolver::new(source, db, store, cfgs.limits.clone()))
}

#[tokio::main]
async fn main() -> Result<(), CrawlerError> {
    let cli = Cli::parse();
    let mut cfgs = config::load_config()?;
    let _logger = logging::init_logging(&cfgs.logging)?;

    std::fs::create_dir_all(&cfgs.persistence.data_dir)?;
    let store = JsonStore::new(&cfgs.persistence.data_dir);

    match cli.command {
        Command::Ingest { urls } => {
            let resolver = build_resolver(&cfgs, store).await?;
            for url in &urls {
                resolver.enqueue_feed(url).await?;
            }
            resolver.run(true).await?;
            print_json(&resolver.export().await?)?;
        }
        Command::Resolve { retry_failed } => {
            let resolver = build_resolver(&cfgs, store).await?;
            if retry_failed {
                let n = resolver.db().reset_failed(JobType::Resolve).await?;
                info!(requeued = n, "resolve.retry_failed");
            }
            resolver.run(true).await?;
            print_json(&resolver.export().await?)?;
        }
        Command::Crawl => {
            let resolver = build_resolver(&cfgs, store).await?;
            resolver.run(false).await?;
            print_json(&resolver.export().await?)?;
        }
        Command::Export => {
            let db = open_db(&cfgs).await?;
            let summary = resolver::export_resolved(&db, &store, chrono::Utc::now()).await?;
            print_json(&summary)?;
        }
        Command::Repair => {
            let mut db = store.load_tracks()?;
            let summary = repair::repair(&mut db);
            store.save_tracks(&mut db)?;
            info!(
                duplicates = summary.duplicates_removed,
                ids = summary.ids_assigned, "repair.done"
            );
            print_json(&summary)?;
        }
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                cfgs.server.bind = bind;
            }
            let state = Arc::new(api::AppState::load(store)?);
            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!(msg = "shutting api down", "api.signal");
                    trigger.cancel();
                }
            });
            api::serve(&cfgs.server, state, shutdown).await?;
        }
    }

    Ok(())
}
