mod cli;
mod commands;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use conduit_queue::{ListStore, MemoryStore, Queue, RedisStore};

use crate::cli::{CliArgs, Command, StoreKind};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let store = open_store(&args).await?;
    let queue = Queue::connect(store, args.tick_interval())
        .await
        .context("queue store is unreachable")?;

    let mut stdout = std::io::stdout();
    match args.command.clone().unwrap_or(Command::Run) {
        Command::Run => {
            info!(
                store = ?args.store,
                root = %args.pipeline_root.display(),
                interval = ?queue.interval(),
                "starting conduit"
            );
            commands::run(&args, Arc::new(queue)).await
        }
        Command::Status { pipeline, json } => {
            commands::status(&queue, &pipeline, json, &mut stdout).await
        }
        Command::Inspect { event } => commands::inspect(&queue, &event, &mut stdout).await,
        Command::Replay { event } => commands::replay(&queue, &event, &mut stdout).await,
        Command::Publish { event, payload } => commands::publish(&queue, &event, payload).await,
    }
}

async fn open_store(args: &CliArgs) -> Result<Arc<dyn ListStore>> {
    match args.store {
        StoreKind::Redis => {
            let store = RedisStore::connect(&args.redis_addr)
                .await
                .with_context(|| format!("failed to connect to redis at {}", args.redis_addr))?;
            Ok(Arc::new(store))
        }
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
