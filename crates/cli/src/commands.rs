//! Subcommand implementations.
//!
//! Operator commands write to a caller-supplied writer so they can be
//! exercised against an in-memory store.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use indexmap::IndexMap;
use tokio::io::AsyncReadExt;
use tokio::sync::Notify;
use tracing::{error, info};

use conduit_pipeline::{load, load_all, CommandRunner, Pipeline, Placeholders};
use conduit_queue::{preview, EventStats, Queue, QueueMetrics};

use crate::cli::CliArgs;

// ── run ──────────────────────────────────────────────────────────────

/// Subscribe every pipeline under the root and deliver until interrupted.
pub async fn run(args: &CliArgs, queue: Arc<Queue>) -> Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(args.shell_runner());
    let count = start_pipelines(&args.pipeline_root, queue.clone(), runner).await?;
    if count == 0 {
        anyhow::bail!(
            "no pipeline.yml found under {}",
            args.pipeline_root.display()
        );
    }

    let shutdown = Arc::new(Notify::new());

    let reporter = (args.metrics_interval > 0).then(|| {
        tokio::spawn(report_metrics(
            queue.metrics().clone(),
            Duration::from_secs(args.metrics_interval),
        ))
    });

    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        // notify_one stores a permit if the loop is mid-scan.
        signal.notify_one();
    });

    queue.run(shutdown).await;

    if let Some(reporter) = reporter {
        reporter.abort();
    }
    info!(metrics = %queue.metrics().snapshot(), "conduit stopped");
    Ok(())
}

/// Load and subscribe every pipeline under `root`; returns how many started.
pub async fn start_pipelines(
    root: &Path,
    queue: Arc<Queue>,
    runner: Arc<dyn CommandRunner>,
) -> Result<usize> {
    let loaded = load_all(root, &Placeholders::new())
        .with_context(|| format!("failed to load pipelines under {}", root.display()))?;

    for pipeline in &loaded {
        info!(
            pipeline = %pipeline.meta.id,
            path = %pipeline.path.display(),
            "starting pipeline"
        );
    }

    let count = loaded.len();
    for pipeline in loaded {
        Pipeline::from_loaded(pipeline, queue.clone(), runner.clone())
            .run()
            .await;
    }
    Ok(count)
}

async fn report_metrics(metrics: Arc<QueueMetrics>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // First tick fires immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let s = metrics.snapshot();
        info!(
            published = s.published,
            delivered = s.delivered,
            acknowledged = s.acknowledged,
            poisoned = s.poisoned,
            skipped = s.skipped,
            "queue metrics"
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                error!(error = %e, "failed to register SIGTERM handler");
                if let Err(e) = ctrl_c.await {
                    error!(error = %e, "failed to listen for ctrl_c");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = ctrl_c.await {
            error!(error = %e, "failed to listen for ctrl_c");
        }
    }
}

// ── Operator commands ────────────────────────────────────────────────

/// Per-event depth for every event a pipeline touches.
pub async fn status(
    queue: &Queue,
    pipeline: &Path,
    json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let loaded = load(pipeline, &Placeholders::new())
        .with_context(|| format!("failed to load {}", pipeline.display()))?;

    let mut stats: IndexMap<String, EventStats> = IndexMap::new();
    for event in loaded.meta.events() {
        let s = queue
            .stats(&event)
            .await
            .with_context(|| format!("failed to read {event}"))?;
        stats.insert(event, s);
    }

    if json {
        serde_json::to_writer_pretty(&mut *out, &stats)?;
        writeln!(out)?;
        return Ok(());
    }

    let width = stats.keys().map(String::len).max().unwrap_or(0).max(5);
    writeln!(out, "{:<width$}  {:>8}  {:>9}", "EVENT", "PENDING", "IN-FLIGHT")?;
    for (event, s) in &stats {
        writeln!(out, "{:<width$}  {:>8}  {:>9}", event, s.pending, s.in_flight)?;
    }
    Ok(())
}

/// Print every in-flight message of `event`, oldest first.
pub async fn inspect(queue: &Queue, event: &str, out: &mut impl Write) -> Result<()> {
    let messages = queue
        .in_flight(event)
        .await
        .with_context(|| format!("failed to read in-flight messages of {event}"))?;

    if messages.is_empty() {
        writeln!(out, "no in-flight messages for {event}")?;
        return Ok(());
    }
    for (i, message) in messages.iter().enumerate() {
        writeln!(out, "[{i}] {}", preview(message))?;
    }
    Ok(())
}

pub async fn replay(queue: &Queue, event: &str, out: &mut impl Write) -> Result<()> {
    let count = queue
        .replay(event)
        .await
        .with_context(|| format!("failed to replay {event}"))?;
    writeln!(out, "replayed {count} message(s) to {event}")?;
    Ok(())
}

/// Publish `payload`, or everything on stdin when it is `None`.
pub async fn publish(queue: &Queue, event: &str, payload: Option<String>) -> Result<()> {
    let message = match payload {
        Some(p) => Bytes::from(p),
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buf)
                .await
                .context("failed to read message from stdin")?;
            Bytes::from(buf)
        }
    };

    queue
        .publish(event, message)
        .await
        .with_context(|| format!("failed to publish to {event}"))?;
    info!(event, "message published");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_pipeline::ShellRunner;
    use conduit_queue::{in_flight_key, ListStore, MemoryStore};
    use std::fs;

    const YAML: &str = "id: ops/test\nstages:\n- process: cat\n  subscribe: index\n  publish: list\n- process: cat\n  subscribe: list\n  publish: item\n";

    fn setup() -> (Arc<MemoryStore>, Queue) {
        let store = Arc::new(MemoryStore::new());
        let queue = Queue::new(store.clone(), Duration::from_millis(1));
        (store, queue)
    }

    fn write_pipeline(dir: &Path, yaml: &str) -> std::path::PathBuf {
        fs::create_dir_all(dir).unwrap();
        let file = dir.join("pipeline.yml");
        fs::write(&file, yaml).unwrap();
        file
    }

    #[tokio::test]
    async fn status_lists_every_event_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let file = write_pipeline(tmp.path(), YAML);
        let (store, queue) = setup();
        store.append("ops/test/index", Bytes::from("a")).await.unwrap();
        store.append("ops/test/index", Bytes::from("b")).await.unwrap();
        store
            .append(&in_flight_key("ops/test/list"), Bytes::from("c"))
            .await
            .unwrap();

        let mut out = Vec::new();
        status(&queue, &file, false, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("EVENT"));
        assert!(lines[1].starts_with("ops/test/index"));
        assert!(lines[1].trim_end().ends_with('0'));
        assert!(lines[1].contains("  2  "));
        assert!(lines[2].starts_with("ops/test/list"));
        assert!(lines[2].trim_end().ends_with('1'));
        assert!(lines[3].starts_with("ops/test/item"));
    }

    #[tokio::test]
    async fn status_json_output() {
        let tmp = tempfile::tempdir().unwrap();
        let file = write_pipeline(tmp.path(), YAML);
        let (store, queue) = setup();
        store.append("ops/test/item", Bytes::from("x")).await.unwrap();

        let mut out = Vec::new();
        status(&queue, &file, true, &mut out).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(value["ops/test/item"]["pending"], 1);
        assert_eq!(value["ops/test/index"]["in_flight"], 0);
    }

    #[tokio::test]
    async fn status_missing_pipeline_fails() {
        let (_store, queue) = setup();
        let mut out = Vec::new();
        let err = status(&queue, Path::new("/no/such/pipeline.yml"), false, &mut out)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to load"));
    }

    #[tokio::test]
    async fn inspect_prints_in_flight_messages() {
        let (store, queue) = setup();
        let proc = in_flight_key("ops/test/index");
        store.append(&proc, Bytes::from("first")).await.unwrap();
        store.append(&proc, Bytes::from("second")).await.unwrap();

        let mut out = Vec::new();
        inspect(&queue, "ops/test/index", &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "[0] first\n[1] second\n");
    }

    #[tokio::test]
    async fn inspect_empty_event() {
        let (_store, queue) = setup();
        let mut out = Vec::new();
        inspect(&queue, "ops/test/index", &mut out).await.unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "no in-flight messages for ops/test/index\n"
        );
    }

    #[tokio::test]
    async fn replay_moves_messages_back_to_pending() {
        let (store, queue) = setup();
        let proc = in_flight_key("ops/test/index");
        store.append(&proc, Bytes::from("stuck")).await.unwrap();

        let mut out = Vec::new();
        replay(&queue, "ops/test/index", &mut out).await.unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "replayed 1 message(s) to ops/test/index\n"
        );
        assert_eq!(store.len(&proc).await.unwrap(), 0);
        assert_eq!(
            store.range("ops/test/index").await.unwrap(),
            vec![Bytes::from("stuck")]
        );
    }

    #[tokio::test]
    async fn publish_with_payload() {
        let (store, queue) = setup();
        publish(&queue, "ops/test/index", Some("hello".into()))
            .await
            .unwrap();
        assert_eq!(
            store.range("ops/test/index").await.unwrap(),
            vec![Bytes::from("hello")]
        );
        assert_eq!(queue.metrics().snapshot().published, 1);
    }

    #[tokio::test]
    async fn start_pipelines_subscribes_discovered_stages() {
        let tmp = tempfile::tempdir().unwrap();
        write_pipeline(&tmp.path().join("ops"), YAML);
        let (store, queue) = setup();
        let queue = Arc::new(queue);

        let count = start_pipelines(tmp.path(), queue.clone(), Arc::new(ShellRunner::new()))
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            queue.events().await,
            vec!["ops/test/index", "ops/test/list"]
        );

        queue.publish("ops/test/index", "payload").await.unwrap();
        for _ in 0..5 {
            if queue.tick().await.is_idle() {
                break;
            }
        }
        assert_eq!(
            store.range("ops/test/item").await.unwrap(),
            vec![Bytes::from("payload")]
        );
    }

    #[tokio::test]
    async fn start_pipelines_rejects_invalid_definition() {
        let tmp = tempfile::tempdir().unwrap();
        write_pipeline(tmp.path(), "id: ''\nstages: []\n");
        let (_store, queue) = setup();

        let result =
            start_pipelines(tmp.path(), Arc::new(queue), Arc::new(ShellRunner::new())).await;
        assert!(result.is_err());
    }
}
