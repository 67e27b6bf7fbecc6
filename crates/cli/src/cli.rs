use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use conduit_pipeline::{ShellRunner, StderrPolicy};

/// Event-driven pipeline runner.
///
/// Wires the stages of every `pipeline.yml` under the pipeline root onto a
/// durable queue and delivers messages between them.
#[derive(Parser, Debug)]
#[command(name = "conduit", version, about)]
pub struct CliArgs {
    /// Redis address (`host:port` or `redis://` URL).
    #[arg(long, env = "REDIS_ADDR", default_value = "127.0.0.1:6379", global = true)]
    pub redis_addr: String,

    /// List store backend.
    #[arg(long, env = "CONDUIT_STORE", value_enum, default_value_t = StoreKind::Redis, global = true)]
    pub store: StoreKind,

    /// Directory searched for pipeline.yml files.
    #[arg(long, env = "PIPELINE_ROOT", default_value = ".", global = true)]
    pub pipeline_root: PathBuf,

    /// Delivery loop period in milliseconds.
    #[arg(long, env = "CONDUIT_TICK_MS", default_value_t = 1000, global = true)]
    pub tick_ms: u64,

    /// Kill stage commands running longer than this (0 = no limit).
    #[arg(long, env = "CONDUIT_COMMAND_TIMEOUT_SECS", default_value_t = 0, global = true)]
    pub command_timeout_secs: u64,

    /// Fail a stage when its command writes to stderr, even on exit 0.
    #[arg(long, env = "CONDUIT_FAIL_ON_STDERR", global = true)]
    pub fail_on_stderr: bool,

    /// Seconds between metrics log lines (0 = disabled).
    #[arg(long, env = "CONDUIT_METRICS_INTERVAL", default_value_t = 30, global = true)]
    pub metrics_interval: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run every discovered pipeline until interrupted (default).
    Run,

    /// Show pending and in-flight counts for each event of a pipeline.
    Status {
        /// Path to a pipeline.yml file.
        pipeline: PathBuf,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print the in-flight (unacknowledged) messages of an event.
    Inspect {
        /// Full event name, e.g. `news/crawler/index`.
        event: String,
    },

    /// Move every in-flight message of an event back to pending.
    Replay {
        /// Full event name, e.g. `news/crawler/index`.
        event: String,
    },

    /// Publish a message to an event (reads stdin when no payload is given).
    Publish {
        /// Full event name, e.g. `news/crawler/index`.
        event: String,

        /// Message body.
        payload: Option<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Durable Redis lists.
    Redis,
    /// In-process lists; nothing survives exit.
    Memory,
}

impl CliArgs {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn shell_runner(&self) -> ShellRunner {
        let mut runner = ShellRunner::new();
        if self.command_timeout_secs > 0 {
            runner = runner.with_timeout(Duration::from_secs(self.command_timeout_secs));
        }
        if self.fail_on_stderr {
            runner = runner.with_stderr_policy(StderrPolicy::Fail);
        }
        runner
    }
}
