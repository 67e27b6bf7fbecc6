use std::path::PathBuf;
use std::time::Duration;

use conduit_queue::QueueError;
use thiserror::Error;

/// Errors from running an external stage command.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed starting command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error running command '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{command}' exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("command '{command}' wrote to stderr: {stderr}")]
    Stderr { command: String, stderr: String },

    #[error("command '{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// Errors that can occur loading or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed loading pipeline file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed parsing pipeline file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed walking directory {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("invalid pipeline: {0}")]
    Invalid(String),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("failed parsing fan-out payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("failed publishing message {index}/{total} to {event}: {source}")]
    Publish {
        event: String,
        index: usize,
        total: usize,
        #[source]
        source: QueueError,
    },
}

/// Stage failures surface to the queue as handler failures, which park the
/// message in in-flight.
impl From<PipelineError> for QueueError {
    fn from(err: PipelineError) -> Self {
        QueueError::handler(err)
    }
}
