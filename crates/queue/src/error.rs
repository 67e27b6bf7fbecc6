//! Queue error types.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The store could not be reached at startup.
    #[error("connection error: {0}")]
    Connection(String),

    /// A read or write against the store failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A subscribed handler rejected the message.
    #[error("handler failed: {0}")]
    Handler(String),

    /// The message was handled but could not be removed from in-flight.
    #[error("acknowledge error: {0}")]
    Ack(String),
}

/// How a failure is resolved by the delivery loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Retried on the next tick; nothing was moved.
    Transient,
    /// The message stays in in-flight until an operator intervenes.
    Poison,
    /// The process cannot proceed.
    Fatal,
}

impl QueueError {
    /// Wrap any displayable error as a handler failure.
    pub fn handler(err: impl fmt::Display) -> Self {
        Self::Handler(err.to_string())
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Connection(_) => Disposition::Fatal,
            Self::StoreUnavailable(_) => Disposition::Transient,
            Self::Handler(_) | Self::Ack(_) => Disposition::Poison,
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Transient => "transient",
            Self::Poison => "poison",
            Self::Fatal => "fatal",
        };
        f.write_str(label)
    }
}
