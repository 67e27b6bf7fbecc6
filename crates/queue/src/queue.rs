//! Reliable event queue with explicit acknowledgment.
//!
//! Every event owns two lists in the [`ListStore`]: *pending* (keyed by the
//! event name) and *in-flight* (keyed by [`in_flight_key`]). Each tick of the
//! delivery loop moves the oldest pending message of every subscribed event
//! into in-flight, runs the event's handlers, and removes the message again
//! only if all of them succeed. A failed message stays in in-flight until an
//! operator replays it; it never blocks newer messages for the same event.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use indexmap::IndexMap;
use tokio::sync::{Notify, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::QueueError;
use crate::message::{in_flight_key, preview};
use crate::metrics::QueueMetrics;
use crate::store::ListStore;

// ── Handler type ─────────────────────────────────────────────────────

/// Boxed future returned by a [`MessageHandler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>>;

/// Shared async function that handles a delivered message.
pub type MessageHandler = Arc<dyn Fn(Bytes) -> HandlerFuture + Send + Sync>;

// ── Delivery outcomes ────────────────────────────────────────────────

/// What happened to one event during a tick.
#[derive(Debug)]
pub enum Delivery {
    /// Nothing was pending.
    Idle,
    /// A message was handled and removed from in-flight.
    Acknowledged(Bytes),
    /// A message was moved to in-flight and left there.
    Poisoned { message: Bytes, error: QueueError },
    /// The store could not be read; the event is retried next tick.
    Skipped(QueueError),
}

impl Delivery {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged(_))
    }

    pub fn is_poisoned(&self) -> bool {
        matches!(self, Self::Poisoned { .. })
    }
}

/// Per-event outcomes of a single scan, in scan order.
#[derive(Debug, Default)]
pub struct TickReport {
    pub deliveries: Vec<(String, Delivery)>,
}

impl TickReport {
    /// Outcome for `event`, if it was scanned.
    pub fn get(&self, event: &str) -> Option<&Delivery> {
        self.deliveries
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, delivery)| delivery)
    }

    /// Whether every scanned event was idle.
    pub fn is_idle(&self) -> bool {
        self.deliveries.iter().all(|(_, d)| d.is_idle())
    }
}

/// Pending and in-flight depth of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct EventStats {
    pub pending: usize,
    pub in_flight: usize,
}

// ── Publisher ────────────────────────────────────────────────────────

/// Publish-only handle to a [`Queue`].
///
/// Handlers hold one of these instead of the queue itself, so the queue's
/// subscription table never keeps itself alive.
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn ListStore>,
    metrics: Arc<QueueMetrics>,
}

impl Publisher {
    /// Append `message` as the newest pending entry of `event`.
    pub async fn publish(&self, event: &str, message: impl Into<Bytes>) -> Result<(), QueueError> {
        let message = message.into();
        if let Err(e) = self.store.append(event, message.clone()).await {
            error!(
                event,
                error = %e,
                message = %preview(&message),
                "failed publishing message"
            );
            return Err(e);
        }
        self.metrics.record_published();
        Ok(())
    }
}

// ── Queue ────────────────────────────────────────────────────────────

/// Default delivery loop period.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

pub struct Queue {
    store: Arc<dyn ListStore>,
    interval: Duration,
    subscriptions: RwLock<IndexMap<String, Vec<MessageHandler>>>,
    metrics: Arc<QueueMetrics>,
}

impl Queue {
    /// Create a queue over `store` that ticks every `interval`.
    pub fn new(store: Arc<dyn ListStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            subscriptions: RwLock::new(IndexMap::new()),
            metrics: Arc::new(QueueMetrics::new()),
        }
    }

    /// Create a queue after verifying the store is reachable.
    ///
    /// A failed ping is reported as [`QueueError::Connection`], which callers
    /// treat as fatal.
    pub async fn connect(store: Arc<dyn ListStore>, interval: Duration) -> Result<Self, QueueError> {
        store.ping().await?;
        Ok(Self::new(store, interval))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }

    /// Append `message` as the newest pending entry of `event`.
    pub async fn publish(&self, event: &str, message: impl Into<Bytes>) -> Result<(), QueueError> {
        self.publisher().publish(event, message).await
    }

    /// Detached publish handle sharing this queue's store and metrics.
    pub fn publisher(&self) -> Publisher {
        Publisher {
            store: self.store.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Register a handler for `event`.
    ///
    /// Handlers for the same event run in registration order. Messages that
    /// were already pending are delivered on the next tick.
    pub async fn subscribe<F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), QueueError>> + Send + 'static,
    {
        let handler: MessageHandler =
            Arc::new(move |msg: Bytes| -> HandlerFuture { Box::pin(handler(msg)) });
        let event = event.into();
        debug!(event = %event, "subscribing handler");
        self.subscriptions
            .write()
            .await
            .entry(event)
            .or_default()
            .push(handler);
    }

    /// Subscribed event names, in first-subscription order.
    pub async fn events(&self) -> Vec<String> {
        self.subscriptions.read().await.keys().cloned().collect()
    }

    /// Run one delivery scan over every subscribed event.
    pub async fn tick(&self) -> TickReport {
        // Clone handler lists out so subscribe() never waits on a running handler.
        let subscriptions: Vec<(String, Vec<MessageHandler>)> = self
            .subscriptions
            .read()
            .await
            .iter()
            .map(|(event, handlers)| (event.clone(), handlers.clone()))
            .collect();

        let mut report = TickReport::default();
        for (event, handlers) in subscriptions {
            let delivery = self.deliver(&event, &handlers).await;
            report.deliveries.push((event, delivery));
        }
        report
    }

    /// Move the oldest pending message of `event` to in-flight and handle it.
    async fn deliver(&self, event: &str, handlers: &[MessageHandler]) -> Delivery {
        let proc = in_flight_key(event);

        let message = match self.store.move_oldest(event, &proc).await {
            Ok(Some(message)) => message,
            Ok(None) => return Delivery::Idle,
            Err(e) => {
                error!(event, error = %e, "failed reading message");
                self.metrics.record_skipped();
                return Delivery::Skipped(e);
            }
        };
        self.metrics.record_delivered();

        for handler in handlers {
            if let Err(e) = handler(message.clone()).await {
                error!(
                    proc = %proc,
                    error = %e,
                    message = %preview(&message),
                    "failed processing message"
                );
                self.metrics.record_poisoned();
                return Delivery::Poisoned { message, error: e };
            }
        }

        match self.store.remove_one(&proc, &message).await {
            Ok(removed) => {
                if !removed {
                    warn!(proc = %proc, "acknowledged message was no longer in flight");
                }
                self.metrics.record_acknowledged();
                Delivery::Acknowledged(message)
            }
            Err(e) => {
                error!(
                    proc = %proc,
                    error = %e,
                    message = %preview(&message),
                    "failed acknowledging message"
                );
                self.metrics.record_poisoned();
                Delivery::Poisoned {
                    message,
                    error: QueueError::Ack(e.to_string()),
                }
            }
        }
    }

    /// Tick every [`interval`](Self::interval) until `shutdown` is notified.
    ///
    /// A scan that is already running completes before the loop returns.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        let stopped = shutdown.notified();
        tokio::pin!(stopped);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.interval, "delivery loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = &mut stopped => {
                    break;
                }
            }
        }
        info!("delivery loop stopped");
    }

    // ── Operator helpers ────────────────────────────────────────────

    /// Pending and in-flight depth of `event`.
    pub async fn stats(&self, event: &str) -> Result<EventStats, QueueError> {
        Ok(EventStats {
            pending: self.store.len(event).await?,
            in_flight: self.store.len(&in_flight_key(event)).await?,
        })
    }

    /// Pending messages of `event`, oldest first.
    pub async fn pending(&self, event: &str) -> Result<Vec<Bytes>, QueueError> {
        self.store.range(event).await
    }

    /// In-flight messages of `event`, oldest first.
    pub async fn in_flight(&self, event: &str) -> Result<Vec<Bytes>, QueueError> {
        self.store.range(&in_flight_key(event)).await
    }

    /// Move every in-flight message of `event` back to the tail of pending.
    ///
    /// This is the manual recovery path for poisoned messages; the delivery
    /// loop never calls it.
    pub async fn replay(&self, event: &str) -> Result<usize, QueueError> {
        let proc = in_flight_key(event);
        let mut count = 0;
        while self.store.move_oldest(&proc, event).await?.is_some() {
            count += 1;
        }
        info!(event, count, "replayed in-flight messages");
        Ok(count)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
