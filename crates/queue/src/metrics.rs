//! Delivery counters for the queue.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters updated by publish and the delivery loop.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    published: AtomicU64,
    delivered: AtomicU64,
    acknowledged: AtomicU64,
    poisoned: AtomicU64,
    skipped: AtomicU64,
}

/// Point-in-time copy of [`QueueMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub acknowledged: u64,
    pub poisoned: u64,
    pub skipped: u64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_poisoned(&self) {
        self.poisoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            poisoned: self.poisoned.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "published={} delivered={} acknowledged={} poisoned={} skipped={}",
            self.published, self.delivered, self.acknowledged, self.poisoned, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = QueueMetrics::new();
        metrics.record_published();
        metrics.record_published();
        metrics.record_delivered();
        metrics.record_poisoned();

        let snap = metrics.snapshot();
        assert_eq!(snap.published, 2);
        assert_eq!(snap.delivered, 1);
        assert_eq!(snap.acknowledged, 0);
        assert_eq!(snap.poisoned, 1);
        assert_eq!(snap.skipped, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snap = MetricsSnapshot {
            published: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(snap).unwrap();
        assert_eq!(json["published"], 3);
        assert!(snap.to_string().contains("published=3"));
    }
}
