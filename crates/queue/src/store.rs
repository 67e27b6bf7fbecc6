//! Durable list store abstraction the queue is built on.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::QueueError;

/// Trait for list store backends.
///
/// Lists are FIFO: `append` adds the newest entry and `move_oldest` takes the
/// oldest. Implementations must make `move_oldest` atomic so a message is
/// never observable in both lists, or in neither.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Check store connectivity.
    async fn ping(&self) -> Result<(), QueueError>;

    /// Push `value` as the newest entry of `key`.
    async fn append(&self, key: &str, value: Bytes) -> Result<(), QueueError>;

    /// Atomically remove the oldest entry of `src` and append it as the newest
    /// entry of `dst`.
    ///
    /// Returns `None` when `src` is empty; that is not an error.
    async fn move_oldest(&self, src: &str, dst: &str) -> Result<Option<Bytes>, QueueError>;

    /// Remove exactly one entry of `key` equal to `value`.
    ///
    /// Returns `false` if no matching entry existed.
    async fn remove_one(&self, key: &str, value: &[u8]) -> Result<bool, QueueError>;

    /// All entries of `key`, oldest first.
    async fn range(&self, key: &str) -> Result<Vec<Bytes>, QueueError>;

    /// Number of entries in `key`.
    async fn len(&self, key: &str) -> Result<usize, QueueError>;

    /// Drop the whole list.
    async fn delete(&self, key: &str) -> Result<(), QueueError>;
}

/// Blanket implementation so `Arc<dyn ListStore>` can be used directly.
#[async_trait]
impl<T: ListStore + ?Sized> ListStore for Arc<T> {
    async fn ping(&self) -> Result<(), QueueError> {
        (**self).ping().await
    }

    async fn append(&self, key: &str, value: Bytes) -> Result<(), QueueError> {
        (**self).append(key, value).await
    }

    async fn move_oldest(&self, src: &str, dst: &str) -> Result<Option<Bytes>, QueueError> {
        (**self).move_oldest(src, dst).await
    }

    async fn remove_one(&self, key: &str, value: &[u8]) -> Result<bool, QueueError> {
        (**self).remove_one(key, value).await
    }

    async fn range(&self, key: &str) -> Result<Vec<Bytes>, QueueError> {
        (**self).range(key).await
    }

    async fn len(&self, key: &str) -> Result<usize, QueueError> {
        (**self).len(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), QueueError> {
        (**self).delete(key).await
    }
}
