//! In-process list store.
//!
//! Keeps every list in a `VecDeque` behind a single mutex, which makes
//! `move_oldest` trivially atomic. Nothing survives the process; used for
//! tests and dry runs.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::error::QueueError;
use crate::store::ListStore;

#[derive(Debug, Default)]
pub struct MemoryStore {
    lists: Mutex<HashMap<String, VecDeque<Bytes>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Lists vanish once empty, as Redis keys do.
fn drop_if_empty(lists: &mut HashMap<String, VecDeque<Bytes>>, key: &str) {
    if lists.get(key).is_some_and(VecDeque::is_empty) {
        lists.remove(key);
    }
}

#[async_trait]
impl ListStore for MemoryStore {
    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn append(&self, key: &str, value: Bytes) -> Result<(), QueueError> {
        self.lists
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .push_back(value);
        Ok(())
    }

    async fn move_oldest(&self, src: &str, dst: &str) -> Result<Option<Bytes>, QueueError> {
        let mut lists = self.lists.lock().await;
        let Some(value) = lists.get_mut(src).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        drop_if_empty(&mut lists, src);
        lists
            .entry(dst.to_string())
            .or_default()
            .push_back(value.clone());
        Ok(Some(value))
    }

    async fn remove_one(&self, key: &str, value: &[u8]) -> Result<bool, QueueError> {
        let mut lists = self.lists.lock().await;
        let Some(list) = lists.get_mut(key) else {
            return Ok(false);
        };
        match list.iter().position(|entry| entry.as_ref() == value) {
            Some(idx) => {
                list.remove(idx);
                drop_if_empty(&mut lists, key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn range(&self, key: &str) -> Result<Vec<Bytes>, QueueError> {
        let lists = self.lists.lock().await;
        Ok(lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn len(&self, key: &str) -> Result<usize, QueueError> {
        Ok(self.lists.lock().await.get(key).map_or(0, VecDeque::len))
    }

    async fn delete(&self, key: &str) -> Result<(), QueueError> {
        self.lists.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_preserves_fifo_order() {
        let store = MemoryStore::new();
        store.append("e", Bytes::from("m1")).await.unwrap();
        store.append("e", Bytes::from("m2")).await.unwrap();

        let entries = store.range("e").await.unwrap();
        assert_eq!(entries, vec![Bytes::from("m1"), Bytes::from("m2")]);
    }

    #[tokio::test]
    async fn test_move_oldest_moves_to_tail() {
        let store = MemoryStore::new();
        store.append("src", Bytes::from("a")).await.unwrap();
        store.append("src", Bytes::from("b")).await.unwrap();
        store.append("dst", Bytes::from("x")).await.unwrap();

        let moved = store.move_oldest("src", "dst").await.unwrap();
        assert_eq!(moved, Some(Bytes::from("a")));
        assert_eq!(store.range("src").await.unwrap(), vec![Bytes::from("b")]);
        assert_eq!(
            store.range("dst").await.unwrap(),
            vec![Bytes::from("x"), Bytes::from("a")]
        );
    }

    #[tokio::test]
    async fn test_move_oldest_empty_source() {
        let store = MemoryStore::new();
        assert_eq!(store.move_oldest("missing", "dst").await.unwrap(), None);
        assert_eq!(store.len("dst").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_one_removes_single_occurrence() {
        let store = MemoryStore::new();
        store.append("k", Bytes::from("dup")).await.unwrap();
        store.append("k", Bytes::from("dup")).await.unwrap();

        assert!(store.remove_one("k", b"dup").await.unwrap());
        assert_eq!(store.len("k").await.unwrap(), 1);
        assert!(!store.remove_one("k", b"other").await.unwrap());
        assert!(!store.remove_one("missing", b"dup").await.unwrap());
    }

    #[tokio::test]
    async fn test_emptied_lists_are_dropped() {
        let store = MemoryStore::new();
        store.append("src", Bytes::from("a")).await.unwrap();
        store.move_oldest("src", "dst").await.unwrap();
        assert!(!store.lists.lock().await.contains_key("src"));

        assert!(store.remove_one("dst", b"a").await.unwrap());
        assert!(store.lists.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        store.append("k", Bytes::from("v")).await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.len("k").await.unwrap(), 0);
    }
}
