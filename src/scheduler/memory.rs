//! In-process queue store.
//!
//! Implements [`QueueBackend`] over a mutex-guarded map of lists and
//! counters. Every operation holds the lock for its whole duration, which
//! gives the same atomicity the pipeline relies on from Redis. Used by tests
//! and by single-process embeddings that have no Redis available.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::queue::{QueueBackend, QueueError};

#[derive(Debug, Default)]
struct MemoryState {
    lists: HashMap<String, VecDeque<String>>,
    counters: HashMap<String, u64>,
}

/// In-memory [`QueueBackend`].
#[derive(Debug, Default)]
pub struct MemoryQueueBackend {
    state: Mutex<MemoryState>,
}

impl MemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Backend("memory queue lock poisoned".to_string()))
    }
}

/// Resolves LRANGE-style inclusive indices against a list of `len` entries.
fn resolve_range(len: usize, start: isize, end: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };

    if len == 0 || start > end || start >= len || end < 0 {
        return None;
    }
    Some((start as usize, end as usize))
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn lease(&self, queue: &str, max_size: usize) -> Result<Vec<String>, QueueError> {
        let mut state = self.lock()?;
        let Some(list) = state.lists.get_mut(queue) else {
            return Ok(Vec::new());
        };
        let take = max_size.min(list.len());
        Ok(list.drain(..take).collect())
    }

    async fn push(&self, queue: &str, value: &str) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        state
            .lists
            .entry(queue.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<String>, QueueError> {
        let mut state = self.lock()?;
        Ok(state.lists.get_mut(queue).and_then(|list| list.pop_front()))
    }

    async fn position(&self, queue: &str, value: &str) -> Result<Option<usize>, QueueError> {
        let state = self.lock()?;
        Ok(state
            .lists
            .get(queue)
            .and_then(|list| list.iter().position(|v| v == value)))
    }

    async fn incr_by(&self, key: &str, amount: u64) -> Result<u64, QueueError> {
        let mut state = self.lock()?;
        let counter = state.counters.entry(key.to_string()).or_insert(0);
        *counter += amount;
        Ok(*counter)
    }

    async fn counter(&self, key: &str) -> Result<u64, QueueError> {
        let state = self.lock()?;
        Ok(state.counters.get(key).copied().unwrap_or(0))
    }

    async fn len(&self, queue: &str) -> Result<usize, QueueError> {
        let state = self.lock()?;
        Ok(state.lists.get(queue).map_or(0, VecDeque::len))
    }

    async fn range(
        &self,
        queue: &str,
        start: isize,
        end: isize,
    ) -> Result<Vec<String>, QueueError> {
        let state = self.lock()?;
        let Some(list) = state.lists.get(queue) else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(list.len(), start, end) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        for key in keys {
            state.lists.remove(*key);
            state.counters.remove(*key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_range_matches_lrange() {
        assert_eq!(resolve_range(5, 0, -1), Some((0, 4)));
        assert_eq!(resolve_range(5, 0, 9), Some((0, 4)));
        assert_eq!(resolve_range(5, -2, -1), Some((3, 4)));
        assert_eq!(resolve_range(5, -10, 1), Some((0, 1)));
        assert_eq!(resolve_range(5, 3, 1), None);
        assert_eq!(resolve_range(5, 7, 9), None);
        assert_eq!(resolve_range(0, 0, -1), None);
    }

    #[tokio::test]
    async fn test_fifo_push_pop() {
        let backend = MemoryQueueBackend::new();
        backend.push("q", "a").await.unwrap();
        backend.push("q", "b").await.unwrap();

        assert_eq!(backend.pop("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(backend.pop("q").await.unwrap().as_deref(), Some("b"));
        assert_eq!(backend.pop("q").await.unwrap(), None);
        assert_eq!(backend.pop("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lease_larger_than_queue_returns_everything() {
        let backend = MemoryQueueBackend::new();
        for v in ["a", "b", "c"] {
            backend.push("q", v).await.unwrap();
        }

        assert_eq!(backend.lease("q", 0).await.unwrap(), Vec::<String>::new());
        assert_eq!(backend.lease("q", 10).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(backend.len("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_position_finds_first_occurrence() {
        let backend = MemoryQueueBackend::new();
        for v in ["a", "b", "a"] {
            backend.push("q", v).await.unwrap();
        }
        assert_eq!(backend.position("q", "a").await.unwrap(), Some(0));
        assert_eq!(backend.position("q", "b").await.unwrap(), Some(1));
        assert_eq!(backend.position("q", "z").await.unwrap(), None);
    }
}
