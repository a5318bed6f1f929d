// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory store for tests and embedding.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{PersistenceError, RecordMap, Result, Store};

/// Store keeping the last saved map in memory.
///
/// Counts saves and can be switched into a failing mode to exercise
/// persistence error paths.
#[derive(Debug)]
pub struct MemoryStore<T> {
    records: Mutex<RecordMap<T>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            records: Mutex::new(RecordMap::new()),
            saves: AtomicUsize::new(0),
            fail_saves: AtomicBool::new(false),
        }
    }
}

impl<T: Clone> MemoryStore<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `records`, as if saved by a previous process.
    pub fn with_records(records: RecordMap<T>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Copy of the last saved map.
    pub fn snapshot(&self) -> RecordMap<T> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl<T> Store<T> for MemoryStore<T>
where
    T: Clone + Send + Sync,
{
    async fn load(&self) -> Result<RecordMap<T>> {
        Ok(self.snapshot())
    }

    async fn save(&self, records: &RecordMap<T>) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(
                "memory store is failing saves".to_string(),
            ));
        }
        match self.records.lock() {
            Ok(mut guard) => *guard = records.clone(),
            Err(poisoned) => *poisoned.into_inner() = records.clone(),
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip_and_count() {
        let store: MemoryStore<String> = MemoryStore::new();
        assert!(store.load().await.unwrap().is_empty());

        let records = RecordMap::from([("a".to_string(), "one".to_string())]);
        store.save(&records).await.unwrap();

        assert_eq!(store.load().await.unwrap(), records);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_failing_saves() {
        let store: MemoryStore<String> = MemoryStore::new();
        store.set_fail_saves(true);

        let records = RecordMap::from([("a".to_string(), "one".to_string())]);
        assert!(matches!(
            store.save(&records).await,
            Err(PersistenceError::Unavailable(_))
        ));
        assert_eq!(store.save_count(), 0);
        assert!(store.snapshot().is_empty());
    }
}
