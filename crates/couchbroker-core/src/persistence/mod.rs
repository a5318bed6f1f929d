// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for the instance and binding maps.
//!
//! A store persists one whole map at a time. It has no consistency logic of
//! its own: the controller owns the map and calls [`Store::save`] after every
//! mutation while holding its state lock.

pub mod json_file;
pub mod memory;

pub use self::json_file::JsonFileStore;
pub use self::memory::MemoryStore;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

/// Map from external (instance or binding) identifier to record.
pub type RecordMap<T> = BTreeMap<String, T>;

/// Errors from persistence operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistenceError {
    /// Reading or writing the backing file failed.
    #[error("IO error on {path}: {source}")]
    Io {
        /// Backing file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The map could not be serialized, or the file could not be parsed.
    #[error("JSON error on {path}: {source}")]
    Json {
        /// Backing file.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The store refused the write.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Durable mapping from identifier to record.
#[async_trait]
pub trait Store<T: Send + Sync>: Send + Sync {
    /// Load the persisted map. Returns an empty map when nothing was saved yet.
    async fn load(&self) -> Result<RecordMap<T>>;

    /// Replace the persisted map with `records`.
    async fn save(&self, records: &RecordMap<T>) -> Result<()>;
}
