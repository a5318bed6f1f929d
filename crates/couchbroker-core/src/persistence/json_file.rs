// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! JSON file store.
//!
//! Each map lives in one pretty-printed JSON object keyed by identifier.
//! Saves go through write-temp, fsync, rename so a crash leaves either the
//! previous file or the new one on disk, never a torn write.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{PersistenceError, RecordMap, Result, Store};

/// Store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore<T> {
    path: PathBuf,
    _records: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    /// Create a store for `path`. The file is created on the first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _records: PhantomData,
        }
    }

    /// Create a store for `file_name` inside `data_dir`.
    pub fn in_dir(data_dir: &Path, file_name: &str) -> Self {
        Self::new(data_dir.join(file_name))
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl<T> Store<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn load(&self) -> Result<RecordMap<T>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Data file does not exist; starting empty");
                return Ok(RecordMap::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let records: RecordMap<T> =
            serde_json::from_slice(&contents).map_err(|source| PersistenceError::Json {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %self.path.display(), records = records.len(), "Loaded records");
        Ok(records)
    }

    async fn save(&self, records: &RecordMap<T>) -> Result<()> {
        let contents =
            serde_json::to_vec_pretty(records).map_err(|source| PersistenceError::Json {
                path: self.path.clone(),
                source,
            })?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&contents)
            .await
            .map_err(|e| self.io_error(e))?;
        file.sync_all().await.map_err(|e| self.io_error(e))?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), records = records.len(), "Saved records");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Credential, LastOperation, ProvisionRequest, ServiceBinding, ServiceInstance,
    };

    fn sample_instances() -> RecordMap<ServiceInstance> {
        let mut instance = ServiceInstance::provisioning(
            "i1",
            "c0ffee",
            ProvisionRequest {
                service_id: "svc".to_string(),
                plan_id: "gold".to_string(),
                organization_guid: "org".to_string(),
                space_guid: "space".to_string(),
                parameters: Some(serde_json::json!({"instances": 3})),
            },
            7,
        );
        instance.credentials = Some(Credential {
            uri: "http://10.0.0.2:8091".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            sasl_password: "sasl".to_string(),
            bucket_name: "cfdefault".to_string(),
        });
        instance.dashboard_url = "http://10.0.0.2:8091".to_string();
        instance.last_operation = LastOperation::succeeded("ready", "http://10.0.0.2:8091");

        let pending = ServiceInstance::provisioning("i2", "d00d", ProvisionRequest::default(), 8);

        RecordMap::from([("i1".to_string(), instance), ("i2".to_string(), pending)])
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let store: JsonFileStore<ServiceInstance> =
            JsonFileStore::in_dir(dir.path(), "service_instances.json");

        let records = store.load().await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_instance_map_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JsonFileStore::in_dir(dir.path(), "service_instances.json");

        let records = sample_instances();
        store.save(&records).await.unwrap();

        let loaded: RecordMap<ServiceInstance> = store.load().await.unwrap();
        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn test_binding_map_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JsonFileStore::in_dir(dir.path(), "service_bindings.json");

        let instances = sample_instances();
        let binding = ServiceBinding::for_instance(
            "b1",
            &instances["i1"],
            instances["i1"].credentials.clone().unwrap(),
        );
        let records = RecordMap::from([("b1".to_string(), binding)]);
        store.save(&records).await.unwrap();

        let loaded: RecordMap<ServiceBinding> = store.load().await.unwrap();
        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn test_save_overwrites_and_leaves_no_temp_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JsonFileStore::in_dir(dir.path(), "service_instances.json");

        store.save(&sample_instances()).await.unwrap();
        store.save(&RecordMap::new()).await.unwrap();

        let loaded: RecordMap<ServiceInstance> = store.load().await.unwrap();
        assert!(loaded.is_empty());
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_save_creates_data_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let nested = dir.path().join("nested").join("data");
        let store = JsonFileStore::in_dir(&nested, "service_instances.json");

        store.save(&sample_instances()).await.unwrap();
        assert!(nested.join("service_instances.json").exists());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("service_instances.json");
        std::fs::write(&path, "{ truncated").unwrap();

        let store: JsonFileStore<ServiceInstance> = JsonFileStore::new(&path);
        assert!(matches!(
            store.load().await,
            Err(PersistenceError::Json { .. })
        ));
    }
}
