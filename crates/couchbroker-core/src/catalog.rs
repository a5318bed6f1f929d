// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Plan catalog types and catalog file loading.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors from catalog loading.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("Failed to read catalog {path}: {source}")]
    Read {
        /// Catalog file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The catalog file is not valid catalog JSON.
    #[error("Failed to parse catalog {path}: {source}")]
    Parse {
        /// Catalog file path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// One plan offered by a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePlan {
    /// Plan identifier.
    pub id: String,
    /// Plan name.
    pub name: String,
    /// Plan description.
    #[serde(default)]
    pub description: String,
    /// Free-form plan metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Whether the plan is free of charge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free: Option<bool>,
}

/// One service offered by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogService {
    /// Service identifier.
    pub id: String,
    /// Service name.
    pub name: String,
    /// Service description.
    #[serde(default)]
    pub description: String,
    /// Whether instances of this service can be bound.
    #[serde(default)]
    pub bindable: bool,
    /// Whether plans can be changed after provisioning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_updateable: Option<bool>,
    /// Search tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Free-form service metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Plans offered by this service.
    #[serde(default)]
    pub plans: Vec<ServicePlan>,
}

/// The broker's plan catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Offered services.
    #[serde(default)]
    pub services: Vec<CatalogService>,
}

impl Catalog {
    /// Whether any service offers a plan whose id or name equals `plan`.
    pub fn contains_plan(&self, plan: &str) -> bool {
        self.services
            .iter()
            .flat_map(|s| s.plans.iter())
            .any(|p| p.id == plan || p.name == plan)
    }

    /// Parse a catalog from JSON text.
    pub fn from_json(path: &Path, contents: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(contents).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Load a catalog file.
pub async fn load_catalog(path: &Path) -> Result<Catalog, CatalogError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Catalog::from_json(path, &contents)
}

/// Catalog holder shared by backend adapters.
///
/// Adapters are used behind `Arc<dyn Backend>`, so the installed catalog
/// lives behind a lock.
#[derive(Debug, Default)]
pub struct CatalogSlot {
    catalog: RwLock<Option<Catalog>>,
}

impl CatalogSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the installed catalog.
    pub fn set(&self, catalog: Catalog) {
        match self.catalog.write() {
            Ok(mut guard) => *guard = Some(catalog),
            Err(poisoned) => *poisoned.into_inner() = Some(catalog),
        }
    }

    /// Current catalog, if one was installed.
    pub fn get(&self) -> Option<Catalog> {
        match self.catalog.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Whether `plan` is offered by the installed catalog. False when no catalog is installed.
    pub fn contains_plan(&self, plan: &str) -> bool {
        match self.catalog.read() {
            Ok(guard) => guard.as_ref().is_some_and(|c| c.contains_plan(plan)),
            Err(poisoned) => poisoned
                .into_inner()
                .as_ref()
                .is_some_and(|c| c.contains_plan(plan)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Catalog {
        serde_json::from_value(serde_json::json!({
            "services": [{
                "id": "cb-service",
                "name": "couchbase",
                "description": "Couchbase Server",
                "bindable": true,
                "plans": [
                    {"id": "plan-gold-id", "name": "gold", "description": "3 nodes"},
                    {
                        "id": "plan-silver-id",
                        "name": "silver",
                        "description": "1 node",
                        "free": true
                    }
                ]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_contains_plan_matches_id_or_name() {
        let catalog = sample();
        assert!(catalog.contains_plan("gold"));
        assert!(catalog.contains_plan("plan-silver-id"));
        assert!(!catalog.contains_plan("bogus"));
    }

    #[test]
    fn test_slot_without_catalog_rejects_plans() {
        let slot = CatalogSlot::new();
        assert!(!slot.contains_plan("gold"));
        assert!(slot.get().is_none());

        slot.set(sample());
        assert!(slot.contains_plan("gold"));
        assert_eq!(slot.get().unwrap().services.len(), 1);
    }

    #[tokio::test]
    async fn test_load_catalog_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, serde_json::to_string(&sample()).unwrap()).unwrap();

        let catalog = load_catalog(&path).await.unwrap();
        assert_eq!(catalog, sample());
    }

    #[tokio::test]
    async fn test_load_catalog_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            load_catalog(&missing).await,
            Err(CatalogError::Read { .. })
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            load_catalog(&broken).await,
            Err(CatalogError::Parse { .. })
        ));
    }
}
