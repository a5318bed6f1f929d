// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend adapter trait definitions.
//!
//! Defines the capability set the controller consumes from an infrastructure
//! provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::catalog::Catalog;
use crate::model::Credential;

/// Errors from backend adapter operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The backend has no resource with this internal identifier.
    #[error("Instance not found on backend: {0}")]
    InstanceNotFound(String),

    /// The backend resource exists but is not in a usable state.
    #[error("Instance not ready: {0}")]
    NotReady(String),

    /// The backend rejected or failed the request.
    #[error("Request failed: {0}")]
    Request(String),

    /// Adapter configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Backend-reported state of a provisioned resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Accepted, not yet running.
    Pending,
    /// Running, not yet finished provisioning.
    Running,
    /// Provisioned.
    Succeeded,
    /// Provisioning failed.
    Failed,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Succeeded => "succeeded",
            InstanceState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Options for creating a backend resource.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// External instance identifier (for logging and naming only).
    pub instance_id: String,
    /// Requested plan.
    pub plan_id: String,
    /// Caller-supplied creation parameters.
    pub parameters: Option<Value>,
}

/// Trait for backend adapters.
///
/// Adapters are PURE integrations - they hold no instance records and do not
/// touch the persisted maps. Record keeping is handled by the controller.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend type identifier (e.g., "docker", "bosh", "mock").
    fn backend_type(&self) -> &'static str;

    /// Create the backend resource, returning its internal identifier once
    /// the backend has accepted the request.
    async fn create_instance(&self, options: &CreateOptions) -> Result<String>;

    /// Tear down the backend resource.
    async fn delete_instance(&self, internal_id: &str) -> Result<()>;

    /// Query the backend's current state for the resource.
    async fn instance_state(&self, internal_id: &str) -> Result<InstanceState>;

    /// Whether the resource can be configured now.
    ///
    /// Must not mutate the backend. The default treats a succeeded resource
    /// as ready.
    async fn probe_readiness(&self, internal_id: &str) -> Result<bool> {
        let state = self.instance_state(internal_id).await?;
        Ok(state == InstanceState::Succeeded)
    }

    /// Configure the resource for client access and return its credentials.
    async fn issue_credentials(&self, internal_id: &str) -> Result<Credential>;

    /// Revoke the credentials handed out for a binding.
    ///
    /// Adapters whose credentials are shared across bindings may no-op.
    async fn revoke_credentials(&self, internal_id: &str, binding_id: &str) -> Result<()>;

    /// Install the plan catalog.
    fn set_catalog(&self, catalog: Catalog);

    /// Currently installed plan catalog.
    fn catalog(&self) -> Option<Catalog>;

    /// Whether `plan_id` is offered by the installed catalog.
    fn is_valid_plan(&self, plan_id: &str) -> bool {
        self.catalog().is_some_and(|c| c.contains_plan(plan_id))
    }
}
