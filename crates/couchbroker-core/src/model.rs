// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service instance, binding, and credential records.
//!
//! These are the records held in the controller's maps and written to the
//! persisted instance and binding files. Field names follow the platform's
//! service broker wire format so the same types serve both purposes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Poll interval suggested to the platform while an operation is in progress.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Connection material for one database deployment.
///
/// Copies held by instances and bindings are independent snapshots.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Admin/dashboard address of the deployment.
    #[serde(rename = "couchbase_url", default)]
    pub uri: String,
    /// Admin user name.
    #[serde(default)]
    pub username: String,
    /// Admin password.
    #[serde(default)]
    pub password: String,
    /// Secondary (bucket) auth secret.
    #[serde(rename = "saslpassword", default)]
    pub sasl_password: String,
    /// Bucket provisioned for applications.
    #[serde(rename = "bucket", default)]
    pub bucket_name: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("uri", &self.uri)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("sasl_password", &"<redacted>")
            .field("bucket_name", &self.bucket_name)
            .finish()
    }
}

/// Externally visible state of the last asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    /// Provisioning is still underway.
    #[serde(rename = "in progress")]
    InProgress,
    /// The instance is ready for use.
    #[serde(rename = "succeeded")]
    Succeeded,
    /// Provisioning failed; the instance will not become ready.
    #[serde(rename = "failed")]
    Failed,
}

impl OperationState {
    /// Whether the state is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::InProgress)
    }
}

/// Async operation status surfaced to a polling caller.
///
/// The poll interval is non-zero only while the state is in progress; use the
/// constructors to keep that invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOperation {
    /// Current state.
    pub state: OperationState,
    /// Human-readable description.
    pub description: String,
    /// Dashboard address, set on success.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dashboard_url: String,
    /// Recommended poll interval in seconds.
    #[serde(default)]
    pub async_poll_interval_seconds: u64,
}

impl LastOperation {
    /// An operation still in progress.
    pub fn in_progress(description: impl Into<String>) -> Self {
        Self {
            state: OperationState::InProgress,
            description: description.into(),
            dashboard_url: String::new(),
            async_poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECS,
        }
    }

    /// A successfully finished operation.
    pub fn succeeded(description: impl Into<String>, dashboard_url: impl Into<String>) -> Self {
        Self {
            state: OperationState::Succeeded,
            description: description.into(),
            dashboard_url: dashboard_url.into(),
            async_poll_interval_seconds: 0,
        }
    }

    /// A failed operation.
    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            state: OperationState::Failed,
            description: description.into(),
            dashboard_url: String::new(),
            async_poll_interval_seconds: 0,
        }
    }
}

/// Provisioning request for a new service instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Catalog service identifier.
    #[serde(default)]
    pub service_id: String,
    /// Catalog plan identifier (id or name).
    #[serde(default)]
    pub plan_id: String,
    /// Platform organization.
    #[serde(default)]
    pub organization_guid: String,
    /// Platform space.
    #[serde(default)]
    pub space_guid: String,
    /// Caller-supplied creation parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// One provisioned database deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// External identifier; the map key.
    pub id: String,
    /// Backend-assigned identifier (container id, deployment name).
    #[serde(default)]
    pub internal_id: String,
    /// Catalog service identifier.
    #[serde(default)]
    pub service_id: String,
    /// Catalog plan identifier.
    #[serde(default)]
    pub plan_id: String,
    /// Platform organization.
    #[serde(default)]
    pub organization_guid: String,
    /// Platform space.
    #[serde(default)]
    pub space_guid: String,
    /// Dashboard address, known once the instance is configured.
    #[serde(default)]
    pub dashboard_url: String,
    /// Creation parameters as supplied by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Credential issued during reconciliation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credential>,
    /// Status of the last asynchronous operation.
    pub last_operation: LastOperation,
    /// Creation generation; reconciliation results for older generations are discarded.
    #[serde(default)]
    pub generation: u64,
}

impl ServiceInstance {
    /// Build a freshly created instance record in the in-progress state.
    pub fn provisioning(
        id: impl Into<String>,
        internal_id: impl Into<String>,
        request: ProvisionRequest,
        generation: u64,
    ) -> Self {
        Self {
            id: id.into(),
            internal_id: internal_id.into(),
            service_id: request.service_id,
            plan_id: request.plan_id,
            organization_guid: request.organization_guid,
            space_guid: request.space_guid,
            dashboard_url: String::new(),
            parameters: request.parameters,
            credentials: None,
            last_operation: LastOperation::in_progress("creating service instance..."),
            generation,
        }
    }
}

/// One application's access grant to an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBinding {
    /// Binding identifier; the map key.
    pub id: String,
    /// Service identifier copied from the instance at bind time.
    #[serde(default)]
    pub service_id: String,
    /// Plan identifier copied from the instance at bind time.
    #[serde(default)]
    pub service_plan_id: String,
    /// Owning instance.
    pub service_instance_id: String,
    /// Application the binding was issued for, when the platform supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_guid: Option<String>,
    /// Credential snapshot; never rewritten after creation.
    pub credentials: Credential,
}

impl ServiceBinding {
    /// Snapshot a credential into a new binding for `instance`.
    pub fn for_instance(
        binding_id: impl Into<String>,
        instance: &ServiceInstance,
        credentials: Credential,
    ) -> Self {
        Self {
            id: binding_id.into(),
            service_id: instance.service_id.clone(),
            service_plan_id: instance.plan_id.clone(),
            service_instance_id: instance.id.clone(),
            app_guid: None,
            credentials,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_only_while_in_progress() {
        assert_eq!(
            LastOperation::in_progress("x").async_poll_interval_seconds,
            DEFAULT_POLL_INTERVAL_SECS
        );
        assert_eq!(
            LastOperation::succeeded("x", "http://a").async_poll_interval_seconds,
            0
        );
        assert_eq!(LastOperation::failed("x").async_poll_interval_seconds, 0);
    }

    #[test]
    fn test_operation_state_wire_strings() {
        let op = LastOperation::in_progress("creating");
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["state"], "in progress");
        assert!(json.get("dashboard_url").is_none());

        let op = LastOperation::succeeded("done", "http://10.0.0.2:8091");
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["state"], "succeeded");
        assert_eq!(json["dashboard_url"], "http://10.0.0.2:8091");
    }

    #[test]
    fn test_credential_wire_names() {
        let cred = Credential {
            uri: "http://10.0.0.2:8091".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            sasl_password: "s".to_string(),
            bucket_name: "cfdefault".to_string(),
        };
        let json = serde_json::to_value(&cred).unwrap();
        assert_eq!(json["couchbase_url"], "http://10.0.0.2:8091");
        assert_eq!(json["saslpassword"], "s");
        assert_eq!(json["bucket"], "cfdefault");
    }

    #[test]
    fn test_credential_debug_redacts_secrets() {
        let cred = Credential {
            password: "hunter2".to_string(),
            sasl_password: "sasl-secret".to_string(),
            ..Default::default()
        };
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("sasl-secret"));
    }

    #[test]
    fn test_instance_without_generation_deserializes() {
        let json = serde_json::json!({
            "id": "i1",
            "internal_id": "c0ffee",
            "plan_id": "gold",
            "last_operation": {
                "state": "in progress",
                "description": "creating service instance...",
                "async_poll_interval_seconds": 10
            }
        });
        let instance: ServiceInstance = serde_json::from_value(json).unwrap();
        assert_eq!(instance.generation, 0);
        assert!(instance.credentials.is_none());
        assert_eq!(instance.last_operation.state, OperationState::InProgress);
    }

    #[test]
    fn test_binding_denormalizes_instance_fields() {
        let request = ProvisionRequest {
            service_id: "svc".to_string(),
            plan_id: "gold".to_string(),
            ..Default::default()
        };
        let instance = ServiceInstance::provisioning("i1", "c1", request, 1);
        let binding = ServiceBinding::for_instance("b1", &instance, Credential::default());
        assert_eq!(binding.service_id, "svc");
        assert_eq!(binding.service_plan_id, "gold");
        assert_eq!(binding.service_instance_id, "i1");
    }
}
