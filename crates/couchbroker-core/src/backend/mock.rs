// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock backend for testing.
//!
//! A scriptable adapter that simulates provisioning without talking to any
//! infrastructure. Every operation is counted so tests can assert on calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::traits::*;
use crate::catalog::{Catalog, CatalogSlot};
use crate::model::Credential;

/// Mock resource state.
#[derive(Debug, Clone)]
struct MockInstance {
    state: InstanceState,
    probes: u32,
}

/// Call counters for a [`MockBackend`].
#[derive(Debug, Default)]
pub struct MockCalls {
    /// `create_instance` calls.
    pub create: AtomicUsize,
    /// `delete_instance` calls.
    pub delete: AtomicUsize,
    /// `instance_state` calls.
    pub state: AtomicUsize,
    /// `probe_readiness` calls.
    pub probe: AtomicUsize,
    /// `issue_credentials` calls.
    pub issue: AtomicUsize,
    /// `revoke_credentials` calls.
    pub revoke: AtomicUsize,
}

impl MockCalls {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Read a counter.
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Mock backend for testing.
pub struct MockBackend {
    instances: Mutex<HashMap<String, MockInstance>>,
    catalog: CatalogSlot,
    /// Number of readiness probes answered "not ready" before reporting ready.
    pub ready_after_probes: u32,
    /// If true, readiness probes never succeed.
    pub never_ready: bool,
    fail_create: AtomicBool,
    fail_delete: AtomicBool,
    fail_issue: AtomicBool,
    /// Call counters.
    pub calls: MockCalls,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a mock backend whose instances are ready on the first probe.
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            catalog: CatalogSlot::new(),
            ready_after_probes: 0,
            never_ready: false,
            fail_create: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_issue: AtomicBool::new(false),
            calls: MockCalls::default(),
        }
    }

    /// Create a mock backend whose instances become ready after `probes` failed probes.
    pub fn ready_after(probes: u32) -> Self {
        Self {
            ready_after_probes: probes,
            ..Self::new()
        }
    }

    /// Create a mock backend whose instances never become ready.
    /// This is useful for testing reconciliation budget exhaustion.
    pub fn never_ready() -> Self {
        Self {
            never_ready: true,
            ..Self::new()
        }
    }

    /// Install a catalog and return self, for builder-style setup.
    pub fn with_catalog(self, catalog: Catalog) -> Self {
        self.catalog.set(catalog);
        self
    }

    /// Make `create_instance` fail (or succeed again).
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make `delete_instance` fail (or succeed again).
    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Make `issue_credentials` fail (or succeed again).
    pub fn set_fail_issue(&self, fail: bool) {
        self.fail_issue.store(fail, Ordering::SeqCst);
    }

    /// Force the backend-reported state of a resource.
    pub async fn set_state(&self, internal_id: &str, state: InstanceState) {
        let mut instances = self.instances.lock().await;
        if let Some(instance) = instances.get_mut(internal_id) {
            instance.state = state;
        }
    }

    /// Whether the backend still holds a resource.
    pub async fn contains(&self, internal_id: &str) -> bool {
        self.instances.lock().await.contains_key(internal_id)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn backend_type(&self) -> &'static str {
        "mock"
    }

    async fn create_instance(&self, options: &CreateOptions) -> Result<String> {
        MockCalls::bump(&self.calls.create);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BackendError::Request("Mock create failure".to_string()));
        }

        let internal_id = format!("mock-{}", uuid::Uuid::new_v4().simple());
        let mut instances = self.instances.lock().await;
        instances.insert(
            internal_id.clone(),
            MockInstance {
                state: InstanceState::Pending,
                probes: 0,
            },
        );
        tracing::debug!(
            instance_id = %options.instance_id,
            internal_id = %internal_id,
            "Mock instance created"
        );
        Ok(internal_id)
    }

    async fn delete_instance(&self, internal_id: &str) -> Result<()> {
        MockCalls::bump(&self.calls.delete);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(BackendError::Request("Mock delete failure".to_string()));
        }
        let mut instances = self.instances.lock().await;
        instances
            .remove(internal_id)
            .map(|_| ())
            .ok_or_else(|| BackendError::InstanceNotFound(internal_id.to_string()))
    }

    async fn instance_state(&self, internal_id: &str) -> Result<InstanceState> {
        MockCalls::bump(&self.calls.state);
        let instances = self.instances.lock().await;
        instances
            .get(internal_id)
            .map(|i| i.state)
            .ok_or_else(|| BackendError::InstanceNotFound(internal_id.to_string()))
    }

    async fn probe_readiness(&self, internal_id: &str) -> Result<bool> {
        MockCalls::bump(&self.calls.probe);
        let mut instances = self.instances.lock().await;
        let instance = instances
            .get_mut(internal_id)
            .ok_or_else(|| BackendError::InstanceNotFound(internal_id.to_string()))?;

        instance.probes += 1;
        if self.never_ready || instance.probes <= self.ready_after_probes {
            return Ok(false);
        }
        if instance.state == InstanceState::Pending {
            instance.state = InstanceState::Running;
        }
        Ok(true)
    }

    async fn issue_credentials(&self, internal_id: &str) -> Result<Credential> {
        MockCalls::bump(&self.calls.issue);
        if self.fail_issue.load(Ordering::SeqCst) {
            return Err(BackendError::NotReady(internal_id.to_string()));
        }
        let mut instances = self.instances.lock().await;
        let instance = instances
            .get_mut(internal_id)
            .ok_or_else(|| BackendError::InstanceNotFound(internal_id.to_string()))?;
        instance.state = InstanceState::Succeeded;

        // Every call hands out fresh material, like a real reconfiguration.
        Ok(Credential {
            uri: format!("http://{}:8091", internal_id),
            username: uuid::Uuid::new_v4().simple().to_string(),
            password: uuid::Uuid::new_v4().simple().to_string(),
            sasl_password: uuid::Uuid::new_v4().simple().to_string(),
            bucket_name: "cfdefault".to_string(),
        })
    }

    async fn revoke_credentials(&self, _internal_id: &str, _binding_id: &str) -> Result<()> {
        MockCalls::bump(&self.calls.revoke);
        Ok(())
    }

    fn set_catalog(&self, catalog: Catalog) {
        self.catalog.set(catalog);
    }

    fn catalog(&self) -> Option<Catalog> {
        self.catalog.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_options() -> CreateOptions {
        CreateOptions {
            instance_id: "test-instance-123".to_string(),
            plan_id: "gold".to_string(),
            parameters: None,
        }
    }

    #[tokio::test]
    async fn test_mock_backend_lifecycle() {
        let backend = MockBackend::new();
        let id = backend.create_instance(&test_options()).await.unwrap();

        assert_eq!(
            backend.instance_state(&id).await.unwrap(),
            InstanceState::Pending
        );
        assert!(backend.probe_readiness(&id).await.unwrap());
        assert_eq!(
            backend.instance_state(&id).await.unwrap(),
            InstanceState::Running
        );

        let cred = backend.issue_credentials(&id).await.unwrap();
        assert!(!cred.uri.is_empty());
        assert_eq!(
            backend.instance_state(&id).await.unwrap(),
            InstanceState::Succeeded
        );

        backend.delete_instance(&id).await.unwrap();
        assert!(!backend.contains(&id).await);
        assert!(matches!(
            backend.instance_state(&id).await,
            Err(BackendError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_backend_ready_after() {
        let backend = MockBackend::ready_after(2);
        let id = backend.create_instance(&test_options()).await.unwrap();

        assert!(!backend.probe_readiness(&id).await.unwrap());
        assert!(!backend.probe_readiness(&id).await.unwrap());
        assert!(backend.probe_readiness(&id).await.unwrap());
        assert_eq!(MockCalls::get(&backend.calls.probe), 3);
    }

    #[tokio::test]
    async fn test_mock_backend_never_ready() {
        let backend = MockBackend::never_ready();
        let id = backend.create_instance(&test_options()).await.unwrap();

        for _ in 0..5 {
            assert!(!backend.probe_readiness(&id).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_mock_backend_failure_toggles() {
        let backend = MockBackend::new();
        backend.set_fail_create(true);
        assert!(backend.create_instance(&test_options()).await.is_err());
        backend.set_fail_create(false);

        let id = backend.create_instance(&test_options()).await.unwrap();
        backend.set_fail_issue(true);
        assert!(matches!(
            backend.issue_credentials(&id).await,
            Err(BackendError::NotReady(_))
        ));

        backend.set_fail_delete(true);
        assert!(backend.delete_instance(&id).await.is_err());
        assert!(backend.contains(&id).await);
    }

    #[tokio::test]
    async fn test_mock_backend_issues_fresh_credentials() {
        let backend = MockBackend::new();
        let id = backend.create_instance(&test_options()).await.unwrap();

        let first = backend.issue_credentials(&id).await.unwrap();
        let second = backend.issue_credentials(&id).await.unwrap();
        assert_ne!(first.password, second.password);
    }
}
