// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for couchbroker-core integration tests.
//!
//! Provides TestBroker: a controller wired to a mock backend and in-memory stores.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use couchbroker_core::{
    Catalog, LifecycleController, MemoryStore, MockBackend, OperationState, ProvisionRequest,
    RetryPolicy, ServiceBinding, ServiceInstance,
};

/// Catalog with one service offering `gold` and `silver`.
pub fn test_catalog() -> Catalog {
    serde_json::from_value(serde_json::json!({
        "services": [{
            "id": "cb-service-id",
            "name": "couchbase",
            "description": "Couchbase Server",
            "bindable": true,
            "plans": [
                {"id": "gold-plan-id", "name": "gold", "description": "3 node cluster"},
                {"id": "silver-plan-id", "name": "silver", "description": "single node"}
            ]
        }]
    }))
    .expect("valid catalog")
}

/// Retry policy scaled down to milliseconds.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        grace: Duration::ZERO,
        initial_interval: Duration::from_millis(5),
        multiplier: 2,
        max_interval: Duration::from_millis(20),
        budget: Duration::from_secs(5),
    }
}

/// Fast policy that gives up after roughly 100ms of waiting.
pub fn short_budget_policy() -> RetryPolicy {
    RetryPolicy {
        budget: Duration::from_millis(100),
        ..fast_policy()
    }
}

/// Provisioning request for `plan`.
pub fn provision_request(plan: &str) -> ProvisionRequest {
    ProvisionRequest {
        service_id: "cb-service-id".to_string(),
        plan_id: plan.to_string(),
        organization_guid: "org-guid".to_string(),
        space_guid: "space-guid".to_string(),
        parameters: None,
    }
}

/// Controller plus handles on its collaborators.
pub struct TestBroker {
    pub controller: LifecycleController,
    pub backend: Arc<MockBackend>,
    pub instances: Arc<MemoryStore<ServiceInstance>>,
    pub bindings: Arc<MemoryStore<ServiceBinding>>,
}

impl TestBroker {
    /// Broker whose instances are ready on the first probe.
    pub async fn new() -> Self {
        Self::with_backend(MockBackend::new(), fast_policy()).await
    }

    /// Broker with a custom mock backend and retry policy.
    pub async fn with_backend(backend: MockBackend, policy: RetryPolicy) -> Self {
        Self::with_stores(
            backend,
            policy,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
        )
        .await
    }

    /// Broker over pre-populated stores.
    pub async fn with_stores(
        backend: MockBackend,
        policy: RetryPolicy,
        instances: Arc<MemoryStore<ServiceInstance>>,
        bindings: Arc<MemoryStore<ServiceBinding>>,
    ) -> Self {
        let backend = Arc::new(backend.with_catalog(test_catalog()));
        let controller = LifecycleController::builder()
            .backend(backend.clone())
            .instance_store(instances.clone())
            .binding_store(bindings.clone())
            .reconcile_policy(policy)
            .build()
            .await
            .expect("controller builds");

        Self {
            controller,
            backend,
            instances,
            bindings,
        }
    }

    /// Create `instance_id` on plan `gold` and wait until it is configured.
    pub async fn ready_instance(&self, instance_id: &str) -> ServiceInstance {
        self.controller
            .create_instance(instance_id, provision_request("gold"))
            .await
            .expect("create accepted");
        wait_for_state(&self.controller, instance_id, OperationState::Succeeded).await
    }
}

/// Poll the controller until `instance_id` reaches `state`.
///
/// Panics after five seconds.
pub async fn wait_for_state(
    controller: &LifecycleController,
    instance_id: &str,
    state: OperationState,
) -> ServiceInstance {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(instance) = controller.instance(instance_id).await
            && instance.last_operation.state == state
        {
            return instance;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "instance {} did not reach {:?}: {:?}",
                instance_id,
                state,
                controller.instance(instance_id).await
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
