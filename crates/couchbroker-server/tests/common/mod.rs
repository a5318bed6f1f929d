// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for couchbroker-server integration tests.
//!
//! Provides TestApp: the broker router over a mock backend and in-memory
//! stores, driven in-process with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use couchbroker_core::{
    Catalog, LifecycleController, MemoryStore, MockBackend, OperationState, RetryPolicy,
    ServiceBinding, ServiceInstance,
};
use couchbroker_server::{AppState, BasicAuth, router};
use serde_json::Value;
use tower::ServiceExt;

pub const USER: &str = "broker";
pub const PASSWORD: &str = "s3cret";

/// Catalog with one service offering `gold` and `silver`.
pub fn test_catalog() -> Catalog {
    serde_json::from_value(test_catalog_json()).expect("valid catalog")
}

/// JSON form of [`test_catalog`].
pub fn test_catalog_json() -> Value {
    serde_json::json!({
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
    })
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

/// `Authorization` header value for the test credentials.
pub fn auth_header() -> String {
    let credentials = format!("{}:{}", USER, PASSWORD);
    format!("Basic {}", STANDARD.encode(credentials))
}

/// Router plus handles on the collaborators behind it.
pub struct TestApp {
    pub app: Router,
    pub controller: LifecycleController,
    pub backend: Arc<MockBackend>,
    pub instances: Arc<MemoryStore<ServiceInstance>>,
    pub bindings: Arc<MemoryStore<ServiceBinding>>,
}

impl TestApp {
    /// App whose instances are ready on the first probe.
    pub async fn new() -> Self {
        Self::with_backend(MockBackend::new()).await
    }

    /// App over a custom mock backend.
    pub async fn with_backend(backend: MockBackend) -> Self {
        let backend = Arc::new(backend.with_catalog(test_catalog()));
        let instances: Arc<MemoryStore<ServiceInstance>> = Arc::new(MemoryStore::new());
        let bindings: Arc<MemoryStore<ServiceBinding>> = Arc::new(MemoryStore::new());
        let controller = LifecycleController::builder()
            .backend(backend.clone())
            .instance_store(instances.clone())
            .binding_store(bindings.clone())
            .reconcile_policy(fast_policy())
            .build()
            .await
            .expect("controller builds");

        let auth = BasicAuth::new(USER, PASSWORD);
        let app = router(AppState::new(controller.clone(), auth));

        Self {
            app,
            controller,
            backend,
            instances,
            bindings,
        }
    }

    /// Send an authenticated request with an optional JSON body.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, auth_header());
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        self.app
            .clone()
            .oneshot(builder.body(body).expect("valid request"))
            .await
            .expect("router is infallible")
    }

    /// Provision `instance_id` on `plan` and wait until it is configured.
    pub async fn ready_instance(&self, instance_id: &str, plan: &str) {
        let response = self
            .request(
                Method::PUT,
                &format!("/v2/service_instances/{}", instance_id),
                Some(provision_body(plan)),
            )
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        wait_for_state(&self.controller, instance_id, OperationState::Succeeded).await;
    }
}

/// Provisioning body for `plan`.
pub fn provision_body(plan: &str) -> Value {
    serde_json::json!({
        "service_id": "cb-service-id",
        "plan_id": plan,
        "organization_guid": "org-guid",
        "space_guid": "space-guid"
    })
}

/// Read a response body as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("readable body");
    serde_json::from_slice(&bytes).expect("JSON body")
}

/// Poll the controller until `instance_id` reaches `state`.
///
/// Panics after five seconds.
pub async fn wait_for_state(
    controller: &LifecycleController,
    instance_id: &str,
    state: OperationState,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(instance) = controller.instance(instance_id).await
            && instance.last_operation.state == state
        {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("instance {} did not reach {:?}", instance_id, state);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
