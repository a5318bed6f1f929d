// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable broker runtime.
//!
//! [`BrokerRuntime`] wires a backend and two stores into a
//! [`LifecycleController`], resumes reconciliation of instances left
//! in progress by a previous run, and serves the HTTP API until shut down.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use couchbroker_core::{JsonFileStore, MockBackend};
//! use couchbroker_server::runtime::BrokerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = BrokerRuntime::builder()
//!         .backend(Arc::new(MockBackend::new()))
//!         .instance_store(Arc::new(JsonFileStore::new(".data/instances.json")))
//!         .binding_store(Arc::new(JsonFileStore::new(".data/bindings.json")))
//!         .credentials("broker", "secret")
//!         .bind_addr("0.0.0.0:9000".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use couchbroker_core::{
    Backend, LifecycleController, RetryPolicy, ServiceBinding, ServiceInstance, Store,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::server::{AppState, BasicAuth, router};

/// Builder for creating a [`BrokerRuntime`].
pub struct BrokerRuntimeBuilder {
    backend: Option<Arc<dyn Backend>>,
    instance_store: Option<Arc<dyn Store<ServiceInstance>>>,
    binding_store: Option<Arc<dyn Store<ServiceBinding>>>,
    catalog_path: Option<PathBuf>,
    bind_addr: SocketAddr,
    reconcile_policy: RetryPolicy,
    user: Option<String>,
    password: Option<String>,
}

impl Default for BrokerRuntimeBuilder {
    fn default() -> Self {
        Self {
            backend: None,
            instance_store: None,
            binding_store: None,
            catalog_path: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            reconcile_policy: RetryPolicy::default(),
            user: None,
            password: None,
        }
    }
}

impl BrokerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend adapter (required).
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the instance store (required).
    pub fn instance_store(mut self, store: Arc<dyn Store<ServiceInstance>>) -> Self {
        self.instance_store = Some(store);
        self
    }

    /// Set the binding store (required).
    pub fn binding_store(mut self, store: Arc<dyn Store<ServiceBinding>>) -> Self {
        self.binding_store = Some(store);
        self
    }

    /// Set the catalog file, loaded at start and on every catalog request.
    ///
    /// Without one the backend's current catalog is served as-is.
    pub fn catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    /// Set the HTTP listen address.
    ///
    /// Default: `0.0.0.0:9000`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the retry policy of background reconciliation.
    pub fn reconcile_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconcile_policy = policy;
        self
    }

    /// Set the basic-auth credentials callers must present (required).
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<BrokerRuntimeConfig> {
        let backend = self
            .backend
            .ok_or_else(|| anyhow::anyhow!("backend is required"))?;
        let instance_store = self
            .instance_store
            .ok_or_else(|| anyhow::anyhow!("instance_store is required"))?;
        let binding_store = self
            .binding_store
            .ok_or_else(|| anyhow::anyhow!("binding_store is required"))?;
        let user = self
            .user
            .ok_or_else(|| anyhow::anyhow!("credentials are required"))?;
        let password = self.password.unwrap_or_default();

        Ok(BrokerRuntimeConfig {
            backend,
            instance_store,
            binding_store,
            catalog_path: self.catalog_path,
            bind_addr: self.bind_addr,
            reconcile_policy: self.reconcile_policy,
            auth: BasicAuth::new(user, password),
        })
    }
}

/// Configuration for a [`BrokerRuntime`].
pub struct BrokerRuntimeConfig {
    backend: Arc<dyn Backend>,
    instance_store: Arc<dyn Store<ServiceInstance>>,
    binding_store: Arc<dyn Store<ServiceBinding>>,
    catalog_path: Option<PathBuf>,
    bind_addr: SocketAddr,
    reconcile_policy: RetryPolicy,
    auth: BasicAuth,
}

impl BrokerRuntimeConfig {
    /// Load persisted state, load the catalog, and start serving.
    pub async fn start(self) -> Result<BrokerRuntime> {
        let mut builder = LifecycleController::builder()
            .backend(self.backend)
            .instance_store(self.instance_store)
            .binding_store(self.binding_store)
            .reconcile_policy(self.reconcile_policy);
        if let Some(path) = self.catalog_path {
            builder = builder.catalog_path(path);
        }
        let controller = builder
            .build()
            .await
            .context("failed to load persisted broker state")?;

        let catalog = controller
            .reload_catalog()
            .await
            .context("failed to load catalog")?;
        info!(services = catalog.services.len(), "Catalog loaded");

        let resumed = controller.resume_pending().await;
        if resumed > 0 {
            info!(resumed, "Resumed reconciliation of pending instances");
        }

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.bind_addr))?;
        let local_addr = listener.local_addr()?;

        let app = router(AppState::new(controller.clone(), self.auth));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server_handle = tokio::spawn(serve(listener, app, shutdown_rx));

        info!(bind_addr = %local_addr, "BrokerRuntime started");

        Ok(BrokerRuntime {
            server_handle,
            shutdown_tx,
            controller,
            local_addr,
        })
    }
}

async fn serve(
    listener: TcpListener,
    app: axum::Router,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    Ok(())
}

/// A running broker.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination. Reconciliation
/// tasks still in flight are abandoned; they resume on the next start.
pub struct BrokerRuntime {
    server_handle: JoinHandle<Result<()>>,
    shutdown_tx: watch::Sender<bool>,
    controller: LifecycleController,
    local_addr: SocketAddr,
}

impl BrokerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> BrokerRuntimeBuilder {
        BrokerRuntimeBuilder::new()
    }

    /// Address the HTTP server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The controller serving requests.
    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    /// Whether the HTTP server task is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
    }

    /// Stop accepting requests and wait for in-flight ones to finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("BrokerRuntime shutting down...");
        let _ = self.shutdown_tx.send(true);

        match self.server_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "HTTP server exited with error"),
            Err(e) => error!(error = %e, "HTTP server task panicked"),
        }

        info!("BrokerRuntime shutdown complete");
        Ok(())
    }
}
