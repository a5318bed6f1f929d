// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Couchbroker - Couchbase Service Broker
//!
//! An HTTP service broker responsible for:
//! - Serving the plan catalog
//! - Provisioning Couchbase on Docker or BOSH, configured in the background
//! - Issuing and revoking binding credentials

use std::sync::Arc;
use tracing::{info, warn};

use couchbroker_core::{JsonFileStore, RetryPolicy, ServiceBinding, ServiceInstance};
use couchbroker_server::backends::backend_from_config;
use couchbroker_server::config::Config;
use couchbroker_server::runtime::BrokerRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "couchbroker=info,couchbroker_core=info,couchbroker_server=info,tower_http=info"
                    .into()
            }),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        bind_addr = %config.bind_addr,
        backend = ?config.backend,
        data_dir = %config.data_dir.display(),
        catalog = %config.catalog_path().display(),
        "Starting Couchbroker"
    );

    let backend = backend_from_config(&config).await?;

    let instance_store = Arc::new(JsonFileStore::<ServiceInstance>::in_dir(
        &config.data_dir,
        &config.instances_file,
    ));
    let binding_store = Arc::new(JsonFileStore::<ServiceBinding>::in_dir(
        &config.data_dir,
        &config.bindings_file,
    ));

    let runtime = BrokerRuntime::builder()
        .backend(backend)
        .instance_store(instance_store)
        .binding_store(binding_store)
        .catalog_path(config.catalog_path())
        .bind_addr(config.bind_addr)
        .reconcile_policy(RetryPolicy::with_budget(config.reconcile_budget))
        .credentials(&config.rest_user, &config.rest_password)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Broker ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Couchbroker shut down");

    Ok(())
}
