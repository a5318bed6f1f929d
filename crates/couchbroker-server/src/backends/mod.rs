// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend adapters for the supported infrastructures.
//!
//! | Backend | Internal id | Credentials |
//! |---------|-------------|-------------|
//! | Docker | container id | one node, configured at the container IP |
//! | BOSH | deployment name | every VM configured, then clustered |

pub mod bosh;
pub mod couchbase;
pub mod docker;

use std::sync::Arc;

use couchbroker_core::{Backend, BackendError};
use tracing::info;

use crate::config::{BackendKind, BoshConfig, Config};

pub use bosh::BoshBackend;
pub use couchbase::CouchbaseAdmin;
pub use docker::DockerBackend;

/// Construct the backend selected by `config`.
pub async fn backend_from_config(config: &Config) -> anyhow::Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match config.backend {
        BackendKind::Docker => {
            let host = config.docker_host.as_deref().ok_or_else(|| {
                BackendError::Config("DOCKER_HOST must be set for the docker backend".to_string())
            })?;
            let cert_path = config.docker_cert_path.as_deref().ok_or_else(|| {
                BackendError::Config(
                    "DOCKER_CERT_PATH must be set for the docker backend".to_string(),
                )
            })?;
            info!(docker_host = %host, "Using docker backend");
            Arc::new(DockerBackend::from_tls_material(host, cert_path).await?)
        }
        BackendKind::Bosh => {
            let bosh = BoshConfig::load(&config.bosh_config_path).await?;
            info!(director = %bosh.director_url, "Using BOSH backend");
            Arc::new(BoshBackend::new(bosh, CouchbaseAdmin::new()?)?)
        }
    };
    Ok(backend)
}
