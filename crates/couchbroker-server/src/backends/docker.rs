// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker backend.
//!
//! Each instance is one `couchbase` container on a Docker engine reached over
//! its TLS-protected HTTP API. The container id is the internal identifier.

use std::path::Path;

use async_trait::async_trait;
use couchbroker_core::Credential;
use couchbroker_core::backend::{Backend, BackendError, CreateOptions, InstanceState, Result};
use couchbroker_core::catalog::{Catalog, CatalogSlot};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::couchbase::{CouchbaseAdmin, FactoryProbe};

/// Image every instance container runs.
pub const DEFAULT_IMAGE: &str = "couchbase";

#[derive(Debug, Deserialize)]
struct CreatedContainer {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    state: ContainerState,
    #[serde(default)]
    network_settings: NetworkSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

/// Backend running one container per instance.
pub struct DockerBackend {
    http: reqwest::Client,
    endpoint: String,
    image: String,
    admin: CouchbaseAdmin,
    catalog: CatalogSlot,
}

impl DockerBackend {
    /// Create a backend talking to the engine at `endpoint` through `http`.
    pub fn new(endpoint: impl Into<String>, http: reqwest::Client, admin: CouchbaseAdmin) -> Self {
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            image: DEFAULT_IMAGE.to_string(),
            admin,
            catalog: CatalogSlot::new(),
        }
    }

    /// Create a backend from a `DOCKER_HOST` value and a `DOCKER_CERT_PATH` directory.
    ///
    /// The directory must hold `ca.pem`, `cert.pem`, and `key.pem`.
    pub async fn from_tls_material(docker_host: &str, cert_path: &Path) -> Result<Self> {
        let read = |name: &'static str| {
            let path = cert_path.join(name);
            async move {
                tokio::fs::read(&path).await.map_err(|e| {
                    BackendError::Config(format!("cannot read {}: {}", path.display(), e))
                })
            }
        };
        let ca = read("ca.pem").await?;
        let mut identity = read("cert.pem").await?;
        identity.extend_from_slice(&read("key.pem").await?);

        let tls_error = |e: reqwest::Error| BackendError::Config(format!("docker TLS: {}", e));
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .add_root_certificate(reqwest::Certificate::from_pem(&ca).map_err(tls_error)?)
            .identity(reqwest::Identity::from_pem(&identity).map_err(tls_error)?)
            .build()
            .map_err(tls_error)?;

        let admin = CouchbaseAdmin::new()?;
        Ok(Self::new(engine_url(docker_host), http, admin))
    }

    /// Use a different container image.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerInspect> {
        let response = self
            .http
            .get(self.url(&format!("/containers/{}/json", container_id)))
            .send()
            .await
            .map_err(|e| BackendError::Request(format!("inspect {}: {}", container_id, e)))?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| BackendError::Request(format!("inspect {}: {}", container_id, e))),
            StatusCode::NOT_FOUND => Err(BackendError::InstanceNotFound(container_id.to_string())),
            status => Err(engine_error("inspect", status, response).await),
        }
    }
}

/// Turn a `DOCKER_HOST` value into an HTTPS base URL.
fn engine_url(docker_host: &str) -> String {
    match docker_host.strip_prefix("tcp://") {
        Some(rest) => format!("https://{}", rest),
        None => docker_host.to_string(),
    }
}

async fn engine_error(step: &str, status: StatusCode, response: reqwest::Response) -> BackendError {
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    BackendError::Request(format!("docker {} answered {}: {}", step, status, body))
}

#[async_trait]
impl Backend for DockerBackend {
    fn backend_type(&self) -> &'static str {
        "docker"
    }

    async fn create_instance(&self, options: &CreateOptions) -> Result<String> {
        let response = self
            .http
            .post(self.url("/containers/create"))
            .json(&json!({
                "Image": self.image,
                "Labels": {"couchbroker.instance_id": options.instance_id},
                "HostConfig": {},
            }))
            .send()
            .await
            .map_err(|e| BackendError::Request(format!("create container: {}", e)))?;
        if response.status() != StatusCode::CREATED {
            let status = response.status();
            return Err(engine_error("create", status, response).await);
        }
        let created: CreatedContainer = response
            .json()
            .await
            .map_err(|e| BackendError::Request(format!("create container: {}", e)))?;

        let response = self
            .http
            .post(self.url(&format!("/containers/{}/start", created.id)))
            .send()
            .await
            .map_err(|e| BackendError::Request(format!("start {}: {}", created.id, e)))?;
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED => {}
            status => return Err(engine_error("start", status, response).await),
        }

        let inspected = self.inspect(&created.id).await?;
        info!(
            instance_id = %options.instance_id,
            container_id = %created.id,
            ip = %inspected.network_settings.ip_address,
            "Container started"
        );
        Ok(created.id)
    }

    async fn delete_instance(&self, internal_id: &str) -> Result<()> {
        let container = self.inspect(internal_id).await?;
        if !container.state.running {
            return Err(BackendError::Request(format!(
                "container {} is not running",
                internal_id
            )));
        }

        let response = self
            .http
            .post(self.url(&format!("/containers/{}/stop?t=10", internal_id)))
            .send()
            .await
            .map_err(|e| BackendError::Request(format!("stop {}: {}", internal_id, e)))?;
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED => {}
            status => return Err(engine_error("stop", status, response).await),
        }

        let response = self
            .http
            .delete(self.url(&format!("/containers/{}?force=true", internal_id)))
            .send()
            .await
            .map_err(|e| BackendError::Request(format!("remove {}: {}", internal_id, e)))?;
        match response.status() {
            StatusCode::NO_CONTENT => {}
            status => return Err(engine_error("remove", status, response).await),
        }

        info!(container_id = %internal_id, "Container removed");
        Ok(())
    }

    async fn instance_state(&self, internal_id: &str) -> Result<InstanceState> {
        let container = self.inspect(internal_id).await?;
        if !container.state.running {
            return Ok(match container.state.status.as_str() {
                "exited" | "dead" => InstanceState::Failed,
                _ => InstanceState::Pending,
            });
        }

        let ip = &container.network_settings.ip_address;
        if ip.is_empty() {
            return Ok(InstanceState::Pending);
        }
        let state = match self.admin.probe_factory(ip).await {
            FactoryProbe::Rejected => InstanceState::Succeeded,
            FactoryProbe::Accepted => InstanceState::Running,
            FactoryProbe::Other(status) => {
                debug!(container_id = %internal_id, status, "Unexpected admin API status");
                InstanceState::Pending
            }
            FactoryProbe::Unreachable => InstanceState::Pending,
        };
        Ok(state)
    }

    async fn probe_readiness(&self, internal_id: &str) -> Result<bool> {
        let container = self.inspect(internal_id).await?;
        let ip = &container.network_settings.ip_address;
        if !container.state.running || ip.is_empty() {
            return Ok(false);
        }
        Ok(self.admin.probe_factory(ip).await == FactoryProbe::Accepted)
    }

    async fn issue_credentials(&self, internal_id: &str) -> Result<Credential> {
        let container = self.inspect(internal_id).await?;
        let ip = container.network_settings.ip_address;
        if !container.state.running || ip.is_empty() {
            warn!(container_id = %internal_id, "Container not running; cannot configure");
            return Err(BackendError::NotReady(internal_id.to_string()));
        }

        let credential = self.admin.generate_credential(&ip);
        self.admin.configure_node(&ip, &credential).await
    }

    async fn revoke_credentials(&self, internal_id: &str, binding_id: &str) -> Result<()> {
        // Every binding shares the instance credential.
        debug!(container_id = %internal_id, binding_id = %binding_id, "Nothing to revoke");
        Ok(())
    }

    fn set_catalog(&self, catalog: Catalog) {
        self.catalog.set(catalog);
    }

    fn catalog(&self) -> Option<Catalog> {
        self.catalog.get()
    }
}
