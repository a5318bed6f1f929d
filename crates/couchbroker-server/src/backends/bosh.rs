// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! BOSH backend.
//!
//! Each instance is one BOSH deployment of Couchbase VMs. The deployment name
//! is the internal identifier. Manifests are rendered by merging the template
//! files with a generated stub using `spruce`, then posted to the director,
//! which answers with a task whose state drives the instance state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use couchbroker_core::Credential;
use couchbroker_core::backend::{Backend, BackendError, CreateOptions, InstanceState, Result};
use couchbroker_core::catalog::{Catalog, CatalogSlot};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::couchbase::CouchbaseAdmin;
use crate::config::BoshConfig;

/// Template files merged (in order) into every deployment manifest.
pub const MANIFEST_TEMPLATES: [&str; 5] = [
    "base-cb-deploy.yml",
    "network-bosh-lite.yml",
    "resources-bosh-lite.yml",
    "couchbase-job-defaults.yml",
    "stub.yml",
];

#[derive(Debug, Deserialize)]
struct DirectorInfo {
    uuid: String,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    state: String,
}

#[derive(Debug, Deserialize)]
struct DeploymentVm {
    #[serde(default)]
    ips: Vec<String>,
}

/// Map a director task state onto an instance state.
fn task_state(state: &str) -> InstanceState {
    match state {
        "done" => InstanceState::Succeeded,
        "processing" => InstanceState::Running,
        "queued" => InstanceState::Pending,
        "error" | "cancelled" => InstanceState::Failed,
        other => {
            warn!(state = %other, "Unknown BOSH task state");
            InstanceState::Failed
        }
    }
}

/// Requested VM count from the creation parameters; defaults to one.
fn requested_instances(parameters: Option<&serde_json::Value>) -> u64 {
    parameters
        .and_then(|p| p.get("instances"))
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
        .filter(|n| *n > 0)
        .unwrap_or(1)
}

/// Backend deploying Couchbase clusters through a BOSH director.
pub struct BoshBackend {
    http: reqwest::Client,
    config: BoshConfig,
    admin: CouchbaseAdmin,
    merge_tool: String,
    /// Deployment name -> director task id of its last deploy.
    tasks: Mutex<HashMap<String, u64>>,
    catalog: CatalogSlot,
}

impl BoshBackend {
    /// Create a backend for the director described by `config`.
    pub fn new(config: BoshConfig, admin: CouchbaseAdmin) -> Result<Self> {
        // Directors use self-signed certificates and answer deploys with a
        // redirect to the task, which we read rather than follow.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| BackendError::Config(format!("bosh http client: {}", e)))?;

        Ok(Self {
            http,
            config,
            admin,
            merge_tool: "spruce".to_string(),
            tasks: Mutex::new(HashMap::new()),
            catalog: CatalogSlot::new(),
        })
    }

    /// Use a different manifest merge command (invoked as `<tool> merge <files...>`).
    pub fn with_merge_tool(mut self, tool: impl Into<String>) -> Self {
        self.merge_tool = tool.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.director_url.trim_end_matches('/'), path)
    }

    fn manifest_path(&self, deployment: &str) -> PathBuf {
        self.config.data_dir.join(format!("{}.yml", deployment))
    }

    fn director(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let user = &self.config.director_user;
        self.http
            .request(method, self.url(path))
            .basic_auth(user, Some(&self.config.director_password))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .director(Method::GET, path)
            .send()
            .await
            .map_err(|e| BackendError::Request(format!("GET {}: {}", path, e)))?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| BackendError::Request(format!("GET {}: {}", path, e))),
            StatusCode::NOT_FOUND => Err(BackendError::InstanceNotFound(path.to_string())),
            status => Err(BackendError::Request(format!(
                "GET {} answered {}",
                path, status
            ))),
        }
    }

    async fn task_of(&self, deployment: &str) -> Option<u64> {
        self.tasks.lock().await.get(deployment).copied()
    }

    /// Render the manifest for `deployment` into the data directory.
    async fn render_manifest(
        &self,
        deployment: &str,
        director_uuid: &str,
        instances: u64,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.config.data_dir).await?;

        let stub_name = format!("{}-stub.yml", deployment);
        let stub_path = self.config.data_dir.join(stub_name);
        let stub = format!(
            "name: {}\ndirector_uuid: {}\ncouchbase:\n  instances: {}\n",
            deployment, director_uuid, instances
        );
        tokio::fs::write(&stub_path, stub).await?;

        let mut command = tokio::process::Command::new(&self.merge_tool);
        command.arg("merge");
        for template in MANIFEST_TEMPLATES {
            command.arg(self.config.template_dir.join(template));
        }
        command.arg(&stub_path);

        let output = command.output().await;
        if let Err(e) = tokio::fs::remove_file(&stub_path).await {
            debug!(path = %stub_path.display(), error = %e, "Could not remove manifest stub");
        }
        let output = output.map_err(|e| {
            BackendError::Config(format!("cannot run {}: {}", self.merge_tool, e))
        })?;
        if !output.status.success() {
            return Err(BackendError::Request(format!(
                "{} merge failed: {}",
                self.merge_tool,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let manifest_path = self.manifest_path(deployment);
        tokio::fs::write(&manifest_path, &output.stdout).await?;
        debug!(path = %manifest_path.display(), "Deployment manifest rendered");
        Ok(manifest_path)
    }
}

/// Extract the task id from a director `Location` header (`.../tasks/<id>`).
fn task_id_from_location(location: &str) -> Option<u64> {
    location.rsplit('/').next()?.parse().ok()
}

#[async_trait]
impl Backend for BoshBackend {
    fn backend_type(&self) -> &'static str {
        "bosh"
    }

    async fn create_instance(&self, options: &CreateOptions) -> Result<String> {
        let info: DirectorInfo = self.get_json("/info").await?;

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let deployment = format!("cb-{}", &suffix[..10]);
        let instances = requested_instances(options.parameters.as_ref());

        let manifest_path = self
            .render_manifest(&deployment, &info.uuid, instances)
            .await?;
        let manifest = tokio::fs::read(&manifest_path).await?;

        let response = self
            .director(Method::POST, "/deployments")
            .header(reqwest::header::CONTENT_TYPE, "text/yaml")
            .body(manifest)
            .send()
            .await
            .map_err(|e| BackendError::Request(format!("POST /deployments: {}", e)))?;

        if response.status() != StatusCode::FOUND {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let body = body.trim();
            return Err(BackendError::Request(format!(
                "POST /deployments answered {}: {}",
                status, body
            )));
        }
        let task_id = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(task_id_from_location)
            .ok_or_else(|| {
                BackendError::Request("deploy redirect carries no task id".to_string())
            })?;

        self.tasks.lock().await.insert(deployment.clone(), task_id);
        info!(
            instance_id = %options.instance_id,
            deployment = %deployment,
            task_id,
            instances,
            "BOSH deployment submitted"
        );
        Ok(deployment)
    }

    async fn delete_instance(&self, internal_id: &str) -> Result<()> {
        let path = format!("/deployments/{}", internal_id);
        let response = self
            .director(Method::DELETE, &path)
            .send()
            .await
            .map_err(|e| BackendError::Request(format!("DELETE {}: {}", path, e)))?;

        let status = response.status();
        if !(status.is_success() || status == StatusCode::FOUND) {
            return Err(BackendError::Request(format!(
                "failed to delete deployment {}: {}",
                internal_id, status
            )));
        }

        self.tasks.lock().await.remove(internal_id);
        let manifest_path = self.manifest_path(internal_id);
        if let Err(e) = tokio::fs::remove_file(&manifest_path).await {
            warn!(
                path = %manifest_path.display(),
                error = %e,
                "Could not remove deployment manifest"
            );
        }
        info!(deployment = %internal_id, "BOSH deployment deleted");
        Ok(())
    }

    async fn instance_state(&self, internal_id: &str) -> Result<InstanceState> {
        // Without a remembered task the deployment is assumed settled.
        let Some(task_id) = self.task_of(internal_id).await else {
            return Ok(InstanceState::Succeeded);
        };
        let status: TaskStatus = self.get_json(&format!("/tasks/{}", task_id)).await?;
        debug!(deployment = %internal_id, task_id, state = %status.state, "BOSH task state");
        Ok(task_state(&status.state))
    }

    async fn issue_credentials(&self, internal_id: &str) -> Result<Credential> {
        match self.instance_state(internal_id).await? {
            InstanceState::Succeeded => {}
            InstanceState::Failed => {
                return Err(BackendError::Request(format!(
                    "deployment {} failed",
                    internal_id
                )));
            }
            _ => return Err(BackendError::NotReady(internal_id.to_string())),
        }

        let vms: Vec<DeploymentVm> = self
            .get_json(&format!("/deployments/{}/vms", internal_id))
            .await?;
        let ips: Vec<String> = vms
            .into_iter()
            .filter_map(|vm| vm.ips.into_iter().next())
            .collect();
        let Some(first) = ips.first() else {
            return Err(BackendError::NotReady(internal_id.to_string()));
        };

        // One credential shared by every node of the cluster.
        let shared = self.admin.generate_credential(first);
        let mut credential = None;
        for ip in &ips {
            let configured = self.admin.configure_node(ip, &shared).await?;
            if credential.is_none() {
                credential = Some(configured);
            }
        }
        if ips.len() > 1 {
            self.admin.join_cluster(&ips, &shared).await?;
        }

        info!(deployment = %internal_id, nodes = ips.len(), "BOSH deployment configured");
        credential.ok_or_else(|| BackendError::NotReady(internal_id.to_string()))
    }

    async fn revoke_credentials(&self, internal_id: &str, binding_id: &str) -> Result<()> {
        debug!(deployment = %internal_id, binding_id = %binding_id, "Nothing to revoke");
        Ok(())
    }

    fn set_catalog(&self, catalog: Catalog) {
        self.catalog.set(catalog);
    }

    fn catalog(&self) -> Option<Catalog> {
        self.catalog.get()
    }
}
