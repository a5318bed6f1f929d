// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for couchbroker.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Infrastructure the broker provisions on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Single-node containers on a Docker engine.
    Docker,
    /// Clustered VM deployments through a BOSH director.
    Bosh,
}

impl BackendKind {
    /// Parse a backend name (case-insensitive).
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "bosh" | "bosh-lite" => Ok(Self::Bosh),
            _ => Err(ConfigError::UnknownBackend(name.to_string())),
        }
    }

    /// Catalog file shipped for this backend.
    pub fn catalog_file_name(&self) -> &'static str {
        match self {
            Self::Docker => "catalog.Docker.json",
            Self::Bosh => "catalog.bosh-lite.json",
        }
    }
}

/// Broker configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Basic-auth user expected on every request
    pub rest_user: String,
    /// Basic-auth password expected on every request
    pub rest_password: String,
    /// HTTP listen address
    pub bind_addr: SocketAddr,
    /// Selected backend
    pub backend: BackendKind,
    /// Directory holding the persisted instance and binding maps
    pub data_dir: PathBuf,
    /// Directory holding catalog files
    pub catalog_dir: PathBuf,
    /// Instance map file name inside `data_dir`
    pub instances_file: String,
    /// Binding map file name inside `data_dir`
    pub bindings_file: String,
    /// BOSH director options file
    pub bosh_config_path: PathBuf,
    /// Docker engine endpoint (`DOCKER_HOST`)
    pub docker_host: Option<String>,
    /// Docker TLS material directory (`DOCKER_CERT_PATH`)
    pub docker_cert_path: Option<PathBuf>,
    /// Time budget for configuring a new instance
    pub reconcile_budget: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("rest_user", &self.rest_user)
            .field("rest_password", &"<redacted>")
            .field("bind_addr", &self.bind_addr)
            .field("backend", &self.backend)
            .field("data_dir", &self.data_dir)
            .field("catalog_dir", &self.catalog_dir)
            .field("instances_file", &self.instances_file)
            .field("bindings_file", &self.bindings_file)
            .field("bosh_config_path", &self.bosh_config_path)
            .field("docker_host", &self.docker_host)
            .field("docker_cert_path", &self.docker_cert_path)
            .field("reconcile_budget", &self.reconcile_budget)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let required = |key: &'static str| var(key).ok_or(ConfigError::MissingEnvVar(key));
        let var_or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let rest_user = required("COUCHBROKER_REST_USER")?;
        let rest_password = required("COUCHBROKER_REST_PASSWORD")?;

        // PORT is set by the platform and wins over our own variable
        let port: u16 = var("PORT")
            .or_else(|| var("COUCHBROKER_PORT"))
            .unwrap_or_else(|| "9000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;
        let bind_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let backend = BackendKind::parse(&var_or("COUCHBROKER_BACKEND", "bosh"))?;

        let data_dir = PathBuf::from(var_or("COUCHBROKER_DATA_DIR", ".data"));
        let catalog_dir = PathBuf::from(var_or("COUCHBROKER_CATALOG_DIR", "assets"));
        let instances_file = var_or("COUCHBROKER_INSTANCES_FILE", "service_instances.json");
        let bindings_file = var_or("COUCHBROKER_BINDINGS_FILE", "service_bindings.json");
        let bosh_config_path =
            PathBuf::from(var_or("COUCHBROKER_BOSH_CONFIG", "assets/boshconfig.json"));

        let key = "COUCHBROKER_RECONCILE_BUDGET_SECS";
        let reconcile_budget = match var(key) {
            Some(v) => {
                let secs = v.parse().map_err(|_| ConfigError::InvalidValue(key, v))?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(300),
        };

        Ok(Self {
            rest_user,
            rest_password,
            bind_addr,
            backend,
            data_dir,
            catalog_dir,
            instances_file,
            bindings_file,
            bosh_config_path,
            docker_host: var("DOCKER_HOST"),
            docker_cert_path: var("DOCKER_CERT_PATH").map(PathBuf::from),
            reconcile_budget,
        })
    }

    /// Catalog file for the selected backend.
    pub fn catalog_path(&self) -> PathBuf {
        self.catalog_dir.join(self.backend.catalog_file_name())
    }
}

/// BOSH director options, read from a JSON file.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BoshConfig {
    /// Director base URL
    pub director_url: String,
    /// Director user
    pub director_user: String,
    /// Director password
    pub director_password: String,
    /// Directory holding the manifest template files
    pub template_dir: PathBuf,
    /// Directory rendered manifests are written to
    pub data_dir: PathBuf,
}

impl Default for BoshConfig {
    fn default() -> Self {
        Self {
            director_url: "https://localhost:25555".to_string(),
            director_user: "user".to_string(),
            director_password: "password".to_string(),
            template_dir: PathBuf::from("assets/bosh-templates"),
            data_dir: PathBuf::from(".data/deployments"),
        }
    }
}

impl std::fmt::Debug for BoshConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoshConfig")
            .field("director_url", &self.director_url)
            .field("director_user", &self.director_user)
            .field("director_password", &"<redacted>")
            .field("template_dir", &self.template_dir)
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

impl BoshConfig {
    /// Load director options from `path`.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "BOSH config file not found; using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::File {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                });
            }
        };
        serde_json::from_str(&contents).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A variable holds a value that cannot be parsed.
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
    /// The backend name is not recognized.
    #[error("Unknown backend: {0} (expected docker or bosh)")]
    UnknownBackend(String),
    /// A configuration file could not be read or parsed.
    #[error("Invalid configuration file {path}: {message}")]
    File {
        /// File path
        path: PathBuf,
        /// What went wrong
        message: String,
    },
}
