// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Couchbase admin API client.
//!
//! Shared by both adapters: a fresh node answers its admin API with the
//! factory credentials; configuring it sets quotas and services, replaces the
//! admin user, and creates the application bucket. Nodes of a multi-node
//! deployment are then joined into one cluster and rebalanced.

use std::time::Duration;

use couchbroker_core::{BackendError, Credential};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

/// Services enabled on every node.
const SERVICES: &str = "kv,index,n1ql";

/// Result of probing a node's admin API with the factory credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryProbe {
    /// The factory credentials work: the node is up and unconfigured.
    Accepted,
    /// The factory credentials were rejected: the node was configured already.
    Rejected,
    /// The admin API answered with some other status.
    Other(u16),
    /// The admin API could not be reached.
    Unreachable,
}

/// Couchbase node settings applied during configuration.
#[derive(Debug, Clone)]
pub struct CouchbaseSettings {
    /// Factory admin user of a fresh node.
    pub admin_user: String,
    /// Factory admin password of a fresh node.
    pub admin_password: String,
    /// Data service memory quota (MB).
    pub ram_quota_mb: u32,
    /// Index service memory quota (MB).
    pub index_ram_quota_mb: u32,
    /// Admin API port.
    pub port: u16,
    /// Application bucket name.
    pub bucket_name: String,
    /// Application bucket quota (MB).
    pub bucket_ram_quota_mb: u32,
}

impl Default for CouchbaseSettings {
    fn default() -> Self {
        Self {
            admin_user: "Administrator".to_string(),
            admin_password: "password".to_string(),
            ram_quota_mb: 768,
            index_ram_quota_mb: 256,
            port: 8091,
            bucket_name: "cfdefault".to_string(),
            bucket_ram_quota_mb: 768,
        }
    }
}

/// Client for the Couchbase admin REST API.
#[derive(Debug, Clone)]
pub struct CouchbaseAdmin {
    http: reqwest::Client,
    settings: CouchbaseSettings,
}

impl CouchbaseAdmin {
    /// Create a client with default node settings.
    pub fn new() -> Result<Self, BackendError> {
        Self::with_settings(CouchbaseSettings::default())
    }

    /// Create a client with custom node settings.
    pub fn with_settings(settings: CouchbaseSettings) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| BackendError::Config(format!("couchbase http client: {}", e)))?;
        Ok(Self { http, settings })
    }

    /// Node settings in use.
    pub fn settings(&self) -> &CouchbaseSettings {
        &self.settings
    }

    /// Admin API base address of the node at `ip`.
    pub fn admin_url(&self, ip: &str) -> String {
        format!("http://{}:{}", ip, self.settings.port)
    }

    /// Generate a fresh admin user, admin password, and bucket password.
    pub fn generate_credential(&self, ip: &str) -> Credential {
        Credential {
            uri: self.admin_url(ip),
            username: uuid::Uuid::new_v4().simple().to_string(),
            password: uuid::Uuid::new_v4().simple().to_string(),
            sasl_password: uuid::Uuid::new_v4().simple().to_string(),
            bucket_name: self.settings.bucket_name.clone(),
        }
    }

    /// Probe the node at `ip` with the factory credentials.
    pub async fn probe_factory(&self, ip: &str) -> FactoryProbe {
        let url = format!("{}/pools/default", self.admin_url(ip));
        let factory = (&self.settings.admin_user, &self.settings.admin_password);
        let response = self
            .http
            .get(&url)
            .basic_auth(factory.0, Some(factory.1))
            .send()
            .await;

        match response {
            Ok(r) if r.status() == StatusCode::OK => FactoryProbe::Accepted,
            Ok(r) if r.status() == StatusCode::UNAUTHORIZED => FactoryProbe::Rejected,
            Ok(r) => FactoryProbe::Other(r.status().as_u16()),
            Err(e) => {
                debug!(ip = %ip, error = %e, "Admin API unreachable");
                FactoryProbe::Unreachable
            }
        }
    }

    /// Configure a fresh node at `ip` so that it answers to `credential`.
    ///
    /// Returns `credential` with its address pointing at this node.
    pub async fn configure_node(
        &self,
        ip: &str,
        credential: &Credential,
    ) -> Result<Credential, BackendError> {
        let base = self.admin_url(ip);
        let factory = (&self.settings.admin_user, &self.settings.admin_password);

        self.post_form(
            "memory quota",
            &format!("{}/pools/default", base),
            factory,
            &[("memoryQuota", self.settings.ram_quota_mb.to_string())],
        )
        .await?;

        let index_quota = self.settings.index_ram_quota_mb.to_string();
        self.post_form(
            "index memory quota",
            &format!("{}/pools/default", base),
            factory,
            &[("indexMemoryQuota", index_quota)],
        )
        .await?;

        self.post_form(
            "setup services",
            &format!("{}/node/controller/setupServices", base),
            factory,
            &[("services", SERVICES.to_string())],
        )
        .await?;

        self.post_form(
            "admin credentials",
            &format!("{}/settings/web", base),
            factory,
            &[
                ("username", credential.username.clone()),
                ("password", credential.password.clone()),
                ("port", self.settings.port.to_string()),
            ],
        )
        .await?;

        self.post_form(
            "create bucket",
            &format!("{}/pools/default/buckets", base),
            (&credential.username, &credential.password),
            &[
                ("name", credential.bucket_name.clone()),
                ("bucketType", "couchbase".to_string()),
                ("ramQuotaMB", self.settings.bucket_ram_quota_mb.to_string()),
                ("authType", "sasl".to_string()),
                ("saslPassword", credential.sasl_password.clone()),
            ],
        )
        .await?;

        info!(ip = %ip, username = %credential.username, "Couchbase node configured");
        Ok(Credential {
            uri: base,
            ..credential.clone()
        })
    }

    /// Join every node in `ips` to the cluster led by the first one, then rebalance.
    pub async fn join_cluster(
        &self,
        ips: &[String],
        credential: &Credential,
    ) -> Result<(), BackendError> {
        let Some((leader, others)) = ips.split_first() else {
            return Ok(());
        };
        let base = self.admin_url(leader);
        let auth = (&credential.username, &credential.password);

        for ip in others {
            let response = self
                .http
                .post(format!("{}/controller/addNode", base))
                .basic_auth(auth.0, Some(auth.1))
                .form(&[
                    ("hostname", ip.as_str()),
                    ("user", credential.username.as_str()),
                    ("password", credential.password.as_str()),
                    ("services", SERVICES),
                ])
                .send()
                .await
                .map_err(|e| BackendError::Request(format!("addNode {}: {}", ip, e)))?;

            match response.status() {
                StatusCode::OK => debug!(leader = %leader, node = %ip, "Node added"),
                // Already a member.
                StatusCode::BAD_REQUEST => {
                    warn!(leader = %leader, node = %ip, "addNode answered 400; ignoring")
                }
                status => {
                    return Err(BackendError::Request(format!(
                        "addNode {} answered {}",
                        ip, status
                    )));
                }
            }
        }

        let nodes = ips
            .iter()
            .map(|ip| format!("ns_1@{}", ip))
            .collect::<Vec<_>>()
            .join(",");
        let response = self
            .http
            .post(format!("{}/controller/rebalance", base))
            .basic_auth(auth.0, Some(auth.1))
            .form(&[("ejectedNodes", ""), ("knownNodes", nodes.as_str())])
            .send()
            .await
            .map_err(|e| BackendError::Request(format!("rebalance: {}", e)))?;
        if response.status() != StatusCode::OK {
            return Err(BackendError::Request(format!(
                "rebalance answered {}",
                response.status()
            )));
        }

        info!(leader = %leader, nodes = ips.len(), "Couchbase cluster rebalanced");
        Ok(())
    }

    async fn post_form(
        &self,
        step: &str,
        url: &str,
        auth: (&String, &String),
        form: &[(&str, String)],
    ) -> Result<(), BackendError> {
        let response = self
            .http
            .post(url)
            .basic_auth(auth.0, Some(auth.1))
            .form(form)
            .send()
            .await
            .map_err(|e| BackendError::Request(format!("{}: {}", step, e)))?;

        match response.status() {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err(BackendError::Request(format!(
                    "{} answered {}: {}",
                    step, status, body
                )))
            }
            status => {
                debug!(step, status = %status, "Couchbase admin step done");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::{Request, State};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::any;

    /// Fake Couchbase admin API recording every request line and body.
    #[derive(Clone, Default)]
    pub(crate) struct FakeAdmin {
        pub(crate) requests: Arc<Mutex<Vec<(String, String)>>>,
        pub(crate) configured: Arc<Mutex<bool>>,
        pub(crate) add_node_status: u16,
    }

    async fn handle(State(fake): State<FakeAdmin>, request: Request) -> AxumStatus {
        let path = request.uri().path().to_string();
        let method = request.method().to_string();
        let body = axum::body::to_bytes(request.into_body(), 64 * 1024)
            .await
            .unwrap_or_default();
        let body = String::from_utf8_lossy(&body).to_string();
        fake.requests
            .lock()
            .unwrap()
            .push((format!("{} {}", method, path), body));

        match (method.as_str(), path.as_str()) {
            ("GET", "/pools/default") => {
                if *fake.configured.lock().unwrap() {
                    AxumStatus::UNAUTHORIZED
                } else {
                    AxumStatus::OK
                }
            }
            ("POST", "/settings/web") => {
                *fake.configured.lock().unwrap() = true;
                AxumStatus::OK
            }
            ("POST", "/controller/addNode") => {
                AxumStatus::from_u16(fake.add_node_status).unwrap_or(AxumStatus::OK)
            }
            _ => AxumStatus::OK,
        }
    }

    /// Serve `fake` on an ephemeral local port.
    pub(crate) async fn serve_fake_admin(fake: FakeAdmin) -> SocketAddr {
        let app = Router::new()
            .route("/{*path}", any(handle))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    pub(crate) fn admin_for(addr: SocketAddr) -> CouchbaseAdmin {
        CouchbaseAdmin::with_settings(CouchbaseSettings {
            port: addr.port(),
            ..CouchbaseSettings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_configure_node_sequence() {
        let fake = FakeAdmin {
            add_node_status: 200,
            ..Default::default()
        };
        let addr = serve_fake_admin(fake.clone()).await;
        let admin = admin_for(addr);

        assert_eq!(
            admin.probe_factory("127.0.0.1").await,
            FactoryProbe::Accepted
        );

        let generated = admin.generate_credential("127.0.0.1");
        let credential = admin.configure_node("127.0.0.1", &generated).await.unwrap();
        assert_eq!(credential.uri, format!("http://127.0.0.1:{}", addr.port()));
        assert_eq!(credential.bucket_name, "cfdefault");
        assert_eq!(credential.username.len(), 32);

        let requests = fake.requests.lock().unwrap().clone();
        let lines: Vec<&str> = requests.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(
            lines,
            vec![
                "GET /pools/default",
                "POST /pools/default",
                "POST /pools/default",
                "POST /node/controller/setupServices",
                "POST /settings/web",
                "POST /pools/default/buckets",
            ]
        );
        assert_eq!(requests[1].1, "memoryQuota=768");
        assert_eq!(requests[2].1, "indexMemoryQuota=256");
        assert_eq!(requests[3].1, "services=kv%2Cindex%2Cn1ql");
        assert!(requests[5].1.contains("name=cfdefault"));
        assert!(requests[5].1.contains("authType=sasl"));

        assert_eq!(
            admin.probe_factory("127.0.0.1").await,
            FactoryProbe::Rejected
        );
    }

    #[tokio::test]
    async fn test_join_cluster_tolerates_existing_members() {
        let fake = FakeAdmin {
            add_node_status: 400,
            ..Default::default()
        };
        let addr = serve_fake_admin(fake.clone()).await;
        let admin = admin_for(addr);
        let credential = admin.generate_credential("127.0.0.1");

        let ips = vec![
            "127.0.0.1".to_string(),
            "10.244.0.3".to_string(),
            "10.244.0.4".to_string(),
        ];
        admin.join_cluster(&ips, &credential).await.unwrap();

        let requests = fake.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].1.contains("hostname=10.244.0.3"));
        assert_eq!(requests[2].0, "POST /controller/rebalance");
        assert_eq!(
            requests[2].1,
            "ejectedNodes=&knownNodes=ns_1%40127.0.0.1%2Cns_1%4010.244.0.3%2Cns_1%4010.244.0.4"
        );
    }

    #[tokio::test]
    async fn test_join_cluster_rejects_unexpected_status() {
        let fake = FakeAdmin {
            add_node_status: 500,
            ..Default::default()
        };
        let addr = serve_fake_admin(fake).await;
        let admin = admin_for(addr);
        let credential = admin.generate_credential("127.0.0.1");

        let ips = vec!["127.0.0.1".to_string(), "10.244.0.3".to_string()];
        assert!(matches!(
            admin.join_cluster(&ips, &credential).await,
            Err(BackendError::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let admin = CouchbaseAdmin::with_settings(CouchbaseSettings {
            port,
            ..CouchbaseSettings::default()
        })
        .unwrap();
        assert_eq!(
            admin.probe_factory("127.0.0.1").await,
            FactoryProbe::Unreachable
        );
    }
}
