// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Couchbroker Server - Service Broker HTTP API
//!
//! This crate exposes the lifecycle controller from `couchbroker-core` as a
//! service-broker REST API and provides the infrastructure adapters it
//! provisions Couchbase on.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Platform (cloud controller)                  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │ HTTP + basic auth
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                couchbroker-server (This Crate)                  │
//! │   ┌──────────┐   ┌──────────────────────┐   ┌───────────────┐   │
//! │   │  server  │──►│ LifecycleController  │──►│   backends    │   │
//! │   │  (axum)  │   │  (couchbroker-core)  │   │ docker / bosh │   │
//! │   └──────────┘   └──────────────────────┘   └───────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                                      │
//!                          ┌───────────────────────────┼──────────┐
//!                          ▼                           ▼          ▼
//!                  ┌───────────────┐        ┌──────────────┐  ┌─────────┐
//!                  │ Docker engine │        │ BOSH director│  │Couchbase│
//!                  └───────────────┘        └──────────────┘  │ REST API│
//!                                                             └─────────┘
//! ```
//!
//! # HTTP API
//!
//! | Endpoint | Success | Notes |
//! |----------|---------|-------|
//! | `GET /v2/catalog` | 200 | catalog file is re-read on each call |
//! | `PUT /v2/service_instances/{id}` | 202 | provisioning continues in the background |
//! | `GET /v2/service_instances/{id}/last_operation` | 200 | |
//! | `DELETE /v2/service_instances/{id}` | 200 | 410 when unknown |
//! | `PUT .../service_bindings/{bid}` | 201 | idempotent per binding id |
//! | `DELETE .../service_bindings/{bid}` | 200 | 410 when the instance is unknown |
//!
//! # Configuration
//!
//! See [`config::Config`] for the environment variables read at startup.

#![deny(missing_docs)]

/// Infrastructure backend adapters.
pub mod backends;

/// Configuration loaded from environment variables.
pub mod config;

/// Embeddable runtime wiring controller and HTTP server.
pub mod runtime;

/// HTTP routes, handlers, and basic auth.
pub mod server;

pub use config::{BackendKind, BoshConfig, Config, ConfigError};
pub use runtime::{BrokerRuntime, BrokerRuntimeBuilder};
pub use server::{AppState, BasicAuth, router};
