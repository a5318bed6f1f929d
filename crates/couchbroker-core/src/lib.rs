// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Couchbroker Core - Instance and Binding Lifecycle
//!
//! This crate holds the part of the broker that does not depend on any
//! particular infrastructure: the instance/binding records, the lifecycle
//! controller that owns them, background reconciliation of new instances,
//! and persistence of both maps.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 couchbroker-server (HTTP, adapters)              │
//! └──────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    LifecycleController                           │
//! │   instances ─┐                                                   │
//! │   bindings  ─┼── one async mutex ──► Store::save after mutation  │
//! │   generation┘                                                    │
//! └──────────────────────────────────────────────────────────────────┘
//!          │ spawn per create                     │ create/delete/
//!          ▼                                      │ state/issue/revoke
//! ┌──────────────────┐                            ▼
//! │    Reconciler    │───── probe/issue ──►  dyn Backend
//! │ (retry + budget) │
//! └──────────────────┘
//! ```
//!
//! # Instance Status
//!
//! ```text
//!      create
//!        │
//!        ▼
//!  ┌─────────────┐  credentials issued   ┌───────────┐
//!  │ in progress │──────────────────────►│ succeeded │
//!  └──────┬──────┘                       └───────────┘
//!         │ budget exhausted /
//!         │ backend reports failure
//!         ▼
//!    ┌────────┐
//!    │ failed │  (sticky)
//!    └────────┘
//! ```
//!
//! # Modules
//!
//! - [`backend`]: Backend adapter contract and a mock adapter
//! - [`catalog`]: Plan catalog types and loading
//! - [`controller`]: The lifecycle controller
//! - [`error`]: Error types for controller operations
//! - [`model`]: Instance, binding, and credential records
//! - [`persistence`]: Map stores (JSON file, in-memory)
//! - [`retry`]: Retry-until-deadline policy

#![deny(missing_docs)]

/// Backend adapter contract.
pub mod backend;

/// Plan catalog.
pub mod catalog;

/// Instance and binding lifecycle controller.
pub mod controller;

/// Error types for controller operations.
pub mod error;

/// Instance, binding, and credential records.
pub mod model;

/// Persistence of the instance and binding maps.
pub mod persistence;

/// Retry policy used by reconciliation.
pub mod retry;

mod reconciler;

pub use backend::{Backend, BackendError, CreateOptions, InstanceState, MockBackend};
pub use catalog::{Catalog, CatalogError};
pub use controller::{LifecycleController, LifecycleControllerBuilder, UnbindOutcome};
pub use error::{BrokerError, Result};
pub use model::{
    Credential, LastOperation, OperationState, ProvisionRequest, ServiceBinding, ServiceInstance,
};
pub use persistence::{JsonFileStore, MemoryStore, PersistenceError, Store};
pub use retry::RetryPolicy;
