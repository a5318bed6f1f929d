// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the lifecycle controller.

use thiserror::Error;

use crate::backend::BackendError;
use crate::catalog::CatalogError;
use crate::persistence::PersistenceError;

/// Controller errors.
///
/// Each variant corresponds to one class of broker response: unknown
/// records, client mistakes, and backend or persistence failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BrokerError {
    /// The instance (or binding) is not known to the controller.
    #[error("Instance not found: {0}")]
    NotFound(String),

    /// The instance to delete is not known; it is already gone.
    #[error("Instance gone: {0}")]
    Gone(String),

    /// The requested plan is not part of the loaded catalog.
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A backend adapter call failed.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Writing or reading a persisted map failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Loading the plan catalog failed.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Result type using [`BrokerError`].
pub type Result<T> = std::result::Result<T, BrokerError>;
