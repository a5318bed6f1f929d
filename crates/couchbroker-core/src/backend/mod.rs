// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend adapter module - infrastructure providers hosting the databases.
//!
//! Concrete container-engine and VM-orchestrator adapters live in
//! `couchbroker-server`; this module holds the contract and a mock.

pub mod mock;
mod traits;

pub use mock::MockBackend;
pub use traits::*;
