// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background reconciliation of newly created instances.
//!
//! One task per creation request. The task waits for the backend to report
//! the resource configurable, has the adapter issue credentials, and records
//! the outcome on the instance. Backend errors during polling only delay the
//! task; exhausting the time budget marks the instance failed.
//!
//! Each task is bound to the instance generation it was started for. If the
//! instance is deleted, or re-created under the same identifier, the task
//! stops and its result is discarded.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::BackendError;
use crate::controller::{ReconcileTarget, Shared};
use crate::model::Credential;
use crate::retry::retry_until_deadline;

/// Outcome of a single reconciliation attempt that ends the task.
enum Settled {
    /// The instance is configured with these credentials.
    Configured(Credential),
    /// The instance record went away or was replaced.
    Abandoned,
    /// The instance was marked failed by a status read.
    Failed,
}

/// Reconciliation task for one instance generation.
pub(crate) struct Reconciler {
    shared: Arc<Shared>,
    instance_id: String,
    internal_id: String,
    generation: u64,
}

impl Reconciler {
    pub(crate) fn new(
        shared: Arc<Shared>,
        instance_id: String,
        internal_id: String,
        generation: u64,
    ) -> Self {
        Self {
            shared,
            instance_id,
            internal_id,
            generation,
        }
    }

    /// Start the task. The handle may be dropped; the task runs detached.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        let policy = self.shared.reconcile_policy.clone();
        debug!(
            instance_id = %self.instance_id,
            internal_id = %self.internal_id,
            generation = self.generation,
            budget_secs = policy.budget.as_secs(),
            "Reconciliation started"
        );

        match retry_until_deadline(&policy, |attempt| self.attempt(attempt)).await {
            Ok(Settled::Configured(credential)) => {
                self.shared
                    .complete_reconciliation(&self.instance_id, self.generation, credential)
                    .await;
            }
            Ok(Settled::Abandoned) => {
                info!(
                    instance_id = %self.instance_id,
                    generation = self.generation,
                    "Instance removed or replaced; reconciliation abandoned"
                );
            }
            Ok(Settled::Failed) => {
                info!(
                    instance_id = %self.instance_id,
                    generation = self.generation,
                    "Instance already failed; reconciliation stopped"
                );
            }
            Err(exhausted) => {
                let reason = exhausted
                    .last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                let message = format!(
                    "failed to configure service instance within {}s after {} attempts: {}",
                    exhausted.waited.as_secs(),
                    exhausted.attempts,
                    reason
                );
                self.shared
                    .fail_reconciliation(&self.instance_id, self.generation, message)
                    .await;
            }
        }
    }

    async fn attempt(&self, attempt: u32) -> Result<Settled, BackendError> {
        match self
            .shared
            .reconcile_target(&self.instance_id, self.generation)
            .await
        {
            ReconcileTarget::Gone => return Ok(Settled::Abandoned),
            ReconcileTarget::Failed => return Ok(Settled::Failed),
            ReconcileTarget::Configured(credential) => {
                return Ok(Settled::Configured(credential));
            }
            ReconcileTarget::Pending => {}
        }

        let ready = self
            .shared
            .backend
            .probe_readiness(&self.internal_id)
            .await
            .inspect_err(|e| self.log_retry(attempt, e))?;
        if !ready {
            let e = BackendError::NotReady(self.internal_id.clone());
            self.log_retry(attempt, &e);
            return Err(e);
        }

        let credential = self
            .shared
            .backend
            .issue_credentials(&self.internal_id)
            .await
            .inspect_err(|e| self.log_retry(attempt, e))?;

        info!(
            instance_id = %self.instance_id,
            internal_id = %self.internal_id,
            address = %credential.uri,
            attempt,
            "Instance appears to be ready"
        );
        Ok(Settled::Configured(credential))
    }

    fn log_retry(&self, attempt: u32, error: &BackendError) {
        match error {
            BackendError::NotReady(_) => debug!(
                instance_id = %self.instance_id,
                attempt,
                "Instance not ready yet"
            ),
            _ => warn!(
                instance_id = %self.instance_id,
                internal_id = %self.internal_id,
                attempt,
                error = %error,
                "Reconciliation attempt failed; will retry"
            ),
        }
    }
}
