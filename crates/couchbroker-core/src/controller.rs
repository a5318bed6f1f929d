// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance and binding lifecycle controller.
//!
//! The controller is the single owner of the instance and binding maps. Both
//! maps live behind one async mutex together with the generation counter, and
//! every read-modify-write (including the matching store save) happens under
//! that lock. Backend calls are made with the lock released; results are
//! applied afterwards only if the instance still exists with the same
//! generation.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, CreateOptions, InstanceState};
use crate::catalog::{Catalog, load_catalog};
use crate::error::{BrokerError, Result};
use crate::model::{
    Credential, LastOperation, OperationState, ProvisionRequest, ServiceBinding, ServiceInstance,
};
use crate::persistence::{RecordMap, Store};
use crate::reconciler::Reconciler;
use crate::retry::RetryPolicy;

/// Result of an unbind request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbindOutcome {
    /// Credentials were revoked and the binding record removed.
    Removed,
    /// The instance is unknown; nothing to do.
    AlreadyGone,
}

/// What a reconciliation task should do next.
pub(crate) enum ReconcileTarget {
    /// The instance still needs credentials.
    Pending,
    /// The instance already holds credentials (issued by a bind).
    Configured(Credential),
    /// The instance is gone or belongs to a newer generation.
    Gone,
    /// The instance has been marked failed; it will not be configured.
    Failed,
}

/// Maps owned by the controller.
struct BrokerState {
    instances: RecordMap<ServiceInstance>,
    bindings: RecordMap<ServiceBinding>,
    next_generation: u64,
}

/// State shared between the controller and its reconciliation tasks.
pub(crate) struct Shared {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) reconcile_policy: RetryPolicy,
    instance_store: Arc<dyn Store<ServiceInstance>>,
    binding_store: Arc<dyn Store<ServiceBinding>>,
    catalog_path: Option<PathBuf>,
    state: Mutex<BrokerState>,
}

impl Shared {
    async fn save_instances(&self, state: &BrokerState) -> Result<()> {
        self.instance_store
            .save(&state.instances)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to save instance map"))?;
        Ok(())
    }

    async fn save_bindings(&self, state: &BrokerState) -> Result<()> {
        self.binding_store
            .save(&state.bindings)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to save binding map"))?;
        Ok(())
    }

    pub(crate) async fn reconcile_target(
        &self,
        instance_id: &str,
        generation: u64,
    ) -> ReconcileTarget {
        let state = self.state.lock().await;
        match state.instances.get(instance_id) {
            Some(instance) if instance.generation == generation => {
                if instance.last_operation.state == OperationState::Failed {
                    return ReconcileTarget::Failed;
                }
                match &instance.credentials {
                    Some(credential) => ReconcileTarget::Configured(credential.clone()),
                    None => ReconcileTarget::Pending,
                }
            }
            _ => ReconcileTarget::Gone,
        }
    }

    pub(crate) async fn complete_reconciliation(
        &self,
        instance_id: &str,
        generation: u64,
        credential: Credential,
    ) {
        let mut state = self.state.lock().await;
        let Some(instance) = state
            .instances
            .get_mut(instance_id)
            .filter(|i| i.generation == generation)
        else {
            info!(
                instance_id = %instance_id,
                generation,
                "Instance removed or replaced before configuration finished; discarding result"
            );
            return;
        };
        if instance.last_operation.state == OperationState::Failed {
            info!(
                instance_id = %instance_id,
                generation,
                "Instance marked failed while configuration was running; discarding result"
            );
            return;
        }

        // A bind may have issued credentials while the probe was running.
        let credential = instance.credentials.get_or_insert(credential).clone();
        instance.dashboard_url = credential.uri.clone();
        instance.last_operation =
            LastOperation::succeeded("service instance ready", credential.uri.clone());

        info!(
            instance_id = %instance_id,
            dashboard_url = %credential.uri,
            "Service instance configured"
        );
        if let Err(e) = self.save_instances(&state).await {
            error!(instance_id = %instance_id, error = %e, "Configured instance not persisted");
        }
    }

    pub(crate) async fn fail_reconciliation(
        &self,
        instance_id: &str,
        generation: u64,
        message: String,
    ) {
        let mut state = self.state.lock().await;
        let Some(instance) = state
            .instances
            .get_mut(instance_id)
            .filter(|i| i.generation == generation)
        else {
            info!(
                instance_id = %instance_id,
                generation,
                "Instance removed or replaced before reconciliation gave up; discarding result"
            );
            return;
        };

        warn!(instance_id = %instance_id, reason = %message, "Service instance failed");
        instance.last_operation = LastOperation::failed(message);
        if let Err(e) = self.save_instances(&state).await {
            error!(instance_id = %instance_id, error = %e, "Failed instance not persisted");
        }
    }
}

/// Builder for a [`LifecycleController`].
pub struct LifecycleControllerBuilder {
    backend: Option<Arc<dyn Backend>>,
    instance_store: Option<Arc<dyn Store<ServiceInstance>>>,
    binding_store: Option<Arc<dyn Store<ServiceBinding>>>,
    catalog_path: Option<PathBuf>,
    reconcile_policy: RetryPolicy,
}

impl Default for LifecycleControllerBuilder {
    fn default() -> Self {
        Self {
            backend: None,
            instance_store: None,
            binding_store: None,
            catalog_path: None,
            reconcile_policy: RetryPolicy::default(),
        }
    }
}

impl LifecycleControllerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend adapter (required).
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the instance map store (required).
    pub fn instance_store(mut self, store: Arc<dyn Store<ServiceInstance>>) -> Self {
        self.instance_store = Some(store);
        self
    }

    /// Set the binding map store (required).
    pub fn binding_store(mut self, store: Arc<dyn Store<ServiceBinding>>) -> Self {
        self.binding_store = Some(store);
        self
    }

    /// Set the catalog file used by [`LifecycleController::reload_catalog`].
    ///
    /// Without a path the catalog installed on the backend is used as is.
    pub fn catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    /// Set the reconciliation retry policy.
    ///
    /// Default: [`RetryPolicy::default`]
    pub fn reconcile_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconcile_policy = policy;
        self
    }

    /// Load both persisted maps and build the controller.
    pub async fn build(self) -> Result<LifecycleController> {
        let backend = self
            .backend
            .ok_or_else(|| BrokerError::InvalidRequest("backend is required".to_string()))?;
        let instance_store = self
            .instance_store
            .ok_or_else(|| BrokerError::InvalidRequest("instance_store is required".to_string()))?;
        let binding_store = self
            .binding_store
            .ok_or_else(|| BrokerError::InvalidRequest("binding_store is required".to_string()))?;

        let instances = instance_store.load().await?;
        let bindings = binding_store.load().await?;
        let next_generation = instances
            .values()
            .map(|i| i.generation)
            .max()
            .map_or(1, |g| g + 1);

        info!(
            backend = backend.backend_type(),
            instances = instances.len(),
            bindings = bindings.len(),
            "Lifecycle controller loaded persisted state"
        );

        Ok(LifecycleController {
            shared: Arc::new(Shared {
                backend,
                reconcile_policy: self.reconcile_policy,
                instance_store,
                binding_store,
                catalog_path: self.catalog_path,
                state: Mutex::new(BrokerState {
                    instances,
                    bindings,
                    next_generation,
                }),
            }),
        })
    }
}

/// Single authority over the instance and binding maps.
///
/// Cheap to clone; clones share the same maps.
#[derive(Clone)]
pub struct LifecycleController {
    shared: Arc<Shared>,
}

impl LifecycleController {
    /// Create a new builder for configuring the controller.
    pub fn builder() -> LifecycleControllerBuilder {
        LifecycleControllerBuilder::new()
    }

    /// The backend adapter this controller drives.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.shared.backend
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Re-read the catalog file and install it on the backend.
    pub async fn reload_catalog(&self) -> Result<Catalog> {
        let Some(path) = &self.shared.catalog_path else {
            return Ok(self.catalog());
        };
        let catalog = load_catalog(path).await?;
        debug!(path = %path.display(), services = catalog.services.len(), "Catalog loaded");
        self.shared.backend.set_catalog(catalog.clone());
        Ok(catalog)
    }

    /// Catalog currently installed on the backend.
    pub fn catalog(&self) -> Catalog {
        self.shared.backend.catalog().unwrap_or_default()
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// Provision a new instance.
    ///
    /// Returns as soon as the backend has accepted the create call and the
    /// instance is recorded as in progress. Configuration continues in a
    /// background reconciliation task.
    pub async fn create_instance(
        &self,
        instance_id: &str,
        request: ProvisionRequest,
    ) -> Result<LastOperation> {
        if !self.shared.backend.is_valid_plan(&request.plan_id) {
            warn!(
                instance_id = %instance_id,
                plan_id = %request.plan_id,
                "Requested plan not found"
            );
            return Err(BrokerError::InvalidPlan(request.plan_id));
        }

        let options = CreateOptions {
            instance_id: instance_id.to_string(),
            plan_id: request.plan_id.clone(),
            parameters: request.parameters.clone(),
        };
        let internal_id = self
            .shared
            .backend
            .create_instance(&options)
            .await
            .inspect_err(|e| {
                error!(instance_id = %instance_id, error = %e, "Backend failed to create instance")
            })?;

        let mut state = self.shared.state.lock().await;
        let generation = state.next_generation;
        state.next_generation += 1;

        let instance =
            ServiceInstance::provisioning(instance_id, &internal_id, request, generation);
        let last_operation = instance.last_operation.clone();
        let previous = state.instances.insert(instance_id.to_string(), instance);
        if previous.is_some() {
            warn!(instance_id = %instance_id, "Replacing existing instance record");
        }

        info!(
            instance_id = %instance_id,
            internal_id = %internal_id,
            generation,
            "Service instance accepted"
        );

        let saved = self.shared.save_instances(&state).await;
        drop(state);

        // The record is live in memory either way, so it gets a task either way.
        Reconciler::new(
            self.shared.clone(),
            instance_id.to_string(),
            internal_id,
            generation,
        )
        .spawn();

        saved.map(|_| last_operation)
    }

    /// Current provisioning status of an instance.
    ///
    /// Consults the backend and records the observed state. Every read persists
    /// the instance map. A failed instance stays failed without consulting the
    /// backend, and its reconciliation task stops at its next attempt.
    pub async fn get_instance_status(&self, instance_id: &str) -> Result<LastOperation> {
        let (internal_id, generation) = {
            let state = self.shared.state.lock().await;
            let instance = state
                .instances
                .get(instance_id)
                .ok_or_else(|| BrokerError::NotFound(instance_id.to_string()))?;
            if instance.last_operation.state == OperationState::Failed {
                let last_operation = instance.last_operation.clone();
                self.shared.save_instances(&state).await?;
                return Ok(last_operation);
            }
            (instance.internal_id.clone(), instance.generation)
        };

        let backend_state = self
            .shared
            .backend
            .instance_state(&internal_id)
            .await
            .inspect_err(|e| {
                error!(instance_id = %instance_id, error = %e, "Backend state query failed")
            })?;
        debug!(instance_id = %instance_id, state = %backend_state, "Backend state");

        let mut state = self.shared.state.lock().await;
        let instance = state
            .instances
            .get_mut(instance_id)
            .filter(|i| i.generation == generation)
            .ok_or_else(|| BrokerError::NotFound(instance_id.to_string()))?;
        if instance.last_operation.state != OperationState::Failed {
            let observed = map_backend_state(backend_state, instance);
            instance.last_operation = observed;
        }
        let last_operation = instance.last_operation.clone();

        self.shared.save_instances(&state).await?;
        Ok(last_operation)
    }

    /// Deprovision an instance and every binding that references it.
    pub async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        let (internal_id, generation) = {
            let state = self.shared.state.lock().await;
            let instance = state
                .instances
                .get(instance_id)
                .ok_or_else(|| BrokerError::Gone(instance_id.to_string()))?;
            (instance.internal_id.clone(), instance.generation)
        };

        self.shared
            .backend
            .delete_instance(&internal_id)
            .await
            .inspect_err(|e| {
                error!(instance_id = %instance_id, error = %e, "Backend failed to delete instance")
            })?;

        let mut state = self.shared.state.lock().await;
        let replaced = state
            .instances
            .get(instance_id)
            .is_some_and(|i| i.generation != generation);
        if replaced {
            warn!(
                instance_id = %instance_id,
                "Instance re-created during delete; keeping new record"
            );
            return Ok(());
        }
        state.instances.remove(instance_id);
        let instances_saved = self.shared.save_instances(&state).await;

        let before = state.bindings.len();
        state
            .bindings
            .retain(|_, b| b.service_instance_id != instance_id);
        let removed = before - state.bindings.len();
        let bindings_saved = self.shared.save_bindings(&state).await;

        info!(
            instance_id = %instance_id,
            bindings_removed = removed,
            "Service instance deleted"
        );
        instances_saved.and(bindings_saved)
    }

    // ========================================================================
    // Bindings
    // ========================================================================

    /// Hand out credentials for a binding.
    ///
    /// Idempotent per binding identifier: a repeated bind returns the stored
    /// credential without touching the backend or the store.
    pub async fn bind(&self, binding_id: &str, instance_id: &str) -> Result<Credential> {
        self.bind_app(binding_id, instance_id, None).await
    }

    /// [`bind`](Self::bind), recording the application the binding is issued for.
    pub async fn bind_app(
        &self,
        binding_id: &str,
        instance_id: &str,
        app_guid: Option<String>,
    ) -> Result<Credential> {
        let (internal_id, generation) = {
            let mut state = self.shared.state.lock().await;
            let instance = state
                .instances
                .get(instance_id)
                .ok_or_else(|| BrokerError::NotFound(instance_id.to_string()))?;

            if let Some(binding) = state.bindings.get(binding_id) {
                debug!(binding_id = %binding_id, "Binding exists; returning stored credential");
                return Ok(binding.credentials.clone());
            }

            if let Some(credential) = instance.credentials.clone() {
                let mut binding =
                    ServiceBinding::for_instance(binding_id, instance, credential.clone());
                binding.app_guid = app_guid;
                state.bindings.insert(binding_id.to_string(), binding);
                info!(
                    binding_id = %binding_id,
                    instance_id = %instance_id,
                    "Binding created from instance credential"
                );
                self.shared.save_bindings(&state).await?;
                return Ok(credential);
            }

            (instance.internal_id.clone(), instance.generation)
        };

        info!(
            binding_id = %binding_id,
            instance_id = %instance_id,
            "Instance has no credential yet; issuing from backend"
        );
        let credential = self
            .shared
            .backend
            .issue_credentials(&internal_id)
            .await
            .inspect_err(|e| {
                error!(
                    instance_id = %instance_id,
                    error = %e,
                    "Backend failed to issue credentials"
                )
            })?;

        let mut state = self.shared.state.lock().await;
        if let Some(binding) = state.bindings.get(binding_id) {
            return Ok(binding.credentials.clone());
        }
        let instance = state
            .instances
            .get_mut(instance_id)
            .filter(|i| i.generation == generation)
            .ok_or_else(|| BrokerError::NotFound(instance_id.to_string()))?;

        let credential = instance.credentials.get_or_insert(credential).clone();
        if instance.dashboard_url.is_empty() {
            instance.dashboard_url = credential.uri.clone();
        }
        let mut binding = ServiceBinding::for_instance(binding_id, instance, credential.clone());
        binding.app_guid = app_guid;
        state.bindings.insert(binding_id.to_string(), binding);

        self.shared.save_instances(&state).await?;
        self.shared.save_bindings(&state).await?;
        info!(binding_id = %binding_id, instance_id = %instance_id, "Binding created");
        Ok(credential)
    }

    /// Revoke a binding.
    ///
    /// An unknown instance is reported as [`UnbindOutcome::AlreadyGone`], not an error.
    pub async fn unbind(&self, binding_id: &str, instance_id: &str) -> Result<UnbindOutcome> {
        let internal_id = {
            let state = self.shared.state.lock().await;
            match state.instances.get(instance_id) {
                Some(instance) => instance.internal_id.clone(),
                None => {
                    info!(
                        binding_id = %binding_id,
                        instance_id = %instance_id,
                        "Unbind for unknown instance; already gone"
                    );
                    return Ok(UnbindOutcome::AlreadyGone);
                }
            }
        };

        self.shared
            .backend
            .revoke_credentials(&internal_id, binding_id)
            .await
            .inspect_err(|e| {
                error!(binding_id = %binding_id, error = %e, "Backend failed to revoke credentials")
            })?;

        let mut state = self.shared.state.lock().await;
        if state.bindings.remove(binding_id).is_none() {
            debug!(binding_id = %binding_id, "Binding record was not present");
        }
        self.shared.save_bindings(&state).await?;
        info!(binding_id = %binding_id, instance_id = %instance_id, "Binding removed");
        Ok(UnbindOutcome::Removed)
    }

    // ========================================================================
    // Recovery and inspection
    // ========================================================================

    /// Start reconciliation for every loaded instance still in progress.
    ///
    /// Used after a restart: tasks from the previous process did not survive.
    /// Returns the number of tasks started.
    pub async fn resume_pending(&self) -> usize {
        let pending: Vec<(String, String, u64)> = {
            let state = self.shared.state.lock().await;
            state
                .instances
                .values()
                .filter(|i| {
                    i.last_operation.state == OperationState::InProgress && i.credentials.is_none()
                })
                .map(|i| (i.id.clone(), i.internal_id.clone(), i.generation))
                .collect()
        };

        for (instance_id, internal_id, generation) in &pending {
            info!(instance_id = %instance_id, "Resuming reconciliation");
            Reconciler::new(
                self.shared.clone(),
                instance_id.clone(),
                internal_id.clone(),
                *generation,
            )
            .spawn();
        }
        pending.len()
    }

    /// Copy of an instance record.
    pub async fn instance(&self, instance_id: &str) -> Option<ServiceInstance> {
        self.shared
            .state
            .lock()
            .await
            .instances
            .get(instance_id)
            .cloned()
    }

    /// Copy of a binding record.
    pub async fn binding(&self, binding_id: &str) -> Option<ServiceBinding> {
        self.shared
            .state
            .lock()
            .await
            .bindings
            .get(binding_id)
            .cloned()
    }

    /// Copies of every binding that references `instance_id`.
    pub async fn bindings_for(&self, instance_id: &str) -> Vec<ServiceBinding> {
        let state = self.shared.state.lock().await;
        state
            .bindings
            .values()
            .filter(|b| b.service_instance_id == instance_id)
            .cloned()
            .collect()
    }

    /// Number of instance records.
    pub async fn instance_count(&self) -> usize {
        self.shared.state.lock().await.instances.len()
    }
}

/// Translate a backend state into the status exposed for `instance`.
fn map_backend_state(backend_state: InstanceState, instance: &ServiceInstance) -> LastOperation {
    match backend_state {
        InstanceState::Pending | InstanceState::Running => {
            LastOperation::in_progress("creating service instance...")
        }
        InstanceState::Succeeded => {
            if instance.credentials.is_some() {
                LastOperation::succeeded(
                    "successfully created service instance",
                    instance.dashboard_url.clone(),
                )
            } else {
                LastOperation::in_progress("configuring service instance...")
            }
        }
        InstanceState::Failed => LastOperation::failed("failed to create service instance"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_with(credentials: Option<Credential>) -> ServiceInstance {
        let mut instance =
            ServiceInstance::provisioning("i1", "c1", ProvisionRequest::default(), 1);
        if let Some(credential) = credentials {
            instance.dashboard_url = credential.uri.clone();
            instance.credentials = Some(credential);
        }
        instance
    }

    #[test]
    fn test_pending_and_running_map_to_in_progress() {
        let instance = instance_with(None);
        for s in [InstanceState::Pending, InstanceState::Running] {
            let op = map_backend_state(s, &instance);
            assert_eq!(op.state, OperationState::InProgress);
            assert!(op.async_poll_interval_seconds > 0);
        }
    }

    #[test]
    fn test_succeeded_requires_credentials() {
        let op = map_backend_state(InstanceState::Succeeded, &instance_with(None));
        assert_eq!(op.state, OperationState::InProgress);

        let credential = Credential {
            uri: "http://10.0.0.2:8091".to_string(),
            ..Default::default()
        };
        let op = map_backend_state(InstanceState::Succeeded, &instance_with(Some(credential)));
        assert_eq!(op.state, OperationState::Succeeded);
        assert_eq!(op.dashboard_url, "http://10.0.0.2:8091");
        assert_eq!(op.async_poll_interval_seconds, 0);
    }

    #[test]
    fn test_failed_maps_to_failed() {
        let op = map_backend_state(InstanceState::Failed, &instance_with(None));
        assert_eq!(op.state, OperationState::Failed);
        assert_eq!(op.async_poll_interval_seconds, 0);
    }
}
