//! Reconciliation logic for the NSX VPC operator.
//!
//! One module per watched kind:
//! - `network_config`: VPCNetworkConfiguration registration and status
//! - `namespace`: VPC and NetworkInfo per Namespace
//! - `subnetset`: SubnetSet subnets and the binding-map finalizer
//! - `subnet`: Subnet subnets
//! - `garbage`: periodic orphan sweep

pub mod garbage;
pub mod namespace;
pub mod network_config;
pub mod subnet;
pub mod subnetset;

#[cfg(test)]
mod reconciler_test;

use crate::backoff::{DEFAULT_MAX_BACKOFF_SECS, DEFAULT_MIN_BACKOFF_SECS, FibonacciBackoff};
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::network_config::{VpcNetworkConfigRegistry, build_network_config_info};
use crate::services::binding_map::BindingMapService;
use crate::services::inventory::InventoryService;
use crate::services::subnet::SubnetService;
use crate::services::subnetport::SubnetPortService;
use crate::services::vpc::VpcService;
use crds::VPCNetworkConfiguration;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Finalizer on Subnet CRs, removed once the NSX subnet is gone
pub const SUBNET_FINALIZER: &str = "crd.nsx.vmware.com/finalizer";

/// Finalizer on SubnetSets referenced by a SubnetConnectionBindingMap
pub const SUBNETSET_BINDING_FINALIZER: &str = "crd.nsx.vmware.com/subnetset-binding-finalizer";

const REPORTER_NAME: &str = "nsx-vpc-controller";

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(DEFAULT_MIN_BACKOFF_SECS, DEFAULT_MAX_BACKOFF_SECS),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// NSX services shared by the reconcilers and the GC
#[derive(Debug, Clone)]
pub struct Services {
    pub vpc: Arc<VpcService>,
    pub subnet: Arc<SubnetService>,
    pub ports: Arc<SubnetPortService>,
    pub binding_maps: Arc<BindingMapService>,
    pub inventory: Arc<InventoryService>,
}

/// Reconciles Namespaces and NSX CRs into NSX objects.
pub struct Reconciler {
    pub(crate) client: Client,
    pub(crate) registry: Arc<VpcNetworkConfigRegistry>,
    pub(crate) services: Services,
    pub(crate) metrics: Metrics,
    pub(crate) default_subnet_size: u32,
    recorder: Recorder,
    /// Error count tracking per resource (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("services", &self.services)
            .field("default_subnet_size", &self.default_subnet_size)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        client: Client,
        registry: Arc<VpcNetworkConfigRegistry>,
        services: Services,
        metrics: Metrics,
        default_subnet_size: u32,
    ) -> Self {
        let reporter = Reporter {
            controller: REPORTER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
            registry,
            services,
            metrics,
            default_subnet_size,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Load NSX state into the local stores and register the existing
    /// network configurations before any watcher starts.
    ///
    /// Ports and binding maps are loaded before subnets so the first subnet
    /// decision already sees what sits on each subnet.
    pub async fn startup_sync(&self) -> Result<(), ControllerError> {
        info!("Loading NSX state into local stores...");
        self.services.vpc.initialize().await?;
        self.services.ports.initialize().await?;
        self.services.binding_maps.initialize().await?;
        self.services.subnet.initialize().await?;

        let api: Api<VPCNetworkConfiguration> = Api::all(self.client.clone());
        let configs = api.list(&ListParams::default()).await?;
        let mut registered = 0;
        for cr in &configs.items {
            match build_network_config_info(cr) {
                Ok(info) => {
                    self.registry.register(info);
                    registered += 1;
                }
                Err(e) => warn!("Skipping VPCNetworkConfiguration {}: {}", cr.name_any(), e),
            }
        }
        info!("Registered {} of {} VPCNetworkConfigurations", registered, configs.items.len());

        self.services.inventory.initialize().await?;
        Ok(())
    }

    /// Get the Fibonacci backoff duration for a resource based on its error count
    ///
    /// Returns (backoff_seconds, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                let backoff_seconds = state.backoff.next_backoff_seconds();
                (backoff_seconds, state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (DEFAULT_MIN_BACKOFF_SECS, 0)
            }
        }
    }

    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(BackoffState::new)
                .increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }

    /// Record a Kubernetes event on `obj`. Failures are only logged.
    pub(crate) async fn publish_event<K>(&self, obj: &K, type_: EventType, reason: &str, action: &str, note: String)
    where
        K: Resource<DynamicType = ()>,
    {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &obj.object_ref(&())).await {
            warn!("Failed to publish {} event: {}", reason, e);
        }
    }

    /// Warning event for a failed reconcile
    pub(crate) async fn publish_failure<K>(&self, obj: &K, action: &str, error: &ControllerError)
    where
        K: Resource<DynamicType = ()>,
    {
        self.publish_event(obj, EventType::Warning, &format!("{action}Failed"), action, error.to_string())
            .await;
    }
}

/// Subnet size for CRs of `namespace` that set none: the bound (or default)
/// VPCNetworkConfiguration's `defaultSubnetSize`, else `fallback`
pub fn default_subnet_size_for(registry: &VpcNetworkConfigRegistry, namespace: &str, fallback: u32) -> u32 {
    registry
        .config_for_namespace(namespace)
        .map(|nc| nc.default_subnet_size)
        .filter(|size| *size > 0)
        .unwrap_or(fallback)
}

/// Stable key of a resource for backoff tracking and logs
pub fn resource_key<K: Resource>(kind: &str, obj: &K) -> String {
    match obj.meta().namespace.as_deref() {
        Some(ns) => format!("{kind}/{ns}/{}", obj.name_any()),
        None => format!("{kind}/{}", obj.name_any()),
    }
}

/// The finalizer list after adding or removing `finalizer`, or `None` when
/// the list already has the wanted shape.
pub fn finalizers_with(current: &[String], finalizer: &str, present: bool) -> Option<Vec<String>> {
    let has = current.iter().any(|f| f == finalizer);
    match (has, present) {
        (false, true) => {
            let mut updated = current.to_vec();
            updated.push(finalizer.to_string());
            Some(updated)
        }
        (true, false) => Some(current.iter().filter(|f| *f != finalizer).cloned().collect()),
        _ => None,
    }
}

/// Add (`present`) or remove a finalizer with a merge patch of the whole list
pub(crate) async fn set_finalizer<K>(api: &Api<K>, obj: &K, finalizer: &str, present: bool) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let Some(finalizers) = finalizers_with(obj.finalizers(), finalizer, present) else {
        return Ok(());
    };
    let name = obj.name_any();
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| {
            let verb = if present { "add" } else { "remove" };
            ControllerError::Finalizer(format!("failed to {verb} finalizer {finalizer} on {name}: {e}"))
        })?;
    debug!("{} finalizer {} on {}", if present { "Added" } else { "Removed" }, finalizer, name);
    Ok(())
}

/// Merge-patch the status subresource with `status`
pub(crate) async fn patch_status<K>(api: &Api<K>, name: &str, status: serde_json::Value) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
