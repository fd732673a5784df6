//! Kubernetes resource watchers.
//!
//! Namespaces, SubnetSets and Subnets are driven by `kube_runtime::Controller`
//! through the generic `run_controller()` helper, which adds per-resource
//! Fibonacci backoff and reconcile metrics. Kinds whose deletions matter but
//! carry no finalizer (VPCNetworkConfiguration, SubnetSet deletes) and the
//! container inventory feed use raw watcher streams.

use crate::error::ControllerError;
use crate::reconciler::subnetset::subnet_set_for_binding_map;
use crate::reconciler::{Reconciler, resource_key};
use crate::services::inventory::InventoryKey;
use crds::{Subnet, SubnetConnectionBindingMap, SubnetSet, VPCNetworkConfiguration};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, WatchStreamExt, watcher};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Run a controller until its stream ends.
///
/// Successful reconciles reset the resource's backoff; failures requeue it
/// after the next Fibonacci delay for that resource.
async fn run_controller<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(resource_name, obj.as_ref());
        ctx.increment_error(&key);
        let (backoff_seconds, error_count) = ctx.get_backoff_for_resource(&key);
        warn!(
            "Reconciliation error for {} (errors: {}), requeue in {}s: {}",
            key, error_count, backoff_seconds, error
        );
        Action::requeue(Duration::from_secs(backoff_seconds))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(resource_name, obj.as_ref());
            debug!("Reconciling {}", key);

            let result = reconcile_fn(Arc::clone(&ctx), obj).await;
            ctx.metrics.record_reconcile(resource_name, result.is_ok());
            match result {
                Ok(action) => {
                    ctx.reset_error(&key);
                    Ok(action)
                }
                Err(e) => {
                    error!("Reconciliation failed for {}: {}", key, e);
                    Err(e)
                }
            }
        }
    };

    // Debounce batches bursts of updates; concurrency bounds NSX load
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(3);

    controller
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watches Kubernetes resources for changes.
#[derive(Debug)]
pub struct Watcher {
    reconciler: Arc<Reconciler>,
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<DynamicType = ()> + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        Api::all(self.reconciler.client.clone())
    }

    pub async fn watch_namespaces(&self) -> Result<(), ControllerError> {
        run_controller(
            Controller::new(self.api::<Namespace>(), watcher::Config::default()),
            Arc::clone(&self.reconciler),
            |reconciler, ns| {
                Box::pin(async move {
                    reconciler
                        .reconcile_namespace(&ns)
                        .await
                        .map(|()| Action::await_change())
                })
            },
            "Namespace",
        )
        .await
    }

    /// SubnetSets, requeued as well when a binding map targeting them changes
    pub async fn watch_subnet_sets(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<SubnetSet>(), watcher::Config::default()).watches(
            self.api::<SubnetConnectionBindingMap>(),
            watcher::Config::default(),
            |map: SubnetConnectionBindingMap| subnet_set_for_binding_map(&map),
        );
        run_controller(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, set| {
                Box::pin(async move {
                    reconciler
                        .reconcile_subnet_set(&set)
                        .await
                        .map(|()| Action::await_change())
                })
            },
            "SubnetSet",
        )
        .await
    }

    pub async fn watch_subnets(&self) -> Result<(), ControllerError> {
        run_controller(
            Controller::new(self.api::<Subnet>(), watcher::Config::default()),
            Arc::clone(&self.reconciler),
            |reconciler, subnet| {
                Box::pin(async move {
                    reconciler
                        .reconcile_subnet(&subnet)
                        .await
                        .map(|()| Action::await_change())
                })
            },
            "Subnet",
        )
        .await
    }

    /// Register, refresh and unregister network configurations
    pub async fn watch_network_configs(&self) -> Result<(), ControllerError> {
        info!("Starting VPCNetworkConfiguration watcher");
        let mut events = watcher(self.api::<VPCNetworkConfiguration>(), watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = events.next().await {
            match event {
                Ok(watcher::Event::Apply(cr) | watcher::Event::InitApply(cr)) => {
                    let result = self.reconciler.reconcile_network_config(&cr).await;
                    self.reconciler
                        .metrics
                        .record_reconcile("VPCNetworkConfiguration", result.is_ok());
                    if let Err(e) = result {
                        error!("Reconciliation failed for VPCNetworkConfiguration {}: {}", cr.name_any(), e);
                    }
                }
                Ok(watcher::Event::Delete(cr)) => self.reconciler.delete_network_config(&cr.name_any()),
                Ok(_) => {}
                Err(e) => warn!("VPCNetworkConfiguration watch error: {}", e),
            }
        }
        Err(ControllerError::Watch("VPCNetworkConfiguration watch stream ended".to_string()))
    }

    /// Delete the subnets of SubnetSets as soon as they are removed
    pub async fn watch_subnet_set_deletions(&self) -> Result<(), ControllerError> {
        info!("Starting SubnetSet deletion watcher");
        let mut events = watcher(self.api::<SubnetSet>(), watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = events.next().await {
            match event {
                Ok(watcher::Event::Delete(set)) => self.reconciler.handle_subnet_set_deleted(&set).await,
                Ok(_) => {}
                Err(e) => warn!("SubnetSet deletion watch error: {}", e),
            }
        }
        Err(ControllerError::Watch("SubnetSet deletion watch stream ended".to_string()))
    }

    /// Feed Namespace and Pod changes into the inventory queue
    pub async fn watch_inventory(&self) -> Result<(), ControllerError> {
        info!("Starting container inventory watcher");
        let projects = watcher(self.api::<Namespace>(), watcher::Config::default())
            .default_backoff()
            .map(|event| event.map(|e| inventory_keys(e, InventoryKey::project)));
        let instances = watcher(self.api::<Pod>(), watcher::Config::default())
            .default_backoff()
            .map(|event| event.map(|e| inventory_keys(e, InventoryKey::application_instance)));
        let mut keys = futures::stream::select(projects.boxed(), instances.boxed());

        while let Some(batch) = keys.next().await {
            match batch {
                Ok(batch) => {
                    for key in batch {
                        self.reconciler.services.inventory.enqueue(key);
                    }
                }
                Err(e) => warn!("Inventory watch error: {}", e),
            }
        }
        Err(ControllerError::Watch("inventory watch stream ended".to_string()))
    }
}

/// Keys to sync for one watch event. Deletes are synced too: the sync finds
/// the object gone and removes it from NSX.
fn inventory_keys<K>(event: watcher::Event<K>, key: fn(&K) -> InventoryKey) -> Vec<InventoryKey> {
    match event {
        watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) | watcher::Event::Delete(obj) => vec![key(&obj)],
        watcher::Event::Init | watcher::Event::InitDone => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::inventory::InventoryType;
    use crate::test_utils::{create_test_namespace, create_test_pod};

    #[test]
    fn test_inventory_keys_for_events() {
        let ns = create_test_namespace("ns-1", "uid-1");
        let keys = inventory_keys(watcher::Event::Delete(ns.clone()), InventoryKey::project);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].inventory_type, InventoryType::ContainerProject);
        assert_eq!(keys[0].external_id, "uid-1");

        assert!(inventory_keys(watcher::Event::<Namespace>::InitDone, InventoryKey::project).is_empty());

        let pod = create_test_pod("ns-1", "pod-1", "pod-uid", "10.0.0.5");
        let keys = inventory_keys(watcher::Event::InitApply(pod), InventoryKey::application_instance);
        assert_eq!(keys[0].inventory_type, InventoryType::ContainerApplicationInstance);
        assert_eq!(keys[0].external_id, "pod-uid");
    }
}
