//! Main controller implementation.
//!
//! Builds the NSX client, services and reconciler, loads NSX state, then
//! runs the watchers, the GC and inventory tickers and the metrics server
//! until one of them stops.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::network_config::VpcNetworkConfigRegistry;
use crate::reconciler::{Reconciler, Services};
use crate::services::binding_map::BindingMapService;
use crate::services::inventory::{InventoryService, KubeInventorySource};
use crate::services::subnet::SubnetService;
use crate::services::subnetport::SubnetPortService;
use crate::services::vpc::{RealizeSettings, VpcService};
use crate::watcher::Watcher;
use kube::Client;
use nsx_client::{NsxClient, NsxClientTrait};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

type Task = JoinHandle<Result<(), ControllerError>>;

/// Main controller for NSX VPC resource management.
#[derive(Debug)]
pub struct Controller {
    namespace_watcher: Task,
    subnet_set_watcher: Task,
    subnet_watcher: Task,
    network_config_watcher: Task,
    subnet_set_deletion_watcher: Task,
    inventory_watcher: Task,
    garbage_collector: Task,
    inventory_sync: Task,
    metrics_server: Task,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: &OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing NSX VPC Controller");

        let metrics = Metrics::new().map_err(|e| ControllerError::Metrics(e.to_string()))?;
        let metrics_server = {
            let metrics = metrics.clone();
            let addr = config.metrics_addr;
            tokio::spawn(async move { metrics::serve(addr, metrics).await })
        };

        let kube_client = Client::try_default().await?;

        let nsx_client = NsxClient::new(
            config.nsx_manager_url.clone(),
            config.nsx_username.clone(),
            config.nsx_password.clone(),
            config.insecure_tls,
        )?;
        info!("Validating NSX manager connectivity...");
        nsx_client.validate_connection().await.map_err(|e| {
            error!("Failed to reach NSX manager at {}: {}", config.nsx_manager_url, e);
            ControllerError::Nsx(e)
        })?;
        let nsx: Arc<dyn NsxClientTrait> = Arc::new(nsx_client);

        let registry = Arc::new(VpcNetworkConfigRegistry::new());
        let realize = RealizeSettings::from_timeout(config.realize_timeout());
        let ports = Arc::new(SubnetPortService::new(Arc::clone(&nsx), config.cluster.clone()));
        let binding_maps = Arc::new(BindingMapService::new(Arc::clone(&nsx), config.cluster.clone()));
        let services = Services {
            vpc: Arc::new(VpcService::new(
                Arc::clone(&nsx),
                config.cluster.clone(),
                config.use_avi_lb,
                Arc::clone(&registry),
                realize,
            )),
            subnet: Arc::new(SubnetService::new(
                Arc::clone(&nsx),
                config.cluster.clone(),
                Arc::clone(&ports),
                Arc::clone(&binding_maps),
                realize,
            )),
            ports,
            binding_maps,
            inventory: Arc::new(InventoryService::new(
                Arc::clone(&nsx),
                Arc::new(KubeInventorySource::new(kube_client.clone())),
                config.cluster.clone(),
            )),
        };

        let reconciler = Reconciler::new(
            kube_client,
            registry,
            services,
            metrics.clone(),
            config.default_subnet_size,
        );

        // An empty cache would make every reconcile recreate NSX objects
        if let Err(e) = reconciler.startup_sync().await {
            error!("Startup sync failed: {}", e);
            return Err(e);
        }
        metrics.set_ready();
        info!("Startup sync completed");

        let reconciler = Arc::new(reconciler);
        let watcher = Arc::new(Watcher::new(Arc::clone(&reconciler)));

        let namespace_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_namespaces().await })
        };

        let subnet_set_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_subnet_sets().await })
        };

        let subnet_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_subnets().await })
        };

        let network_config_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_network_configs().await })
        };

        let subnet_set_deletion_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_subnet_set_deletions().await })
        };

        let inventory_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_inventory().await })
        };

        Ok(Self {
            namespace_watcher,
            subnet_set_watcher,
            subnet_watcher,
            network_config_watcher,
            subnet_set_deletion_watcher,
            inventory_watcher,
            garbage_collector: tokio::spawn(run_garbage_collector(Arc::clone(&reconciler), config.gc_interval())),
            inventory_sync: tokio::spawn(run_inventory_sync(reconciler, config.inventory_sync_interval())),
            metrics_server,
        })
    }

    /// Runs until any task stops; the operator never stops on its own.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("NSX VPC Controller running");

        tokio::select! {
            result = &mut self.namespace_watcher => task_exit("Namespace watcher", result),
            result = &mut self.subnet_set_watcher => task_exit("SubnetSet watcher", result),
            result = &mut self.subnet_watcher => task_exit("Subnet watcher", result),
            result = &mut self.network_config_watcher => task_exit("VPCNetworkConfiguration watcher", result),
            result = &mut self.subnet_set_deletion_watcher => task_exit("SubnetSet deletion watcher", result),
            result = &mut self.inventory_watcher => task_exit("Inventory watcher", result),
            result = &mut self.garbage_collector => task_exit("Garbage collector", result),
            result = &mut self.inventory_sync => task_exit("Inventory sync", result),
            result = &mut self.metrics_server => task_exit("Metrics server", result),
        }
    }
}

fn task_exit(name: &str, result: Result<Result<(), ControllerError>, JoinError>) -> Result<(), ControllerError> {
    match result {
        Err(e) => Err(ControllerError::Watch(format!("{name} panicked: {e}"))),
        Ok(Err(e)) => Err(ControllerError::Watch(format!("{name} error: {e}"))),
        Ok(Ok(())) => Err(ControllerError::Watch(format!("{name} stopped"))),
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn run_garbage_collector(reconciler: Arc<Reconciler>, period: Duration) -> Result<(), ControllerError> {
    info!("Garbage collection every {}s", period.as_secs());
    let mut interval = ticker(period);
    loop {
        interval.tick().await;
        match reconciler.collect_garbage().await {
            Ok(()) => debug!("Garbage collection completed"),
            Err(e) => warn!("Garbage collection: {}", e),
        }
    }
}

async fn run_inventory_sync(reconciler: Arc<Reconciler>, period: Duration) -> Result<(), ControllerError> {
    let inventory = Arc::clone(&reconciler.services.inventory);
    let mut interval = ticker(period);
    loop {
        interval.tick().await;
        if let Err(e) = inventory.flush().await {
            warn!("Container inventory sync failed: {}", e);
        }
        let pending = i64::try_from(inventory.pending_count()).unwrap_or(i64::MAX);
        reconciler.metrics.inventory_pending.set(pending);
    }
}
