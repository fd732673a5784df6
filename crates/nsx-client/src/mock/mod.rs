//! Mock NsxClient for unit testing
//!
//! Stores resources in memory, counts calls per operation and can be told to
//! fail specific operations, optionally only for one object path or only a
//! limited number of times.
//!
//! - `vpc.rs` - VPC, load balancer, realization, connectivity profile, ALB
//! - `subnet.rs` - subnets, subnet ports, binding maps, tagged resources
//! - `inventory.rs` - container cluster/project/application instance, batches

mod inventory;
mod subnet;
mod vpc;

use crate::error::{ApiError, NsxError};
use crate::models::*;
use crate::nsx_trait::NsxClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Failure injected into a mock operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// HTTP 404
    NotFound,
    /// Non-success status with a detail message
    Api(u16, String),
    /// Transport-level failure
    Connection(String),
}

impl MockFailure {
    fn to_error(&self, op: &str) -> NsxError {
        match self {
            MockFailure::NotFound => NsxError::NotFound(format!("{op}: not found")),
            MockFailure::Api(status, detail) => NsxError::Api(ApiError {
                status_code: *status,
                error_code: None,
                detail: detail.clone(),
            }),
            MockFailure::Connection(detail) => NsxError::Connection(detail.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FailureRule {
    failure: MockFailure,
    remaining: Option<usize>,
}

/// Mock NsxClient for testing
#[derive(Clone)]
pub struct MockNsxClient {
    pub(crate) base_url: String,
    // In-memory storage keyed by policy path
    pub(crate) vpcs: Arc<Mutex<HashMap<String, Vpc>>>,
    pub(crate) lb_services: Arc<Mutex<HashMap<String, LbService>>>,
    pub(crate) realized: Arc<Mutex<HashMap<String, RealizationState>>>,
    pub(crate) connectivity_profiles: Arc<Mutex<HashMap<String, VpcConnectivityProfile>>>,
    pub(crate) tgw_attachments: Arc<Mutex<HashMap<String, Vec<TransitGatewayAttachment>>>>,
    pub(crate) alb_endpoint: Arc<Mutex<Option<AlbEndpoint>>>,
    pub(crate) avi_ports: Arc<Mutex<HashMap<String, Vec<SubnetPort>>>>,
    pub(crate) subnets: Arc<Mutex<HashMap<String, VpcSubnet>>>,
    pub(crate) subnet_ports: Arc<Mutex<HashMap<String, SubnetPort>>>,
    pub(crate) binding_maps: Arc<Mutex<HashMap<String, SubnetConnectionBindingMap>>>,
    pub(crate) tagged: Arc<Mutex<HashMap<String, PolicyResource>>>,
    // Container inventory keyed by external id
    pub(crate) container_clusters: Arc<Mutex<HashMap<String, ContainerCluster>>>,
    pub(crate) container_projects: Arc<Mutex<HashMap<String, ContainerProject>>>,
    pub(crate) container_app_instances: Arc<Mutex<HashMap<String, ContainerApplicationInstance>>>,
    pub(crate) inventory_batches: Arc<Mutex<Vec<ContainerInventoryData>>>,
    // Call accounting and failure injection
    pub(crate) calls: Arc<Mutex<HashMap<String, usize>>>,
    pub(crate) failures: Arc<Mutex<HashMap<String, FailureRule>>>,
    pub(crate) next_id: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for MockNsxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNsxClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl MockNsxClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            vpcs: Arc::new(Mutex::new(HashMap::new())),
            lb_services: Arc::new(Mutex::new(HashMap::new())),
            realized: Arc::new(Mutex::new(HashMap::new())),
            connectivity_profiles: Arc::new(Mutex::new(HashMap::new())),
            tgw_attachments: Arc::new(Mutex::new(HashMap::new())),
            alb_endpoint: Arc::new(Mutex::new(None)),
            avi_ports: Arc::new(Mutex::new(HashMap::new())),
            subnets: Arc::new(Mutex::new(HashMap::new())),
            subnet_ports: Arc::new(Mutex::new(HashMap::new())),
            binding_maps: Arc::new(Mutex::new(HashMap::new())),
            tagged: Arc::new(Mutex::new(HashMap::new())),
            container_clusters: Arc::new(Mutex::new(HashMap::new())),
            container_projects: Arc::new(Mutex::new(HashMap::new())),
            container_app_instances: Arc::new(Mutex::new(HashMap::new())),
            inventory_batches: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        let mut id = self.next_id.lock().unwrap();
        let current = *id;
        *id += 1;
        current
    }

    /// Record a call and return the injected failure, if any.
    /// A rule registered for `op:path` wins over one registered for `op`.
    pub(crate) fn enter(&self, op: &str, path: Option<&str>) -> Result<(), NsxError> {
        *self.calls.lock().unwrap().entry(op.to_string()).or_insert(0) += 1;

        let mut failures = self.failures.lock().unwrap();
        let keys = [path.map(|p| format!("{op}:{p}")), Some(op.to_string())];
        for key in keys.into_iter().flatten() {
            let Some(rule) = failures.get_mut(&key) else {
                continue;
            };
            let err = rule.failure.to_error(op);
            let exhausted = match rule.remaining.as_mut() {
                Some(n) => {
                    *n = n.saturating_sub(1);
                    *n == 0
                }
                None => false,
            };
            if exhausted {
                failures.remove(&key);
            }
            return Err(err);
        }
        Ok(())
    }

    // Test setup methods

    /// Make every call of `op` fail
    pub fn fail(&self, op: &str, failure: MockFailure) {
        self.failures
            .lock()
            .unwrap()
            .insert(op.to_string(), FailureRule { failure, remaining: None });
    }

    /// Make the next `times` calls of `op` fail
    pub fn fail_times(&self, op: &str, failure: MockFailure, times: usize) {
        if times == 0 {
            return;
        }
        self.failures.lock().unwrap().insert(
            op.to_string(),
            FailureRule { failure, remaining: Some(times) },
        );
    }

    /// Make `op` fail only when invoked for `path`
    pub fn fail_for_path(&self, op: &str, path: &str, failure: MockFailure) {
        self.failures
            .lock()
            .unwrap()
            .insert(format!("{op}:{path}"), FailureRule { failure, remaining: None });
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Number of times `op` was invoked
    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn add_vpc(&self, vpc: Vpc) {
        self.vpcs.lock().unwrap().insert(vpc.path.clone(), vpc);
    }

    pub fn add_lb_service(&self, lbs: LbService) {
        self.lb_services.lock().unwrap().insert(lbs.path.clone(), lbs);
    }

    pub fn set_realized_state(&self, intent_path: &str, state: RealizationState) {
        self.realized
            .lock()
            .unwrap()
            .insert(intent_path.to_string(), state);
    }

    pub fn add_connectivity_profile(&self, profile: VpcConnectivityProfile) {
        self.connectivity_profiles
            .lock()
            .unwrap()
            .insert(profile.path.clone(), profile);
    }

    pub fn add_tgw_attachment(&self, transit_gateway_path: &str, attachment: TransitGatewayAttachment) {
        self.tgw_attachments
            .lock()
            .unwrap()
            .entry(transit_gateway_path.to_string())
            .or_default()
            .push(attachment);
    }

    pub fn set_alb_endpoint(&self, endpoint: Option<AlbEndpoint>) {
        *self.alb_endpoint.lock().unwrap() = endpoint;
    }

    pub fn add_avi_port(&self, vpc_path: &str, port: SubnetPort) {
        self.avi_ports
            .lock()
            .unwrap()
            .entry(vpc_path.to_string())
            .or_default()
            .push(port);
    }

    pub fn add_subnet(&self, subnet: VpcSubnet) {
        self.subnets.lock().unwrap().insert(subnet.path.clone(), subnet);
    }

    pub fn add_subnet_port(&self, port: SubnetPort) {
        self.subnet_ports.lock().unwrap().insert(port.path.clone(), port);
    }

    pub fn add_binding_map(&self, map: SubnetConnectionBindingMap) {
        self.binding_maps.lock().unwrap().insert(map.path.clone(), map);
    }

    pub fn add_tagged_resource(&self, resource: PolicyResource) {
        self.tagged.lock().unwrap().insert(resource.path.clone(), resource);
    }

    pub fn add_container_cluster(&self, cluster: ContainerCluster) {
        self.container_clusters
            .lock()
            .unwrap()
            .insert(cluster.external_id.clone(), cluster);
    }

    pub fn add_container_project(&self, project: ContainerProject) {
        self.container_projects
            .lock()
            .unwrap()
            .insert(project.external_id.clone(), project);
    }

    pub fn add_container_application_instance(&self, instance: ContainerApplicationInstance) {
        self.container_app_instances
            .lock()
            .unwrap()
            .insert(instance.external_id.clone(), instance);
    }

    pub fn container_cluster_exists(&self, cluster_id: &str) -> bool {
        self.container_clusters.lock().unwrap().contains_key(cluster_id)
    }

    // Inspection helpers

    pub fn vpc_exists(&self, path: &str) -> bool {
        self.vpcs.lock().unwrap().contains_key(path)
    }

    pub fn subnet_exists(&self, path: &str) -> bool {
        self.subnets.lock().unwrap().contains_key(path)
    }

    pub fn binding_map_exists(&self, path: &str) -> bool {
        self.binding_maps.lock().unwrap().contains_key(path)
    }

    pub fn tagged_resource_exists(&self, path: &str) -> bool {
        self.tagged.lock().unwrap().contains_key(path)
    }

    pub fn subnet_port_exists(&self, path: &str) -> bool {
        self.subnet_ports.lock().unwrap().contains_key(path)
    }

    /// Batches received by `send_inventory_updates`, oldest first
    pub fn inventory_batches(&self) -> Vec<ContainerInventoryData> {
        self.inventory_batches.lock().unwrap().clone()
    }
}

pub(crate) fn has_cluster_tag(tags: &[Tag], cluster: &str) -> bool {
    find_tag(tags, "nsx-op/cluster") == Some(cluster)
}

#[async_trait::async_trait]
impl NsxClientTrait for MockNsxClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_connection(&self) -> Result<(), NsxError> {
        self.enter("validate_connection", None)
    }

    // VPC Operations
    async fn get_vpc(&self, path: &str) -> Result<Vpc, NsxError> {
        vpc::get_vpc(self, path).await
    }

    async fn list_vpcs(&self, cluster: &str) -> Result<Vec<Vpc>, NsxError> {
        vpc::list_vpcs(self, cluster).await
    }

    async fn patch_org_root(&self, root: &OrgRoot) -> Result<(), NsxError> {
        vpc::patch_org_root(self, root).await
    }

    async fn delete_vpc(&self, path: &str) -> Result<(), NsxError> {
        vpc::delete_vpc(self, path).await
    }

    async fn list_lb_services(&self, cluster: &str) -> Result<Vec<LbService>, NsxError> {
        vpc::list_lb_services(self, cluster).await
    }

    async fn get_realized_state(&self, intent_path: &str) -> Result<Vec<RealizedEntity>, NsxError> {
        vpc::get_realized_state(self, intent_path).await
    }

    async fn get_vpc_connectivity_profile(&self, path: &str) -> Result<VpcConnectivityProfile, NsxError> {
        vpc::get_vpc_connectivity_profile(self, path).await
    }

    async fn list_transit_gateway_attachments(&self, transit_gateway_path: &str) -> Result<Vec<TransitGatewayAttachment>, NsxError> {
        vpc::list_transit_gateway_attachments(self, transit_gateway_path).await
    }

    async fn get_alb_endpoint(&self) -> Result<AlbEndpoint, NsxError> {
        vpc::get_alb_endpoint(self).await
    }

    async fn list_avi_subnet_ports(&self, vpc_path: &str) -> Result<Vec<SubnetPort>, NsxError> {
        vpc::list_avi_subnet_ports(self, vpc_path).await
    }

    // Subnet Operations
    async fn list_vpc_subnets(&self, cluster: &str) -> Result<Vec<VpcSubnet>, NsxError> {
        subnet::list_vpc_subnets(self, cluster).await
    }

    async fn get_vpc_subnet(&self, path: &str) -> Result<VpcSubnet, NsxError> {
        subnet::get_vpc_subnet(self, path).await
    }

    async fn patch_vpc_subnet(&self, vpc_path: &str, subnet: &VpcSubnet) -> Result<VpcSubnet, NsxError> {
        subnet::patch_vpc_subnet(self, vpc_path, subnet).await
    }

    async fn delete_vpc_subnet(&self, path: &str) -> Result<(), NsxError> {
        subnet::delete_vpc_subnet(self, path).await
    }

    async fn list_subnet_ports(&self, cluster: &str) -> Result<Vec<SubnetPort>, NsxError> {
        subnet::list_subnet_ports(self, cluster).await
    }

    async fn delete_subnet_port(&self, path: &str) -> Result<(), NsxError> {
        subnet::delete_subnet_port(self, path).await
    }

    async fn list_subnet_binding_maps(&self, cluster: &str) -> Result<Vec<SubnetConnectionBindingMap>, NsxError> {
        subnet::list_subnet_binding_maps(self, cluster).await
    }

    async fn delete_subnet_binding_map(&self, path: &str) -> Result<(), NsxError> {
        subnet::delete_subnet_binding_map(self, path).await
    }

    // Tagged resource Operations
    async fn search_tagged_resources(&self, resource_type: &str, cluster: &str) -> Result<Vec<PolicyResource>, NsxError> {
        subnet::search_tagged_resources(self, resource_type, cluster).await
    }

    async fn delete_by_path(&self, path: &str) -> Result<(), NsxError> {
        subnet::delete_by_path(self, path).await
    }

    // Container inventory Operations
    async fn get_container_cluster(&self, cluster_id: &str) -> Result<ContainerCluster, NsxError> {
        inventory::get_container_cluster(self, cluster_id).await
    }

    async fn create_container_cluster(&self, cluster: &ContainerCluster) -> Result<ContainerCluster, NsxError> {
        inventory::create_container_cluster(self, cluster).await
    }

    async fn list_container_projects(&self, cluster_id: &str) -> Result<Vec<ContainerProject>, NsxError> {
        inventory::list_container_projects(self, cluster_id).await
    }

    async fn list_container_application_instances(&self, cluster_id: &str) -> Result<Vec<ContainerApplicationInstance>, NsxError> {
        inventory::list_container_application_instances(self, cluster_id).await
    }

    async fn send_inventory_updates(&self, cluster_id: &str, data: &ContainerInventoryData) -> Result<(), NsxError> {
        inventory::send_inventory_updates(self, cluster_id, data).await
    }
}
