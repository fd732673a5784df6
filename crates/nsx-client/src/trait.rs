//! NsxClient trait for mocking
//!
//! The concrete [`crate::NsxClient`] implements this trait; tests use
//! `MockNsxClient` (feature `test-util`).

use crate::error::NsxError;
use crate::models::*;

/// NSX API operations used by the operator
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Object arguments named `path` are NSX policy paths
/// (`/orgs/{org}/projects/{project}/vpcs/{vpc}/...`).
#[async_trait::async_trait]
pub trait NsxClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Check credentials and reachability
    async fn validate_connection(&self) -> Result<(), NsxError>;

    // VPC Operations
    async fn get_vpc(&self, path: &str) -> Result<Vpc, NsxError>;
    async fn list_vpcs(&self, cluster: &str) -> Result<Vec<Vpc>, NsxError>;
    async fn patch_org_root(&self, root: &OrgRoot) -> Result<(), NsxError>;
    async fn delete_vpc(&self, path: &str) -> Result<(), NsxError>;
    async fn list_lb_services(&self, cluster: &str) -> Result<Vec<LbService>, NsxError>;
    async fn get_realized_state(&self, intent_path: &str) -> Result<Vec<RealizedEntity>, NsxError>;
    async fn get_vpc_connectivity_profile(&self, path: &str) -> Result<VpcConnectivityProfile, NsxError>;
    async fn list_transit_gateway_attachments(&self, transit_gateway_path: &str) -> Result<Vec<TransitGatewayAttachment>, NsxError>;
    async fn get_alb_endpoint(&self) -> Result<AlbEndpoint, NsxError>;
    async fn list_avi_subnet_ports(&self, vpc_path: &str) -> Result<Vec<SubnetPort>, NsxError>;

    // Subnet Operations
    async fn list_vpc_subnets(&self, cluster: &str) -> Result<Vec<VpcSubnet>, NsxError>;
    async fn get_vpc_subnet(&self, path: &str) -> Result<VpcSubnet, NsxError>;
    async fn patch_vpc_subnet(&self, vpc_path: &str, subnet: &VpcSubnet) -> Result<VpcSubnet, NsxError>;
    async fn delete_vpc_subnet(&self, path: &str) -> Result<(), NsxError>;
    async fn list_subnet_ports(&self, cluster: &str) -> Result<Vec<SubnetPort>, NsxError>;
    async fn delete_subnet_port(&self, path: &str) -> Result<(), NsxError>;
    async fn list_subnet_binding_maps(&self, cluster: &str) -> Result<Vec<SubnetConnectionBindingMap>, NsxError>;
    async fn delete_subnet_binding_map(&self, path: &str) -> Result<(), NsxError>;

    // Tagged resource Operations (cleanup of SecurityPolicy, IPPool, StaticRoute)
    async fn search_tagged_resources(&self, resource_type: &str, cluster: &str) -> Result<Vec<PolicyResource>, NsxError>;
    async fn delete_by_path(&self, path: &str) -> Result<(), NsxError>;

    // Container inventory Operations
    async fn get_container_cluster(&self, cluster_id: &str) -> Result<ContainerCluster, NsxError>;
    async fn create_container_cluster(&self, cluster: &ContainerCluster) -> Result<ContainerCluster, NsxError>;
    async fn list_container_projects(&self, cluster_id: &str) -> Result<Vec<ContainerProject>, NsxError>;
    async fn list_container_application_instances(&self, cluster_id: &str) -> Result<Vec<ContainerApplicationInstance>, NsxError>;
    async fn send_inventory_updates(&self, cluster_id: &str, data: &ContainerInventoryData) -> Result<(), NsxError>;
}
