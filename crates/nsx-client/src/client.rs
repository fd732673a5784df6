//! NSX API client
//!
//! Policy API (`/policy/api/v1/...`) for VPC, subnet, load balancer,
//! realization and search; management API (`/api/v1/fabric/...`) for the
//! container inventory.

use crate::common::{HttpClient, POLICY_API, cluster_query, escape_query_value};
use crate::error::NsxError;
use crate::models::*;
use crate::nsx_trait::NsxClientTrait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Enforcement point holding the ALB endpoint registration
const ALB_ENDPOINT_PATH: &str = "/infra/sites/default/enforcement-points/alb-endpoint";

/// Tag scope NSX stamps on subnet ports created for AVI service engines
pub const AVI_PORT_TAG_SCOPE: &str = "nsx/avi";

/// NSX API client
#[derive(Debug)]
pub struct NsxClient {
    http: HttpClient,
}

impl NsxClient {
    /// Create a new NSX client
    ///
    /// # Arguments
    /// * `base_url` - NSX manager URL (e.g., "https://nsx-manager:443")
    /// * `username` / `password` - basic auth credentials
    /// * `insecure` - accept self-signed manager certificates
    pub fn new(
        base_url: String,
        username: String,
        password: String,
        insecure: bool,
    ) -> Result<Self, NsxError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(insecure)
            .build()?;

        Ok(Self {
            http: HttpClient::new(client, base_url, username, password),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    /// Validate credentials with a lightweight authenticated request
    pub async fn validate_connection(&self) -> Result<(), NsxError> {
        debug!("Validating NSX credentials and connectivity");
        let url = self.http.build_url("/api/v1/node/version");
        let _: serde_json::Value = self.http.get(&url).await?;
        debug!("NSX connection validated successfully");
        Ok(())
    }

    /// Get a VPC by its policy path
    pub async fn get_vpc(&self, path: &str) -> Result<Vpc, NsxError> {
        self.http.get(&self.http.policy_url(path)).await
    }

    /// List every VPC created for the cluster
    pub async fn list_vpcs(&self, cluster: &str) -> Result<Vec<Vpc>, NsxError> {
        self.http.search(&cluster_query("Vpc", cluster)).await
    }

    /// Apply a hierarchical intent rooted at an org
    pub async fn patch_org_root(&self, root: &OrgRoot) -> Result<(), NsxError> {
        let url = self.http.policy_url(&format!("/orgs/{}", root.org));
        debug!(
            "Patching OrgRoot for VPC {} (marked_for_delete={})",
            root.vpc.id, root.marked_for_delete
        );
        self.http.patch(&url, &root.to_hapi()).await
    }

    /// Delete a VPC together with its children
    pub async fn delete_vpc(&self, path: &str) -> Result<(), NsxError> {
        let url = format!("{}?is_recursive=true", self.http.policy_url(path));
        self.http.delete(&url).await
    }

    /// List NSX load balancer services created for the cluster
    pub async fn list_lb_services(&self, cluster: &str) -> Result<Vec<LbService>, NsxError> {
        self.http.search(&cluster_query("LBService", cluster)).await
    }

    /// Realized entities for an intent path
    pub async fn get_realized_state(&self, intent_path: &str) -> Result<Vec<RealizedEntity>, NsxError> {
        let url = self.http.build_url(&format!(
            "{POLICY_API}/infra/realized-state/realized-entities?intent_path={}",
            urlencoding::encode(intent_path)
        ));
        let list: ListResult<RealizedEntity> = self.http.get(&url).await?;
        Ok(list.results)
    }

    /// Get a VPC connectivity profile by path
    pub async fn get_vpc_connectivity_profile(&self, path: &str) -> Result<VpcConnectivityProfile, NsxError> {
        self.http.get(&self.http.policy_url(path)).await
    }

    /// List the attachments of a transit gateway
    pub async fn list_transit_gateway_attachments(
        &self,
        transit_gateway_path: &str,
    ) -> Result<Vec<TransitGatewayAttachment>, NsxError> {
        let url = self.http.policy_url(&format!("{transit_gateway_path}/attachments"));
        self.http.fetch_all_pages(&url).await
    }

    /// Get the ALB endpoint; `NotFound` when AVI is not registered
    pub async fn get_alb_endpoint(&self) -> Result<AlbEndpoint, NsxError> {
        self.http.get(&self.http.policy_url(ALB_ENDPOINT_PATH)).await
    }

    /// Subnet ports created by AVI inside a VPC
    pub async fn list_avi_subnet_ports(&self, vpc_path: &str) -> Result<Vec<SubnetPort>, NsxError> {
        let query = format!(
            "resource_type:VpcSubnetPort AND tags.scope:{} AND path:{}*",
            escape_query_value(AVI_PORT_TAG_SCOPE),
            escape_query_value(vpc_path)
        );
        self.http.search(&query).await
    }

    /// List subnets created for the cluster
    pub async fn list_vpc_subnets(&self, cluster: &str) -> Result<Vec<VpcSubnet>, NsxError> {
        self.http.search(&cluster_query("VpcSubnet", cluster)).await
    }

    /// Get a subnet by path
    pub async fn get_vpc_subnet(&self, path: &str) -> Result<VpcSubnet, NsxError> {
        self.http.get(&self.http.policy_url(path)).await
    }

    /// Create or update a subnet inside a VPC and return the stored object
    pub async fn patch_vpc_subnet(&self, vpc_path: &str, subnet: &VpcSubnet) -> Result<VpcSubnet, NsxError> {
        if subnet.id.is_empty() {
            return Err(NsxError::InvalidRequest("subnet id is required".to_string()));
        }
        let path = format!("{vpc_path}/subnets/{}", subnet.id);
        let url = self.http.policy_url(&path);
        self.http.patch(&url, &serde_json::to_value(subnet)?).await?;
        self.http.get(&url).await
    }

    /// Delete a subnet
    pub async fn delete_vpc_subnet(&self, path: &str) -> Result<(), NsxError> {
        self.http.delete(&self.http.policy_url(path)).await
    }

    /// List subnet ports created for the cluster
    pub async fn list_subnet_ports(&self, cluster: &str) -> Result<Vec<SubnetPort>, NsxError> {
        self.http.search(&cluster_query("VpcSubnetPort", cluster)).await
    }

    /// Delete a subnet port
    pub async fn delete_subnet_port(&self, path: &str) -> Result<(), NsxError> {
        self.http.delete(&self.http.policy_url(path)).await
    }

    /// List subnet connection binding maps created for the cluster
    pub async fn list_subnet_binding_maps(&self, cluster: &str) -> Result<Vec<SubnetConnectionBindingMap>, NsxError> {
        self.http
            .search(&cluster_query("SubnetConnectionBindingMap", cluster))
            .await
    }

    /// Delete a subnet connection binding map
    pub async fn delete_subnet_binding_map(&self, path: &str) -> Result<(), NsxError> {
        self.http.delete(&self.http.policy_url(path)).await
    }

    /// Resources of a given type carrying the cluster tag
    pub async fn search_tagged_resources(&self, resource_type: &str, cluster: &str) -> Result<Vec<PolicyResource>, NsxError> {
        self.http.search(&cluster_query(resource_type, cluster)).await
    }

    /// Delete any policy object by path
    pub async fn delete_by_path(&self, path: &str) -> Result<(), NsxError> {
        self.http.delete(&self.http.policy_url(path)).await
    }

    /// Get a container cluster from the inventory
    pub async fn get_container_cluster(&self, cluster_id: &str) -> Result<ContainerCluster, NsxError> {
        let url = self
            .http
            .build_url(&format!("/api/v1/fabric/container-clusters/{cluster_id}"));
        self.http.get(&url).await
    }

    /// Register a container cluster in the inventory
    pub async fn create_container_cluster(&self, cluster: &ContainerCluster) -> Result<ContainerCluster, NsxError> {
        let url = self.http.build_url("/api/v1/fabric/container-clusters");
        self.http.post(&url, &serde_json::to_value(cluster)?).await
    }

    /// List inventory projects of a cluster
    pub async fn list_container_projects(&self, cluster_id: &str) -> Result<Vec<ContainerProject>, NsxError> {
        let url = self.http.build_url(&format!(
            "/api/v1/fabric/container-projects?container_cluster_id={}",
            urlencoding::encode(cluster_id)
        ));
        self.http.fetch_all_pages(&url).await
    }

    /// List inventory application instances of a cluster
    pub async fn list_container_application_instances(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<ContainerApplicationInstance>, NsxError> {
        let url = self.http.build_url(&format!(
            "/api/v1/fabric/container-application-instances?container_cluster_id={}",
            urlencoding::encode(cluster_id)
        ));
        self.http.fetch_all_pages(&url).await
    }

    /// Send a batched inventory update
    pub async fn send_inventory_updates(&self, cluster_id: &str, data: &ContainerInventoryData) -> Result<(), NsxError> {
        let url = self.http.build_url(&format!(
            "/api/v1/fabric/container-inventory/{cluster_id}?action=updates"
        ));
        debug!(
            "Sending {} inventory objects for cluster {}",
            data.container_inventory_objects.len(),
            cluster_id
        );
        self.http.post_action(&url, &serde_json::to_value(data)?).await
    }
}

#[async_trait::async_trait]
impl NsxClientTrait for NsxClient {
    fn base_url(&self) -> &str {
        self.base_url()
    }

    async fn validate_connection(&self) -> Result<(), NsxError> {
        self.validate_connection().await
    }

    // VPC Operations
    async fn get_vpc(&self, path: &str) -> Result<Vpc, NsxError> {
        self.get_vpc(path).await
    }

    async fn list_vpcs(&self, cluster: &str) -> Result<Vec<Vpc>, NsxError> {
        self.list_vpcs(cluster).await
    }

    async fn patch_org_root(&self, root: &OrgRoot) -> Result<(), NsxError> {
        self.patch_org_root(root).await
    }

    async fn delete_vpc(&self, path: &str) -> Result<(), NsxError> {
        self.delete_vpc(path).await
    }

    async fn list_lb_services(&self, cluster: &str) -> Result<Vec<LbService>, NsxError> {
        self.list_lb_services(cluster).await
    }

    async fn get_realized_state(&self, intent_path: &str) -> Result<Vec<RealizedEntity>, NsxError> {
        self.get_realized_state(intent_path).await
    }

    async fn get_vpc_connectivity_profile(&self, path: &str) -> Result<VpcConnectivityProfile, NsxError> {
        self.get_vpc_connectivity_profile(path).await
    }

    async fn list_transit_gateway_attachments(&self, transit_gateway_path: &str) -> Result<Vec<TransitGatewayAttachment>, NsxError> {
        self.list_transit_gateway_attachments(transit_gateway_path).await
    }

    async fn get_alb_endpoint(&self) -> Result<AlbEndpoint, NsxError> {
        self.get_alb_endpoint().await
    }

    async fn list_avi_subnet_ports(&self, vpc_path: &str) -> Result<Vec<SubnetPort>, NsxError> {
        self.list_avi_subnet_ports(vpc_path).await
    }

    // Subnet Operations
    async fn list_vpc_subnets(&self, cluster: &str) -> Result<Vec<VpcSubnet>, NsxError> {
        self.list_vpc_subnets(cluster).await
    }

    async fn get_vpc_subnet(&self, path: &str) -> Result<VpcSubnet, NsxError> {
        self.get_vpc_subnet(path).await
    }

    async fn patch_vpc_subnet(&self, vpc_path: &str, subnet: &VpcSubnet) -> Result<VpcSubnet, NsxError> {
        self.patch_vpc_subnet(vpc_path, subnet).await
    }

    async fn delete_vpc_subnet(&self, path: &str) -> Result<(), NsxError> {
        self.delete_vpc_subnet(path).await
    }

    async fn list_subnet_ports(&self, cluster: &str) -> Result<Vec<SubnetPort>, NsxError> {
        self.list_subnet_ports(cluster).await
    }

    async fn delete_subnet_port(&self, path: &str) -> Result<(), NsxError> {
        self.delete_subnet_port(path).await
    }

    async fn list_subnet_binding_maps(&self, cluster: &str) -> Result<Vec<SubnetConnectionBindingMap>, NsxError> {
        self.list_subnet_binding_maps(cluster).await
    }

    async fn delete_subnet_binding_map(&self, path: &str) -> Result<(), NsxError> {
        self.delete_subnet_binding_map(path).await
    }

    // Tagged resource Operations
    async fn search_tagged_resources(&self, resource_type: &str, cluster: &str) -> Result<Vec<PolicyResource>, NsxError> {
        self.search_tagged_resources(resource_type, cluster).await
    }

    async fn delete_by_path(&self, path: &str) -> Result<(), NsxError> {
        self.delete_by_path(path).await
    }

    // Container inventory Operations
    async fn get_container_cluster(&self, cluster_id: &str) -> Result<ContainerCluster, NsxError> {
        self.get_container_cluster(cluster_id).await
    }

    async fn create_container_cluster(&self, cluster: &ContainerCluster) -> Result<ContainerCluster, NsxError> {
        self.create_container_cluster(cluster).await
    }

    async fn list_container_projects(&self, cluster_id: &str) -> Result<Vec<ContainerProject>, NsxError> {
        self.list_container_projects(cluster_id).await
    }

    async fn list_container_application_instances(&self, cluster_id: &str) -> Result<Vec<ContainerApplicationInstance>, NsxError> {
        self.list_container_application_instances(cluster_id).await
    }

    async fn send_inventory_updates(&self, cluster_id: &str, data: &ContainerInventoryData) -> Result<(), NsxError> {
        self.send_inventory_updates(cluster_id, data).await
    }
}
