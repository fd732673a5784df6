//! NSX API data models
//!
//! Policy API (VPC, subnets, load balancer, realization, search) and the
//! management-plane container inventory objects.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Key/value label attached to every NSX resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub tag: String,
}

impl Tag {
    pub fn new(scope: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            tag: tag.into(),
        }
    }
}

/// Return the value of the first tag with the given scope
pub fn find_tag<'a>(tags: &'a [Tag], scope: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.scope == scope)
        .map(|t| t.tag.as_str())
}

/// Generic list response (`results` + opaque `cursor`) used by list and search endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResult<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub result_count: Option<u64>,
}

/// Load balancer endpoint settings of a VPC (AVI)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerVpcEndpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// NSX VPC
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vpc {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Private IPv4 CIDRs of the VPC
    #[serde(default)]
    pub private_ips: Vec<String>,
    /// External IPv4 block paths
    #[serde(default)]
    pub external_ipv4_blocks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_vpc_endpoint: Option<LoadBalancerVpcEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_id: Option<String>,
    #[serde(default = "default_vpc_type")]
    pub resource_type: String,
}

fn default_vpc_type() -> String {
    "Vpc".to_string()
}

/// NSX-native load balancer service attached to a VPC
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LbService {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    /// Path of the VPC this LBS is connected to; empty when detached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connectivity_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Binding of a VPC to its connectivity profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VpcAttachment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    pub vpc_connectivity_profile: String,
}

/// DHCP settings of a subnet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetDhcpConfig {
    /// `DHCP_SERVER`, `DHCP_RELAY` or `DHCP_DEACTIVATED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// NSX VPC subnet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VpcSubnet {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Realized CIDRs
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_subnet_size: Option<u32>,
    /// `Public`, `Private` or `PrivateTGW`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_dhcp_config: Option<SubnetDhcpConfig>,
}

/// Port allocated on a VPC subnet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubnetPort {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Connection binding between a child subnet and a parent subnet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubnetConnectionBindingMap {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Path of the child subnet owning the binding
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_path: String,
    /// Path of the subnet the binding connects to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subnet_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_traffic_tag: Option<i64>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Service gateway section of a connectivity profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceGateway {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
}

/// VPC connectivity profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VpcConnectivityProfile {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_gateway: Option<ServiceGateway>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transit_gateway_path: Option<String>,
}

/// Attachment of a transit gateway to a gateway connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitGatewayAttachment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_path: Option<String>,
}

/// AVI (ALB) controller endpoint registered on the enforcement point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlbEndpoint {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub path: String,
}

/// Realization state of an intent object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RealizationState {
    Realized,
    InProgress,
    Error,
    Unrealized,
    #[serde(other)]
    Unknown,
}

/// Alarm raised while realizing an entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealizedAlarm {
    #[serde(default)]
    pub message: Option<String>,
}

/// Realized entity for an intent path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealizedEntity {
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub intent_paths: Vec<String>,
    pub state: RealizationState,
    #[serde(default)]
    pub alarms: Vec<RealizedAlarm>,
}

/// Minimal view of any policy resource returned by tag searches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyResource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Hierarchical (H-API) intent rooted at an org, carrying one VPC subtree
#[derive(Debug, Clone, PartialEq)]
pub struct OrgRoot {
    pub org: String,
    pub project: String,
    pub vpc: Vpc,
    pub attachment: Option<VpcAttachment>,
    pub lb_service: Option<LbService>,
    pub marked_for_delete: bool,
}

impl OrgRoot {
    /// Render the H-API request body
    pub fn to_hapi(&self) -> serde_json::Value {
        let mut vpc_children = Vec::new();
        if let Some(attachment) = &self.attachment {
            vpc_children.push(json!({
                "resource_type": "ChildVpcAttachment",
                "VpcAttachment": attachment,
                "marked_for_delete": self.marked_for_delete,
            }));
        }
        if let Some(lbs) = &self.lb_service {
            vpc_children.push(json!({
                "resource_type": "ChildLBService",
                "LBService": lbs,
                "marked_for_delete": self.marked_for_delete,
            }));
        }

        let mut vpc = serde_json::to_value(&self.vpc).unwrap_or_else(|_| json!({}));
        if let Some(obj) = vpc.as_object_mut() {
            obj.insert("children".to_string(), serde_json::Value::Array(vpc_children));
        }

        json!({
            "resource_type": "OrgRoot",
            "children": [{
                "resource_type": "ChildResourceReference",
                "id": self.org,
                "target_type": "Org",
                "children": [{
                    "resource_type": "ChildResourceReference",
                    "id": self.project,
                    "target_type": "Project",
                    "children": [{
                        "resource_type": "ChildVpc",
                        "Vpc": vpc,
                        "marked_for_delete": self.marked_for_delete,
                    }],
                }],
            }],
        })
    }
}

/// Kubernetes cluster registered in the container inventory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerCluster {
    pub external_id: String,
    pub display_name: String,
    #[serde(default = "default_cluster_type")]
    pub cluster_type: String,
    #[serde(default = "default_cluster_resource")]
    pub resource_type: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

fn default_cluster_type() -> String {
    "Kubernetes".to_string()
}

fn default_cluster_resource() -> String {
    "ContainerCluster".to_string()
}

/// Namespace in the container inventory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerProject {
    pub external_id: String,
    pub display_name: String,
    #[serde(default)]
    pub container_cluster_id: String,
    #[serde(default = "default_project_resource")]
    pub resource_type: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

fn default_project_resource() -> String {
    "ContainerProject".to_string()
}

/// Pod in the container inventory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerApplicationInstance {
    pub external_id: String,
    pub display_name: String,
    #[serde(default)]
    pub container_cluster_id: String,
    #[serde(default)]
    pub container_project_id: String,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_app_instance_resource")]
    pub resource_type: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

fn default_app_instance_resource() -> String {
    "ContainerApplicationInstance".to_string()
}

/// One entry of a batched inventory update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInventoryObject {
    pub container_object: serde_json::Value,
    /// `UPDATE` or `DELETE`
    pub object_update_type: String,
}

/// Batched inventory update body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerInventoryData {
    pub container_inventory_objects: Vec<ContainerInventoryObject>,
}
