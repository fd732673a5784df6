//! VPCNetworkConfiguration CRD
//!
//! Cluster scoped description of how Namespaces get their VPC: either a
//! pre-created VPC path or the parameters of an auto-created one.

use crate::condition::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation marking the default VPCNetworkConfiguration
pub const DEFAULT_NETWORK_CONFIG_ANNOTATION: &str = "nsx.vmware.com/default";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "crd.nsx.vmware.com",
    version = "v1alpha1",
    kind = "VPCNetworkConfiguration",
    shortname = "vpcnetconfig",
    status = "VPCNetworkConfigurationStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VPCNetworkConfigurationSpec {
    /// NSX path of a pre-created VPC; when set, the remaining VPC fields are ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc: Option<String>,

    /// NSX project path, e.g. `/orgs/default/projects/proj-1`
    #[serde(default, rename = "nsxProject", skip_serializing_if = "Option::is_none")]
    pub nsx_project: Option<String>,

    /// Path of the VPC connectivity profile for auto-created VPCs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_connectivity_profile: Option<String>,

    /// Private IPv4 CIDRs of auto-created VPCs
    #[serde(default, rename = "privateIPs")]
    pub private_ips: Vec<String>,

    /// Default number of addresses in a subnet
    #[serde(default = "default_subnet_size")]
    pub default_subnet_size: u32,

    /// Short identifier used in VPC display names (max 8 chars)
    #[serde(default, rename = "shortID", skip_serializing_if = "Option::is_none")]
    pub short_id: Option<String>,
}

fn default_subnet_size() -> u32 {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VPCNetworkConfigurationStatus {
    /// VPCs realized for this configuration
    #[serde(default)]
    pub vpcs: Vec<VPCInfo>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// VPC details published for tenant admins and load balancer integrations
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VPCInfo {
    /// VPC name
    pub name: String,

    /// NSX path of the VPC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_path: Option<String>,

    /// NSX path of the AVI service engine subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lb_subnet_path: Option<String>,

    /// NSX path of the native load balancer service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsx_load_balancer_path: Option<String>,
}

impl VPCNetworkConfiguration {
    /// Whether the object carries the default annotation set to "true"
    pub fn is_default(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(DEFAULT_NETWORK_CONFIG_ANNOTATION))
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}
