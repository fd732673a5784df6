//! NetworkInfo CRD
//!
//! Per-Namespace summary of the VPC serving it, consumed by other components.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "crd.nsx.vmware.com",
    version = "v1alpha1",
    kind = "NetworkInfo",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfoSpec {
    #[serde(default)]
    pub vpcs: Vec<VPCState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VPCState {
    /// VPC name
    pub name: String,

    /// NSX path of the VPC
    #[serde(default)]
    pub vpc_path: String,

    #[serde(default, rename = "defaultSNATIP", skip_serializing_if = "Option::is_none")]
    pub default_snat_ip: Option<String>,

    /// NSX path of the AVI service engine subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lb_subnet_path: Option<String>,

    #[serde(default, rename = "privateIPs")]
    pub private_ips: Vec<String>,
}
