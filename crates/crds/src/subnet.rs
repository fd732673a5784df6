//! Subnet CRD
//!
//! A single NSX subnet requested by a workload owner.

use crate::condition::Condition;
use crate::subnet_set::{AccessMode, SubnetDhcpConfig};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "crd.nsx.vmware.com",
    version = "v1alpha1",
    kind = "Subnet",
    namespaced,
    status = "SubnetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<AccessMode>,

    /// Number of addresses (power of two)
    #[serde(default, rename = "ipv4SubnetSize", skip_serializing_if = "Option::is_none")]
    pub ipv4_subnet_size: Option<u32>,

    /// Explicit CIDRs; allocated from the VPC when empty
    #[serde(default)]
    pub ip_addresses: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_dhcp_config: Option<SubnetDhcpConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetStatus {
    #[serde(default)]
    pub network_addresses: Vec<String>,

    #[serde(default)]
    pub gateway_addresses: Vec<String>,

    #[serde(default)]
    pub dhcp_server_addresses: Vec<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}
