//! SubnetSet CRD
//!
//! A group of NSX subnets that grows as workloads need more addresses.

use crate::condition::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "crd.nsx.vmware.com",
    version = "v1alpha1",
    kind = "SubnetSet",
    namespaced,
    status = "SubnetSetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSetSpec {
    /// Access mode of the subnets, defaults to the network config's mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<AccessMode>,

    /// Number of addresses per subnet (power of two)
    #[serde(default, rename = "ipv4SubnetSize", skip_serializing_if = "Option::is_none")]
    pub ipv4_subnet_size: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_dhcp_config: Option<SubnetDhcpConfig>,
}

/// Reachability of a subnet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum AccessMode {
    /// Routed outside the VPC
    Public,

    /// Reachable inside the VPC only
    #[default]
    Private,

    /// Reachable through the project transit gateway
    #[serde(rename = "PrivateTGW")]
    PrivateTgw,
}

impl AccessMode {
    /// Value used by the NSX API
    pub fn as_nsx(&self) -> &'static str {
        match self {
            AccessMode::Public => "Public",
            AccessMode::Private => "Private",
            AccessMode::PrivateTgw => "Private_TGW",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetDhcpConfig {
    /// `DHCPServer`, `DHCPRelay` or `DHCPDeactivated`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl SubnetDhcpConfig {
    /// DHCP mode as spelled by the NSX API
    pub fn nsx_mode(&self) -> &'static str {
        match self.mode.as_deref() {
            Some("DHCPServer") => "DHCP_SERVER",
            Some("DHCPRelay") => "DHCP_RELAY",
            _ => "DHCP_DEACTIVATED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSetStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Subnets currently backing the set
    #[serde(default)]
    pub subnets: Vec<SubnetInfo>,
}

/// Addressing of one subnet in a SubnetSet
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetInfo {
    /// CIDRs of the subnet
    #[serde(default)]
    pub network_addresses: Vec<String>,

    #[serde(default)]
    pub gateway_addresses: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_server_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode_names() {
        let mode: AccessMode = serde_json::from_str(r#""PrivateTGW""#).expect("valid mode");
        assert_eq!(mode, AccessMode::PrivateTgw);
        assert_eq!(mode.as_nsx(), "Private_TGW");
        assert_eq!(AccessMode::default().as_nsx(), "Private");
    }

    #[test]
    fn test_dhcp_mode_mapping() {
        let cfg = SubnetDhcpConfig { mode: Some("DHCPServer".to_string()) };
        assert_eq!(cfg.nsx_mode(), "DHCP_SERVER");
        assert_eq!(SubnetDhcpConfig::default().nsx_mode(), "DHCP_DEACTIVATED");
    }
}
