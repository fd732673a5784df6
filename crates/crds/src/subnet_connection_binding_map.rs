//! SubnetConnectionBindingMap CRD
//!
//! Connects a Subnet to a parent Subnet or SubnetSet over a VLAN tag.

use crate::condition::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "crd.nsx.vmware.com",
    version = "v1alpha1",
    kind = "SubnetConnectionBindingMap",
    namespaced,
    shortname = "subnetbinding",
    status = "SubnetConnectionBindingMapStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SubnetConnectionBindingMapSpec {
    /// Child Subnet in the same Namespace
    pub subnet_name: String,

    /// Parent SubnetSet; mutually exclusive with `target_subnet_name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_subnet_set_name: Option<String>,

    /// Parent Subnet; mutually exclusive with `target_subnet_set_name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_subnet_name: Option<String>,

    /// VLAN used for the child subnet traffic on the parent
    pub vlan_traffic_tag: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetConnectionBindingMapStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
