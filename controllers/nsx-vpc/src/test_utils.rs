//! Test utilities for unit testing services and reconcilers
//!
//! This module provides helpers for creating test objects and an in-memory
//! namespace lookup.

#[cfg(test)]
use crate::error::ControllerError;
#[cfg(test)]
use crate::network_config::{SHARED_VPC_NAMESPACE_ANNOTATION, VpcNetworkConfigInfo};
#[cfg(test)]
use crate::services::NamespaceLookup;
#[cfg(test)]
use crds::*;
#[cfg(test)]
use k8s_openapi::api::core::v1::{Namespace, Pod, PodIP, PodStatus};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use std::collections::{BTreeMap, HashMap};

/// Helper to create a test Namespace
#[cfg(test)]
pub fn create_test_namespace(name: &str, uid: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Helper to create a running test Pod with one IP
#[cfg(test)]
pub fn create_test_pod(namespace: &str, name: &str, uid: &str, ip: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            pod_ips: Some(vec![PodIP { ip: ip.to_string() }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Helper to create a Namespace sharing the VPC of `target`
#[cfg(test)]
pub fn create_test_shared_namespace(name: &str, uid: &str, target: &str) -> Namespace {
    let mut ns = create_test_namespace(name, uid);
    ns.metadata.annotations = Some(BTreeMap::from([(
        SHARED_VPC_NAMESPACE_ANNOTATION.to_string(),
        target.to_string(),
    )]));
    ns
}

/// Helper to create a test SubnetSet CR
#[cfg(test)]
pub fn create_test_subnet_set(namespace: &str, name: &str, uid: &str) -> SubnetSet {
    SubnetSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        spec: SubnetSetSpec::default(),
        status: None,
    }
}

/// Helper to create a test Subnet CR
#[cfg(test)]
pub fn create_test_subnet(namespace: &str, name: &str, uid: &str) -> Subnet {
    Subnet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        spec: SubnetSpec::default(),
        status: None,
    }
}

/// Helper to create a test SubnetConnectionBindingMap CR targeting a SubnetSet
#[cfg(test)]
pub fn create_test_binding_map(namespace: &str, name: &str, target_subnet_set: Option<&str>) -> SubnetConnectionBindingMap {
    SubnetConnectionBindingMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: SubnetConnectionBindingMapSpec {
            subnet_name: "child".to_string(),
            target_subnet_set_name: target_subnet_set.map(str::to_string),
            target_subnet_name: None,
            vlan_traffic_tag: 101,
        },
        status: None,
    }
}

/// Helper to create a test VPCNetworkConfiguration CR
#[cfg(test)]
pub fn create_test_network_config(name: &str, nsx_project: Option<&str>, vpc: Option<&str>) -> VPCNetworkConfiguration {
    VPCNetworkConfiguration {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: VPCNetworkConfigurationSpec {
            vpc: vpc.map(str::to_string),
            nsx_project: nsx_project.map(str::to_string),
            vpc_connectivity_profile: None,
            private_ips: vec!["172.26.0.0/16".to_string()],
            default_subnet_size: 32,
            short_id: None,
        },
        status: None,
    }
}

/// Registry entry for an auto-created VPC configuration in `proj-1`
#[cfg(test)]
pub fn test_network_config_info(name: &str, is_default: bool) -> VpcNetworkConfigInfo {
    VpcNetworkConfigInfo {
        name: name.to_string(),
        org: "default".to_string(),
        nsx_project: "proj-1".to_string(),
        vpc_connectivity_profile: String::new(),
        private_ips: vec!["172.26.0.0/16".to_string()],
        default_subnet_size: 32,
        vpc_path: String::new(),
        short_id: None,
        is_default,
    }
}

/// In-memory namespace lookup
#[cfg(test)]
#[derive(Debug, Default)]
pub struct StaticNamespaces {
    pub namespaces: HashMap<String, Namespace>,
    pub fail: bool,
}

#[cfg(test)]
impl StaticNamespaces {
    pub fn new(namespaces: Vec<Namespace>) -> Self {
        Self {
            namespaces: namespaces
                .into_iter()
                .map(|ns| (ns.metadata.name.clone().unwrap_or_default(), ns))
                .collect(),
            fail: false,
        }
    }

    /// Lookup that fails every call
    pub fn failing() -> Self {
        Self {
            namespaces: HashMap::new(),
            fail: true,
        }
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl NamespaceLookup for StaticNamespaces {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ControllerError> {
        if self.fail {
            return Err(ControllerError::Reconciliation("namespace lookup failed".to_string()));
        }
        Ok(self.namespaces.get(name).cloned())
    }

    async fn namespaces_sharing(&self, target: &str) -> Result<Vec<String>, ControllerError> {
        if self.fail {
            return Err(ControllerError::Reconciliation("namespace lookup failed".to_string()));
        }
        Ok(self
            .namespaces
            .values()
            .filter(|ns| crate::services::shared_vpc_namespace(ns).as_deref() == Some(target))
            .filter_map(|ns| ns.metadata.name.clone())
            .filter(|name| name != target)
            .collect())
    }
}
