//! VPC network configuration registry.
//!
//! Mirrors the VPCNetworkConfiguration CRs in memory and tracks which
//! configuration every Namespace is bound to. Registry operations never fail.

use crate::error::ControllerError;
use crds::VPCNetworkConfiguration;
use kube::ResourceExt;
use nsx_client::parse_vpc_path;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Namespace annotation selecting a VPCNetworkConfiguration by name
pub const NETWORK_CONFIG_ANNOTATION: &str = "nsx.vmware.com/vpc_network_config";
/// Namespace annotation naming the namespace whose VPC is shared
pub const SHARED_VPC_NAMESPACE_ANNOTATION: &str = "nsx.vmware.com/shared_vpc_namespace";

const DEFAULT_CONNECTIVITY_PROFILE: &str = "default";

/// Resolved network configuration used by the services
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VpcNetworkConfigInfo {
    pub name: String,
    pub org: String,
    pub nsx_project: String,
    /// Connectivity profile path (or bare name, resolved under the project)
    pub vpc_connectivity_profile: String,
    pub private_ips: Vec<String>,
    pub default_subnet_size: u32,
    /// Path of a pre-created VPC; empty for auto-created VPCs
    pub vpc_path: String,
    pub short_id: Option<String>,
    pub is_default: bool,
}

impl VpcNetworkConfigInfo {
    /// The VPC already exists in NSX and is only referenced
    pub fn is_pre_created(&self) -> bool {
        !self.vpc_path.is_empty()
    }

    pub fn project_path(&self) -> String {
        format!("/orgs/{}/projects/{}", self.org, self.nsx_project)
    }

    /// Full policy path of the connectivity profile
    pub fn connectivity_profile_path(&self) -> String {
        let profile = if self.vpc_connectivity_profile.is_empty() {
            DEFAULT_CONNECTIVITY_PROFILE
        } else {
            self.vpc_connectivity_profile.as_str()
        };
        if profile.starts_with('/') {
            profile.to_string()
        } else {
            format!("{}/vpc-connectivity-profiles/{}", self.project_path(), profile)
        }
    }
}

/// Parse a `/orgs/{org}/projects/{project}` path
fn parse_project_path(path: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() == 5 && parts[0].is_empty() && parts[1] == "orgs" && parts[3] == "projects" && !parts[2].is_empty() && !parts[4].is_empty() {
        Some((parts[2].to_string(), parts[4].to_string()))
    } else {
        None
    }
}

/// Build the registry entry for a VPCNetworkConfiguration CR
pub fn build_network_config_info(cr: &VPCNetworkConfiguration) -> Result<VpcNetworkConfigInfo, ControllerError> {
    let name = cr.name_any();
    let spec = &cr.spec;

    let (org, project, vpc_path) = match spec.vpc.as_deref().filter(|p| !p.is_empty()) {
        Some(vpc_path) => {
            let info = parse_vpc_path(vpc_path)
                .map_err(|e| ControllerError::InvalidConfig(format!("VPCNetworkConfiguration {name}: {e}")))?;
            (info.org_id, info.project_id, vpc_path.to_string())
        }
        None => {
            let project = spec.nsx_project.as_deref().unwrap_or_default();
            let (org, project) = parse_project_path(project).ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "VPCNetworkConfiguration {name}: invalid nsxProject {project:?}"
                ))
            })?;
            (org, project, String::new())
        }
    };

    Ok(VpcNetworkConfigInfo {
        name,
        org,
        nsx_project: project,
        vpc_connectivity_profile: spec.vpc_connectivity_profile.clone().unwrap_or_default(),
        private_ips: spec.private_ips.clone(),
        default_subnet_size: spec.default_subnet_size,
        vpc_path,
        short_id: spec.short_id.clone(),
        is_default: cr.is_default(),
    })
}

#[derive(Debug, Default)]
struct RegistryInner {
    configs: HashMap<String, VpcNetworkConfigInfo>,
    // namespace -> config name
    bindings: HashMap<String, String>,
}

/// Thread-safe registry of network configurations and namespace bindings
#[derive(Debug, Default)]
pub struct VpcNetworkConfigRegistry {
    inner: Mutex<RegistryInner>,
}

impl VpcNetworkConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a configuration. At most one configuration is the default.
    pub fn register(&self, info: VpcNetworkConfigInfo) {
        let mut inner = self.lock();
        if info.is_default {
            for (name, other) in inner.configs.iter_mut() {
                if other.is_default && *name != info.name {
                    info!("VPCNetworkConfiguration {} is no longer the default", name);
                    other.is_default = false;
                }
            }
        }
        debug!("Registering VPCNetworkConfiguration {}", info.name);
        inner.configs.insert(info.name.clone(), info);
    }

    pub fn unregister(&self, name: &str) {
        let mut inner = self.lock();
        inner.configs.remove(name);
        debug!("Unregistered VPCNetworkConfiguration {}", name);
    }

    pub fn get(&self, name: &str) -> Option<VpcNetworkConfigInfo> {
        self.lock().configs.get(name).cloned()
    }

    pub fn default_config(&self) -> Option<VpcNetworkConfigInfo> {
        self.lock().configs.values().find(|c| c.is_default).cloned()
    }

    pub fn register_namespace_binding(&self, namespace: &str, config_name: &str) {
        self.lock()
            .bindings
            .insert(namespace.to_string(), config_name.to_string());
    }

    pub fn unregister_namespace_binding(&self, namespace: &str) {
        self.lock().bindings.remove(namespace);
    }

    /// Configuration bound to the namespace, falling back to the default
    pub fn config_for_namespace(&self, namespace: &str) -> Option<VpcNetworkConfigInfo> {
        let inner = self.lock();
        inner
            .bindings
            .get(namespace)
            .and_then(|name| inner.configs.get(name))
            .or_else(|| inner.configs.values().find(|c| c.is_default))
            .cloned()
    }

    /// Namespaces explicitly bound to the configuration
    pub fn namespaces_for_config(&self, config_name: &str) -> Vec<String> {
        let mut namespaces: Vec<String> = self
            .lock()
            .bindings
            .iter()
            .filter(|(_, c)| c.as_str() == config_name)
            .map(|(ns, _)| ns.clone())
            .collect();
        namespaces.sort();
        namespaces
    }

    /// Namespace -> pre-created VPC path for every bound namespace using one
    pub fn namespaces_with_pre_created_vpcs(&self) -> HashMap<String, String> {
        let inner = self.lock();
        inner
            .bindings
            .iter()
            .filter_map(|(ns, name)| {
                let cfg = inner.configs.get(name)?;
                cfg.is_pre_created().then(|| (ns.clone(), cfg.vpc_path.clone()))
            })
            .collect()
    }
}

/// Config name a namespace asks for: its annotation, else the default config
pub fn network_config_name_for_namespace(
    annotations: &std::collections::BTreeMap<String, String>,
    registry: &VpcNetworkConfigRegistry,
) -> Result<String, ControllerError> {
    if let Some(name) = annotations.get(NETWORK_CONFIG_ANNOTATION).filter(|n| !n.is_empty()) {
        return Ok(name.clone());
    }
    registry
        .default_config()
        .map(|c| c.name)
        .ok_or_else(|| ControllerError::NetworkNotReady("default VPCNetworkConfiguration not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_network_config;
    use std::collections::BTreeMap;

    fn info(name: &str, is_default: bool) -> VpcNetworkConfigInfo {
        VpcNetworkConfigInfo {
            name: name.to_string(),
            org: "default".to_string(),
            nsx_project: "proj-1".to_string(),
            private_ips: vec!["172.26.0.0/16".to_string()],
            default_subnet_size: 32,
            is_default,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_default() {
        let registry = VpcNetworkConfigRegistry::new();
        registry.register(info("a", true));
        registry.register(info("b", true));

        assert_eq!(registry.default_config().map(|c| c.name), Some("b".to_string()));
        assert_eq!(registry.get("a").map(|c| c.is_default), Some(false));
    }

    #[test]
    fn test_register_get_unregister() {
        let registry = VpcNetworkConfigRegistry::new();
        let cfg = info("custom", false);
        registry.register(cfg.clone());

        assert_eq!(registry.get("custom"), Some(cfg));

        registry.unregister("custom");
        assert_eq!(registry.get("custom"), None);
        assert!(registry.default_config().is_none());
    }

    #[test]
    fn test_namespace_binding_falls_back_to_default() {
        let registry = VpcNetworkConfigRegistry::new();
        registry.register(info("default", true));
        registry.register(info("custom", false));
        registry.register_namespace_binding("ns1", "custom");

        assert_eq!(registry.config_for_namespace("ns1").map(|c| c.name), Some("custom".to_string()));
        assert_eq!(registry.config_for_namespace("ns2").map(|c| c.name), Some("default".to_string()));
        assert_eq!(registry.namespaces_for_config("custom"), vec!["ns1".to_string()]);

        registry.unregister_namespace_binding("ns1");
        assert_eq!(registry.config_for_namespace("ns1").map(|c| c.name), Some("default".to_string()));
    }

    #[test]
    fn test_pre_created_namespaces() {
        let registry = VpcNetworkConfigRegistry::new();
        let mut pre = info("pre", false);
        pre.vpc_path = "/orgs/default/projects/proj-1/vpcs/vpc-1".to_string();
        registry.register(pre);
        registry.register(info("auto", false));
        registry.register_namespace_binding("ns1", "pre");
        registry.register_namespace_binding("ns2", "auto");

        let map = registry.namespaces_with_pre_created_vpcs();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("ns1").map(String::as_str), Some("/orgs/default/projects/proj-1/vpcs/vpc-1"));
    }

    #[test]
    fn test_network_config_name_resolution() {
        let registry = VpcNetworkConfigRegistry::new();
        let mut annotations = BTreeMap::new();
        assert!(network_config_name_for_namespace(&annotations, &registry).is_err());

        registry.register(info("default", true));
        assert_eq!(network_config_name_for_namespace(&annotations, &registry).unwrap(), "default");

        annotations.insert(NETWORK_CONFIG_ANNOTATION.to_string(), "custom".to_string());
        assert_eq!(network_config_name_for_namespace(&annotations, &registry).unwrap(), "custom");
    }

    #[test]
    fn test_build_info_from_project_path() {
        let cr = create_test_network_config("cfg", Some("/orgs/default/projects/proj-1"), None);
        let info = build_network_config_info(&cr).unwrap();
        assert_eq!(info.org, "default");
        assert_eq!(info.nsx_project, "proj-1");
        assert!(!info.is_pre_created());
        assert_eq!(
            info.connectivity_profile_path(),
            "/orgs/default/projects/proj-1/vpc-connectivity-profiles/default"
        );
    }

    #[test]
    fn test_build_info_from_vpc_path() {
        let cr = create_test_network_config("cfg", None, Some("/orgs/o1/projects/p1/vpcs/v1"));
        let info = build_network_config_info(&cr).unwrap();
        assert!(info.is_pre_created());
        assert_eq!(info.project_path(), "/orgs/o1/projects/p1");

        let bad = create_test_network_config("bad", Some("proj-1"), None);
        assert!(matches!(build_network_config_info(&bad), Err(ControllerError::InvalidConfig(_))));
    }
}
