//! VPC service.
//!
//! Creates, updates and deletes the VPC backing a Namespace, picks the load
//! balancer provider and validates network configurations. Owns the VPC and
//! load balancer service stores.

pub mod lb_provider;
pub mod realize;

#[cfg(test)]
mod vpc_test;

pub use lb_provider::LbProvider;
pub use realize::{RealizeSettings, wait_for_realization};

use super::{NamespaceLookup, shared_vpc_namespace};
use crate::backoff::RetryPolicy;
use crate::error::{ControllerError, MultiError};
use crate::network_config::{VpcNetworkConfigInfo, VpcNetworkConfigRegistry};
use crate::store::{IndexFn, ResourceStore, StoreResource, tag_index};
use crate::tags::{TAG_SCOPE_NAMESPACE, TAG_SCOPE_NAMESPACE_UID, namespace_tags};
use crate::util::{generate_id, normalize_name};
use kube::ResourceExt;
use nsx_client::{
    LbService, LoadBalancerVpcEndpoint, NsxClientTrait, OrgRoot, Vpc, VpcAttachment, VpcInfo,
    gateway_connection_type, parse_vpc_path, vpc_id_from_path,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Index of VPCs by namespace name
pub const VPC_INDEX_NAMESPACE: &str = "namespace";
/// Index of VPCs by namespace UID
pub const VPC_INDEX_NAMESPACE_UID: &str = "namespace_uid";
/// Index of load balancer services by VPC id
pub const LBS_INDEX_VPC_ID: &str = "vpc_id";

const DEFAULT_LBS_ID: &str = "default";
const DEFAULT_LBS_SIZE: &str = "SMALL";
const DEFAULT_ATTACHMENT_ID: &str = "default";
const DISTRIBUTED_GATEWAY_CONNECTION_TYPE: &str = "distributed-gateway-connections";

/// Condition reason when the project has no gateway connection
pub const REASON_GATEWAY_CONNECTION_NOT_SET: &str = "GatewayConnectionNotSet";
/// Condition reason for a distributed gateway connection
pub const REASON_DISTRIBUTED_GATEWAY_CONNECTION_NOT_SUPPORTED: &str = "DistributedGatewayConnectionNotSupported";

fn lbs_vpc_index() -> IndexFn<LbService> {
    Box::new(|lbs: &LbService| {
        lbs.connectivity_path
            .as_deref()
            .and_then(vpc_id_from_path)
            .map(|id| vec![id.to_string()])
            .unwrap_or_default()
    })
}

/// VPC lifecycle against NSX
pub struct VpcService {
    pub(crate) nsx: Arc<dyn NsxClientTrait>,
    cluster: String,
    use_avi_lb: bool,
    registry: Arc<VpcNetworkConfigRegistry>,
    pub(crate) vpc_store: Arc<ResourceStore<Vpc>>,
    pub(crate) lbs_store: Arc<ResourceStore<LbService>>,
    lb_provider: Mutex<Option<LbProvider>>,
    realize: RealizeSettings,
    alb_probe: RetryPolicy,
}

impl std::fmt::Debug for VpcService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VpcService")
            .field("cluster", &self.cluster)
            .field("use_avi_lb", &self.use_avi_lb)
            .field("vpcs", &self.vpc_store.len())
            .finish_non_exhaustive()
    }
}

impl VpcService {
    pub fn new(
        nsx: Arc<dyn NsxClientTrait>,
        cluster: impl Into<String>,
        use_avi_lb: bool,
        registry: Arc<VpcNetworkConfigRegistry>,
        realize: RealizeSettings,
    ) -> Self {
        let vpc_store = ResourceStore::new()
            .with_index(VPC_INDEX_NAMESPACE, tag_index(TAG_SCOPE_NAMESPACE))
            .with_index(VPC_INDEX_NAMESPACE_UID, tag_index(TAG_SCOPE_NAMESPACE_UID));
        let lbs_store = ResourceStore::new().with_index(LBS_INDEX_VPC_ID, lbs_vpc_index());
        Self {
            nsx,
            cluster: cluster.into(),
            use_avi_lb,
            registry,
            vpc_store: Arc::new(vpc_store),
            lbs_store: Arc::new(lbs_store),
            lb_provider: Mutex::new(None),
            realize,
            alb_probe: RetryPolicy::alb_probe(),
        }
    }

    /// Override the ALB probe retry policy
    #[must_use]
    pub fn with_alb_probe_policy(mut self, policy: RetryPolicy) -> Self {
        self.alb_probe = policy;
        self
    }

    /// Load the cluster's VPCs and load balancer services from NSX
    pub async fn initialize(&self) -> Result<(), ControllerError> {
        let vpcs = self.nsx.list_vpcs(&self.cluster).await?;
        let lbs = self.nsx.list_lb_services(&self.cluster).await?;
        info!("Loaded {} VPCs and {} load balancer services from NSX", vpcs.len(), lbs.len());
        self.vpc_store.replace_all(vpcs)?;
        self.lbs_store.replace_all(lbs)?;
        Ok(())
    }

    /// VPCs tagged with the namespace name
    pub fn get_vpcs_by_namespace(&self, namespace: &str) -> Vec<Vpc> {
        self.vpc_store
            .by_index(VPC_INDEX_NAMESPACE, namespace)
            .unwrap_or_default()
    }

    pub fn get_vpc_by_namespace_uid(&self, uid: &str) -> Option<Vpc> {
        self.vpc_store
            .by_index(VPC_INDEX_NAMESPACE_UID, uid)
            .unwrap_or_default()
            .into_iter()
            .next()
    }

    /// All VPCs owned by this cluster, keyed by path
    pub fn list_vpcs(&self) -> Vec<Vpc> {
        self.vpc_store.list()
    }

    pub(crate) fn lbs_for_vpc(&self, vpc_id: &str) -> Vec<LbService> {
        self.lbs_store
            .by_index(LBS_INDEX_VPC_ID, vpc_id)
            .unwrap_or_default()
    }

    /// Path of the NSX load balancer service attached to the VPC
    pub fn lbs_path_for_vpc(&self, vpc_path: &str) -> Option<String> {
        let vpc_id = vpc_id_from_path(vpc_path)?;
        self.lbs_for_vpc(vpc_id).into_iter().map(|l| l.path).find(|p| !p.is_empty())
    }

    /// Parsed identifiers of the VPCs serving a namespace: the pre-created
    /// VPC of its configuration, or the VPCs in the store
    pub fn list_vpc_info(&self, namespace: &str) -> Vec<VpcInfo> {
        if let Some(nc) = self.registry.config_for_namespace(namespace).filter(VpcNetworkConfigInfo::is_pre_created) {
            return parse_vpc_path(&nc.vpc_path).into_iter().collect();
        }
        self.get_vpcs_by_namespace(namespace)
            .iter()
            .filter_map(|v| parse_vpc_path(&v.path).ok())
            .collect()
    }

    /// Network configuration governing the namespace
    pub fn resolve_network_config(&self, namespace: &str) -> Result<VpcNetworkConfigInfo, ControllerError> {
        self.registry
            .config_for_namespace(namespace)
            .ok_or_else(|| ControllerError::ResourceNotFound(format!("VPCNetworkConfiguration for namespace {namespace}")))
    }

    /// Ensure the namespace's VPC exists and matches its configuration.
    ///
    /// Pre-created VPCs are only looked up. Namespaces sharing another
    /// namespace's VPC reuse it. Otherwise the VPC (with its attachment and,
    /// for the NSX provider, its load balancer service) is created or
    /// updated and realization is awaited before it is recorded.
    pub async fn create_or_update_vpc(
        &self,
        namespace: &str,
        lookup: &dyn NamespaceLookup,
        lb_provider: LbProvider,
    ) -> Result<Vpc, ControllerError> {
        let ns = lookup
            .get_namespace(namespace)
            .await?
            .ok_or_else(|| ControllerError::NamespaceNotFound(namespace.to_string()))?;
        let nc = self.resolve_network_config(namespace)?;

        if nc.is_pre_created() {
            parse_vpc_path(&nc.vpc_path)
                .map_err(|e| ControllerError::InvalidPath(format!("pre-created VPC of {}: {}", nc.name, e)))?;
            debug!("Namespace {} uses pre-created VPC {}", namespace, nc.vpc_path);
            return Ok(self.nsx.get_vpc(&nc.vpc_path).await?);
        }

        if let Some(target) = shared_vpc_namespace(&ns).filter(|t| t != namespace) {
            lookup
                .get_namespace(&target)
                .await?
                .ok_or_else(|| ControllerError::NamespaceNotFound(target.clone()))?;
            return self
                .get_vpcs_by_namespace(&target)
                .into_iter()
                .next()
                .ok_or(ControllerError::SharedVpcNotReady(target));
        }

        let ns_uid = ns.uid().unwrap_or_default();
        let existing = self.get_vpc_by_namespace_uid(&ns_uid);
        if let Some(vpc) = &existing {
            let provider_changed = self.is_lb_provider_changed(Some(vpc), lb_provider);
            let ips_drifted = !nc.private_ips.is_empty() && vpc.private_ips != nc.private_ips;
            if !provider_changed && !ips_drifted {
                debug!("VPC {} of namespace {} is up to date", vpc.path, namespace);
                return Ok(vpc.clone());
            }
            info!("Updating VPC {} of namespace {}", vpc.path, namespace);
        }

        let vpc_id = existing
            .as_ref()
            .map(|v| v.id.clone())
            .unwrap_or_else(|| generate_id(namespace, &ns_uid));
        let vpc_path = format!("{}/vpcs/{}", nc.project_path(), vpc_id);
        let tags = namespace_tags(&ns, &self.cluster);

        let vpc = Vpc {
            id: vpc_id.clone(),
            display_name: normalize_name(namespace),
            tags: tags.clone(),
            private_ips: nc.private_ips.clone(),
            load_balancer_vpc_endpoint: Some(LoadBalancerVpcEndpoint {
                enabled: Some(lb_provider == LbProvider::Avi),
            }),
            short_id: nc.short_id.clone(),
            resource_type: "Vpc".to_string(),
            ..Default::default()
        };
        let attachment = VpcAttachment {
            id: DEFAULT_ATTACHMENT_ID.to_string(),
            display_name: DEFAULT_ATTACHMENT_ID.to_string(),
            vpc_connectivity_profile: nc.connectivity_profile_path(),
            ..Default::default()
        };
        let lb_service = (lb_provider == LbProvider::Nsx).then(|| LbService {
            id: DEFAULT_LBS_ID.to_string(),
            path: format!("{vpc_path}/vpc-lbs/{DEFAULT_LBS_ID}"),
            display_name: normalize_name(namespace),
            connectivity_path: Some(vpc_path.clone()),
            size: Some(DEFAULT_LBS_SIZE.to_string()),
            tags,
        });

        let root = OrgRoot {
            org: nc.org.clone(),
            project: nc.nsx_project.clone(),
            vpc,
            attachment: Some(attachment),
            lb_service: lb_service.clone(),
            marked_for_delete: false,
        };
        info!("Writing VPC {} for namespace {} (lb provider {})", vpc_path, namespace, lb_provider);
        self.nsx.patch_org_root(&root).await?;

        if let Err(e) = wait_for_realization(self.nsx.as_ref(), &vpc_path, &self.realize).await {
            if matches!(e, ControllerError::RealizationFailed { .. }) && existing.is_none() {
                self.rollback_vpc(root).await;
            }
            return Err(e);
        }
        if let Some(lbs) = &lb_service {
            wait_for_realization(self.nsx.as_ref(), &lbs.path, &self.realize).await?;
        }
        let attachment_path = format!("{vpc_path}/attachments/{DEFAULT_ATTACHMENT_ID}");
        wait_for_realization(self.nsx.as_ref(), &attachment_path, &self.realize).await?;

        let realized = self.nsx.get_vpc(&vpc_path).await?;
        self.vpc_store.apply(realized.clone())?;
        if let Some(lbs) = lb_service {
            self.lbs_store.apply(lbs)?;
        }
        Ok(realized)
    }

    async fn rollback_vpc(&self, mut root: OrgRoot) {
        root.marked_for_delete = true;
        if let Err(e) = self.nsx.patch_org_root(&root).await {
            warn!("Failed to roll back unrealized VPC {}: {}", root.vpc.id, e);
        }
    }

    /// Delete a VPC (recursively) and drop it and its load balancer services
    /// from the stores. A VPC already gone from NSX counts as deleted.
    pub async fn delete_vpc(&self, path: &str) -> Result<(), ControllerError> {
        let info = parse_vpc_path(path)
            .map_err(|e| ControllerError::InvalidPath(e.to_string()))?;

        match self.nsx.delete_vpc(path).await {
            Ok(()) => info!("Deleted VPC {}", path),
            Err(e) if e.is_not_found() => debug!("VPC {} already deleted", path),
            Err(e) => return Err(e.into()),
        }

        for lbs in self.lbs_for_vpc(&info.vpc_id) {
            self.lbs_store.delete(&lbs.store_key())?;
        }
        self.vpc_store.delete(path)?;
        Ok(())
    }

    /// Delete every VPC owned by the cluster, removing the AVI subnet ports
    /// first. Stops at `timeout`; failures are aggregated.
    pub async fn cleanup_vpcs(&self, timeout: Duration) -> Result<(), ControllerError> {
        let deadline = Instant::now() + timeout;
        let mut errors = Vec::new();

        for vpc in self.vpc_store.list() {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                errors.push(ControllerError::Reconciliation("cleanup deadline exceeded".to_string()));
                break;
            };
            match tokio::time::timeout(remaining, self.cleanup_one(&vpc)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(_) => {
                    errors.push(ControllerError::Reconciliation(format!(
                        "cleanup deadline exceeded while deleting VPC {}",
                        vpc.path
                    )));
                    break;
                }
            }
        }

        MultiError::into_result("failed to clean up VPCs", errors)
    }

    async fn cleanup_one(&self, vpc: &Vpc) -> Result<(), ControllerError> {
        for port in self.nsx.list_avi_subnet_ports(&vpc.path).await? {
            match self.nsx.delete_subnet_port(&port.path).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.delete_vpc(&vpc.path).await
    }

    /// Pre-created configurations need nothing else; auto-created ones need
    /// private IPs
    pub fn validate_network_config(nc: &VpcNetworkConfigInfo) -> bool {
        nc.is_pre_created() || !nc.private_ips.is_empty()
    }

    /// Check that the project transit gateway is connected through a
    /// supported gateway connection. Returns `(ok, reason)`.
    pub async fn validate_gateway_connection_status(
        &self,
        nc: &VpcNetworkConfigInfo,
    ) -> Result<(bool, &'static str), ControllerError> {
        let profile = self
            .nsx
            .get_vpc_connectivity_profile(&nc.connectivity_profile_path())
            .await?;
        let Some(tgw_path) = profile.transit_gateway_path.filter(|p| !p.is_empty()) else {
            return Ok((true, ""));
        };

        let attachments = self.nsx.list_transit_gateway_attachments(&tgw_path).await?;
        let Some(attachment) = attachments.first() else {
            return Ok((false, REASON_GATEWAY_CONNECTION_NOT_SET));
        };
        let connection_path = attachment.connection_path.as_deref().unwrap_or_default();
        let connection_type = gateway_connection_type(connection_path)?;
        if connection_type == DISTRIBUTED_GATEWAY_CONNECTION_TYPE {
            return Ok((false, REASON_DISTRIBUTED_GATEWAY_CONNECTION_NOT_SUPPORTED));
        }
        Ok((true, ""))
    }
}
