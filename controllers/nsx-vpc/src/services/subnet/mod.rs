//! Subnet service.
//!
//! Allocates NSX subnets for SubnetSet and Subnet CRs, keeps their tags and
//! DHCP mode in line with the CR, and deletes subnets whose owner is gone.
//! A subnet is never deleted while ports sit on it.
//!
//! Store indexes:
//! - `subnetset_uid` / `subnet_uid`: owner CR UID tags
//! - `vpc_path`: parent VPC; a recreated SubnetSet (same name, new UID)
//!   finds the subnets of its predecessor among the VPC's subnets

pub mod locks;


pub use locks::SubnetSetLocks;

use super::binding_map::BindingMapService;
use super::subnetport::SubnetPortService;
use super::vpc::{RealizeSettings, wait_for_realization};
use crate::error::{ControllerError, MultiError};
use crate::store::{IndexFn, ResourceStore, tag_index};
use crate::tags::{
    TAG_SCOPE_NAMESPACE, TAG_SCOPE_SUBNET_UID, TAG_SCOPE_SUBNETSET_NAME, TAG_SCOPE_SUBNETSET_UID,
    Taggable,
};
use crate::util::{gateway_and_dhcp, generate_id, prefix_for_size, random_index, usable_capacity};
use crds::{AccessMode, Subnet, SubnetInfo, SubnetSet, SubnetStatus};
use ipnetwork::Ipv4Network;
use kube::ResourceExt;
use nsx_client::{
    NsxClientTrait, SubnetDhcpConfig as NsxDhcpConfig, Tag, VpcSubnet, find_tag, parse_subnet_path,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Index of subnets by owning SubnetSet UID
pub const SUBNET_INDEX_SUBNETSET_UID: &str = "subnetset_uid";
/// Index of subnets by owning Subnet UID
pub const SUBNET_INDEX_SUBNET_UID: &str = "subnet_uid";
/// Index of subnets by parent VPC path
pub const SUBNET_INDEX_VPC: &str = "vpc_path";

/// NSX DHCP mode with a DHCP server on the subnet
pub const DHCP_SERVER: &str = "DHCP_SERVER";
/// NSX DHCP mode without DHCP
pub const DHCP_DEACTIVATED: &str = "DHCP_DEACTIVATED";

fn vpc_index() -> IndexFn<VpcSubnet> {
    Box::new(|subnet: &VpcSubnet| {
        (!subnet.parent_path.is_empty())
            .then(|| subnet.parent_path.clone())
            .into_iter()
            .collect()
    })
}

/// Whether `subnet` was created for the SubnetSet `name` in `namespace`,
/// whatever its UID
fn belongs_to_subnet_set(subnet: &VpcSubnet, namespace: &str, name: &str) -> bool {
    find_tag(&subnet.tags, TAG_SCOPE_NAMESPACE) == Some(namespace)
        && find_tag(&subnet.tags, TAG_SCOPE_SUBNETSET_NAME) == Some(name)
}

/// Desired shape of an NSX subnet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetParams {
    pub access_mode: AccessMode,
    pub ipv4_subnet_size: u32,
    /// Explicit CIDRs; NSX allocates from the VPC when empty
    pub ip_addresses: Vec<String>,
    pub dhcp_mode: &'static str,
}

impl SubnetParams {
    pub fn for_subnet_set(set: &SubnetSet, default_size: u32) -> Self {
        Self {
            access_mode: set.spec.access_mode.unwrap_or_default(),
            ipv4_subnet_size: set.spec.ipv4_subnet_size.unwrap_or(default_size),
            ip_addresses: Vec::new(),
            dhcp_mode: set
                .spec
                .subnet_dhcp_config
                .as_ref()
                .map_or(DHCP_DEACTIVATED, crds::SubnetDhcpConfig::nsx_mode),
        }
    }

    pub fn for_subnet(subnet: &Subnet, default_size: u32) -> Self {
        Self {
            access_mode: subnet.spec.access_mode.unwrap_or_default(),
            ipv4_subnet_size: subnet.spec.ipv4_subnet_size.unwrap_or(default_size),
            ip_addresses: subnet.spec.ip_addresses.clone(),
            dhcp_mode: subnet
                .spec
                .subnet_dhcp_config
                .as_ref()
                .map_or(DHCP_DEACTIVATED, crds::SubnetDhcpConfig::nsx_mode),
        }
    }
}

/// Outcome of a batch deletion. Every subnet of the batch was attempted.
#[derive(Debug, Default)]
pub struct SubnetDeletion {
    /// At least one subnet was skipped because ports remain on it
    pub has_stale_port: bool,
    pub errors: Vec<ControllerError>,
}

impl SubnetDeletion {
    /// `has_stale_port`, or the joined errors
    pub fn into_result(self) -> Result<bool, ControllerError> {
        MultiError::into_result("multiple errors occurred while deleting Subnets", self.errors)?;
        Ok(self.has_stale_port)
    }
}

/// Result of one garbage collection sweep
#[derive(Debug, Default)]
pub struct GcReport {
    /// Subnets removed from NSX
    pub deleted: usize,
    pub errors: Vec<ControllerError>,
}

/// Owner of the subnet store; allocates and deletes NSX VPC subnets
pub struct SubnetService {
    nsx: Arc<dyn NsxClientTrait>,
    cluster: String,
    pub(crate) subnet_store: ResourceStore<VpcSubnet>,
    ports: Arc<SubnetPortService>,
    binding_maps: Arc<BindingMapService>,
    locks: SubnetSetLocks,
    realize: RealizeSettings,
}

impl std::fmt::Debug for SubnetService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubnetService")
            .field("cluster", &self.cluster)
            .field("subnets", &self.subnet_store.len())
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl SubnetService {
    /// Service with an empty store; call `initialize` before use
    pub fn new(
        nsx: Arc<dyn NsxClientTrait>,
        cluster: impl Into<String>,
        ports: Arc<SubnetPortService>,
        binding_maps: Arc<BindingMapService>,
        realize: RealizeSettings,
    ) -> Self {
        let subnet_store = ResourceStore::new()
            .with_index(SUBNET_INDEX_SUBNETSET_UID, tag_index(TAG_SCOPE_SUBNETSET_UID))
            .with_index(SUBNET_INDEX_SUBNET_UID, tag_index(TAG_SCOPE_SUBNET_UID))
            .with_index(SUBNET_INDEX_VPC, vpc_index());
        Self {
            nsx,
            cluster: cluster.into(),
            subnet_store,
            ports,
            binding_maps,
            locks: SubnetSetLocks::new(),
            realize,
        }
    }

    pub async fn initialize(&self) -> Result<(), ControllerError> {
        let subnets = self.nsx.list_vpc_subnets(&self.cluster).await?;
        info!("Loaded {} subnets from NSX", subnets.len());
        self.subnet_store.replace_all(subnets)?;
        Ok(())
    }

    pub fn locks(&self) -> &SubnetSetLocks {
        &self.locks
    }

    fn by_index(&self, index: &str, value: &str) -> Vec<VpcSubnet> {
        let mut subnets = self.subnet_store.by_index(index, value).unwrap_or_default();
        subnets.sort_by(|a, b| a.path.cmp(&b.path));
        subnets
    }

    pub fn subnets_by_subnet_set(&self, uid: &str) -> Vec<VpcSubnet> {
        self.by_index(SUBNET_INDEX_SUBNETSET_UID, uid)
    }

    pub fn subnets_by_subnet(&self, uid: &str) -> Vec<VpcSubnet> {
        self.by_index(SUBNET_INDEX_SUBNET_UID, uid)
    }

    /// Subnets of every owner under the VPC
    pub fn subnets_by_vpc(&self, vpc_path: &str) -> Vec<VpcSubnet> {
        self.by_index(SUBNET_INDEX_VPC, vpc_path)
    }

    pub fn list_subnets(&self) -> Vec<VpcSubnet> {
        self.subnet_store.list()
    }

    /// Patch a subnet under the VPC and wait for it to be realized. A new
    /// subnet whose realization fails is removed again.
    pub async fn create_or_update_subnet(
        &self,
        vpc_path: &str,
        id: &str,
        tags: Vec<Tag>,
        params: &SubnetParams,
    ) -> Result<VpcSubnet, ControllerError> {
        if params.ip_addresses.is_empty() {
            prefix_for_size(params.ipv4_subnet_size)?;
        }
        let desired = VpcSubnet {
            id: id.to_string(),
            display_name: id.to_string(),
            tags,
            ip_addresses: params.ip_addresses.clone(),
            ipv4_subnet_size: Some(params.ipv4_subnet_size),
            access_mode: Some(params.access_mode.as_nsx().to_string()),
            subnet_dhcp_config: Some(NsxDhcpConfig {
                mode: Some(params.dhcp_mode.to_string()),
            }),
            ..Default::default()
        };

        let patched = self.nsx.patch_vpc_subnet(vpc_path, &desired).await?;
        let existed = self.subnet_store.get_by_key(&patched.path).is_some();
        debug!("Patched subnet {} (existing: {})", patched.path, existed);

        if let Err(e) = wait_for_realization(self.nsx.as_ref(), &patched.path, &self.realize).await {
            if matches!(e, ControllerError::RealizationFailed { .. }) && !existed {
                if let Err(del) = self.nsx.delete_vpc_subnet(&patched.path).await {
                    warn!("Failed to remove unrealized subnet {}: {}", patched.path, del);
                }
            }
            return Err(e);
        }

        let realized = self.nsx.get_vpc_subnet(&patched.path).await?;
        self.subnet_store.apply(realized.clone())?;
        Ok(realized)
    }

    fn subnet_size(subnet: &VpcSubnet) -> Option<u32> {
        subnet
            .ipv4_subnet_size
            .or_else(|| subnet.ip_addresses.first().and_then(|cidr| cidr_size(cidr)))
    }

    /// First subnet of the set with a free address, counting the ports
    /// already allocated on it
    pub fn get_available_subnet(&self, subnet_set_uid: &str) -> Option<VpcSubnet> {
        self.subnets_by_subnet_set(subnet_set_uid).into_iter().find(|subnet| {
            let capacity = Self::subnet_size(subnet).map_or(0, usable_capacity);
            let used = u32::try_from(self.ports.port_count(&subnet.path)).unwrap_or(u32::MAX);
            capacity > used
        })
    }

    /// Bring the SubnetSet's subnets in line with the CR and make sure one of
    /// them has room for another port. Returns the set's subnets.
    pub async fn ensure_subnet_set(
        &self,
        set: &SubnetSet,
        vpc_path: &str,
        params: &SubnetParams,
        namespace_uid: Option<&str>,
    ) -> Result<Vec<VpcSubnet>, ControllerError> {
        let uid = set.owner_uid();
        let namespace = set.namespace().unwrap_or_default();
        let _guard = self.locks.acquire(&uid).await;

        let tags = set.build_tags(&self.cluster, namespace_uid);
        let known = self.subnets_by_vpc(vpc_path);
        self.update_subnet_set(&namespace, &known, &tags, params.dhcp_mode).await?;

        if self.get_available_subnet(&uid).is_none() {
            let index_name = format!("{}_{}", set.name_any(), random_index());
            let id = generate_id(&index_name, &uid);
            info!("Allocating subnet {} for SubnetSet {}/{}", id, namespace, set.name_any());
            self.create_or_update_subnet(vpc_path, &id, tags, params).await?;
        }
        Ok(self.subnets_by_subnet_set(&uid))
    }

    /// Apply `tags` and `dhcp_mode` to the subnets of a SubnetSet.
    ///
    /// `vpc_subnets` may hold subnets of any owner; only those tagged with
    /// the SubnetSet's namespace and name are considered. Subnets carrying
    /// the UID in `tags` are updated when they drifted; subnets left by an
    /// earlier CR of the same name (another UID) are deleted. Returns the
    /// current subnets.
    pub async fn update_subnet_set(
        &self,
        namespace: &str,
        vpc_subnets: &[VpcSubnet],
        tags: &[Tag],
        dhcp_mode: &str,
    ) -> Result<Vec<VpcSubnet>, ControllerError> {
        let uid = find_tag(tags, TAG_SCOPE_SUBNETSET_UID).unwrap_or_default();
        let name = find_tag(tags, TAG_SCOPE_SUBNETSET_NAME).unwrap_or_default();
        let (current, stale): (Vec<&VpcSubnet>, Vec<&VpcSubnet>) = vpc_subnets
            .iter()
            .filter(|s| belongs_to_subnet_set(s, namespace, name))
            .partition(|s| find_tag(&s.tags, TAG_SCOPE_SUBNETSET_UID) == Some(uid));

        let mut errors = Vec::new();
        let mut updated = Vec::with_capacity(current.len());
        for subnet in current {
            let mode = subnet
                .subnet_dhcp_config
                .as_ref()
                .and_then(|c| c.mode.as_deref())
                .unwrap_or(DHCP_DEACTIVATED);
            if subnet.tags == tags && mode == dhcp_mode {
                updated.push(subnet.clone());
                continue;
            }

            let mut desired = subnet.clone();
            desired.tags = tags.to_vec();
            desired.subnet_dhcp_config = Some(NsxDhcpConfig {
                mode: Some(dhcp_mode.to_string()),
            });
            match self.nsx.patch_vpc_subnet(&subnet.parent_path, &desired).await {
                Ok(patched) => {
                    debug!("Updated subnet {} of SubnetSet {}/{}", patched.path, namespace, name);
                    self.subnet_store.apply(patched.clone())?;
                    updated.push(patched);
                }
                Err(e) => errors.push(e.into()),
            }
        }

        if !stale.is_empty() {
            let stale: Vec<VpcSubnet> = stale.into_iter().cloned().collect();
            info!(
                "Deleting {} subnet(s) left by a previous SubnetSet {}/{}",
                stale.len(),
                namespace,
                name
            );
            let deletion = self.delete_subnets(&stale, true).await;
            if deletion.has_stale_port {
                warn!("Stale subnets of SubnetSet {}/{} still have ports", namespace, name);
            }
            errors.extend(deletion.errors);
        }

        MultiError::into_result(format!("failed to update SubnetSet {namespace}/{name}"), errors)?;
        Ok(updated)
    }

    /// Delete NSX subnets, optionally with their binding maps first.
    ///
    /// Every subnet is attempted. A binding map failure skips that subnet;
    /// a subnet with live ports is skipped and flagged.
    pub async fn delete_subnets(&self, subnets: &[VpcSubnet], delete_binding_maps: bool) -> SubnetDeletion {
        let mut result = SubnetDeletion::default();
        for subnet in subnets {
            if delete_binding_maps {
                if let Err(e) = self.binding_maps.delete_for_subnet(&subnet.path).await {
                    result.errors.push(ControllerError::delete_failed(
                        format!("NSX SubnetConnectionBindingMaps connected to NSX Subnet/{}", subnet.id),
                        e,
                    ));
                    continue;
                }
            }

            if self.ports.has_ports(&subnet.path) {
                info!("Subnet {} still has ports, skipping deletion", subnet.path);
                result.has_stale_port = true;
                continue;
            }

            match self.nsx.delete_vpc_subnet(&subnet.path).await {
                Ok(()) => info!("Deleted subnet {}", subnet.path),
                Err(e) if e.is_not_found() => debug!("Subnet {} already deleted", subnet.path),
                Err(e) => {
                    result
                        .errors
                        .push(ControllerError::delete_failed(format!("NSX Subnet/{}", subnet.id), e));
                    continue;
                }
            }
            if let Err(e) = self.subnet_store.delete(&subnet.path) {
                result.errors.push(e.into());
            }
        }
        result
    }

    async fn delete_owned(&self, uid: &str, subnets: Vec<VpcSubnet>, owner: &str) -> Result<(), ControllerError> {
        let guard = self.locks.acquire(uid).await;
        let has_stale_port = self.delete_subnets(&subnets, true).await.into_result()?;
        drop(guard);

        if has_stale_port {
            return Err(ControllerError::StalePort(format!(
                "failed to delete all Subnets of {owner}, hasStalePort: true"
            )));
        }
        self.locks.release(uid);
        Ok(())
    }

    /// Delete the subnets tagged with this SubnetSet's UID. Subnets of other
    /// generations of the name are left to `update_subnet_set` and the GC.
    pub async fn delete_subnet_set(&self, set: &SubnetSet) -> Result<(), ControllerError> {
        let uid = set.owner_uid();
        let owner = format!("SubnetSet {}/{}", set.namespace().unwrap_or_default(), set.name_any());
        self.delete_owned(&uid, self.subnets_by_subnet_set(&uid), &owner).await
    }

    /// Create or update the NSX subnet of a Subnet CR
    pub async fn ensure_subnet(
        &self,
        subnet: &Subnet,
        vpc_path: &str,
        params: &SubnetParams,
        namespace_uid: Option<&str>,
    ) -> Result<VpcSubnet, ControllerError> {
        let uid = subnet.owner_uid();
        let _guard = self.locks.acquire(&uid).await;
        let id = self
            .subnets_by_subnet(&uid)
            .into_iter()
            .next()
            .map_or_else(|| generate_id(&subnet.name_any(), &uid), |s| s.id);
        let tags = subnet.build_tags(&self.cluster, namespace_uid);
        self.create_or_update_subnet(vpc_path, &id, tags, params).await
    }

    pub async fn delete_subnet(&self, subnet: &Subnet) -> Result<(), ControllerError> {
        let uid = subnet.owner_uid();
        let owner = format!(
            "Subnet {}/{}",
            subnet.namespace().unwrap_or_default(),
            subnet.name_any()
        );
        self.delete_owned(&uid, self.subnets_by_subnet(&uid), &owner).await
    }

    /// Rebuild the SubnetSet's subnets from the addresses recorded in its
    /// status: missing subnets are recreated with their recorded CIDRs and
    /// subnets whose CIDRs are not recorded are deleted.
    pub async fn restore_subnet_set(
        &self,
        set: &SubnetSet,
        vpc_path: &str,
        params: &SubnetParams,
        namespace_uid: Option<&str>,
    ) -> Result<Vec<VpcSubnet>, ControllerError> {
        let namespace = set.namespace().unwrap_or_default();
        let uid = set.owner_uid();
        let recorded: Vec<SubnetInfo> = set
            .status
            .as_ref()
            .map(|s| s.subnets.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|info| !info.network_addresses.is_empty())
            .collect();
        if recorded.is_empty() {
            return Ok(self.subnets_by_subnet_set(&uid));
        }

        let _guard = self.locks.acquire(&uid).await;
        let tags = set.build_tags(&self.cluster, namespace_uid);
        let existing = self.subnets_by_subnet_set(&uid);
        let mut errors = Vec::new();

        for info in &recorded {
            if existing.iter().any(|s| same_cidrs(&s.ip_addresses, &info.network_addresses)) {
                continue;
            }
            let mut restore = params.clone();
            restore.ip_addresses.clone_from(&info.network_addresses);
            if let Some(size) = info.network_addresses.first().and_then(|c| cidr_size(c)) {
                restore.ipv4_subnet_size = size;
            }
            let id = generate_id(&format!("{}_{}", set.name_any(), random_index()), &uid);
            info!("Restoring subnet {:?} of SubnetSet {}/{}", info.network_addresses, namespace, set.name_any());
            if let Err(e) = self.create_or_update_subnet(vpc_path, &id, tags.clone(), &restore).await {
                errors.push(e);
            }
        }

        let unrecorded: Vec<VpcSubnet> = existing
            .into_iter()
            .filter(|s| !recorded.iter().any(|info| same_cidrs(&s.ip_addresses, &info.network_addresses)))
            .collect();
        if !unrecorded.is_empty() {
            errors.extend(self.delete_subnets(&unrecorded, true).await.errors);
        }

        MultiError::into_result(
            format!("failed to restore SubnetSet {}/{}", namespace, set.name_any()),
            errors,
        )?;
        Ok(self.subnets_by_subnet_set(&uid))
    }

    /// Delete subnets whose owning SubnetSet or Subnet UID is not live.
    /// Subnets with malformed paths are skipped.
    pub async fn collect_garbage(
        &self,
        live_subnet_set_uids: &HashSet<String>,
        live_subnet_uids: &HashSet<String>,
    ) -> GcReport {
        let mut orphans: BTreeMap<String, Vec<VpcSubnet>> = BTreeMap::new();
        for subnet in self.subnet_store.list() {
            if let Err(e) = parse_subnet_path(&subnet.path) {
                warn!("Skipping subnet with malformed path: {}", e);
                continue;
            }
            let owner = find_tag(&subnet.tags, TAG_SCOPE_SUBNETSET_UID)
                .map(|uid| (uid.to_string(), live_subnet_set_uids))
                .or_else(|| find_tag(&subnet.tags, TAG_SCOPE_SUBNET_UID).map(|uid| (uid.to_string(), live_subnet_uids)));
            let Some((uid, live)) = owner else {
                continue;
            };
            if !live.contains(&uid) {
                orphans.entry(uid).or_default().push(subnet);
            }
        }

        let mut report = GcReport::default();
        for (uid, subnets) in orphans {
            let guard = self.locks.acquire(&uid).await;
            info!("Collecting {} orphaned subnet(s) of owner {}", subnets.len(), uid);
            let deletion = self.delete_subnets(&subnets, true).await;
            report.deleted += subnets
                .iter()
                .filter(|s| self.subnet_store.get_by_key(&s.path).is_none())
                .count();
            report.errors.extend(deletion.errors);
            drop(guard);

            if self.subnets_by_subnet_set(&uid).is_empty() && self.subnets_by_subnet(&uid).is_empty() {
                self.locks.release(&uid);
            }
        }
        report
    }

    /// Delete every subnet of the cluster (binding maps first)
    pub async fn cleanup(&self) -> Result<(), ControllerError> {
        let subnets = self.subnet_store.list();
        if self.delete_subnets(&subnets, true).await.into_result()? {
            return Err(ControllerError::StalePort(
                "subnets with ports remain after cleanup, hasStalePort: true".to_string(),
            ));
        }
        Ok(())
    }
}

/// Address count of a CIDR
fn cidr_size(cidr: &str) -> Option<u32> {
    let network: Ipv4Network = cidr.parse().ok()?;
    1u32.checked_shl(32 - u32::from(network.prefix()))
}

fn same_cidrs(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    !a.is_empty() && a == b
}

/// Addressing of a subnet as reported in CR status
pub fn subnet_info(subnet: &VpcSubnet) -> SubnetInfo {
    let mut info = SubnetInfo {
        network_addresses: subnet.ip_addresses.clone(),
        ..Default::default()
    };
    let dhcp_server = subnet
        .subnet_dhcp_config
        .as_ref()
        .and_then(|c| c.mode.as_deref())
        == Some(DHCP_SERVER);
    for cidr in &subnet.ip_addresses {
        match gateway_and_dhcp(cidr) {
            Ok((gateway, dhcp)) => {
                info.gateway_addresses.push(gateway);
                if dhcp_server && info.dhcp_server_address.is_none() {
                    info.dhcp_server_address = Some(dhcp);
                }
            }
            Err(e) => warn!("Subnet {}: {}", subnet.path, e),
        }
    }
    info
}

/// Status of a Subnet CR backed by `subnet` (conditions left empty)
pub fn subnet_status(subnet: &VpcSubnet) -> SubnetStatus {
    let info = subnet_info(subnet);
    SubnetStatus {
        network_addresses: info.network_addresses,
        gateway_addresses: info.gateway_addresses,
        dhcp_server_addresses: info.dhcp_server_address.into_iter().collect(),
        conditions: Vec::new(),
    }
}
