//! Periodic garbage collection.
//!
//! Compares the NSX objects in the local stores with the live Kubernetes
//! objects owning them and deletes the orphans: subnets whose SubnetSet or
//! Subnet is gone, and VPCs whose namespace is gone.

use super::Reconciler;
use crate::error::{ControllerError, MultiError};
use crate::tags::TAG_SCOPE_NAMESPACE_UID;
use crds::{Subnet, SubnetSet};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ListParams;
use kube::{Api, Resource, ResourceExt};
use nsx_client::{Vpc, find_tag};
use std::collections::HashSet;
use tracing::{info, warn};

/// VPCs owned by a namespace UID that is not live. VPCs without the
/// namespace UID tag are never collected.
pub fn orphaned_vpcs(vpcs: Vec<Vpc>, live_namespace_uids: &HashSet<String>) -> Vec<Vpc> {
    vpcs.into_iter()
        .filter(|vpc| find_tag(&vpc.tags, TAG_SCOPE_NAMESPACE_UID).is_some_and(|uid| !live_namespace_uids.contains(uid)))
        .collect()
}

async fn live_uids<K>(api: Api<K>) -> Result<HashSet<String>, ControllerError>
where
    K: Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    Ok(api
        .list(&ListParams::default())
        .await?
        .items
        .iter()
        .filter_map(ResourceExt::uid)
        .collect())
}

impl Reconciler {
    /// One GC sweep. Every orphan is attempted; failures are joined.
    pub async fn collect_garbage(&self) -> Result<(), ControllerError> {
        // Fresh port and binding map views so in-use subnets are never deleted
        self.services.ports.initialize().await?;
        self.services.binding_maps.initialize().await?;

        let set_uids = live_uids(Api::<SubnetSet>::all(self.client.clone())).await?;
        let subnet_uids = live_uids(Api::<Subnet>::all(self.client.clone())).await?;
        let report = self.services.subnet.collect_garbage(&set_uids, &subnet_uids).await;
        self.metrics.record_gc_deleted("Subnet", report.deleted);
        let mut errors = report.errors;

        let namespace_uids = live_uids(Api::<Namespace>::all(self.client.clone())).await?;
        let mut deleted_vpcs = 0;
        for vpc in orphaned_vpcs(self.services.vpc.list_vpcs(), &namespace_uids) {
            info!("Collecting VPC {} of deleted namespace", vpc.path);
            match self.services.vpc.delete_vpc(&vpc.path).await {
                Ok(()) => deleted_vpcs += 1,
                Err(e) => {
                    warn!("Failed to collect VPC {}: {}", vpc.path, e);
                    errors.push(e);
                }
            }
        }
        self.metrics.record_gc_deleted("VPC", deleted_vpcs);

        MultiError::into_result("garbage collection failed", errors)
    }
}
