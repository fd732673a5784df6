//! SubnetSet reconciliation.
//!
//! A SubnetSet referenced by a SubnetConnectionBindingMap carries the
//! binding finalizer and cannot go away until the last binding map is
//! removed. Unreferenced SubnetSets have no finalizer; their subnets are
//! removed when the delete event arrives, and by the GC otherwise.

use super::{Reconciler, SUBNETSET_BINDING_FINALIZER, default_subnet_size_for, patch_status, set_finalizer};
use crate::error::ControllerError;
use crate::services::shared_vpc_namespace;
use crate::services::subnet::{SubnetParams, subnet_info};
use crds::{Condition, SubnetConnectionBindingMap, SubnetInfo, SubnetSet, SubnetSetStatus, merge_condition};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ListParams;
use kube::{Api, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use nsx_client::VpcSubnet;
use tracing::{debug, info, warn};

pub const REASON_SUBNETSET_IN_USE: &str = "SubnetSetInUse";

/// Names of the binding maps targeting the SubnetSet `name`, sorted
pub fn bindings_targeting(maps: &[SubnetConnectionBindingMap], name: &str) -> Vec<String> {
    let mut names: Vec<String> = maps
        .iter()
        .filter(|m| m.spec.target_subnet_set_name.as_deref() == Some(name))
        .map(ResourceExt::name_any)
        .collect();
    names.sort();
    names
}

pub fn in_use_message(bindings: &[String]) -> String {
    format!(
        "SubnetSet is used by SubnetConnectionBindingMap {} and not able to delete",
        bindings.join(",")
    )
}

/// SubnetSet a binding map change should requeue
pub fn subnet_set_for_binding_map(map: &SubnetConnectionBindingMap) -> Option<ObjectRef<SubnetSet>> {
    let target = map.spec.target_subnet_set_name.as_deref().filter(|t| !t.is_empty())?;
    let namespace = map.namespace()?;
    Some(ObjectRef::new(target).within(&namespace))
}

/// Status reporting `subnets`, with `condition` merged.
/// `None` when nothing changed.
pub fn subnet_set_status(
    current: Option<&SubnetSetStatus>,
    subnets: &[VpcSubnet],
    condition: Condition,
) -> Option<SubnetSetStatus> {
    let mut status = current.cloned().unwrap_or_default();
    let mut infos: Vec<SubnetInfo> = subnets.iter().map(subnet_info).collect();
    infos.sort_by(|a, b| a.network_addresses.cmp(&b.network_addresses));
    let subnets_changed = status.subnets != infos;
    status.subnets = infos;
    let condition_changed = merge_condition(&mut status.conditions, condition);
    (subnets_changed || condition_changed).then_some(status)
}

impl Reconciler {
    pub async fn reconcile_subnet_set(&self, set: &SubnetSet) -> Result<(), ControllerError> {
        let namespace = set.namespace().unwrap_or_default();
        let name = set.name_any();
        let api: Api<SubnetSet> = Api::namespaced(self.client.clone(), &namespace);

        let maps: Api<SubnetConnectionBindingMap> = Api::namespaced(self.client.clone(), &namespace);
        let bindings = bindings_targeting(&maps.list(&ListParams::default()).await?.items, &name);

        if set.metadata.deletion_timestamp.is_some() {
            if !bindings.is_empty() {
                let message = in_use_message(&bindings);
                warn!("SubnetSet {}/{}: {}", namespace, name, message);
                let condition = Condition::not_ready(REASON_SUBNETSET_IN_USE, message.clone());
                let mut status = set.status.clone().unwrap_or_default();
                if merge_condition(&mut status.conditions, condition) {
                    patch_status(&api, &name, serde_json::to_value(status)?).await?;
                }
                return Err(ControllerError::SubnetSetInUse(message));
            }
            self.services.subnet.delete_subnet_set(set).await?;
            return set_finalizer(&api, set, SUBNETSET_BINDING_FINALIZER, false).await;
        }

        set_finalizer(&api, set, SUBNETSET_BINDING_FINALIZER, !bindings.is_empty()).await?;

        let (vpc_path, namespace_uid) = self.namespace_vpc(&namespace).await?;
        let default_size = default_subnet_size_for(&self.registry, &namespace, self.default_subnet_size);
        let params = SubnetParams::for_subnet_set(set, default_size);
        let recorded = set.status.as_ref().is_some_and(|s| !s.subnets.is_empty());
        let known = self.services.subnet.subnets_by_subnet_set(&set.uid().unwrap_or_default());

        let result = if recorded && known.is_empty() {
            info!("Restoring SubnetSet {}/{} from its status", namespace, name);
            self.services
                .subnet
                .restore_subnet_set(set, &vpc_path, &params, namespace_uid.as_deref())
                .await
        } else {
            self.services
                .subnet
                .ensure_subnet_set(set, &vpc_path, &params, namespace_uid.as_deref())
                .await
        };
        let subnets = match result {
            Ok(subnets) => subnets,
            Err(e) => {
                self.publish_failure(set, "CreateSubnet", &e).await;
                let mut status = set.status.clone().unwrap_or_default();
                if merge_condition(&mut status.conditions, Condition::not_ready("SubnetSetNotReady", e.to_string())) {
                    patch_status(&api, &name, serde_json::to_value(status)?).await?;
                }
                return Err(e);
            }
        };

        match subnet_set_status(set.status.as_ref(), &subnets, Condition::ready()) {
            Some(status) => patch_status(&api, &name, serde_json::to_value(status)?).await,
            None => {
                debug!("SubnetSet {}/{} status is up to date", namespace, name);
                Ok(())
            }
        }
    }

    /// Remove the subnets of a SubnetSet that is already gone from the API
    /// server. Failures are left to the GC.
    pub async fn handle_subnet_set_deleted(&self, set: &SubnetSet) {
        let key = format!("{}/{}", set.namespace().unwrap_or_default(), set.name_any());
        match self.services.subnet.delete_subnet_set(set).await {
            Ok(()) => info!("Deleted subnets of SubnetSet {}", key),
            Err(e) => warn!("Failed to delete subnets of SubnetSet {} (GC will retry): {}", key, e),
        }
    }

    /// Path of the VPC serving the namespace (following a shared VPC) and
    /// the namespace UID
    pub(crate) async fn namespace_vpc(&self, namespace: &str) -> Result<(String, Option<String>), ControllerError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = api
            .get_opt(namespace)
            .await?
            .ok_or_else(|| ControllerError::NamespaceNotFound(namespace.to_string()))?;
        let owner = shared_vpc_namespace(&ns).unwrap_or_else(|| namespace.to_string());
        let vpc_path = self
            .services
            .vpc
            .list_vpc_info(&owner)
            .first()
            .map(nsx_client::VpcInfo::path)
            .ok_or_else(|| ControllerError::NetworkNotReady(format!("VPC of namespace {owner} is not ready")))?;
        Ok((vpc_path, ns.uid()))
    }
}
