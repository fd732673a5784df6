//! Namespace reconciliation: one VPC per namespace (or a shared or
//! pre-created one) and the NetworkInfo CR describing it.

use super::{REPORTER_NAME, Reconciler};
use crate::error::ControllerError;
use crate::network_config::{VpcNetworkConfigInfo, network_config_name_for_namespace};
use crate::services::inventory::InventoryKey;
use crate::services::shared_vpc_namespace;
use crate::services::NamespaceLookup;
use crds::{NetworkInfo, NetworkInfoSpec, VPCState};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use kube_runtime::events::EventType;
use nsx_client::Vpc;
use tracing::{debug, info, warn};

/// NetworkInfo content for a namespace served by `vpc`
pub fn network_info_spec(vpc: &Vpc, nc: &VpcNetworkConfigInfo) -> NetworkInfoSpec {
    let private_ips = if vpc.private_ips.is_empty() {
        nc.private_ips.clone()
    } else {
        vpc.private_ips.clone()
    };
    NetworkInfoSpec {
        vpcs: vec![VPCState {
            name: if vpc.display_name.is_empty() { vpc.id.clone() } else { vpc.display_name.clone() },
            vpc_path: vpc.path.clone(),
            default_snat_ip: None,
            lb_subnet_path: None,
            private_ips,
        }],
    }
}

/// Whether tearing down the namespace should delete its VPC: only an
/// auto-created VPC the namespace owns and nobody else shares.
pub fn should_delete_vpc(shares_other: bool, nc: Option<&VpcNetworkConfigInfo>, sharing: &[String]) -> bool {
    !shares_other && !nc.is_some_and(VpcNetworkConfigInfo::is_pre_created) && sharing.is_empty()
}

impl Reconciler {
    /// Bind the namespace to its network configuration, ensure its VPC and
    /// publish the NetworkInfo. Terminating namespaces are torn down.
    pub async fn reconcile_namespace(&self, ns: &Namespace) -> Result<(), ControllerError> {
        if ns.metadata.deletion_timestamp.is_some() {
            return self.teardown_namespace(ns).await;
        }

        let name = ns.name_any();
        let config_name = network_config_name_for_namespace(ns.annotations(), &self.registry)?;
        let Some(nc) = self.registry.get(&config_name) else {
            return Err(ControllerError::NetworkNotReady(format!(
                "VPCNetworkConfiguration {config_name} of namespace {name} is not registered"
            )));
        };
        self.registry.register_namespace_binding(&name, &config_name);
        self.services.inventory.enqueue(InventoryKey::project(ns));

        let lookup: Api<Namespace> = Api::all(self.client.clone());
        let provider = self.services.vpc.get_lb_provider().await;
        let vpc = match self.services.vpc.create_or_update_vpc(&name, &lookup, provider).await {
            Ok(vpc) => vpc,
            Err(e) => {
                if !matches!(e, ControllerError::SharedVpcNotReady(_)) {
                    self.publish_failure(ns, "CreateVPC", &e).await;
                }
                return Err(e);
            }
        };
        debug!("Namespace {} is served by VPC {}", name, vpc.path);

        self.apply_network_info(&name, network_info_spec(&vpc, &nc)).await
    }

    async fn apply_network_info(&self, namespace: &str, spec: NetworkInfoSpec) -> Result<(), ControllerError> {
        let api: Api<NetworkInfo> = Api::namespaced(self.client.clone(), namespace);
        let existing = api.get_opt(namespace).await?;
        if existing.as_ref().is_some_and(|info| info.spec.vpcs == spec.vpcs) {
            return Ok(());
        }
        let network_info = NetworkInfo::new(namespace, spec);
        api.patch(
            namespace,
            &PatchParams::apply(REPORTER_NAME).force(),
            &Patch::Apply(&network_info),
        )
        .await?;
        info!("Updated NetworkInfo of namespace {}", namespace);
        Ok(())
    }

    /// Delete the VPC of a terminating namespace when it owns it, then drop
    /// the namespace binding
    async fn teardown_namespace(&self, ns: &Namespace) -> Result<(), ControllerError> {
        let name = ns.name_any();
        let nc = self.registry.config_for_namespace(&name);
        let lookup: Api<Namespace> = Api::all(self.client.clone());
        let sharing = lookup.namespaces_sharing(&name).await?;
        let shares_other = shared_vpc_namespace(ns).is_some_and(|target| target != name);

        if should_delete_vpc(shares_other, nc.as_ref(), &sharing) {
            if let Some(vpc) = self.services.vpc.get_vpc_by_namespace_uid(&ns.uid().unwrap_or_default()) {
                info!("Deleting VPC {} of terminating namespace {}", vpc.path, name);
                if let Err(e) = self.services.vpc.delete_vpc(&vpc.path).await {
                    self.publish_failure(ns, "DeleteVPC", &e).await;
                    return Err(e);
                }
                self.publish_event(ns, EventType::Normal, "VPCDeleted", "DeleteVPC", format!("Deleted VPC {}", vpc.path))
                    .await;
            }
        } else if !sharing.is_empty() {
            warn!(
                "Keeping VPC of namespace {}: still shared by {}",
                name,
                sharing.join(", ")
            );
        }

        self.registry.unregister_namespace_binding(&name);
        Ok(())
    }
}
