//! Subnet reconciliation. Subnet CRs hold a finalizer until their NSX
//! subnet is deleted.

use super::{Reconciler, SUBNET_FINALIZER, default_subnet_size_for, patch_status, set_finalizer};
use crate::error::ControllerError;
use crate::services::subnet::{SubnetParams, subnet_status};
use crds::{Condition, Subnet, SubnetStatus, merge_condition};
use kube::{Api, ResourceExt};
use nsx_client::VpcSubnet;
use tracing::{debug, info};

/// Status for a Subnet backed by `subnet`, with `condition` merged.
/// `None` when nothing changed.
pub fn subnet_cr_status(current: Option<&SubnetStatus>, subnet: &VpcSubnet, condition: Condition) -> Option<SubnetStatus> {
    let mut status = current.cloned().unwrap_or_default();
    let addressing = subnet_status(subnet);
    let changed = status.network_addresses != addressing.network_addresses
        || status.gateway_addresses != addressing.gateway_addresses
        || status.dhcp_server_addresses != addressing.dhcp_server_addresses;
    status.network_addresses = addressing.network_addresses;
    status.gateway_addresses = addressing.gateway_addresses;
    status.dhcp_server_addresses = addressing.dhcp_server_addresses;
    let condition_changed = merge_condition(&mut status.conditions, condition);
    (changed || condition_changed).then_some(status)
}

impl Reconciler {
    pub async fn reconcile_subnet(&self, subnet: &Subnet) -> Result<(), ControllerError> {
        let namespace = subnet.namespace().unwrap_or_default();
        let name = subnet.name_any();
        let api: Api<Subnet> = Api::namespaced(self.client.clone(), &namespace);

        if subnet.metadata.deletion_timestamp.is_some() {
            if let Err(e) = self.services.subnet.delete_subnet(subnet).await {
                self.publish_failure(subnet, "DeleteSubnet", &e).await;
                return Err(e);
            }
            info!("Deleted NSX subnet of Subnet {}/{}", namespace, name);
            return set_finalizer(&api, subnet, SUBNET_FINALIZER, false).await;
        }

        set_finalizer(&api, subnet, SUBNET_FINALIZER, true).await?;

        let (vpc_path, namespace_uid) = self.namespace_vpc(&namespace).await?;
        let default_size = default_subnet_size_for(&self.registry, &namespace, self.default_subnet_size);
        let params = SubnetParams::for_subnet(subnet, default_size);
        let nsx_subnet = match self
            .services
            .subnet
            .ensure_subnet(subnet, &vpc_path, &params, namespace_uid.as_deref())
            .await
        {
            Ok(s) => s,
            Err(e) => {
                self.publish_failure(subnet, "CreateSubnet", &e).await;
                let mut status = subnet.status.clone().unwrap_or_default();
                if merge_condition(&mut status.conditions, Condition::not_ready("SubnetNotReady", e.to_string())) {
                    patch_status(&api, &name, serde_json::to_value(status)?).await?;
                }
                return Err(e);
            }
        };

        match subnet_cr_status(subnet.status.as_ref(), &nsx_subnet, Condition::ready()) {
            Some(status) => patch_status(&api, &name, serde_json::to_value(status)?).await,
            None => {
                debug!("Subnet {}/{} status is up to date", namespace, name);
                Ok(())
            }
        }
    }
}
