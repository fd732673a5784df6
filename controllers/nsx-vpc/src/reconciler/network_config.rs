//! VPCNetworkConfiguration reconciliation.
//!
//! Keeps the registry in line with the CRs and reports, per configuration,
//! the VPCs serving its namespaces and whether the project's gateway
//! connection can carry them.

use super::{Reconciler, patch_status};
use crate::error::ControllerError;
use crate::network_config::{VpcNetworkConfigInfo, build_network_config_info};
use crate::services::vpc::VpcService;
use crds::{Condition, VPCInfo, VPCNetworkConfiguration, VPCNetworkConfigurationStatus, merge_condition};
use kube::{Api, ResourceExt};
use kube_runtime::events::EventType;
use tracing::{debug, info, warn};

pub const REASON_INVALID_CONFIGURATION: &str = "InvalidConfiguration";
pub const REASON_PRIVATE_IPS_MISSING: &str = "PrivateIPsMissing";

/// Ready condition for a configuration given its validation outcomes
pub fn network_config_condition(valid: bool, gateway: (bool, &str)) -> Condition {
    if !valid {
        return Condition::not_ready(
            REASON_PRIVATE_IPS_MISSING,
            "privateIPs is required when no pre-created VPC is set",
        );
    }
    match gateway {
        (true, _) => Condition::ready(),
        (false, reason) => Condition::not_ready(reason, gateway_message(reason)),
    }
}

fn gateway_message(reason: &str) -> String {
    match reason {
        crate::services::vpc::REASON_DISTRIBUTED_GATEWAY_CONNECTION_NOT_SUPPORTED => {
            "distributed gateway connection is not supported by the VPC operator".to_string()
        }
        _ => "gateway connection is not set for the project transit gateway".to_string(),
    }
}

/// Status with `condition` merged into the existing conditions.
/// `None` when nothing changed.
pub fn network_config_status(
    current: Option<&VPCNetworkConfigurationStatus>,
    vpcs: Vec<VPCInfo>,
    condition: Condition,
) -> Option<VPCNetworkConfigurationStatus> {
    let mut status = current.cloned().unwrap_or_default();
    let vpcs_changed = status.vpcs != vpcs;
    status.vpcs = vpcs;
    let condition_changed = merge_condition(&mut status.conditions, condition);
    (vpcs_changed || condition_changed).then_some(status)
}

impl Reconciler {
    /// Register the configuration and refresh its status
    pub async fn reconcile_network_config(&self, cr: &VPCNetworkConfiguration) -> Result<(), ControllerError> {
        let name = cr.name_any();
        let api: Api<VPCNetworkConfiguration> = Api::all(self.client.clone());

        let info = match build_network_config_info(cr) {
            Ok(info) => info,
            Err(e) => {
                warn!("VPCNetworkConfiguration {} is invalid: {}", name, e);
                let condition = Condition::not_ready(REASON_INVALID_CONFIGURATION, e.to_string());
                if let Some(status) = network_config_status(cr.status.as_ref(), Vec::new(), condition) {
                    patch_status(&api, &name, serde_json::to_value(status)?).await?;
                }
                self.publish_failure(cr, "RegisterNetworkConfig", &e).await;
                return Err(e);
            }
        };

        if self.registry.get(&name).as_ref() != Some(&info) {
            info!("Registering VPCNetworkConfiguration {} (default: {})", name, info.is_default);
        }
        self.registry.register(info.clone());

        let valid = VpcService::validate_network_config(&info);
        let gateway = if valid {
            self.services.vpc.validate_gateway_connection_status(&info).await?
        } else {
            (true, "")
        };
        let condition = network_config_condition(valid, gateway);
        if !gateway.0 {
            self.publish_event(
                cr,
                EventType::Warning,
                gateway.1,
                "ValidateGatewayConnection",
                gateway_message(gateway.1),
            )
            .await;
        }

        let vpcs = self.vpcs_of_config(&info);
        match network_config_status(cr.status.as_ref(), vpcs, condition) {
            Some(status) => patch_status(&api, &name, serde_json::to_value(status)?).await,
            None => {
                debug!("VPCNetworkConfiguration {} status is up to date", name);
                Ok(())
            }
        }
    }

    /// Drop the configuration from the registry
    pub fn delete_network_config(&self, name: &str) {
        info!("Unregistering VPCNetworkConfiguration {}", name);
        self.registry.unregister(name);
    }

    /// VPCs serving the namespaces bound to the configuration
    fn vpcs_of_config(&self, info: &VpcNetworkConfigInfo) -> Vec<VPCInfo> {
        if info.is_pre_created() {
            return vec![VPCInfo {
                name: info.name.clone(),
                vpc_path: Some(info.vpc_path.clone()),
                lb_subnet_path: None,
                nsx_load_balancer_path: self.services.vpc.lbs_path_for_vpc(&info.vpc_path),
            }];
        }
        let mut vpcs: Vec<VPCInfo> = self
            .registry
            .namespaces_for_config(&info.name)
            .iter()
            .flat_map(|ns| self.services.vpc.get_vpcs_by_namespace(ns))
            .map(|vpc| VPCInfo {
                name: vpc.display_name.clone(),
                nsx_load_balancer_path: self.services.vpc.lbs_path_for_vpc(&vpc.path),
                vpc_path: Some(vpc.path),
                lb_subnet_path: None,
            })
            .collect();
        vpcs.sort_by(|a, b| a.vpc_path.cmp(&b.vpc_path));
        vpcs.dedup_by(|a, b| a.vpc_path == b.vpc_path);
        vpcs
    }
}
