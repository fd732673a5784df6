//! VPC operations for MockNsxClient
//!
//! Handles VPCs, load balancer services, realization, connectivity profiles
//! and the ALB endpoint

use super::{MockNsxClient, has_cluster_tag};
use crate::error::NsxError;
use crate::models::*;

pub async fn get_vpc(client: &MockNsxClient, path: &str) -> Result<Vpc, NsxError> {
    client.enter("get_vpc", Some(path))?;
    client.vpcs
        .lock()
        .unwrap()
        .get(path)
        .cloned()
        .ok_or_else(|| NsxError::NotFound(format!("VPC {} not found", path)))
}

pub async fn list_vpcs(client: &MockNsxClient, cluster: &str) -> Result<Vec<Vpc>, NsxError> {
    client.enter("list_vpcs", None)?;
    Ok(client.vpcs
        .lock()
        .unwrap()
        .values()
        .filter(|v| has_cluster_tag(&v.tags, cluster))
        .cloned()
        .collect())
}

pub async fn patch_org_root(client: &MockNsxClient, root: &OrgRoot) -> Result<(), NsxError> {
    let vpc_path = format!("/orgs/{}/projects/{}/vpcs/{}", root.org, root.project, root.vpc.id);
    client.enter("patch_org_root", Some(&vpc_path))?;

    if root.marked_for_delete {
        client.vpcs.lock().unwrap().remove(&vpc_path);
        client.lb_services
            .lock()
            .unwrap()
            .retain(|_, lbs| lbs.connectivity_path.as_deref() != Some(vpc_path.as_str()));
        return Ok(());
    }

    let mut vpc = root.vpc.clone();
    vpc.path.clone_from(&vpc_path);
    vpc.parent_path = format!("/orgs/{}/projects/{}", root.org, root.project);
    client.vpcs.lock().unwrap().insert(vpc_path.clone(), vpc);

    if let Some(lbs) = &root.lb_service {
        let mut lbs = lbs.clone();
        lbs.path = format!("{}/vpc-lbs/{}", vpc_path, lbs.id);
        lbs.connectivity_path = Some(vpc_path.clone());
        client.lb_services.lock().unwrap().insert(lbs.path.clone(), lbs);
    }
    Ok(())
}

pub async fn delete_vpc(client: &MockNsxClient, path: &str) -> Result<(), NsxError> {
    client.enter("delete_vpc", Some(path))?;
    if client.vpcs.lock().unwrap().remove(path).is_none() {
        return Err(NsxError::NotFound(format!("VPC {} not found", path)));
    }
    // Recursive delete takes the children along
    let child_prefix = format!("{}/", path);
    client.subnets.lock().unwrap().retain(|p, _| !p.starts_with(&child_prefix));
    client.lb_services.lock().unwrap().retain(|p, _| !p.starts_with(&child_prefix));
    Ok(())
}

pub async fn list_lb_services(client: &MockNsxClient, cluster: &str) -> Result<Vec<LbService>, NsxError> {
    client.enter("list_lb_services", None)?;
    Ok(client.lb_services
        .lock()
        .unwrap()
        .values()
        .filter(|l| has_cluster_tag(&l.tags, cluster))
        .cloned()
        .collect())
}

/// Unconfigured intent paths are reported as realized
pub async fn get_realized_state(client: &MockNsxClient, intent_path: &str) -> Result<Vec<RealizedEntity>, NsxError> {
    client.enter("get_realized_state", Some(intent_path))?;
    let state = client.realized
        .lock()
        .unwrap()
        .get(intent_path)
        .copied()
        .unwrap_or(RealizationState::Realized);
    Ok(vec![RealizedEntity {
        entity_type: "RealizedEntity".to_string(),
        intent_paths: vec![intent_path.to_string()],
        state,
        alarms: Vec::new(),
    }])
}

pub async fn get_vpc_connectivity_profile(client: &MockNsxClient, path: &str) -> Result<VpcConnectivityProfile, NsxError> {
    client.enter("get_vpc_connectivity_profile", Some(path))?;
    client.connectivity_profiles
        .lock()
        .unwrap()
        .get(path)
        .cloned()
        .ok_or_else(|| NsxError::NotFound(format!("VPC connectivity profile {} not found", path)))
}

pub async fn list_transit_gateway_attachments(client: &MockNsxClient, transit_gateway_path: &str) -> Result<Vec<TransitGatewayAttachment>, NsxError> {
    client.enter("list_transit_gateway_attachments", Some(transit_gateway_path))?;
    Ok(client.tgw_attachments
        .lock()
        .unwrap()
        .get(transit_gateway_path)
        .cloned()
        .unwrap_or_default())
}

pub async fn get_alb_endpoint(client: &MockNsxClient) -> Result<AlbEndpoint, NsxError> {
    client.enter("get_alb_endpoint", None)?;
    client.alb_endpoint
        .lock()
        .unwrap()
        .clone()
        .ok_or_else(|| NsxError::NotFound("alb-endpoint not found".to_string()))
}

pub async fn list_avi_subnet_ports(client: &MockNsxClient, vpc_path: &str) -> Result<Vec<SubnetPort>, NsxError> {
    client.enter("list_avi_subnet_ports", Some(vpc_path))?;
    Ok(client.avi_ports
        .lock()
        .unwrap()
        .get(vpc_path)
        .cloned()
        .unwrap_or_default())
}
