//! Subnet operations for MockNsxClient
//!
//! Handles subnets, subnet ports, connection binding maps and generic tagged
//! resources

use super::{MockNsxClient, has_cluster_tag};
use crate::error::NsxError;
use crate::models::*;

pub async fn list_vpc_subnets(client: &MockNsxClient, cluster: &str) -> Result<Vec<VpcSubnet>, NsxError> {
    client.enter("list_vpc_subnets", None)?;
    Ok(client.subnets
        .lock()
        .unwrap()
        .values()
        .filter(|s| has_cluster_tag(&s.tags, cluster))
        .cloned()
        .collect())
}

pub async fn get_vpc_subnet(client: &MockNsxClient, path: &str) -> Result<VpcSubnet, NsxError> {
    client.enter("get_vpc_subnet", Some(path))?;
    client.subnets
        .lock()
        .unwrap()
        .get(path)
        .cloned()
        .ok_or_else(|| NsxError::NotFound(format!("Subnet {} not found", path)))
}

/// Stores the subnet under the VPC and hands out a /N CIDR from 10.0.0.0/8
/// when none was requested
pub async fn patch_vpc_subnet(client: &MockNsxClient, vpc_path: &str, subnet: &VpcSubnet) -> Result<VpcSubnet, NsxError> {
    let path = format!("{}/subnets/{}", vpc_path, subnet.id);
    client.enter("patch_vpc_subnet", Some(&path))?;

    let mut stored = subnet.clone();
    stored.path.clone_from(&path);
    stored.parent_path = vpc_path.to_string();
    if stored.ip_addresses.is_empty() {
        let size = stored.ipv4_subnet_size.unwrap_or(64).max(1);
        let prefix = 32 - size.trailing_zeros();
        let index = client.next_id();
        stored.ip_addresses = vec![format!("10.{}.{}.0/{}", index / 256, index % 256, prefix)];
    }
    client.subnets.lock().unwrap().insert(path, stored.clone());
    Ok(stored)
}

pub async fn delete_vpc_subnet(client: &MockNsxClient, path: &str) -> Result<(), NsxError> {
    client.enter("delete_vpc_subnet", Some(path))?;
    client.subnets
        .lock()
        .unwrap()
        .remove(path)
        .map(|_| ())
        .ok_or_else(|| NsxError::NotFound(format!("Subnet {} not found", path)))
}

pub async fn list_subnet_ports(client: &MockNsxClient, cluster: &str) -> Result<Vec<SubnetPort>, NsxError> {
    client.enter("list_subnet_ports", None)?;
    Ok(client.subnet_ports
        .lock()
        .unwrap()
        .values()
        .filter(|p| has_cluster_tag(&p.tags, cluster))
        .cloned()
        .collect())
}

pub async fn delete_subnet_port(client: &MockNsxClient, path: &str) -> Result<(), NsxError> {
    client.enter("delete_subnet_port", Some(path))?;
    client.subnet_ports.lock().unwrap().remove(path);
    Ok(())
}

pub async fn list_subnet_binding_maps(client: &MockNsxClient, cluster: &str) -> Result<Vec<SubnetConnectionBindingMap>, NsxError> {
    client.enter("list_subnet_binding_maps", None)?;
    Ok(client.binding_maps
        .lock()
        .unwrap()
        .values()
        .filter(|m| has_cluster_tag(&m.tags, cluster))
        .cloned()
        .collect())
}

pub async fn delete_subnet_binding_map(client: &MockNsxClient, path: &str) -> Result<(), NsxError> {
    client.enter("delete_subnet_binding_map", Some(path))?;
    client.binding_maps.lock().unwrap().remove(path);
    Ok(())
}

pub async fn search_tagged_resources(client: &MockNsxClient, resource_type: &str, cluster: &str) -> Result<Vec<PolicyResource>, NsxError> {
    client.enter("search_tagged_resources", Some(resource_type))?;
    Ok(client.tagged
        .lock()
        .unwrap()
        .values()
        .filter(|r| r.resource_type == resource_type && has_cluster_tag(&r.tags, cluster))
        .cloned()
        .collect())
}

pub async fn delete_by_path(client: &MockNsxClient, path: &str) -> Result<(), NsxError> {
    client.enter("delete_by_path", Some(path))?;
    client.tagged
        .lock()
        .unwrap()
        .remove(path)
        .map(|_| ())
        .ok_or_else(|| NsxError::NotFound(format!("{} not found", path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_patch_subnet_assigns_cidr_from_size() {
        let mock = MockNsxClient::new("https://nsx");
        let subnet = VpcSubnet {
            id: "net1".to_string(),
            ipv4_subnet_size: Some(32),
            ..Default::default()
        };
        let created = patch_vpc_subnet(&mock, "/orgs/o/projects/p/vpcs/v", &subnet)
            .await
            .expect("patch should succeed");
        assert_eq!(created.path, "/orgs/o/projects/p/vpcs/v/subnets/net1");
        assert_eq!(created.ip_addresses.len(), 1);
        assert!(created.ip_addresses[0].ends_with("/27"));
    }
}
