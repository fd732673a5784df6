//! Subnet connection binding map service.
//!
//! NSX binding maps hang under the child subnet (`parent_path`) and point at
//! the parent subnet (`subnet_path`). Either side going away removes them.

use crate::error::{ControllerError, MultiError};
use crate::store::{IndexFn, ResourceStore};
use nsx_client::{NsxClientTrait, SubnetConnectionBindingMap};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const BINDING_INDEX_CHILD: &str = "child_subnet";
pub const BINDING_INDEX_PARENT: &str = "parent_subnet";

fn child_index() -> IndexFn<SubnetConnectionBindingMap> {
    Box::new(|m: &SubnetConnectionBindingMap| {
        (!m.parent_path.is_empty()).then(|| m.parent_path.clone()).into_iter().collect()
    })
}

fn parent_index() -> IndexFn<SubnetConnectionBindingMap> {
    Box::new(|m: &SubnetConnectionBindingMap| {
        (!m.subnet_path.is_empty()).then(|| m.subnet_path.clone()).into_iter().collect()
    })
}

pub struct BindingMapService {
    nsx: Arc<dyn NsxClientTrait>,
    cluster: String,
    pub(crate) binding_store: ResourceStore<SubnetConnectionBindingMap>,
}

impl std::fmt::Debug for BindingMapService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingMapService")
            .field("cluster", &self.cluster)
            .field("binding_maps", &self.binding_store.len())
            .finish_non_exhaustive()
    }
}

impl BindingMapService {
    pub fn new(nsx: Arc<dyn NsxClientTrait>, cluster: impl Into<String>) -> Self {
        Self {
            nsx,
            cluster: cluster.into(),
            binding_store: ResourceStore::new()
                .with_index(BINDING_INDEX_CHILD, child_index())
                .with_index(BINDING_INDEX_PARENT, parent_index()),
        }
    }

    pub async fn initialize(&self) -> Result<(), ControllerError> {
        let maps = self.nsx.list_subnet_binding_maps(&self.cluster).await?;
        debug!("Loaded {} subnet connection binding maps from NSX", maps.len());
        self.binding_store.replace_all(maps)?;
        Ok(())
    }

    /// Binding maps on either side of the subnet, deduplicated by path
    pub fn maps_for_subnet(&self, subnet_path: &str) -> Vec<SubnetConnectionBindingMap> {
        let mut by_path = BTreeMap::new();
        for index in [BINDING_INDEX_CHILD, BINDING_INDEX_PARENT] {
            for map in self.binding_store.by_index(index, subnet_path).unwrap_or_default() {
                by_path.insert(map.path.clone(), map);
            }
        }
        by_path.into_values().collect()
    }

    /// Delete the binding maps connected to the subnet. Stops at the first
    /// failure; maps already deleted are dropped from the store.
    pub async fn delete_for_subnet(&self, subnet_path: &str) -> Result<(), ControllerError> {
        for map in self.maps_for_subnet(subnet_path) {
            self.delete_one(&map).await?;
        }
        Ok(())
    }

    async fn delete_one(&self, map: &SubnetConnectionBindingMap) -> Result<(), ControllerError> {
        match self.nsx.delete_subnet_binding_map(&map.path).await {
            Ok(()) => debug!("Deleted SubnetConnectionBindingMap {}", map.path),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.binding_store.delete(&map.path)?;
        Ok(())
    }

    pub async fn cleanup(&self) -> Result<(), ControllerError> {
        let mut errors = Vec::new();
        for map in self.binding_store.list() {
            if let Err(e) = self.delete_one(&map).await {
                errors.push(e);
            }
        }
        info!("SubnetConnectionBindingMap cleanup finished with {} error(s)", errors.len());
        MultiError::into_result("failed to clean up SubnetConnectionBindingMaps", errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsx_client::{MockFailure, MockNsxClient, Tag};

    const CHILD: &str = "/orgs/default/projects/p/vpcs/v/subnets/child";
    const PARENT: &str = "/orgs/default/projects/p/vpcs/v/subnets/parent";

    fn binding(id: &str, child: &str, parent: &str) -> SubnetConnectionBindingMap {
        SubnetConnectionBindingMap {
            id: id.to_string(),
            path: format!("{child}/subnet-connection-binding-maps/{id}"),
            parent_path: child.to_string(),
            subnet_path: parent.to_string(),
            vlan_traffic_tag: Some(101),
            tags: vec![Tag::new("nsx-op/cluster", "cluster-a")],
        }
    }

    async fn setup() -> (Arc<MockNsxClient>, BindingMapService) {
        let mock = Arc::new(MockNsxClient::new("https://nsx"));
        mock.add_binding_map(binding("b1", CHILD, PARENT));
        mock.add_binding_map(binding("b2", "/orgs/default/projects/p/vpcs/v/subnets/other", PARENT));
        let service = BindingMapService::new(mock.clone(), "cluster-a");
        service.initialize().await.unwrap();
        (mock, service)
    }

    #[tokio::test]
    async fn test_maps_found_from_both_sides() {
        let (_mock, service) = setup().await;

        assert_eq!(service.maps_for_subnet(PARENT).len(), 2);
        assert_eq!(service.maps_for_subnet(CHILD).len(), 1);
    }

    #[tokio::test]
    async fn test_delete_for_parent_subnet() {
        let (mock, service) = setup().await;

        service.delete_for_subnet(PARENT).await.unwrap();

        assert!(service.maps_for_subnet(PARENT).is_empty());
        assert!(!mock.binding_map_exists(&format!("{CHILD}/subnet-connection-binding-maps/b1")));
    }

    #[tokio::test]
    async fn test_delete_failure_is_returned() {
        let (mock, service) = setup().await;
        mock.fail("delete_subnet_binding_map", MockFailure::Api(500, "mocked".to_string()));

        assert!(service.delete_for_subnet(CHILD).await.is_err());
        assert_eq!(service.maps_for_subnet(CHILD).len(), 1);
    }
}
