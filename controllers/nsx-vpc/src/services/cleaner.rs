//! Tag-driven teardown of resource types without a reconciler here.
//!
//! SecurityPolicies, IP pools and static routes are only ever removed by the
//! cleanup command: search NSX for objects carrying the cluster tag and
//! delete them by path.

use crate::error::{ControllerError, MultiError};
use nsx_client::NsxClientTrait;
use std::sync::Arc;
use tracing::{debug, info};

pub const RESOURCE_SECURITY_POLICY: &str = "SecurityPolicy";
pub const RESOURCE_IP_POOL: &str = "IpAddressPool";
pub const RESOURCE_STATIC_ROUTE: &str = "StaticRoutes";

pub struct TaggedResourceCleaner {
    nsx: Arc<dyn NsxClientTrait>,
    cluster: String,
    resource_type: &'static str,
}

impl std::fmt::Debug for TaggedResourceCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaggedResourceCleaner")
            .field("cluster", &self.cluster)
            .field("resource_type", &self.resource_type)
            .finish_non_exhaustive()
    }
}

impl TaggedResourceCleaner {
    pub fn new(nsx: Arc<dyn NsxClientTrait>, cluster: impl Into<String>, resource_type: &'static str) -> Self {
        Self {
            nsx,
            cluster: cluster.into(),
            resource_type,
        }
    }

    pub fn resource_type(&self) -> &'static str {
        self.resource_type
    }

    /// Delete every object of the type owned by the cluster.
    /// Already-deleted objects count as success.
    pub async fn cleanup(&self) -> Result<(), ControllerError> {
        let resources = self
            .nsx
            .search_tagged_resources(self.resource_type, &self.cluster)
            .await?;
        info!("Cleaning up {} NSX {} object(s)", resources.len(), self.resource_type);

        let mut errors = Vec::new();
        for resource in resources {
            match self.nsx.delete_by_path(&resource.path).await {
                Ok(()) => debug!("Deleted {} {}", self.resource_type, resource.path),
                Err(e) if e.is_not_found() => {}
                Err(e) => errors.push(ControllerError::delete_failed(
                    format!("NSX {}/{}", self.resource_type, resource.id),
                    e,
                )),
            }
        }
        MultiError::into_result(format!("failed to clean up {}", self.resource_type), errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsx_client::{MockFailure, MockNsxClient, PolicyResource, Tag};

    fn resource(id: &str, resource_type: &str, cluster: &str) -> PolicyResource {
        PolicyResource {
            id: id.to_string(),
            path: format!("/orgs/default/projects/p/infra/{id}"),
            resource_type: resource_type.to_string(),
            tags: vec![Tag::new("nsx-op/cluster", cluster)],
        }
    }

    #[tokio::test]
    async fn test_cleanup_deletes_only_owned_objects_of_type() {
        let mock = Arc::new(MockNsxClient::new("https://nsx"));
        mock.add_tagged_resource(resource("sp-1", RESOURCE_SECURITY_POLICY, "cluster-a"));
        mock.add_tagged_resource(resource("sp-2", RESOURCE_SECURITY_POLICY, "cluster-b"));
        mock.add_tagged_resource(resource("pool-1", RESOURCE_IP_POOL, "cluster-a"));
        let cleaner = TaggedResourceCleaner::new(mock.clone(), "cluster-a", RESOURCE_SECURITY_POLICY);

        cleaner.cleanup().await.unwrap();

        assert!(!mock.tagged_resource_exists("/orgs/default/projects/p/infra/sp-1"));
        assert!(mock.tagged_resource_exists("/orgs/default/projects/p/infra/sp-2"));
        assert!(mock.tagged_resource_exists("/orgs/default/projects/p/infra/pool-1"));
    }

    #[tokio::test]
    async fn test_cleanup_collects_failures() {
        let mock = Arc::new(MockNsxClient::new("https://nsx"));
        mock.add_tagged_resource(resource("route-1", RESOURCE_STATIC_ROUTE, "cluster-a"));
        mock.add_tagged_resource(resource("route-2", RESOURCE_STATIC_ROUTE, "cluster-a"));
        mock.fail_for_path(
            "delete_by_path",
            "/orgs/default/projects/p/infra/route-1",
            MockFailure::Api(500, "busy".to_string()),
        );
        let cleaner = TaggedResourceCleaner::new(mock.clone(), "cluster-a", RESOURCE_STATIC_ROUTE);

        let err = cleaner.cleanup().await.unwrap_err();

        assert!(err.to_string().starts_with("failed to clean up StaticRoutes: ["));
        assert!(err.to_string().contains("NSX StaticRoutes/route-1"));
        assert!(!mock.tagged_resource_exists("/orgs/default/projects/p/infra/route-2"));
    }

    #[tokio::test]
    async fn test_search_failure_is_returned() {
        let mock = Arc::new(MockNsxClient::new("https://nsx"));
        mock.fail("search_tagged_resources", MockFailure::Connection("refused".to_string()));
        let cleaner = TaggedResourceCleaner::new(mock, "cluster-a", RESOURCE_IP_POOL);

        assert!(cleaner.cleanup().await.is_err());
    }
}
