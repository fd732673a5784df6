//! NSX-facing services.
//!
//! Each service owns the local store of one NSX resource family and is the
//! only writer to it:
//! - `vpc`: VPCs and their load balancer services
//! - `subnet`: VPC subnets of SubnetSets and Subnets
//! - `subnetport`: subnet ports (read side, used for stale-port checks)
//! - `binding_map`: subnet connection binding maps
//! - `inventory`: container inventory mirror
//! - `cleaner`: tag-driven teardown of the remaining resource types

pub mod binding_map;
pub mod cleaner;
pub mod inventory;
pub mod subnet;
pub mod subnetport;
pub mod vpc;

use crate::error::ControllerError;
use crate::network_config::SHARED_VPC_NAMESPACE_ANNOTATION;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ListParams;
use kube::{Api, ResourceExt};

/// Namespace reads needed by the services
#[async_trait::async_trait]
pub trait NamespaceLookup: Send + Sync {
    /// `None` when the namespace does not exist
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ControllerError>;

    /// Names of the namespaces sharing the VPC of `target`
    async fn namespaces_sharing(&self, target: &str) -> Result<Vec<String>, ControllerError>;
}

#[async_trait::async_trait]
impl NamespaceLookup for Api<Namespace> {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ControllerError> {
        Ok(self.get_opt(name).await?)
    }

    async fn namespaces_sharing(&self, target: &str) -> Result<Vec<String>, ControllerError> {
        let namespaces = self.list(&ListParams::default()).await?;
        Ok(namespaces
            .items
            .iter()
            .filter(|ns| ns.name_any() != target && shared_vpc_namespace(ns).as_deref() == Some(target))
            .map(ResourceExt::name_any)
            .collect())
    }
}

/// Namespace whose VPC this namespace shares, if annotated
pub fn shared_vpc_namespace(ns: &Namespace) -> Option<String> {
    ns.annotations()
        .get(SHARED_VPC_NAMESPACE_ANNOTATION)
        .filter(|v| !v.is_empty())
        .cloned()
}
