//! Subnet port service.
//!
//! Ports are created by the workload side; the operator mirrors them to
//! know whether a subnet is still in use, and removes them on cleanup.

use crate::error::{ControllerError, MultiError};
use crate::store::{IndexFn, ResourceStore};
use nsx_client::{NsxClientTrait, SubnetPort};
use std::sync::Arc;
use tracing::{debug, info};

pub const PORT_INDEX_SUBNET: &str = "subnet_path";

fn parent_index() -> IndexFn<SubnetPort> {
    Box::new(|port: &SubnetPort| {
        if port.parent_path.is_empty() {
            Vec::new()
        } else {
            vec![port.parent_path.clone()]
        }
    })
}

pub struct SubnetPortService {
    nsx: Arc<dyn NsxClientTrait>,
    cluster: String,
    pub(crate) port_store: ResourceStore<SubnetPort>,
}

impl std::fmt::Debug for SubnetPortService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubnetPortService")
            .field("cluster", &self.cluster)
            .field("ports", &self.port_store.len())
            .finish_non_exhaustive()
    }
}

impl SubnetPortService {
    pub fn new(nsx: Arc<dyn NsxClientTrait>, cluster: impl Into<String>) -> Self {
        Self {
            nsx,
            cluster: cluster.into(),
            port_store: ResourceStore::new().with_index(PORT_INDEX_SUBNET, parent_index()),
        }
    }

    /// Reload the cluster's ports from NSX. Also used before every
    /// garbage collection pass since ports change outside the operator.
    pub async fn initialize(&self) -> Result<(), ControllerError> {
        let ports = self.nsx.list_subnet_ports(&self.cluster).await?;
        debug!("Loaded {} subnet ports from NSX", ports.len());
        self.port_store.replace_all(ports)?;
        Ok(())
    }

    pub fn ports_for_subnet(&self, subnet_path: &str) -> Vec<SubnetPort> {
        self.port_store
            .by_index(PORT_INDEX_SUBNET, subnet_path)
            .unwrap_or_default()
    }

    pub fn port_count(&self, subnet_path: &str) -> usize {
        self.ports_for_subnet(subnet_path).len()
    }

    /// Whether live ports still sit on the subnet
    pub fn has_ports(&self, subnet_path: &str) -> bool {
        self.port_count(subnet_path) > 0
    }

    /// Delete every port of the cluster
    pub async fn cleanup(&self) -> Result<(), ControllerError> {
        let mut errors = Vec::new();
        for port in self.port_store.list() {
            match self.nsx.delete_subnet_port(&port.path).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    errors.push(ControllerError::delete_failed(format!("NSX SubnetPort {}", port.path), e));
                    continue;
                }
            }
            self.port_store.delete(&port.path)?;
        }
        info!("Subnet port cleanup finished with {} error(s)", errors.len());
        MultiError::into_result("failed to clean up SubnetPorts", errors)
    }
}
