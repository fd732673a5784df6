//! NSX Operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions (group `crd.nsx.vmware.com`) consumed
//! and produced by the VPC operator.

pub mod condition;
pub mod network_info;
pub mod subnet;
pub mod subnet_connection_binding_map;
pub mod subnet_set;
pub mod vpc_network_configuration;

pub use condition::*;
pub use network_info::*;
pub use subnet::*;
pub use subnet_connection_binding_map::*;
pub use subnet_set::*;
pub use vpc_network_configuration::*;
