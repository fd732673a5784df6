//! NSX REST API Client
//!
//! Client library for the NSX policy API (VPCs, subnets, load balancer
//! services, realization, search) and the management-plane container
//! inventory API.
//!
//! # Example
//!
//! ```no_run
//! use nsx_client::{NsxClient, NsxClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = NsxClient::new(
//!     "https://nsx-manager:443".to_string(),
//!     "admin".to_string(),
//!     "password".to_string(),
//!     false,
//! )?;
//!
//! client.validate_connection().await?;
//!
//! // VPCs owned by a cluster
//! let vpcs = client.list_vpcs("cluster-a").await?;
//!
//! // Fetch one VPC by policy path
//! let vpc = client.get_vpc("/orgs/default/projects/proj-1/vpcs/ns1-vpc").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Error classification**: every error maps to a retryable/terminal class
//! - **Search paging**: cursor-based paging of policy search results
//! - **Mocking**: `test-util` enables an in-memory `MockNsxClient`

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod nsx_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::NsxClient;
pub use common::HttpClient;
pub use common::path::{VpcInfo, combine_key, gateway_connection_type, parse_subnet_path, parse_vpc_path, vpc_id_from_path};
pub use error::{ApiError, ErrorClass, NsxError};
pub use models::*;
pub use nsx_trait::NsxClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockFailure, MockNsxClient};
