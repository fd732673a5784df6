//! NSX policy path parsing
//!
//! VPC scoped paths look like `/orgs/{org}/projects/{project}/vpcs/{vpc}`,
//! optionally followed by a child segment such as `/subnets/{subnet}`.

use crate::error::NsxError;

/// Identifiers parsed out of a VPC path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VpcInfo {
    pub org_id: String,
    pub project_id: String,
    pub vpc_id: String,
}

impl VpcInfo {
    /// Rebuild the canonical VPC path
    pub fn path(&self) -> String {
        format!("/orgs/{}/projects/{}/vpcs/{}", self.org_id, self.project_id, self.vpc_id)
    }

    /// Path of the project owning the VPC
    pub fn project_path(&self) -> String {
        format!("/orgs/{}/projects/{}", self.org_id, self.project_id)
    }
}

/// Parse a VPC path (or any path nested below a VPC)
pub fn parse_vpc_path(path: &str) -> Result<VpcInfo, NsxError> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() < 7
        || !parts[0].is_empty()
        || parts[1] != "orgs"
        || parts[3] != "projects"
        || parts[5] != "vpcs"
        || parts[2].is_empty()
        || parts[4].is_empty()
        || parts[6].is_empty()
    {
        return Err(NsxError::InvalidPath(format!("invalid VPC path {path}")));
    }
    Ok(VpcInfo {
        org_id: parts[2].to_string(),
        project_id: parts[4].to_string(),
        vpc_id: parts[6].to_string(),
    })
}

/// Parse a subnet path into its VPC and subnet id
pub fn parse_subnet_path(path: &str) -> Result<(VpcInfo, String), NsxError> {
    let info = parse_vpc_path(path)?;
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() != 9 || parts[7] != "subnets" || parts[8].is_empty() {
        return Err(NsxError::InvalidPath(format!("invalid subnet path {path}")));
    }
    Ok((info, parts[8].to_string()))
}

/// VPC id referenced by a connectivity path (the segment after `/vpcs/`)
pub fn vpc_id_from_path(path: &str) -> Option<&str> {
    let (_, rest) = path.split_once("/vpcs/")?;
    let id = rest.split('/').next().unwrap_or_default();
    (!id.is_empty()).then_some(id)
}

/// Type segment of a gateway connection path,
/// e.g. `distributed-gateway-connections` for `/infra/distributed-gateway-connections/gw`
pub fn gateway_connection_type(connection_path: &str) -> Result<&str, NsxError> {
    let parts: Vec<&str> = connection_path.split('/').collect();
    if parts.len() < 4 || !parts[0].is_empty() || parts[2].is_empty() {
        return Err(NsxError::InvalidPath(format!(
            "unexpected connectionPath {connection_path}"
        )));
    }
    Ok(parts[2])
}

/// Key joining two identifiers, used for resources scoped under a VPC
pub fn combine_key(parent: &str, id: &str) -> String {
    format!("{parent}_{id}")
}
