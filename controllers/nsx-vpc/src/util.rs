//! Naming, hashing and subnet arithmetic helpers.

use crate::error::ControllerError;
use ipnetwork::Ipv4Network;
use sha2::{Digest, Sha256};

/// Length of the hash suffix appended to shortened names
pub const HASH_LENGTH: usize = 8;
/// Maximum length of an NSX id
pub const MAX_ID_LENGTH: usize = 255;
/// Maximum length of an NSX display name
pub const MAX_NAME_LENGTH: usize = 255;
/// Smallest subnet the operator creates
pub const MIN_SUBNET_SIZE: u32 = 16;
/// Addresses NSX reserves in every subnet (network, gateway, DHCP, broadcast)
pub const RESERVED_ADDRESSES: u32 = 4;

/// Hex SHA-256 digest of `data`
pub fn sha_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// First `max` characters of `s`
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Join `name` and `suffix` with `_`, shortening the name and replacing the
/// suffix by a hash of it when the result would exceed `limit`.
pub fn normalize_name_by_limit(name: &str, suffix: &str, limit: usize) -> String {
    let joined = if suffix.is_empty() {
        name.to_string()
    } else {
        format!("{name}_{suffix}")
    };
    if joined.chars().count() <= limit {
        return joined;
    }

    let hash_source = if suffix.is_empty() { name } else { suffix };
    let hash = sha_hex(hash_source);
    let keep = limit
        .saturating_sub(HASH_LENGTH + 1)
        .min(name.chars().count());
    format!("{}_{}", truncate_chars(name, keep), &hash[..HASH_LENGTH])
}

/// Display name bounded by [`MAX_NAME_LENGTH`]
pub fn normalize_name(name: &str) -> String {
    normalize_name_by_limit(name, "", MAX_NAME_LENGTH)
}

/// NSX id for an object: `name_<hash of uid>`, with `:` replaced
pub fn generate_id(name: &str, uid: &str) -> String {
    let uid_hash = if uid.is_empty() {
        String::new()
    } else {
        sha_hex(uid)[..HASH_LENGTH].to_string()
    };
    normalize_name_by_limit(name, &uid_hash, MAX_ID_LENGTH).replace(':', "_")
}

/// Short random token used to tell apart subnets of the same SubnetSet
pub fn random_index() -> String {
    sha_hex(&uuid::Uuid::new_v4().to_string())[..HASH_LENGTH].to_string()
}

pub fn is_power_of_two(n: u32) -> bool {
    n != 0 && n & (n - 1) == 0
}

/// Number of addresses in a /`mask` IPv4 subnet
pub fn calculate_subnet_size(mask: u8) -> u64 {
    1u64 << (32 - u32::from(mask.min(32)))
}

/// Prefix length of a subnet with `size` addresses
pub fn prefix_for_size(size: u32) -> Result<u8, ControllerError> {
    if !is_power_of_two(size) || size < MIN_SUBNET_SIZE {
        return Err(ControllerError::Allocation(format!(
            "subnet size {size} must be a power of two and at least {MIN_SUBNET_SIZE}"
        )));
    }
    // size is a power of two <= 2^31, so the prefix fits in u8
    Ok((32 - size.trailing_zeros()) as u8)
}

/// Usable addresses of a subnet with `size` addresses
pub fn usable_capacity(size: u32) -> u32 {
    size.saturating_sub(RESERVED_ADDRESSES)
}

/// Gateway (first host) and DHCP server (second host) of a CIDR, both
/// rendered with the subnet prefix
pub fn gateway_and_dhcp(cidr: &str) -> Result<(String, String), ControllerError> {
    let network: Ipv4Network = cidr
        .parse()
        .map_err(|e| ControllerError::Allocation(format!("invalid CIDR {cidr}: {e}")))?;
    let base = u32::from(network.network());
    let prefix = network.prefix();
    if prefix > 30 {
        return Err(ControllerError::Allocation(format!("CIDR {cidr} is too small")));
    }
    let gateway = std::net::Ipv4Addr::from(base + 1);
    let dhcp = std::net::Ipv4Addr::from(base + 2);
    Ok((format!("{gateway}/{prefix}"), format!("{dhcp}/{prefix}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name_short_is_unchanged() {
        assert_eq!(normalize_name_by_limit("ns1", "abc", 255), "ns1_abc");
        assert_eq!(normalize_name("ns1"), "ns1");
    }

    #[test]
    fn test_normalize_name_long_is_hashed() {
        let long = "a".repeat(300);
        let name = normalize_name(&long);
        assert_eq!(name.len(), MAX_NAME_LENGTH);
        assert!(name.ends_with(&sha_hex(&long)[..HASH_LENGTH]));
    }

    #[test]
    fn test_generate_id_is_stable() {
        let a = generate_id("ns1", "0b3c5f9e");
        let b = generate_id("ns1", "0b3c5f9e");
        assert_eq!(a, b);
        assert!(a.starts_with("ns1_"));
        assert_eq!(a.len(), 3 + 1 + HASH_LENGTH);
        assert_eq!(generate_id("a:b", ""), "a_b");
    }

    #[test]
    fn test_subnet_sizes() {
        assert!(is_power_of_two(64));
        assert!(!is_power_of_two(48));
        assert!(!is_power_of_two(0));
        assert_eq!(calculate_subnet_size(26), 64);
        assert_eq!(prefix_for_size(64).unwrap(), 26);
        assert_eq!(prefix_for_size(16).unwrap(), 28);
        assert!(prefix_for_size(8).is_err());
        assert!(prefix_for_size(48).is_err());
        assert_eq!(usable_capacity(16), 12);
    }

    #[test]
    fn test_gateway_and_dhcp() {
        let (gw, dhcp) = gateway_and_dhcp("10.0.1.0/26").unwrap();
        assert_eq!(gw, "10.0.1.1/26");
        assert_eq!(dhcp, "10.0.1.2/26");
        assert!(gateway_and_dhcp("not-a-cidr").is_err());
    }
}
