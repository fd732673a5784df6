//! NSX tag scopes and tag builders.
//!
//! Every NSX object created by the operator carries the cluster tag plus the
//! identity (name + UID) of the Kubernetes object that owns it. Stores index
//! on these scopes and garbage collection relies on them, so the identity
//! tags are never dropped by [`cap_tags`].

use crate::util::truncate_chars;
use crds::{Subnet, SubnetConnectionBindingMap, SubnetSet};
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use nsx_client::Tag;

pub const TAG_SCOPE_CLUSTER: &str = "nsx-op/cluster";
pub const TAG_SCOPE_VERSION: &str = "nsx-op/version";
pub const TAG_SCOPE_NAMESPACE: &str = "nsx-op/namespace";
pub const TAG_SCOPE_NAMESPACE_UID: &str = "nsx-op/namespace_uid";
pub const TAG_SCOPE_SUBNETSET_NAME: &str = "nsx-op/subnetset_name";
pub const TAG_SCOPE_SUBNETSET_UID: &str = "nsx-op/subnetset_uid";
pub const TAG_SCOPE_SUBNET_NAME: &str = "nsx-op/subnet_name";
pub const TAG_SCOPE_SUBNET_UID: &str = "nsx-op/subnet_uid";
pub const TAG_SCOPE_SUBNETBINDING_NAME: &str = "nsx-op/subnetbinding_name";
pub const TAG_SCOPE_SUBNETBINDING_UID: &str = "nsx-op/subnetbinding_uid";

pub const TAG_VALUE_VERSION: &str = "1.0.0";

/// NSX accepts at most this many tags per object
pub const MAX_TAGS: usize = 26;
/// NSX rejects tag values longer than this
pub const MAX_TAG_VALUE_LENGTH: usize = 256;

const IDENTITY_SCOPES: &[&str] = &[
    TAG_SCOPE_CLUSTER,
    TAG_SCOPE_VERSION,
    TAG_SCOPE_NAMESPACE,
    TAG_SCOPE_NAMESPACE_UID,
    TAG_SCOPE_SUBNETSET_NAME,
    TAG_SCOPE_SUBNETSET_UID,
    TAG_SCOPE_SUBNET_NAME,
    TAG_SCOPE_SUBNET_UID,
    TAG_SCOPE_SUBNETBINDING_NAME,
    TAG_SCOPE_SUBNETBINDING_UID,
];

/// Cluster and version tags carried by every object
pub fn basic_tags(cluster: &str) -> Vec<Tag> {
    vec![
        Tag::new(TAG_SCOPE_CLUSTER, cluster),
        Tag::new(TAG_SCOPE_VERSION, TAG_VALUE_VERSION),
    ]
}

/// Kubernetes object that owns NSX resources
pub trait Taggable {
    /// Scopes of the owner's name and UID
    fn identity_scopes(&self) -> (&'static str, &'static str);

    fn owner_name(&self) -> String;

    fn owner_uid(&self) -> String;

    fn owner_namespace(&self) -> Option<String>;

    /// Full tag set for an NSX object owned by this resource
    fn build_tags(&self, cluster: &str, namespace_uid: Option<&str>) -> Vec<Tag> {
        let mut tags = basic_tags(cluster);
        if let Some(ns) = self.owner_namespace() {
            tags.push(Tag::new(TAG_SCOPE_NAMESPACE, ns));
        }
        if let Some(uid) = namespace_uid {
            tags.push(Tag::new(TAG_SCOPE_NAMESPACE_UID, uid));
        }
        let (name_scope, uid_scope) = self.identity_scopes();
        if name_scope != TAG_SCOPE_NAMESPACE {
            tags.push(Tag::new(name_scope, self.owner_name()));
            tags.push(Tag::new(uid_scope, self.owner_uid()));
        }
        cap_tags(tags)
    }
}

impl Taggable for SubnetSet {
    fn identity_scopes(&self) -> (&'static str, &'static str) {
        (TAG_SCOPE_SUBNETSET_NAME, TAG_SCOPE_SUBNETSET_UID)
    }

    fn owner_name(&self) -> String {
        self.name_any()
    }

    fn owner_uid(&self) -> String {
        self.uid().unwrap_or_default()
    }

    fn owner_namespace(&self) -> Option<String> {
        self.namespace()
    }
}

impl Taggable for Subnet {
    fn identity_scopes(&self) -> (&'static str, &'static str) {
        (TAG_SCOPE_SUBNET_NAME, TAG_SCOPE_SUBNET_UID)
    }

    fn owner_name(&self) -> String {
        self.name_any()
    }

    fn owner_uid(&self) -> String {
        self.uid().unwrap_or_default()
    }

    fn owner_namespace(&self) -> Option<String> {
        self.namespace()
    }
}

impl Taggable for SubnetConnectionBindingMap {
    fn identity_scopes(&self) -> (&'static str, &'static str) {
        (TAG_SCOPE_SUBNETBINDING_NAME, TAG_SCOPE_SUBNETBINDING_UID)
    }

    fn owner_name(&self) -> String {
        self.name_any()
    }

    fn owner_uid(&self) -> String {
        self.uid().unwrap_or_default()
    }

    fn owner_namespace(&self) -> Option<String> {
        self.namespace()
    }
}

/// A Namespace owns its VPC; the namespace tags are the identity
impl Taggable for Namespace {
    fn identity_scopes(&self) -> (&'static str, &'static str) {
        (TAG_SCOPE_NAMESPACE, TAG_SCOPE_NAMESPACE_UID)
    }

    fn owner_name(&self) -> String {
        self.name_any()
    }

    fn owner_uid(&self) -> String {
        self.uid().unwrap_or_default()
    }

    fn owner_namespace(&self) -> Option<String> {
        Some(self.name_any())
    }
}

/// Tags for a Namespace-owned VPC (namespace + namespace UID)
pub fn namespace_tags(ns: &Namespace, cluster: &str) -> Vec<Tag> {
    let uid = ns.owner_uid();
    ns.build_tags(cluster, Some(&uid))
}

/// Enforce NSX tag limits.
///
/// Values are truncated to [`MAX_TAG_VALUE_LENGTH`] and duplicate scopes
/// collapse to their first occurrence. When more than [`MAX_TAGS`] remain,
/// non-identity tags are dropped from the end.
pub fn cap_tags(tags: Vec<Tag>) -> Vec<Tag> {
    let mut seen = std::collections::HashSet::new();
    let mut deduped: Vec<Tag> = Vec::with_capacity(tags.len());
    for mut tag in tags {
        if !seen.insert(tag.scope.clone()) {
            continue;
        }
        if tag.tag.chars().count() > MAX_TAG_VALUE_LENGTH {
            tag.tag = truncate_chars(&tag.tag, MAX_TAG_VALUE_LENGTH);
        }
        deduped.push(tag);
    }

    if deduped.len() <= MAX_TAGS {
        return deduped;
    }

    let identity = deduped
        .iter()
        .filter(|t| IDENTITY_SCOPES.contains(&t.scope.as_str()))
        .count();
    let mut budget = MAX_TAGS.saturating_sub(identity);
    deduped
        .into_iter()
        .filter(|t| {
            if IDENTITY_SCOPES.contains(&t.scope.as_str()) {
                true
            } else if budget > 0 {
                budget -= 1;
                true
            } else {
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_namespace, create_test_subnet_set};
    use nsx_client::find_tag;

    #[test]
    fn test_subnet_set_tags() {
        let ss = create_test_subnet_set("ns1", "subnetset-1", "ss-uid");
        let tags = ss.build_tags("cluster-a", Some("ns-uid"));

        assert_eq!(find_tag(&tags, TAG_SCOPE_CLUSTER), Some("cluster-a"));
        assert_eq!(find_tag(&tags, TAG_SCOPE_VERSION), Some(TAG_VALUE_VERSION));
        assert_eq!(find_tag(&tags, TAG_SCOPE_NAMESPACE), Some("ns1"));
        assert_eq!(find_tag(&tags, TAG_SCOPE_NAMESPACE_UID), Some("ns-uid"));
        assert_eq!(find_tag(&tags, TAG_SCOPE_SUBNETSET_NAME), Some("subnetset-1"));
        assert_eq!(find_tag(&tags, TAG_SCOPE_SUBNETSET_UID), Some("ss-uid"));
    }

    #[test]
    fn test_namespace_tags_do_not_duplicate_scopes() {
        let ns = create_test_namespace("ns1", "ns-uid");
        let tags = namespace_tags(&ns, "cluster-a");

        assert_eq!(tags.len(), 4);
        assert_eq!(find_tag(&tags, TAG_SCOPE_NAMESPACE_UID), Some("ns-uid"));
    }

    #[test]
    fn test_cap_tags_truncates_long_values() {
        let long = "x".repeat(300);
        let tags = cap_tags(vec![Tag::new("custom", long)]);
        assert_eq!(tags[0].tag.len(), MAX_TAG_VALUE_LENGTH);
    }

    #[test]
    fn test_cap_tags_keeps_identity_tags() {
        let mut tags: Vec<Tag> = (0..40).map(|i| Tag::new(format!("extra/{i}"), "v")).collect();
        tags.push(Tag::new(TAG_SCOPE_SUBNETSET_UID, "ss-uid"));
        tags.push(Tag::new(TAG_SCOPE_SUBNETSET_NAME, "ss"));

        let capped = cap_tags(tags);

        assert_eq!(capped.len(), MAX_TAGS);
        assert_eq!(find_tag(&capped, TAG_SCOPE_SUBNETSET_UID), Some("ss-uid"));
        assert_eq!(find_tag(&capped, TAG_SCOPE_SUBNETSET_NAME), Some("ss"));
        assert_eq!(find_tag(&capped, "extra/0"), Some("v"));
    }
}
