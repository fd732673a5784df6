//! Unit tests for the reconcile helpers

#[cfg(test)]
mod tests {
    use crate::reconciler::garbage::orphaned_vpcs;
    use crate::reconciler::namespace::{network_info_spec, should_delete_vpc};
    use crate::reconciler::network_config::{
        REASON_PRIVATE_IPS_MISSING, network_config_condition, network_config_status,
    };
    use crate::reconciler::subnet::subnet_cr_status;
    use crate::reconciler::subnetset::{
        bindings_targeting, in_use_message, subnet_set_for_binding_map, subnet_set_status,
    };
    use crate::network_config::VpcNetworkConfigRegistry;
    use crate::reconciler::{SUBNETSET_BINDING_FINALIZER, default_subnet_size_for, finalizers_with, resource_key};
    use crate::services::vpc::{REASON_DISTRIBUTED_GATEWAY_CONNECTION_NOT_SUPPORTED, REASON_GATEWAY_CONNECTION_NOT_SET};
    use crate::tags::TAG_SCOPE_NAMESPACE_UID;
    use crate::test_utils::{
        create_test_binding_map, create_test_namespace, create_test_subnet_set, test_network_config_info,
    };
    use crds::{Condition, SubnetDhcpConfig as CrdDhcpConfig, VPCInfo, is_ready};
    use nsx_client::{SubnetDhcpConfig, Tag, Vpc, VpcSubnet};
    use std::collections::HashSet;

    fn vpc(id: &str, namespace_uid: Option<&str>) -> Vpc {
        Vpc {
            id: id.to_string(),
            path: format!("/orgs/default/projects/proj-1/vpcs/{id}"),
            display_name: id.to_string(),
            tags: namespace_uid
                .map(|uid| vec![Tag::new(TAG_SCOPE_NAMESPACE_UID, uid)])
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    fn vpc_subnet(id: &str, cidr: &str, dhcp: bool) -> VpcSubnet {
        VpcSubnet {
            id: id.to_string(),
            path: format!("/orgs/default/projects/proj-1/vpcs/vpc-1/subnets/{id}"),
            ip_addresses: vec![cidr.to_string()],
            subnet_dhcp_config: dhcp.then(|| SubnetDhcpConfig {
                mode: Some("DHCP_SERVER".to_string()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_finalizers_with() {
        let current = vec!["other".to_string()];

        let added = finalizers_with(&current, SUBNETSET_BINDING_FINALIZER, true).unwrap();
        assert_eq!(added, vec!["other".to_string(), SUBNETSET_BINDING_FINALIZER.to_string()]);
        assert!(finalizers_with(&added, SUBNETSET_BINDING_FINALIZER, true).is_none());

        let removed = finalizers_with(&added, SUBNETSET_BINDING_FINALIZER, false).unwrap();
        assert_eq!(removed, current);
        assert!(finalizers_with(&current, SUBNETSET_BINDING_FINALIZER, false).is_none());
    }

    #[test]
    fn test_resource_key() {
        let set = create_test_subnet_set("ns-1", "set-a", "uid-1");
        assert_eq!(resource_key("SubnetSet", &set), "SubnetSet/ns-1/set-a");

        let ns = create_test_namespace("ns-1", "uid-ns");
        assert_eq!(resource_key("Namespace", &ns), "Namespace/ns-1");
    }

    #[test]
    fn test_network_config_condition() {
        assert!(is_ready(&[network_config_condition(true, (true, ""))]));

        let missing_ips = network_config_condition(false, (true, ""));
        assert_eq!(missing_ips.reason.as_deref(), Some(REASON_PRIVATE_IPS_MISSING));

        let not_set = network_config_condition(true, (false, REASON_GATEWAY_CONNECTION_NOT_SET));
        assert_eq!(not_set.status, "False");
        assert_eq!(not_set.reason.as_deref(), Some(REASON_GATEWAY_CONNECTION_NOT_SET));

        let distributed = network_config_condition(true, (false, REASON_DISTRIBUTED_GATEWAY_CONNECTION_NOT_SUPPORTED));
        assert!(distributed.message.unwrap().contains("distributed gateway connection"));
    }

    #[test]
    fn test_network_config_status_skips_unchanged() {
        let vpcs = vec![VPCInfo {
            name: "ns-1".to_string(),
            vpc_path: Some("/orgs/default/projects/proj-1/vpcs/ns-1".to_string()),
            ..Default::default()
        }];
        let status = network_config_status(None, vpcs.clone(), Condition::ready()).unwrap();
        assert_eq!(status.vpcs, vpcs);

        assert!(network_config_status(Some(&status), vpcs, Condition::ready()).is_none());
        assert!(network_config_status(Some(&status), Vec::new(), Condition::ready()).is_some());
    }

    #[test]
    fn test_network_info_spec_private_ips() {
        let nc = test_network_config_info("default", true);
        let mut served = vpc("ns-1_abcd", Some("uid-1"));

        let spec = network_info_spec(&served, &nc);
        assert_eq!(spec.vpcs.len(), 1);
        assert_eq!(spec.vpcs[0].vpc_path, served.path);
        assert_eq!(spec.vpcs[0].private_ips, nc.private_ips);

        served.private_ips = vec!["10.10.0.0/16".to_string()];
        assert_eq!(network_info_spec(&served, &nc).vpcs[0].private_ips, served.private_ips);
    }

    #[test]
    fn test_should_delete_vpc() {
        let auto = test_network_config_info("default", true);
        let mut pre_created = auto.clone();
        pre_created.vpc_path = "/orgs/default/projects/proj-1/vpcs/pre".to_string();

        assert!(should_delete_vpc(false, Some(&auto), &[]));
        assert!(should_delete_vpc(false, None, &[]));
        assert!(!should_delete_vpc(true, Some(&auto), &[]));
        assert!(!should_delete_vpc(false, Some(&pre_created), &[]));
        assert!(!should_delete_vpc(false, Some(&auto), &["ns-2".to_string()]));
    }

    #[test]
    fn test_bindings_targeting_and_message() {
        let maps = vec![
            create_test_binding_map("ns-1", "binding-b", Some("set-a")),
            create_test_binding_map("ns-1", "binding-a", Some("set-a")),
            create_test_binding_map("ns-1", "binding-c", Some("set-b")),
            create_test_binding_map("ns-1", "binding-d", None),
        ];

        let names = bindings_targeting(&maps, "set-a");

        assert_eq!(names, vec!["binding-a".to_string(), "binding-b".to_string()]);
        assert_eq!(
            in_use_message(&names),
            "SubnetSet is used by SubnetConnectionBindingMap binding-a,binding-b and not able to delete"
        );
    }

    #[test]
    fn test_subnet_set_for_binding_map() {
        let target = subnet_set_for_binding_map(&create_test_binding_map("ns-1", "binding", Some("set-a"))).unwrap();
        assert_eq!(target.name, "set-a");
        assert_eq!(target.namespace.as_deref(), Some("ns-1"));

        assert!(subnet_set_for_binding_map(&create_test_binding_map("ns-1", "binding", None)).is_none());
    }

    #[test]
    fn test_subnet_set_status_lists_subnets() {
        let subnets = vec![vpc_subnet("b", "10.0.1.0/28", true), vpc_subnet("a", "10.0.0.0/28", false)];

        let status = subnet_set_status(None, &subnets, Condition::ready()).unwrap();

        assert_eq!(status.subnets.len(), 2);
        assert_eq!(status.subnets[0].network_addresses, vec!["10.0.0.0/28".to_string()]);
        assert_eq!(status.subnets[0].gateway_addresses, vec!["10.0.0.1/28".to_string()]);
        assert!(status.subnets[0].dhcp_server_address.is_none());
        assert_eq!(status.subnets[1].dhcp_server_address.as_deref(), Some("10.0.1.2/28"));
        assert!(is_ready(&status.conditions));

        assert!(subnet_set_status(Some(&status), &subnets, Condition::ready()).is_none());
    }

    #[test]
    fn test_subnet_cr_status_tracks_addresses() {
        let subnet = vpc_subnet("s", "10.0.2.0/28", true);

        let status = subnet_cr_status(None, &subnet, Condition::ready()).unwrap();

        assert_eq!(status.gateway_addresses, vec!["10.0.2.1/28".to_string()]);
        assert_eq!(status.dhcp_server_addresses, vec!["10.0.2.2/28".to_string()]);
        assert!(subnet_cr_status(Some(&status), &subnet, Condition::ready()).is_none());

        let failed = Condition::not_ready("SubnetNotReady", "boom");
        assert!(!is_ready(&subnet_cr_status(Some(&status), &subnet, failed).unwrap().conditions));
    }

    #[test]
    fn test_orphaned_vpcs() {
        let live: HashSet<String> = HashSet::from(["uid-live".to_string()]);
        let vpcs = vec![vpc("live", Some("uid-live")), vpc("gone", Some("uid-gone")), vpc("untagged", None)];

        let orphans = orphaned_vpcs(vpcs, &live);

        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, "gone");
    }

    #[test]
    fn test_default_subnet_size_comes_from_network_config() {
        let registry = VpcNetworkConfigRegistry::new();
        assert_eq!(default_subnet_size_for(&registry, "ns-1", 32), 32);

        let mut default = test_network_config_info("default", true);
        default.default_subnet_size = 64;
        registry.register(default);
        let mut custom = test_network_config_info("custom", false);
        custom.default_subnet_size = 128;
        registry.register(custom);
        registry.register_namespace_binding("ns-2", "custom");

        assert_eq!(default_subnet_size_for(&registry, "ns-1", 32), 64);
        assert_eq!(default_subnet_size_for(&registry, "ns-2", 32), 128);

        let set = create_test_subnet_set("ns-2", "set-a", "uid-1");
        let params = crate::services::subnet::SubnetParams::for_subnet_set(
            &set,
            default_subnet_size_for(&registry, "ns-2", 32),
        );
        assert_eq!(params.ipv4_subnet_size, 128);
    }

    #[test]
    fn test_dhcp_config_mode_is_mapped_for_subnet_sets() {
        let mut set = create_test_subnet_set("ns-1", "set-a", "uid-1");
        set.spec.subnet_dhcp_config = Some(CrdDhcpConfig {
            mode: Some("DHCPServer".to_string()),
        });
        let params = crate::services::subnet::SubnetParams::for_subnet_set(&set, 32);
        assert_eq!(params.dhcp_mode, "DHCP_SERVER");
        assert_eq!(params.ipv4_subnet_size, 32);
    }
}
