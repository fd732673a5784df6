//! Unit tests for the VPC service
//!
//! These tests run the service against MockNsxClient and an in-memory
//! namespace lookup.

#[cfg(test)]
mod tests {
    use crate::backoff::RetryPolicy;
    use crate::error::ControllerError;
    use crate::network_config::VpcNetworkConfigRegistry;
    use crate::services::vpc::*;
    use crate::test_utils::*;
    use crate::util::generate_id;
    use nsx_client::*;
    use std::sync::Arc;
    use std::time::Duration;

    const PROFILE_PATH: &str = "/orgs/default/projects/proj-1/vpc-connectivity-profiles/default";
    const TGW_PATH: &str = "/orgs/default/projects/proj-1/transit-gateways/default";

    fn setup(use_avi_lb: bool) -> (Arc<MockNsxClient>, VpcService) {
        let mock = Arc::new(MockNsxClient::new("https://nsx"));
        let registry = Arc::new(VpcNetworkConfigRegistry::new());
        registry.register(test_network_config_info("default", true));
        let service = VpcService::new(
            mock.clone(),
            "cluster-a",
            use_avi_lb,
            registry,
            RealizeSettings::immediate(3),
        )
        .with_alb_probe_policy(RetryPolicy::immediate(4));
        (mock, service)
    }

    fn expected_vpc_path(namespace: &str, uid: &str) -> String {
        format!("/orgs/default/projects/proj-1/vpcs/{}", generate_id(namespace, uid))
    }

    #[tokio::test]
    async fn test_create_vpc_for_namespace() {
        let (mock, service) = setup(false);
        let lookup = StaticNamespaces::new(vec![create_test_namespace("ns1", "uid-1")]);

        let vpc = service
            .create_or_update_vpc("ns1", &lookup, LbProvider::Nsx)
            .await
            .expect("VPC should be created");

        assert_eq!(vpc.path, expected_vpc_path("ns1", "uid-1"));
        assert!(mock.vpc_exists(&vpc.path));
        assert_eq!(service.get_vpcs_by_namespace("ns1").len(), 1);
        assert!(service.get_vpc_by_namespace_uid("uid-1").is_some());
        assert_eq!(
            service.lbs_path_for_vpc(&vpc.path),
            Some(format!("{}/vpc-lbs/default", vpc.path))
        );
        assert_eq!(vpc.private_ips, vec!["172.26.0.0/16".to_string()]);
    }

    #[tokio::test]
    async fn test_existing_vpc_is_not_rewritten() {
        let (mock, service) = setup(false);
        let lookup = StaticNamespaces::new(vec![create_test_namespace("ns1", "uid-1")]);

        service.create_or_update_vpc("ns1", &lookup, LbProvider::Nsx).await.unwrap();
        service.create_or_update_vpc("ns1", &lookup, LbProvider::Nsx).await.unwrap();

        assert_eq!(mock.call_count("patch_org_root"), 1);
    }

    #[tokio::test]
    async fn test_avi_provider_enables_lb_endpoint_without_lbs() {
        let (_mock, service) = setup(true);
        let lookup = StaticNamespaces::new(vec![create_test_namespace("ns1", "uid-1")]);

        let vpc = service.create_or_update_vpc("ns1", &lookup, LbProvider::Avi).await.unwrap();

        assert_eq!(vpc.load_balancer_vpc_endpoint.and_then(|e| e.enabled), Some(true));
        assert!(service.lbs_path_for_vpc(&vpc.path).is_none());
    }

    #[tokio::test]
    async fn test_existing_vpc_switches_to_avi_endpoint() {
        let (mock, service) = setup(true);
        let lookup = StaticNamespaces::new(vec![create_test_namespace("ns1", "uid-1")]);

        let created = service.create_or_update_vpc("ns1", &lookup, LbProvider::None).await.unwrap();
        assert_ne!(created.load_balancer_vpc_endpoint.and_then(|e| e.enabled), Some(true));

        let updated = service.create_or_update_vpc("ns1", &lookup, LbProvider::Avi).await.unwrap();

        assert_eq!(mock.call_count("patch_org_root"), 2);
        assert_eq!(updated.path, created.path);
        assert_eq!(updated.load_balancer_vpc_endpoint.and_then(|e| e.enabled), Some(true));
        let stored = service.get_vpc_by_namespace_uid("uid-1").expect("VPC should be stored");
        assert_eq!(stored.load_balancer_vpc_endpoint.and_then(|e| e.enabled), Some(true));
    }

    #[tokio::test]
    async fn test_missing_namespace_fails() {
        let (_mock, service) = setup(false);
        let lookup = StaticNamespaces::new(vec![]);

        let err = service
            .create_or_update_vpc("ghost", &lookup, LbProvider::None)
            .await
            .unwrap_err();

        assert!(matches!(err, ControllerError::NamespaceNotFound(ref ns) if ns == "ghost"));
    }

    #[tokio::test]
    async fn test_pre_created_vpc_is_only_read() {
        let (mock, service) = setup(false);
        let pre_path = "/orgs/default/projects/proj-1/vpcs/pre-vpc";
        let mut nc = test_network_config_info("pre", false);
        nc.vpc_path = pre_path.to_string();
        service.registry.register(nc);
        service.registry.register_namespace_binding("ns1", "pre");
        mock.add_vpc(Vpc {
            id: "pre-vpc".to_string(),
            path: pre_path.to_string(),
            ..Default::default()
        });
        let lookup = StaticNamespaces::new(vec![create_test_namespace("ns1", "uid-1")]);

        let vpc = service.create_or_update_vpc("ns1", &lookup, LbProvider::Nsx).await.unwrap();

        assert_eq!(vpc.path, pre_path);
        assert_eq!(mock.call_count("patch_org_root"), 0);
        assert_eq!(service.list_vpc_info("ns1").len(), 1);
        assert_eq!(service.list_vpc_info("ns1")[0].vpc_id, "pre-vpc");
    }

    #[tokio::test]
    async fn test_shared_vpc_not_ready() {
        let (_mock, service) = setup(false);
        let lookup = StaticNamespaces::new(vec![
            create_test_namespace("ns1", "uid-1"),
            create_test_shared_namespace("ns2", "uid-2", "ns1"),
        ]);

        let err = service
            .create_or_update_vpc("ns2", &lookup, LbProvider::None)
            .await
            .unwrap_err();

        assert!(matches!(err, ControllerError::SharedVpcNotReady(ref ns) if ns == "ns1"));
        assert_eq!(err.to_string(), "the shared VPC is not created yet, namespace ns1");
    }

    #[tokio::test]
    async fn test_shared_vpc_reuses_target() {
        let (mock, service) = setup(false);
        let lookup = StaticNamespaces::new(vec![
            create_test_namespace("ns1", "uid-1"),
            create_test_shared_namespace("ns2", "uid-2", "ns1"),
        ]);

        let target = service.create_or_update_vpc("ns1", &lookup, LbProvider::None).await.unwrap();
        let shared = service.create_or_update_vpc("ns2", &lookup, LbProvider::None).await.unwrap();

        assert_eq!(shared.path, target.path);
        assert_eq!(mock.call_count("patch_org_root"), 1);
    }

    #[tokio::test]
    async fn test_shared_target_missing() {
        let (_mock, service) = setup(false);
        let lookup = StaticNamespaces::new(vec![create_test_shared_namespace("ns2", "uid-2", "ns1")]);

        let err = service
            .create_or_update_vpc("ns2", &lookup, LbProvider::None)
            .await
            .unwrap_err();

        assert!(matches!(err, ControllerError::NamespaceNotFound(ref ns) if ns == "ns1"));
    }

    #[tokio::test]
    async fn test_realization_error_rolls_back_new_vpc() {
        let (mock, service) = setup(false);
        let path = expected_vpc_path("ns1", "uid-1");
        mock.set_realized_state(&path, RealizationState::Error);
        let lookup = StaticNamespaces::new(vec![create_test_namespace("ns1", "uid-1")]);

        let err = service
            .create_or_update_vpc("ns1", &lookup, LbProvider::None)
            .await
            .unwrap_err();

        assert!(matches!(err, ControllerError::RealizationFailed { .. }));
        assert!(!mock.vpc_exists(&path));
        assert_eq!(mock.call_count("patch_org_root"), 2);
        assert!(service.list_vpcs().is_empty());
    }

    #[tokio::test]
    async fn test_realization_timeout_keeps_vpc() {
        let (mock, service) = setup(false);
        let path = expected_vpc_path("ns1", "uid-1");
        mock.set_realized_state(&path, RealizationState::InProgress);
        let lookup = StaticNamespaces::new(vec![create_test_namespace("ns1", "uid-1")]);

        let err = service
            .create_or_update_vpc("ns1", &lookup, LbProvider::None)
            .await
            .unwrap_err();

        assert!(matches!(err, ControllerError::RealizationTimeout { attempts: 3, .. }));
        assert!(err.is_retryable());
        assert!(mock.vpc_exists(&path));
    }

    #[tokio::test]
    async fn test_delete_vpc_invalid_path() {
        let (mock, service) = setup(false);

        let err = service.delete_vpc("/invalid/path").await.unwrap_err();

        assert!(matches!(err, ControllerError::InvalidPath(_)));
        assert_eq!(mock.call_count("delete_vpc"), 0);
    }

    #[tokio::test]
    async fn test_delete_vpc_nsx_error_is_returned() {
        let (mock, service) = setup(false);
        mock.fail("delete_vpc", MockFailure::Api(500, "internal".to_string()));

        let err = service
            .delete_vpc("/orgs/default/projects/proj-1/vpcs/vpc-1")
            .await
            .unwrap_err();

        assert!(matches!(err, ControllerError::Nsx(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_vpc_succeeds() {
        let (_mock, service) = setup(false);

        service
            .delete_vpc("/orgs/default/projects/proj-1/vpcs/gone")
            .await
            .expect("404 counts as deleted");
    }

    #[tokio::test]
    async fn test_delete_vpc_drops_lbs_from_store() {
        let (mock, service) = setup(false);
        let lookup = StaticNamespaces::new(vec![create_test_namespace("ns1", "uid-1")]);
        let vpc = service.create_or_update_vpc("ns1", &lookup, LbProvider::Nsx).await.unwrap();
        assert_eq!(service.lbs_store.len(), 1);

        service.delete_vpc(&vpc.path).await.unwrap();

        assert!(!mock.vpc_exists(&vpc.path));
        assert!(service.lbs_store.is_empty());
        assert!(service.list_vpcs().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_loads_cluster_objects() {
        let (mock, service) = setup(false);
        let tags = vec![
            Tag::new("nsx-op/cluster", "cluster-a"),
            Tag::new("nsx-op/namespace", "ns1"),
        ];
        mock.add_vpc(Vpc {
            id: "v1".to_string(),
            path: "/orgs/default/projects/proj-1/vpcs/v1".to_string(),
            tags: tags.clone(),
            ..Default::default()
        });
        mock.add_vpc(Vpc {
            id: "other".to_string(),
            path: "/orgs/default/projects/proj-1/vpcs/other".to_string(),
            tags: vec![Tag::new("nsx-op/cluster", "cluster-b")],
            ..Default::default()
        });

        service.initialize().await.unwrap();

        assert_eq!(service.list_vpcs().len(), 1);
        assert_eq!(service.get_vpcs_by_namespace("ns1").len(), 1);
    }

    #[tokio::test]
    async fn test_lb_provider_alb_not_found_probes_once() {
        let (mock, service) = setup(true);

        assert_eq!(service.compute_lb_provider(true).await, LbProvider::Nsx);
        assert_eq!(mock.call_count("get_alb_endpoint"), 1);
    }

    #[tokio::test]
    async fn test_lb_provider_alb_error_probes_four_times() {
        let (mock, service) = setup(true);
        mock.fail("get_alb_endpoint", MockFailure::Api(500, "unavailable".to_string()));

        assert_eq!(service.compute_lb_provider(false).await, LbProvider::None);
        assert_eq!(mock.call_count("get_alb_endpoint"), 4);
    }

    #[tokio::test]
    async fn test_lb_provider_avi_when_alb_found() {
        let (mock, service) = setup(true);
        mock.set_alb_endpoint(Some(AlbEndpoint {
            id: "default".to_string(),
            path: "/infra/sites/default/enforcement-points/alb-endpoint".to_string(),
        }));

        assert_eq!(service.compute_lb_provider(true).await, LbProvider::Avi);
    }

    #[tokio::test]
    async fn test_lb_provider_attached_lbs_keeps_nsx() {
        let (mock, service) = setup(true);
        mock.set_alb_endpoint(Some(AlbEndpoint::default()));
        service
            .lbs_store
            .apply(LbService {
                id: "default".to_string(),
                path: "/orgs/default/projects/proj-1/vpcs/v1/vpc-lbs/default".to_string(),
                connectivity_path: Some("/orgs/default/projects/proj-1/vpcs/v1".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(service.compute_lb_provider(true).await, LbProvider::Nsx);
    }

    #[tokio::test]
    async fn test_lb_provider_without_avi_skips_probe() {
        let (mock, service) = setup(false);

        assert_eq!(service.compute_lb_provider(false).await, LbProvider::None);
        assert_eq!(mock.call_count("get_alb_endpoint"), 0);
    }

    #[tokio::test]
    async fn test_get_lb_provider_is_cached() {
        let (mock, service) = setup(false);
        mock.add_connectivity_profile(VpcConnectivityProfile {
            id: "default".to_string(),
            path: PROFILE_PATH.to_string(),
            service_gateway: Some(ServiceGateway { enable: Some(true) }),
            transit_gateway_path: None,
        });

        assert_eq!(service.get_lb_provider().await, LbProvider::Nsx);
        assert_eq!(service.get_lb_provider().await, LbProvider::Nsx);
        assert_eq!(mock.call_count("get_vpc_connectivity_profile"), 1);
    }

    #[tokio::test]
    async fn test_get_lb_provider_without_default_config() {
        let mock = Arc::new(MockNsxClient::new("https://nsx"));
        let service = VpcService::new(
            mock.clone(),
            "cluster-a",
            false,
            Arc::new(VpcNetworkConfigRegistry::new()),
            RealizeSettings::immediate(1),
        );

        assert_eq!(service.get_lb_provider().await, LbProvider::None);
        assert_eq!(mock.call_count("get_vpc_connectivity_profile"), 0);
    }

    #[test]
    fn test_is_lb_provider_changed() {
        let (_mock, service) = setup(false);
        let avi_vpc = Vpc {
            id: "v1".to_string(),
            load_balancer_vpc_endpoint: Some(LoadBalancerVpcEndpoint { enabled: Some(true) }),
            ..Default::default()
        };
        let plain_vpc = Vpc {
            id: "v2".to_string(),
            ..Default::default()
        };

        assert!(!service.is_lb_provider_changed(None, LbProvider::Avi));
        assert!(!service.is_lb_provider_changed(Some(&avi_vpc), LbProvider::Avi));
        assert!(service.is_lb_provider_changed(Some(&plain_vpc), LbProvider::Avi));
        assert!(service.is_lb_provider_changed(Some(&plain_vpc), LbProvider::Nsx));
        assert!(!service.is_lb_provider_changed(Some(&plain_vpc), LbProvider::None));
    }

    #[test]
    fn test_validate_network_config() {
        let mut nc = test_network_config_info("cfg", false);
        assert!(VpcService::validate_network_config(&nc));

        nc.private_ips.clear();
        assert!(!VpcService::validate_network_config(&nc));

        nc.vpc_path = "/orgs/default/projects/proj-1/vpcs/pre".to_string();
        assert!(VpcService::validate_network_config(&nc));
    }

    fn add_profile_with_tgw(mock: &MockNsxClient) {
        mock.add_connectivity_profile(VpcConnectivityProfile {
            id: "default".to_string(),
            path: PROFILE_PATH.to_string(),
            service_gateway: None,
            transit_gateway_path: Some(TGW_PATH.to_string()),
        });
    }

    fn attachment(connection_path: &str) -> TransitGatewayAttachment {
        TransitGatewayAttachment {
            id: "att".to_string(),
            path: format!("{TGW_PATH}/attachments/att"),
            connection_path: Some(connection_path.to_string()),
        }
    }

    #[tokio::test]
    async fn test_gateway_connection_not_set() {
        let (mock, service) = setup(false);
        add_profile_with_tgw(&mock);
        let nc = test_network_config_info("default", true);

        let (ok, reason) = service.validate_gateway_connection_status(&nc).await.unwrap();

        assert!(!ok);
        assert_eq!(reason, REASON_GATEWAY_CONNECTION_NOT_SET);
    }

    #[tokio::test]
    async fn test_distributed_gateway_connection_not_supported() {
        let (mock, service) = setup(false);
        add_profile_with_tgw(&mock);
        mock.add_tgw_attachment(TGW_PATH, attachment("/infra/distributed-gateway-connections/gw"));
        let nc = test_network_config_info("default", true);

        let (ok, reason) = service.validate_gateway_connection_status(&nc).await.unwrap();

        assert!(!ok);
        assert_eq!(reason, REASON_DISTRIBUTED_GATEWAY_CONNECTION_NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn test_gateway_connection_ready() {
        let (mock, service) = setup(false);
        add_profile_with_tgw(&mock);
        mock.add_tgw_attachment(TGW_PATH, attachment("/infra/gateway-connections/gw"));
        let nc = test_network_config_info("default", true);

        assert_eq!(service.validate_gateway_connection_status(&nc).await.unwrap(), (true, ""));
    }

    #[tokio::test]
    async fn test_gateway_connection_invalid_path() {
        let (mock, service) = setup(false);
        add_profile_with_tgw(&mock);
        mock.add_tgw_attachment(TGW_PATH, attachment("invalidPath"));
        let nc = test_network_config_info("default", true);

        let err = service.validate_gateway_connection_status(&nc).await.unwrap_err();
        assert!(err.to_string().contains("unexpected connectionPath invalidPath"));
    }

    #[tokio::test]
    async fn test_cleanup_deletes_avi_ports_then_vpcs() {
        let (mock, service) = setup(false);
        let lookup = StaticNamespaces::new(vec![create_test_namespace("ns1", "uid-1")]);
        let vpc = service.create_or_update_vpc("ns1", &lookup, LbProvider::None).await.unwrap();
        let port_path = format!("{}/subnets/_AVI_SUBNET--LB/ports/p1", vpc.path);
        let port = SubnetPort {
            id: "p1".to_string(),
            path: port_path.clone(),
            ..Default::default()
        };
        mock.add_subnet_port(port.clone());
        mock.add_avi_port(&vpc.path, port);

        service.cleanup_vpcs(Duration::from_secs(10)).await.unwrap();

        assert!(!mock.subnet_port_exists(&port_path));
        assert!(!mock.vpc_exists(&vpc.path));
        assert!(service.list_vpcs().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_aggregates_failures() {
        let (mock, service) = setup(false);
        let lookup = StaticNamespaces::new(vec![create_test_namespace("ns1", "uid-1")]);
        service.create_or_update_vpc("ns1", &lookup, LbProvider::None).await.unwrap();
        mock.fail("delete_vpc", MockFailure::Api(400, "in use".to_string()));

        let err = service.cleanup_vpcs(Duration::from_secs(10)).await.unwrap_err();

        assert!(err.to_string().starts_with("failed to clean up VPCs: ["));
        assert_eq!(service.list_vpcs().len(), 1);
    }
}
