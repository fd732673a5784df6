//! Uninstall-time cleanup of every NSX resource owned by the cluster.
//!
//! Services are initialized up front (the first init failure aborts the
//! run), then cleaned in dependency order: subnet ports, subnets, security
//! policies, IP pools, static routes and finally VPCs. Each stage is retried
//! and the run stops at the first stage that keeps failing.

use crate::backoff::{RetryPolicy, retry_on_error};
use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::network_config::VpcNetworkConfigRegistry;
use crate::services::binding_map::BindingMapService;
use crate::services::cleaner::{
    RESOURCE_IP_POOL, RESOURCE_SECURITY_POLICY, RESOURCE_STATIC_ROUTE, TaggedResourceCleaner,
};
use crate::services::subnet::SubnetService;
use crate::services::subnetport::SubnetPortService;
use crate::services::vpc::{RealizeSettings, VpcService};
use nsx_client::{NsxClient, NsxClientTrait};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// Failure class of a cleanup run, doubling as the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStatus {
    ValidationFailed = 1,
    GetNsxClientFailed = 2,
    InitCleanupServiceFailed = 3,
    CleanupResourceFailed = 4,
}

impl CleanupStatus {
    pub fn exit_code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for CleanupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CleanupStatus::ValidationFailed => "failed to validate config",
            CleanupStatus::GetNsxClientFailed => "failed to get nsx client",
            CleanupStatus::InitCleanupServiceFailed => "failed to initialize cleanup service",
            CleanupStatus::CleanupResourceFailed => "failed to clean up",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("{status}: {source}")]
pub struct CleanupError {
    pub status: CleanupStatus,
    #[source]
    pub source: ControllerError,
}

impl CleanupError {
    fn new(status: CleanupStatus, source: ControllerError) -> Self {
        Self { status, source }
    }
}

/// One cleanup stage
#[async_trait::async_trait]
pub trait CleanupService: Send + Sync {
    fn name(&self) -> &str;

    async fn cleanup(&self) -> Result<(), ControllerError>;
}

#[async_trait::async_trait]
impl CleanupService for SubnetPortService {
    fn name(&self) -> &str {
        "SubnetPort"
    }

    async fn cleanup(&self) -> Result<(), ControllerError> {
        SubnetPortService::cleanup(self).await
    }
}

#[async_trait::async_trait]
impl CleanupService for SubnetService {
    fn name(&self) -> &str {
        "Subnet"
    }

    async fn cleanup(&self) -> Result<(), ControllerError> {
        SubnetService::cleanup(self).await
    }
}

#[async_trait::async_trait]
impl CleanupService for TaggedResourceCleaner {
    fn name(&self) -> &str {
        self.resource_type()
    }

    async fn cleanup(&self) -> Result<(), ControllerError> {
        TaggedResourceCleaner::cleanup(self).await
    }
}

/// VPC stage, bounded by the cleanup deadline
#[derive(Debug)]
pub struct VpcCleanup {
    service: Arc<VpcService>,
    timeout: Duration,
}

impl VpcCleanup {
    pub fn new(service: Arc<VpcService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }
}

#[async_trait::async_trait]
impl CleanupService for VpcCleanup {
    fn name(&self) -> &str {
        "VPC"
    }

    async fn cleanup(&self) -> Result<(), ControllerError> {
        self.service.cleanup_vpcs(self.timeout).await
    }
}

/// Ordered cleanup stages
pub struct CleanupPlan {
    services: Vec<Arc<dyn CleanupService>>,
    init_error: Option<ControllerError>,
    retry: RetryPolicy,
}

impl fmt::Debug for CleanupPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupPlan")
            .field("services", &self.services.iter().map(|s| s.name().to_string()).collect::<Vec<_>>())
            .field("init_error", &self.init_error)
            .finish_non_exhaustive()
    }
}

impl Default for CleanupPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl CleanupPlan {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            init_error: None,
            retry: RetryPolicy::cleanup_stage(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Initialize and append a stage. Once an init has failed, later
    /// initializers are not run.
    pub async fn add_cleanup_service<F, Fut>(mut self, init: F) -> Self
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn CleanupService>, ControllerError>>,
    {
        if self.init_error.is_some() {
            return self;
        }
        match init().await {
            Ok(service) => self.services.push(service),
            Err(e) => self.init_error = Some(e),
        }
        self
    }

    pub fn stages(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name().to_string()).collect()
    }

    /// Run every stage in order
    pub async fn run(self) -> Result<(), CleanupError> {
        if let Some(e) = self.init_error {
            return Err(CleanupError::new(CleanupStatus::InitCleanupServiceFailed, e));
        }
        for service in &self.services {
            info!("Cleaning up NSX {} resources", service.name());
            retry_on_error(
                &self.retry,
                || service.cleanup(),
                |e: &ControllerError| {
                    info!("Retrying to clean up NSX {} resources: {}", service.name(), e);
                    true
                },
            )
            .await
            .map_err(|e| CleanupError::new(CleanupStatus::CleanupResourceFailed, e))?;
        }
        Ok(())
    }
}

/// Build the standard stage list against an NSX client
pub async fn build_plan(nsx: Arc<dyn NsxClientTrait>, config: &OperatorConfig) -> CleanupPlan {
    let cluster = config.cluster.clone();
    let realize = RealizeSettings::from_timeout(config.realize_timeout());
    let ports = Arc::new(SubnetPortService::new(Arc::clone(&nsx), cluster.clone()));
    let binding_maps = Arc::new(BindingMapService::new(Arc::clone(&nsx), cluster.clone()));

    let tagged = |resource_type: &'static str| {
        let nsx = Arc::clone(&nsx);
        let cluster = cluster.clone();
        move || async move {
            let cleaner: Arc<dyn CleanupService> = Arc::new(TaggedResourceCleaner::new(nsx, cluster, resource_type));
            Ok::<_, ControllerError>(cleaner)
        }
    };

    CleanupPlan::new()
        .add_cleanup_service(|| {
            let ports = Arc::clone(&ports);
            async move {
                ports.initialize().await?;
                Ok::<_, ControllerError>(ports as Arc<dyn CleanupService>)
            }
        })
        .await
        .add_cleanup_service(|| {
            let subnets = SubnetService::new(
                Arc::clone(&nsx),
                cluster.clone(),
                Arc::clone(&ports),
                Arc::clone(&binding_maps),
                realize,
            );
            let binding_maps = Arc::clone(&binding_maps);
            async move {
                binding_maps.initialize().await?;
                subnets.initialize().await?;
                Ok::<_, ControllerError>(Arc::new(subnets) as Arc<dyn CleanupService>)
            }
        })
        .await
        .add_cleanup_service(tagged(RESOURCE_SECURITY_POLICY))
        .await
        .add_cleanup_service(tagged(RESOURCE_IP_POOL))
        .await
        .add_cleanup_service(tagged(RESOURCE_STATIC_ROUTE))
        .await
        .add_cleanup_service(|| {
            let vpcs = VpcService::new(
                Arc::clone(&nsx),
                cluster.clone(),
                config.use_avi_lb,
                Arc::new(VpcNetworkConfigRegistry::new()),
                realize,
            );
            let timeout = config.cleanup_timeout();
            async move {
                vpcs.initialize().await?;
                Ok::<_, ControllerError>(Arc::new(VpcCleanup::new(Arc::new(vpcs), timeout)) as Arc<dyn CleanupService>)
            }
        })
        .await
}

/// Run the cleanup against an already constructed client
pub async fn clean_with_client(nsx: Arc<dyn NsxClientTrait>, config: &OperatorConfig) -> Result<(), CleanupError> {
    build_plan(nsx, config).await.run().await
}

/// Entry point of the `clean` subcommand
pub async fn clean(config: &OperatorConfig) -> Result<(), CleanupError> {
    info!("Starting NSX cleanup for cluster {}", config.cluster);
    config
        .validate()
        .map_err(|e| CleanupError::new(CleanupStatus::ValidationFailed, e))?;

    let client = NsxClient::new(
        config.nsx_manager_url.clone(),
        config.nsx_username.clone(),
        config.nsx_password.clone(),
        config.insecure_tls,
    )
    .map_err(|e| CleanupError::new(CleanupStatus::GetNsxClientFailed, e.into()))?;
    client
        .validate_connection()
        .await
        .map_err(|e| CleanupError::new(CleanupStatus::GetNsxClientFailed, e.into()))?;

    match clean_with_client(Arc::new(client), config).await {
        Ok(()) => {
            info!("Cleaned up NSX resources successfully");
            Ok(())
        }
        Err(e) => {
            error!("NSX cleanup failed: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use nsx_client::{MockFailure, MockNsxClient, PolicyResource, SubnetPort, Tag, Vpc, VpcSubnet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> OperatorConfig {
        crate::config::Cli::try_parse_from([
            "nsx-vpc-controller",
            "--nsx-manager-url",
            "https://nsx.example",
            "--nsx-username",
            "admin",
            "--nsx-password",
            "secret",
            "--cluster",
            "cluster-a",
        ])
        .unwrap()
        .config
    }

    fn cluster_tags() -> Vec<Tag> {
        vec![Tag::new("nsx-op/cluster", "cluster-a")]
    }

    struct CountingService {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl CleanupService for CountingService {
        fn name(&self) -> &str {
            self.name
        }

        async fn cleanup(&self) -> Result<(), ControllerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ControllerError::Reconciliation(format!("{} failed", self.name)));
            }
            Ok(())
        }
    }

    fn counting(name: &'static str, calls: &Arc<AtomicUsize>, fail: bool) -> Arc<dyn CleanupService> {
        Arc::new(CountingService {
            name,
            calls: Arc::clone(calls),
            fail,
        })
    }

    #[test]
    fn test_status_exit_codes() {
        assert_eq!(CleanupStatus::ValidationFailed.exit_code(), 1);
        assert_eq!(CleanupStatus::GetNsxClientFailed.exit_code(), 2);
        assert_eq!(CleanupStatus::InitCleanupServiceFailed.exit_code(), 3);
        assert_eq!(CleanupStatus::CleanupResourceFailed.exit_code(), 4);
    }

    #[tokio::test]
    async fn test_init_failure_short_circuits() {
        let later_init = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let plan = CleanupPlan::new()
            .add_cleanup_service(|| async {
                Err::<Arc<dyn CleanupService>, _>(ControllerError::Reconciliation("init failed".to_string()))
            })
            .await
            .add_cleanup_service(|| {
                later_init.fetch_add(1, Ordering::SeqCst);
                let service = counting("VPC", &calls, false);
                async move { Ok::<_, ControllerError>(service) }
            })
            .await;

        let err = plan.run().await.unwrap_err();

        assert_eq!(err.status, CleanupStatus::InitCleanupServiceFailed);
        assert_eq!(later_init.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_stage_is_retried_then_stops_run() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let plan = CleanupPlan::new()
            .with_retry(RetryPolicy::immediate(3))
            .add_cleanup_service(|| {
                let service = counting("Subnet", &first, true);
                async move { Ok::<_, ControllerError>(service) }
            })
            .await
            .add_cleanup_service(|| {
                let service = counting("VPC", &second, false);
                async move { Ok::<_, ControllerError>(service) }
            })
            .await;

        let err = plan.run().await.unwrap_err();

        assert_eq!(err.status, CleanupStatus::CleanupResourceFailed);
        assert_eq!(first.load(Ordering::SeqCst), 3);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_standard_stage_order() {
        let mock = Arc::new(MockNsxClient::new("https://nsx"));

        let plan = build_plan(mock, &config()).await;

        assert_eq!(
            plan.stages(),
            vec!["SubnetPort", "Subnet", "SecurityPolicy", "IpAddressPool", "StaticRoutes", "VPC"]
        );
    }

    #[tokio::test]
    async fn test_init_error_from_nsx() {
        let mock = Arc::new(MockNsxClient::new("https://nsx"));
        mock.fail("list_vpc_subnets", MockFailure::Api(500, "down".to_string()));

        let err = clean_with_client(mock.clone(), &config()).await.unwrap_err();

        assert_eq!(err.status, CleanupStatus::InitCleanupServiceFailed);
        assert_eq!(mock.call_count("list_vpcs"), 0);
    }

    #[tokio::test]
    async fn test_clean_removes_everything() {
        let mock = Arc::new(MockNsxClient::new("https://nsx"));
        let vpc_path = "/orgs/default/projects/proj-1/vpcs/ns-1_abcd1234";
        let subnet_path = format!("{vpc_path}/subnets/subnet-1");
        mock.add_vpc(Vpc {
            id: "ns-1_abcd1234".to_string(),
            path: vpc_path.to_string(),
            tags: cluster_tags(),
            ..Default::default()
        });
        mock.add_subnet(VpcSubnet {
            id: "subnet-1".to_string(),
            path: subnet_path.clone(),
            parent_path: vpc_path.to_string(),
            tags: cluster_tags(),
            ..Default::default()
        });
        mock.add_subnet_port(SubnetPort {
            id: "port-1".to_string(),
            path: format!("{subnet_path}/ports/port-1"),
            parent_path: subnet_path.clone(),
            display_name: "port-1".to_string(),
            tags: cluster_tags(),
        });
        mock.add_tagged_resource(PolicyResource {
            id: "sp-1".to_string(),
            path: "/orgs/default/projects/proj-1/infra/domains/default/security-policies/sp-1".to_string(),
            resource_type: RESOURCE_SECURITY_POLICY.to_string(),
            tags: cluster_tags(),
        });

        clean_with_client(mock.clone(), &config()).await.unwrap();

        assert!(!mock.subnet_port_exists(&format!("{subnet_path}/ports/port-1")));
        assert!(!mock.subnet_exists(&subnet_path));
        assert!(!mock.tagged_resource_exists(
            "/orgs/default/projects/proj-1/infra/domains/default/security-policies/sp-1"
        ));
        assert!(!mock.vpc_exists(vpc_path));
    }

    #[tokio::test]
    async fn test_invalid_config_is_validation_failure() {
        let mut config = config();
        config.nsx_manager_url = String::new();

        let err = clean(&config).await.unwrap_err();

        assert_eq!(err.status, CleanupStatus::ValidationFailed);
    }
}
