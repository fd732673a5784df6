//! Load balancer provider selection.

use super::VpcService;
use crate::backoff::retry_on_error;
use crate::network_config::VpcNetworkConfigInfo;
use nsx_client::{NsxError, Vpc};
use std::fmt;
use std::sync::PoisonError;
use tracing::{debug, error, info, warn};

/// Load balancer implementation serving the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LbProvider {
    /// NSX-native load balancer service per VPC
    Nsx,
    /// AVI controller registered as the ALB endpoint
    Avi,
    None,
}

impl fmt::Display for LbProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LbProvider::Nsx => "nsx-lb",
            LbProvider::Avi => "avi",
            LbProvider::None => "none",
        };
        f.write_str(s)
    }
}

impl VpcService {
    /// Cluster-wide provider. Computed once from the default network
    /// configuration; any result other than `None` is cached.
    pub async fn get_lb_provider(&self) -> LbProvider {
        if let Some(provider) = *self.lb_provider.lock().unwrap_or_else(PoisonError::into_inner) {
            return provider;
        }

        let Some(nc) = self.registry.default_config() else {
            warn!("No default VPCNetworkConfiguration, load balancer provider unknown");
            return LbProvider::None;
        };

        let edge_enabled = self.edge_cluster_enabled(&nc).await;
        let provider = self.compute_lb_provider(edge_enabled).await;
        if provider != LbProvider::None {
            info!("Using load balancer provider {}", provider);
            *self.lb_provider.lock().unwrap_or_else(PoisonError::into_inner) = Some(provider);
        }
        provider
    }

    pub(crate) async fn compute_lb_provider(&self, edge_enabled: bool) -> LbProvider {
        let fallback = if edge_enabled { LbProvider::Nsx } else { LbProvider::None };
        if !self.use_avi_lb {
            return fallback;
        }

        // Once an NSX LBS is attached to a VPC, stay on NSX
        if self.alb_endpoint_found().await && !self.has_attached_nsx_lbs() {
            return LbProvider::Avi;
        }
        fallback
    }

    /// Probe the ALB endpoint. A 404 is final; other failures are retried
    /// within the probe policy and then treated as "not found".
    async fn alb_endpoint_found(&self) -> bool {
        let nsx = &self.nsx;
        let result = retry_on_error(
            &self.alb_probe,
            || async move { nsx.get_alb_endpoint().await },
            |e: &NsxError| !e.is_not_found(),
        )
        .await;

        match result {
            Ok(endpoint) => {
                debug!("ALB endpoint found at {}", endpoint.path);
                true
            }
            Err(e) if e.is_not_found() => false,
            Err(e) => {
                warn!("Failed to probe ALB endpoint, assuming none: {}", e);
                false
            }
        }
    }

    fn has_attached_nsx_lbs(&self) -> bool {
        self.lbs_store
            .list()
            .iter()
            .any(|lbs| lbs.connectivity_path.as_deref().is_some_and(|p| !p.is_empty()))
    }

    /// `service_gateway.enable` of the configuration's connectivity profile.
    /// Lookup failures yield `false`.
    pub async fn edge_cluster_enabled(&self, nc: &VpcNetworkConfigInfo) -> bool {
        let path = nc.connectivity_profile_path();
        match self.nsx.get_vpc_connectivity_profile(&path).await {
            Ok(profile) => profile
                .service_gateway
                .and_then(|sg| sg.enable)
                .unwrap_or(false),
            Err(e) if e.is_not_found() => {
                debug!("Connectivity profile {} not found", path);
                false
            }
            Err(e) => {
                error!("Failed to get connectivity profile {}: {}", path, e);
                false
            }
        }
    }

    /// Whether an existing VPC no longer matches the provider
    pub fn is_lb_provider_changed(&self, vpc: Option<&Vpc>, provider: LbProvider) -> bool {
        let Some(vpc) = vpc else {
            return false;
        };
        match provider {
            LbProvider::Avi => !vpc
                .load_balancer_vpc_endpoint
                .as_ref()
                .and_then(|e| e.enabled)
                .unwrap_or(false),
            LbProvider::Nsx => self.lbs_for_vpc(&vpc.id).is_empty(),
            LbProvider::None => false,
        }
    }
}
