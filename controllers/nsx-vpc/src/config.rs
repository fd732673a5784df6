//! Command line and environment configuration.
//!
//! Every flag can also be set through its environment variable, which is how
//! the operator Deployment configures it.

use crate::error::ControllerError;
use crate::tags::MAX_TAG_VALUE_LENGTH;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "nsx-vpc-controller", version, about = "NSX VPC operator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: OperatorConfig,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the operator (default)
    Run,
    /// Delete every NSX resource created for the cluster and exit
    Clean,
}

#[derive(Debug, Clone, Args)]
pub struct OperatorConfig {
    /// NSX manager URL
    #[arg(long, env = "NSX_MANAGER_URL", default_value = "")]
    pub nsx_manager_url: String,

    #[arg(long, env = "NSX_USERNAME", default_value = "")]
    pub nsx_username: String,

    #[arg(long, env = "NSX_PASSWORD", default_value = "", hide_env_values = true)]
    pub nsx_password: String,

    /// Cluster name tagged on every NSX object
    #[arg(long, env = "NSX_CLUSTER", default_value = "")]
    pub cluster: String,

    /// Use the AVI load balancer when the NSX ALB endpoint is available
    #[arg(long, env = "NSX_USE_AVI_LB", default_value_t = false)]
    pub use_avi_lb: bool,

    /// Accept self-signed NSX manager certificates
    #[arg(long, env = "NSX_INSECURE_TLS", default_value_t = false)]
    pub insecure_tls: bool,

    #[arg(long, env = "NSX_GC_INTERVAL_SECS", default_value_t = 600)]
    pub gc_interval_secs: u64,

    #[arg(long, env = "NSX_INVENTORY_SYNC_INTERVAL_SECS", default_value_t = 10)]
    pub inventory_sync_interval_secs: u64,

    /// How long to wait for NSX to realize a VPC or subnet
    #[arg(long, env = "NSX_REALIZE_TIMEOUT_SECS", default_value_t = 300)]
    pub realize_timeout_secs: u64,

    /// Deadline of the VPC cleanup stage
    #[arg(long, env = "NSX_CLEANUP_TIMEOUT_SECS", default_value_t = 10)]
    pub cleanup_timeout_secs: u64,

    /// Subnet size for SubnetSets and Subnets without one when their
    /// namespace has no VPCNetworkConfiguration
    #[arg(long, env = "NSX_DEFAULT_SUBNET_SIZE", default_value_t = 32)]
    pub default_subnet_size: u32,

    /// Listen address of the metrics and probe server
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: SocketAddr,
}

impl OperatorConfig {
    /// Reject configurations the operator cannot run with
    pub fn validate(&self) -> Result<(), ControllerError> {
        let url = self.nsx_manager_url.trim();
        if url.is_empty() {
            return Err(ControllerError::InvalidConfig("NSX_MANAGER_URL is required".to_string()));
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ControllerError::InvalidConfig(format!(
                "NSX_MANAGER_URL must be an http(s) URL, got {url}"
            )));
        }
        if self.cluster.is_empty() {
            return Err(ControllerError::InvalidConfig("NSX_CLUSTER is required".to_string()));
        }
        if self.cluster.chars().count() > MAX_TAG_VALUE_LENGTH {
            return Err(ControllerError::InvalidConfig(format!(
                "NSX_CLUSTER must be at most {MAX_TAG_VALUE_LENGTH} characters"
            )));
        }
        if self.nsx_username.is_empty() || self.nsx_password.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "NSX_USERNAME and NSX_PASSWORD are required".to_string(),
            ));
        }
        if self.gc_interval_secs == 0 || self.inventory_sync_interval_secs == 0 {
            return Err(ControllerError::InvalidConfig("sync intervals must be positive".to_string()));
        }
        Ok(())
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn inventory_sync_interval(&self) -> Duration {
        Duration::from_secs(self.inventory_sync_interval_secs)
    }

    pub fn realize_timeout(&self) -> Duration {
        Duration::from_secs(self.realize_timeout_secs)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }

    /// Log the effective configuration; the password is never printed
    pub fn log(&self) {
        info!("Configuration:");
        info!("  NSX manager: {}", self.nsx_manager_url);
        info!("  NSX user: {}", self.nsx_username);
        info!("  NSX password: {}", if self.nsx_password.is_empty() { "<unset>" } else { "<redacted>" });
        info!("  Cluster: {}", self.cluster);
        info!("  AVI load balancer: {}", self.use_avi_lb);
        info!("  Insecure TLS: {}", self.insecure_tls);
        info!("  GC interval: {}s", self.gc_interval_secs);
        info!("  Inventory sync interval: {}s", self.inventory_sync_interval_secs);
        info!("  Realization timeout: {}s", self.realize_timeout_secs);
        info!("  Default subnet size: {}", self.default_subnet_size);
        info!("  Metrics address: {}", self.metrics_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["nsx-vpc-controller"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn valid() -> OperatorConfig {
        parse(&[
            "--nsx-manager-url",
            "https://nsx.example:443",
            "--nsx-username",
            "admin",
            "--nsx-password",
            "secret",
            "--cluster",
            "cluster-a",
        ])
        .config
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config.cleanup_timeout(), Duration::from_secs(10));
        assert_eq!(cli.config.default_subnet_size, 32);
        assert!(!cli.config.use_avi_lb);
    }

    #[test]
    fn test_clean_subcommand() {
        let cli = parse(&["--cluster", "c1", "clean"]);
        assert!(matches!(cli.command, Some(Command::Clean)));
        assert_eq!(cli.config.cluster, "c1");
    }

    #[test]
    fn test_validate_ok() {
        valid().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = valid();
        config.nsx_manager_url = "nsx.example".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("http(s) URL"));

        config.nsx_manager_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_long_cluster_name() {
        let mut config = valid();
        config.cluster = "c".repeat(MAX_TAG_VALUE_LENGTH + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_credentials() {
        let mut config = valid();
        config.nsx_password = String::new();
        assert!(config.validate().is_err());
    }
}
