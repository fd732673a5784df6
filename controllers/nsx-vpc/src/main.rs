//! NSX VPC Controller
//!
//! Kubernetes operator that backs namespaces with NSX VPCs:
//! - VPCNetworkConfiguration: registers VPC network configurations
//! - Namespace: creates or reuses the namespace VPC and publishes NetworkInfo
//! - SubnetSet / Subnet: allocates NSX VPC subnets and reports addressing
//! - Garbage collection of orphaned subnets and VPCs
//! - Container inventory sync of namespaces and pods
//!
//! `nsx-vpc-controller clean` removes every NSX resource of the cluster.

mod backoff;
mod clean;
mod config;
mod controller;
mod error;
mod metrics;
mod network_config;
mod reconciler;
mod services;
mod store;
mod tags;
mod util;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::{Cli, Command};
use crate::error::ControllerError;
use clap::Parser;
use controller::Controller;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube's rustls client needs a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!("Starting NSX VPC Controller");
            cli.config.validate()?;
            cli.config.log();

            let controller = Controller::new(&cli.config).await?;
            controller.run().await?;
        }
        Command::Clean => {
            if let Err(e) = clean::clean(&cli.config).await {
                error!("Cleanup failed: {}", e);
                std::process::exit(e.status.exit_code());
            }
        }
    }

    Ok(())
}
