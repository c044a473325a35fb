use anyhow::Result;
use kube::{Client, CustomResourceExt};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vpce_api::VPCEndpoint;

mod config;
mod vpc_endpoint_controller;

use config::{ControllerConfig, LogFormat};
use vpc_endpoint_controller::VPCEndpointController;

#[tokio::main]
async fn main() -> Result<()> {
    // `vpce-controller crd` prints the CustomResourceDefinition for installation
    if std::env::args().nth(1).as_deref() == Some("crd") {
        println!("{}", serde_json::to_string_pretty(&VPCEndpoint::crd())?);
        return Ok(());
    }

    let config = ControllerConfig::from_env()?;
    init_tracing(config.log_format);

    info!(
        default_region = %config.default_region,
        poll_interval = ?config.deletion.interval,
        "Starting vpce-controller..."
    );

    let client = Client::try_default().await?;
    let controller = VPCEndpointController::new(client, config)?;

    // Start VPCEndpoint reconciliation
    tokio::spawn(async move {
        if let Err(e) = controller.run().await {
            error!("VPCEndpoint controller error: {}", e);
        }
    });

    // Keep the process alive
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting...");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
