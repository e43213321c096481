//! linksrv - field device polling service

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use common::shutdown::wait_for_shutdown;
use linksrv::{service, Args, LinksrvConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = LinksrvConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    args.apply(&mut config);

    common::logging::init_with_config(&config.logging).context("Failed to initialize logging")?;
    info!(
        "{} v{} using {}",
        config.service.name,
        env!("CARGO_PKG_VERSION"),
        args.config.display()
    );

    let warnings = config.validate().context("Invalid configuration")?;
    for warning in &warnings {
        warn!("{}", warning);
    }

    // Validation mode: validate and exit
    if args.validate {
        info!(
            "Validation completed successfully: {} devices, {} channels, {} properties, {} warnings",
            config.devices.len(),
            config.channel_count(),
            config.property_count(),
            warnings.len()
        );
        return Ok(());
    }

    service::run(config, async {
        let signal = wait_for_shutdown().await;
        info!("Received {}, stopping", signal);
    })
    .await?;

    Ok(())
}
