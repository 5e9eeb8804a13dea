use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use healthprobe::{HealthProbeEngine, settings::Settings, telemetry};
use log::info;

#[derive(Debug, Parser)]
struct Opt {
    /// Verbose output
    #[clap(short, long)]
    verbose: bool,

    /// YAML configuration file (targets, interval, sink)
    #[clap(short, long, env = "HEALTHPROBE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if opt.verbose { "info" } else { "warn" }
    ))
    .init();

    let settings = Settings::new(opt.config.as_deref()).context("Failed to load settings")?;
    info!("interval: {:?}", settings.interval());
    info!("round deadline: {:?}", settings.round_deadline());
    info!("targets: {}", settings.targets.len());

    telemetry::init_metrics(
        settings.otel_exporter_otlp_endpoint.as_deref(),
        settings.service_name(),
    )?;

    let engine = HealthProbeEngine::new(settings).await?;
    let result = engine.run().await;

    telemetry::shutdown_metrics();
    result
}
