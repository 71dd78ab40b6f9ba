use std::{path::PathBuf, process::ExitCode};

use ::tracing::{error, info_span};
use clap::Parser;
use service::Service;

mod config;
mod error;
mod format;
mod gateway;
mod http_objects;
mod hub;
mod line_stream;
mod metrics;
mod naming;
mod routes;
mod service;
mod tracing;
use tracing::setup_tracing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref().map(|p| p.to_string_lossy().into_owned());
    let config = match config::ServerConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error loading config: {:?}", err);
            return ExitCode::FAILURE;
        }
    };

    let tracing_provider = match setup_tracing(&config) {
        Ok(provider) => provider,
        Err(err) => {
            eprintln!("Error setting up tracing: {:?}", err);
            return ExitCode::FAILURE;
        }
    };

    let meter_provider = match metrics::init_provider(&config.telemetry) {
        Ok(provider) => provider,
        Err(err) => {
            error!("Error setting up metrics: {:?}", err);
            return ExitCode::FAILURE;
        }
    };

    let root_span = info_span!("dataset-gateway", listen_addr = %config.listen_addr);
    let _guard = root_span.enter();

    let mut exit_code = ExitCode::SUCCESS;
    match Service::new(config).await {
        Ok(service) => {
            if let Err(err) = service.start().await {
                error!("Error starting service: {:?}", err);
                exit_code = ExitCode::FAILURE;
            }
        }
        Err(err) => {
            error!("Error creating service: {:?}", err);
            exit_code = ExitCode::FAILURE;
        }
    }

    // export traces before shutdown
    if let Some(tracer_provider) = tracing_provider {
        if let Err(err) = tracer_provider.force_flush() {
            error!("Error flushing traces: {:?}", err);
        }
        if let Err(err) = tracer_provider.shutdown() {
            error!("Error shutting down tracer provider: {:?}", err);
        }
    }
    if let Some(meter_provider) = meter_provider {
        if let Err(err) = meter_provider.force_flush() {
            error!("Error flushing metrics: {:?}", err);
        }
        if let Err(err) = meter_provider.shutdown() {
            error!("Error shutting down meter provider: {:?}", err);
        }
    }
    exit_code
}
