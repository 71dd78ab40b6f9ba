use anyhow::Result;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    Resource,
};

use crate::config::TelemetryConfig;

/// Installs the global meter provider exporting over OTLP. Must run before
/// any meter is taken from `opentelemetry::global`.
pub fn init_provider(config: &TelemetryConfig) -> Result<Option<SdkMeterProvider>> {
    if !config.enable_metrics {
        return Ok(None);
    }

    let resource = Resource::builder()
        .with_service_name("dataset-gateway")
        .with_attribute(KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        ))
        .build();

    let mut exporter = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = &config.endpoint {
        exporter = exporter.with_endpoint(endpoint.clone());
    }
    let exporter = exporter.build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(config.metrics_interval())
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();

    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(Some(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_install_nothing() {
        let config = TelemetryConfig::default();
        assert!(!config.enable_metrics);
        assert!(init_provider(&config).unwrap().is_none());
    }
}
