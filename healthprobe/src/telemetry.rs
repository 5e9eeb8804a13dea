//! OpenTelemetry metrics export module
//!
//! Exports probe round statistics to an OpenTelemetry Collector.
//!
//! ## OTLP Endpoint Priority
//! 1. `OTEL_EXPORTER_OTLP_ENDPOINT` environment variable
//! 2. `otel_exporter_otlp_endpoint` from settings
//! 3. Neither set: metrics are disabled and every `record_*` call is a no-op

use anyhow::{Context, Result};
use healthprobe_common::ProbeResult;
use log::info;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use std::sync::OnceLock;
use std::time::Duration;

/// Metric export interval in seconds
const METRIC_EXPORT_INTERVAL_SECS: u64 = 30;

/// Global metrics handle
static METRICS: OnceLock<HealthProbeMetrics> = OnceLock::new();

/// Global MeterProvider for graceful shutdown
static METER_PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

/// Note: Do NOT add _total suffix to Counter names (Prometheus adds it automatically)
pub struct HealthProbeMetrics {
    pub rounds: Counter<u64>,
    pub probe_results: Counter<u64>,
    pub probe_latency_us: Histogram<u64>,
    pub export_batches: Counter<u64>,
    pub export_rows: Counter<u64>,
}

impl HealthProbeMetrics {
    fn new(meter: &Meter) -> Self {
        Self {
            rounds: meter
                .u64_counter("rounds")
                .with_description("Number of completed probe rounds")
                .with_unit("rounds")
                .build(),
            probe_results: meter
                .u64_counter("probe_results")
                .with_description("Probe outcomes by target")
                .with_unit("probes")
                .build(),
            probe_latency_us: meter
                .u64_histogram("probe_latency_us")
                .with_description("Latency of successful probes in microseconds")
                .with_unit("us")
                .build(),
            export_batches: meter
                .u64_counter("export_batches")
                .with_description("Export batches sent to the analytics sink")
                .with_unit("batches")
                .build(),
            export_rows: meter
                .u64_counter("export_rows")
                .with_description("Rows acknowledged by the analytics sink")
                .with_unit("rows")
                .build(),
        }
    }
}

fn normalize_endpoint(endpoint: &str) -> Option<String> {
    if endpoint.is_empty() {
        return None;
    }

    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        Some(format!("http://{}", endpoint))
    } else {
        Some(endpoint.to_string())
    }
}

fn get_otlp_endpoint(configured: Option<&str>) -> Option<String> {
    match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(endpoint) if !endpoint.is_empty() => normalize_endpoint(&endpoint),
        _ => configured.and_then(normalize_endpoint),
    }
}

/// Initialize OpenTelemetry metrics provider
///
/// Configures metrics export to OTLP Collector via gRPC.
/// Skips initialization if no endpoint is configured.
pub fn init_metrics(configured_endpoint: Option<&str>, service_name: &str) -> Result<()> {
    let endpoint = match get_otlp_endpoint(configured_endpoint) {
        Some(ep) => ep,
        None => {
            info!("OTLP endpoint not set. Metrics export disabled.");
            return Ok(());
        }
    };

    info!("Initializing OpenTelemetry metrics exporter");
    info!("OTLP endpoint: {} (service {})", endpoint, service_name);

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to create OTLP metric exporter")?;

    let reader = PeriodicReader::builder(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_interval(Duration::from_secs(METRIC_EXPORT_INTERVAL_SECS))
        .build();

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(service_resource(service_name))
        .build();

    global::set_meter_provider(provider.clone());
    let _ = METER_PROVIDER.set(provider);

    let meter = global::meter("healthprobe");
    let _ = METRICS.set(HealthProbeMetrics::new(&meter));

    info!("OpenTelemetry metrics initialized successfully");
    Ok(())
}

fn service_resource(service_name: &str) -> Resource {
    Resource::default().merge(&Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]))
}

pub fn metrics() -> Option<&'static HealthProbeMetrics> {
    METRICS.get()
}

pub fn record_round(failures: usize) {
    if let Some(m) = metrics() {
        m.rounds
            .add(1, &[KeyValue::new("degraded", failures > 0)]);
    }
}

pub fn record_probe_result(result: &ProbeResult) {
    if let Some(m) = metrics() {
        let attrs = [
            KeyValue::new("target", result.target_name.clone()),
            KeyValue::new("success", result.is_success()),
        ];
        m.probe_results.add(1, &attrs);

        if result.is_success() {
            m.probe_latency_us.record(
                result.latency_micros.max(0) as u64,
                &[KeyValue::new("target", result.target_name.clone())],
            );
        }
    }
}

pub fn record_export(rows: Option<usize>) {
    if let Some(m) = metrics() {
        m.export_batches
            .add(1, &[KeyValue::new("success", rows.is_some())]);
        if let Some(rows) = rows {
            m.export_rows.add(rows as u64, &[]);
        }
    }
}

/// Exports abandoned when the shutdown drain ran out of time.
pub fn record_dropped_exports(rounds: usize) {
    if let Some(m) = metrics() {
        m.export_batches
            .add(rounds as u64, &[KeyValue::new("success", false)]);
    }
}

/// Shutdown OpenTelemetry (graceful shutdown)
/// Flushes pending metrics and shuts down the MeterProvider
pub fn shutdown_metrics() {
    if let Some(provider) = METER_PROVIDER.get() {
        info!("Shutting down OpenTelemetry metrics...");
        if let Err(e) = provider.shutdown() {
            log::warn!("Failed to shutdown MeterProvider: {}", e);
        } else {
            info!("OpenTelemetry metrics shutdown complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_get_otlp_endpoint_not_set() {
        // Returns None if neither environment nor settings provide one
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
        assert!(get_otlp_endpoint(None).is_none());
    }

    #[test]
    #[serial]
    fn test_get_otlp_endpoint_empty() {
        unsafe { std::env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "") };
        assert!(get_otlp_endpoint(Some("")).is_none());
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
    }

    #[test]
    #[serial]
    fn test_get_otlp_endpoint_env_wins() {
        unsafe { std::env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "http://custom:4317") };

        let endpoint = get_otlp_endpoint(Some("settings:4317"));
        assert_eq!(endpoint, Some("http://custom:4317".to_string()));
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
    }

    #[test]
    #[serial]
    fn test_get_otlp_endpoint_from_settings_adds_http_prefix() {
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };

        let endpoint = get_otlp_endpoint(Some("collector:4317"));
        assert_eq!(endpoint, Some("http://collector:4317".to_string()));
    }

    #[test]
    fn test_service_resource_uses_configured_name() {
        let resource = service_resource("edge-uplink");
        assert_eq!(
            resource.get(opentelemetry::Key::new("service.name")),
            Some(opentelemetry::Value::from("edge-uplink"))
        );
    }

    #[test]
    fn test_record_without_init_is_noop() {
        record_round(1);
        record_export(None);
        record_dropped_exports(3);
        record_probe_result(&ProbeResult::failure("modem", "timeout"));
    }
}
