use std::{collections::HashSet, path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File, FileFormat};
use healthprobe_common::Target;
use serde::Deserialize;

use crate::export::DEFAULT_TRACE_ID;
use crate::history::{DEFAULT_HISTORY_CAPACITY, MAX_HISTORY_CAPACITY};
use crate::scheduler::{DEFAULT_EXPORT_DRAIN_TIMEOUT, MAX_EXPORT_QUEUE_DEPTH};

const DEFAULT_INTERVAL_MS: u64 = 60_000;
const DEFAULT_ROUND_DEADLINE_MS: u64 = 30_000;
const DEFAULT_EXPORT_QUEUE_DEPTH: usize = 16;
const DEFAULT_DESTINATION: &str = "network/health_check";
const DEFAULT_SERVICE_NAME: &str = "healthprobe";

/// Analytics sink configuration
#[derive(Debug, Deserialize, Clone, Default)]
#[allow(unused)]
pub struct SinkSettings {
    /// `host:port` of the sink; export is disabled when unset.
    pub endpoint: Option<String>,
    pub destination: Option<String>,
    pub trace_id: Option<String>,
}

impl SinkSettings {
    pub fn destination(&self) -> &str {
        self.destination.as_deref().unwrap_or(DEFAULT_DESTINATION)
    }

    pub fn trace_id(&self) -> &str {
        self.trace_id.as_deref().unwrap_or(DEFAULT_TRACE_ID)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[allow(unused)]
pub struct Settings {
    pub otel_exporter_otlp_endpoint: Option<String>,
    /// `service.name` reported with metrics.
    pub service_name: Option<String>,
    pub interval_ms: Option<u64>,
    pub round_deadline_ms: Option<u64>,
    pub history_capacity: Option<usize>,
    pub export_queue_depth: Option<usize>,
    /// How long shutdown waits for queued exports.
    pub export_drain_timeout_ms: Option<u64>,
    #[serde(default)]
    pub sink: SinkSettings,
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl Settings {
    /// Load settings from `.env`, an optional YAML file and the environment.
    ///
    /// Environment variables win over the file and use `__` for nesting,
    /// e.g. `SINK__ENDPOINT=collector:7000`.
    pub fn new(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        let s = builder
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a YAML document, without consulting the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Self = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == Some(0) {
            return Err(ConfigError::Message("interval_ms must be positive".into()));
        }
        if self.round_deadline_ms == Some(0) {
            return Err(ConfigError::Message("round_deadline_ms must be positive".into()));
        }
        if let Some(capacity) = self.history_capacity
            && !(1..=MAX_HISTORY_CAPACITY).contains(&capacity)
        {
            return Err(ConfigError::Message(format!(
                "history_capacity must be between 1 and {}",
                MAX_HISTORY_CAPACITY
            )));
        }
        if let Some(depth) = self.export_queue_depth
            && !(1..=MAX_EXPORT_QUEUE_DEPTH).contains(&depth)
        {
            return Err(ConfigError::Message(format!(
                "export_queue_depth must be between 1 and {}",
                MAX_EXPORT_QUEUE_DEPTH
            )));
        }

        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(ConfigError::Message("target with empty name".into()));
            }
            if target.address.trim().is_empty() {
                return Err(ConfigError::Message(format!(
                    "target {} has an empty address",
                    target.name
                )));
            }
            if !names.insert(target.name.as_str()) {
                return Err(ConfigError::Message(format!(
                    "duplicate target name {}",
                    target.name
                )));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS))
    }

    pub fn round_deadline(&self) -> Duration {
        Duration::from_millis(self.round_deadline_ms.unwrap_or(DEFAULT_ROUND_DEADLINE_MS))
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity.unwrap_or(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn export_queue_depth(&self) -> usize {
        self.export_queue_depth.unwrap_or(DEFAULT_EXPORT_QUEUE_DEPTH)
    }

    pub fn export_drain_timeout(&self) -> Duration {
        self.export_drain_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_EXPORT_DRAIN_TIMEOUT)
    }

    pub fn service_name(&self) -> &str {
        self.service_name.as_deref().unwrap_or(DEFAULT_SERVICE_NAME)
    }
}
