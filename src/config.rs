// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML configuration for the export bridge.
//!
//! A configuration names the MQTT broker, the InfluxDB sink, an optional
//! status endpoint, and a map of export definitions. Loading applies the
//! documented defaults so the rest of the pipeline never re-checks them.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// MQTT broker connection settings.
    pub mqtt: MqttConfig,

    /// InfluxDB sink settings.
    pub influxdb: InfluxConfig,

    /// Optional status HTTP endpoint.
    #[serde(default)]
    pub status: Option<StatusConfig>,

    /// Export definitions, keyed by export name.
    pub exports: BTreeMap<String, ExportConfig>,
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker address as `host` or `host:port` (default port 1883). IPv6
    /// literals with a port use brackets, `[::1]:1883`.
    pub address: String,

    /// Client identity presented to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Optional prefix applied to every export topic as `realm/topic`.
    #[serde(default)]
    pub realm: String,
}

/// InfluxDB v1 sink settings.
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    /// Sink address as `host:port` or a full `http(s)://` URL.
    pub address: String,

    /// Target database.
    pub database: String,

    /// Optional basic-auth username.
    #[serde(default)]
    pub username: String,

    /// Optional basic-auth password.
    #[serde(default)]
    pub password: String,

    /// Number of lines to batch before writing.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum time between writes in milliseconds.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

/// Status HTTP endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    /// Bind address, e.g. `127.0.0.1:8080`.
    pub address: String,
}

/// One export definition. May expand into multiple Exports.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Topic pattern; brace lists expand into concrete topics.
    pub topic: String,

    /// Parser spec, `<kind>` or `<kind>:<opt>:...`.
    #[serde(default = "default_parser")]
    pub parser: String,

    /// Metric name template. Defaults to the export name.
    #[serde(default)]
    pub metric: String,

    /// Tag name to tag value template.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Field name template.
    #[serde(default = "default_field")]
    pub field: String,

    /// Republish interval in milliseconds. Zero disables republishing.
    #[serde(default)]
    pub interval_ms: u64,
}

impl ExportConfig {
    /// Republish interval as a duration. Zero means disabled.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_client_id() -> String {
    "mqtt-export".to_string()
}

fn default_parser() -> String {
    "string".to_string()
}

fn default_field() -> String {
    "value".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_flush_interval_ms() -> u64 {
    1000
}

impl Config {
    /// Parse configuration from a YAML string and apply defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(yaml)?;
        config.normalize()?;
        Ok(config)
    }

    /// Parse configuration from a YAML file and apply defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Validate and apply per-export defaults.
    ///
    /// - the realm, when set, is prefixed to every export topic
    /// - `metric` defaults to the export name
    /// - the identity tags `name` and `topic` are added unless the user
    ///   defined them (`topic` resolves to the concrete topic at render time)
    fn normalize(&mut self) -> Result<(), ConfigError> {
        if self.exports.is_empty() {
            return Err(ConfigError::Invalid("no exports configured".into()));
        }

        for (name, export) in &mut self.exports {
            if export.topic.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "export {}: empty topic",
                    name
                )));
            }

            if !self.mqtt.realm.is_empty() {
                export.topic = format!("{}/{}", self.mqtt.realm, export.topic);
            }

            if export.metric.is_empty() {
                export.metric = name.clone();
            }

            export
                .tags
                .entry("name".to_string())
                .or_insert_with(|| name.clone());
            export
                .tags
                .entry("topic".to_string())
                .or_insert_with(|| "{{topic}}".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
mqtt:
  address: "localhost:1883"
influxdb:
  address: "localhost:8086"
  database: "telemetry"
exports:
  outside_temp:
    topic: "sensors/outside/temp"
"#;

    const FULL_YAML: &str = r#"
mqtt:
  address: "broker.example.com:1883"
  client_id: "bridge-1"
  realm: "site-a"
influxdb:
  address: "influx.example.com:8086"
  database: "telemetry"
  username: "writer"
  password: "secret"
  batch_size: 200
  flush_interval_ms: 5000
status:
  address: "127.0.0.1:8080"
exports:
  temps:
    topic: "sensors/{north,south}/temp"
    parser: "float"
    metric: "temperature"
    tags:
      side: "{{topic[2]}}"
    field: "reading"
    interval_ms: 60000
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_yaml(MINIMAL_YAML).expect("parse");

        assert_eq!(config.mqtt.client_id, "mqtt-export");
        assert_eq!(config.mqtt.realm, "");
        assert!(config.status.is_none());
        assert_eq!(config.influxdb.batch_size, 1000);
        assert_eq!(config.influxdb.flush_interval_ms, 1000);

        let export = &config.exports["outside_temp"];
        assert_eq!(export.topic, "sensors/outside/temp");
        assert_eq!(export.parser, "string");
        assert_eq!(export.metric, "outside_temp");
        assert_eq!(export.field, "value");
        assert_eq!(export.interval_ms, 0);
        assert_eq!(export.interval(), Duration::ZERO);
    }

    #[test]
    fn test_implicit_identity_tags() {
        let config = Config::from_yaml(MINIMAL_YAML).expect("parse");
        let export = &config.exports["outside_temp"];
        assert_eq!(export.tags["name"], "outside_temp");
        assert_eq!(export.tags["topic"], "{{topic}}");
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_yaml(FULL_YAML).expect("parse");

        assert_eq!(config.mqtt.client_id, "bridge-1");
        assert_eq!(
            config.status.as_ref().map(|s| s.address.as_str()),
            Some("127.0.0.1:8080")
        );

        let export = &config.exports["temps"];
        // Realm prefixed; the user tag index still refers to the final topic.
        assert_eq!(export.topic, "site-a/sensors/{north,south}/temp");
        assert_eq!(export.parser, "float");
        assert_eq!(export.metric, "temperature");
        assert_eq!(export.field, "reading");
        assert_eq!(export.interval(), Duration::from_secs(60));
        assert_eq!(export.tags["side"], "{{topic[2]}}");
        assert_eq!(export.tags["name"], "temps");
    }

    #[test]
    fn test_user_identity_tags_not_overwritten() {
        let yaml = r#"
mqtt:
  address: "localhost"
influxdb:
  address: "localhost:8086"
  database: "db"
exports:
  e:
    topic: "t"
    tags:
      name: "custom"
      topic: "fixed"
"#;
        let config = Config::from_yaml(yaml).expect("parse");
        let export = &config.exports["e"];
        assert_eq!(export.tags["name"], "custom");
        assert_eq!(export.tags["topic"], "fixed");
    }

    #[test]
    fn test_no_exports_is_invalid() {
        let yaml = r#"
mqtt:
  address: "localhost"
influxdb:
  address: "localhost:8086"
  database: "db"
exports: {}
"#;
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_empty_topic_is_invalid() {
        let yaml = r#"
mqtt:
  address: "localhost"
influxdb:
  address: "localhost:8086"
  database: "db"
exports:
  bad:
    topic: ""
"#;
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }
}
