// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT to InfluxDB export bridge.
//!
//! Subscribes to MQTT topics, parses each payload into typed values, derives
//! the metric identity (name, tags, field) from the topic and content via
//! templates, and writes timestamped points to InfluxDB. Exports can
//! optionally keep republishing their last value on a fixed interval when no
//! new message arrives (heartbeat).
//!
//! # Features
//!
//! - **Topic patterns**: `sensors/{north,south}/temp` expands into one
//!   independent Export per concrete topic
//! - **Parsers**: `string`, `bool`, `int`, `float`, or a user-supplied Rhai
//!   script producing an arbitrary field set
//! - **Templates**: metric, tag and field names rendered per message from
//!   the topic segments and parsed values
//! - **Heartbeat republishing**: per-export interval timer re-emitting the
//!   last point with a fresh timestamp
//! - **Status endpoint**: read-only HTTP view of every Export's last state
//!
//! # Configuration File
//!
//! ```yaml
//! mqtt:
//!   address: "localhost:1883"
//!   client_id: "mqtt-export"
//! influxdb:
//!   address: "localhost:8086"
//!   database: "telemetry"
//! exports:
//!   outside_temp:
//!     topic: "sensors/{north,south}/temp"
//!     parser: "float"
//!     metric: "temperature"
//!     tags:
//!       side: "{{topic[1]}}"
//!     interval_ms: 60000
//! ```

pub mod config;
pub mod export;
pub mod influx;
pub mod mqtt;
pub mod parser;
pub mod pattern;
pub mod pipeline;
pub mod status;
pub mod template;

pub use config::{Config, ConfigError};
pub use export::{Export, ExportHandle, ExportStatus, Point};
pub use influx::{FieldValue, InfluxWriter};
pub use mqtt::MqttSource;
pub use parser::Parser;
pub use pattern::expand;
pub use pipeline::{build_exports, BuildError};
pub use template::Template;
