// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB Line Protocol generation and the sink writer task.
//!
//! Line Protocol format:
//! ```text
//! measurement,tag1=val1,tag2=val2 field=value timestamp_ns
//! ```
//!
//! The writer task drains the shared point channel, batches rendered lines
//! and POSTs them to the InfluxDB v1 write endpoint. Write failures are
//! logged and the batch is dropped; the core never retries.

use crate::config::InfluxConfig;
use crate::export::Point;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// How often the writer checks for a due time-based flush.
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A value that can be stored in an InfluxDB field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// 64-bit floating point.
    Float(f64),
    /// 64-bit signed integer.
    Integer(i64),
    /// UTF-8 string.
    String(String),
    /// Boolean value.
    Boolean(bool),
}

impl FieldValue {
    /// Format this value for InfluxDB Line Protocol.
    ///
    /// - Float: written as-is (e.g., `3.14`)
    /// - Integer: suffixed with `i` (e.g., `42i`)
    /// - String: quoted with double quotes, inner quotes escaped
    /// - Boolean: `true` or `false`
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Integer(v) => format!("{}i", v),
            FieldValue::String(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{}\"", escaped)
            }
            FieldValue::Boolean(v) => v.to_string(),
        }
    }

    /// Render this value as plain text, for use in template contexts.
    ///
    /// Unlike [`to_line_protocol`](Self::to_line_protocol), strings are not
    /// quoted and integers carry no suffix.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Integer(v) => format!("{}", v),
            FieldValue::String(v) => v.clone(),
            FieldValue::Boolean(v) => v.to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line_protocol())
    }
}

/// Render a point as one Line Protocol line.
///
/// Tags are emitted in key order (the tag set is a `BTreeMap`), which keeps
/// the output canonical and reproducible.
pub fn point_to_line(point: &Point) -> String {
    let mut line = escape_measurement(&point.metric);

    for (key, value) in &point.tags {
        line.push(',');
        line.push_str(&escape_tag(key));
        line.push('=');
        line.push_str(&escape_tag(value));
    }

    line.push(' ');
    line.push_str(&escape_tag(&point.field));
    line.push('=');
    line.push_str(&point.value.to_line_protocol());

    line.push(' ');
    let timestamp_ns = point.time.timestamp_nanos_opt().unwrap_or_default();
    line.push_str(&timestamp_ns.to_string());

    line
}

/// Escape measurement name per Line Protocol spec.
/// Spaces and commas must be escaped with backslash.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape tag keys, tag values and field keys per Line Protocol spec.
/// Commas, equals signs, and spaces must be escaped.
fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

/// A batching buffer that collects Line Protocol strings.
///
/// Lines are accumulated until either:
/// - The buffer reaches `max_size` (size-based flush)
/// - The configured `flush_interval` has elapsed since the last flush (time-based flush)
pub struct BatchBuffer {
    lines: Vec<String>,
    max_size: usize,
    flush_interval: Duration,
    last_flush: Instant,
}

impl BatchBuffer {
    /// Create a new batch buffer.
    pub fn new(max_size: usize, flush_interval: Duration) -> Self {
        Self {
            lines: Vec::with_capacity(max_size),
            max_size,
            flush_interval,
            last_flush: Instant::now(),
        }
    }

    /// Add a line to the buffer.
    ///
    /// Returns `Some(batch)` if the buffer is now full and should be flushed,
    /// or `None` if there is still room.
    pub fn add(&mut self, line: String) -> Option<Vec<String>> {
        self.lines.push(line);
        if self.lines.len() >= self.max_size {
            Some(self.flush())
        } else {
            None
        }
    }

    /// Check if a time-based flush is due.
    pub fn should_flush(&self) -> bool {
        !self.lines.is_empty() && self.last_flush.elapsed() >= self.flush_interval
    }

    /// Flush the buffer, returning all accumulated lines and resetting the timer.
    pub fn flush(&mut self) -> Vec<String> {
        self.last_flush = Instant::now();
        std::mem::take(&mut self.lines)
    }

    /// Get the current number of buffered lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// InfluxDB v1 HTTP writer.
///
/// Consumes points from the shared output channel until every producer has
/// dropped its sender, then performs a final flush so queued points drain on
/// shutdown.
pub struct InfluxWriter {
    client: reqwest::Client,
    write_url: String,
    username: String,
    password: String,
    buffer: BatchBuffer,
}

impl InfluxWriter {
    /// Create a writer from sink configuration.
    pub fn new(config: &InfluxConfig) -> Self {
        let base = if config.address.starts_with("http://") || config.address.starts_with("https://")
        {
            config.address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", config.address.trim_end_matches('/'))
        };
        let write_url = format!("{}/write?db={}&precision=ns", base, config.database);

        Self {
            client: reqwest::Client::new(),
            write_url,
            username: config.username.clone(),
            password: config.password.clone(),
            buffer: BatchBuffer::new(
                config.batch_size,
                Duration::from_millis(config.flush_interval_ms),
            ),
        }
    }

    /// Run the writer until the point channel closes, then flush what is left.
    pub async fn run(mut self, mut points: mpsc::Receiver<Point>) {
        let mut poll = tokio::time::interval(FLUSH_POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                point = points.recv() => match point {
                    Some(point) => {
                        if let Some(batch) = self.buffer.add(point_to_line(&point)) {
                            self.write(batch).await;
                        }
                    }
                    None => break,
                },
                _ = poll.tick() => {
                    if self.buffer.should_flush() {
                        let batch = self.buffer.flush();
                        self.write(batch).await;
                    }
                }
            }
        }

        let batch = self.buffer.flush();
        self.write(batch).await;
        tracing::debug!("influx writer stopped");
    }

    async fn write(&self, batch: Vec<String>) {
        if batch.is_empty() {
            return;
        }

        let lines = batch.len();
        let body = batch.join("\n");
        let mut request = self.client.post(&self.write_url).body(body);
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(lines, "wrote batch to InfluxDB");
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), lines, "InfluxDB rejected write");
            }
            Err(err) => {
                tracing::warn!(error = %err, lines, "InfluxDB write failed");
            }
        }
    }
}
