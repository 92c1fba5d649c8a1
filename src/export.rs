// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Export units: the per-topic runtime of the bridge.
//!
//! Each Export is bound to one concrete topic and runs as its own task. The
//! task owns all mutable state (last point, republish timer), so message
//! handling is strictly sequential and the stop-then-rearm timer protocol
//! needs no locking. Incoming payloads, timer ticks and shutdown are all
//! just events on the same task.

use crate::influx::FieldValue;
use crate::parser::Parser;
use crate::template::{Context, Template};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Capacity of the per-export inbound message queue.
const MESSAGE_QUEUE_CAPACITY: usize = 16;

/// One emitted telemetry record.
#[derive(Debug, Clone, Serialize)]
pub struct Point {
    /// Metric (measurement) name.
    pub metric: String,
    /// Tag set; names are fixed per Export at build time.
    pub tags: BTreeMap<String, String>,
    /// Field name.
    pub field: String,
    /// Field value.
    pub value: FieldValue,
    /// Emission timestamp. Republished copies carry the tick time, not the
    /// original receipt time.
    pub time: DateTime<Utc>,
}

/// The compiled templates of one export definition.
#[derive(Debug)]
pub struct TemplateSet {
    /// Metric name template.
    pub metric: Template,
    /// Tag name to tag value template.
    pub tags: BTreeMap<String, Template>,
    /// Field name template; selects which parsed field becomes the value.
    pub field: Template,
}

/// Read-only view of an Export's runtime state, published for the status
/// endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportStatus {
    /// Last successfully rendered point, if any.
    pub last_point: Option<Point>,
    /// Receipt time of the message behind the last point.
    pub received_time: Option<DateTime<Utc>>,
    /// Time of the most recent emission (message or republish).
    pub published_time: Option<DateTime<Utc>>,
}

/// An Export bound to one concrete topic, ready to spawn.
///
/// Built by the pipeline builder; exports of one definition share the parser
/// and template set but own independent runtime state.
#[derive(Debug)]
pub struct Export {
    name: String,
    topic: String,
    parser: Arc<Parser>,
    templates: Arc<TemplateSet>,
    interval: Duration,
    output: mpsc::Sender<Point>,
}

impl Export {
    /// Create an Export. `interval` of zero disables republishing.
    pub fn new(
        name: String,
        topic: String,
        parser: Arc<Parser>,
        templates: Arc<TemplateSet>,
        interval: Duration,
        output: mpsc::Sender<Point>,
    ) -> Self {
        Self {
            name,
            topic,
            parser,
            templates,
            interval,
            output,
        }
    }

    /// The concrete topic this Export subscribes to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The export definition name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the actor task and return its handle.
    ///
    /// The task runs until `shutdown` fires or the message sender side is
    /// dropped. After stop, no further points are emitted.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> ExportHandle {
        let (tx, rx) = mpsc::channel(MESSAGE_QUEUE_CAPACITY);
        let status = Arc::new(RwLock::new(ExportStatus::default()));

        let actor = ExportActor {
            name: self.name.clone(),
            topic: self.topic.clone(),
            parser: self.parser,
            templates: self.templates,
            interval: self.interval,
            output: self.output,
            status: status.clone(),
            last_point: None,
            timer: None,
        };
        let task = tokio::spawn(actor.run(rx, shutdown));

        ExportHandle {
            name: self.name,
            topic: self.topic,
            messages: tx,
            status,
            task,
        }
    }
}

/// Handle to a running Export: message delivery and status snapshots.
pub struct ExportHandle {
    name: String,
    topic: String,
    messages: mpsc::Sender<Vec<u8>>,
    status: Arc<RwLock<ExportStatus>>,
    task: JoinHandle<()>,
}

impl ExportHandle {
    /// The export definition name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The concrete topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// A sender for delivering raw payloads to this Export.
    pub fn sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.messages.clone()
    }

    /// Deliver one payload. Returns false if the Export has stopped.
    pub async fn deliver(&self, payload: Vec<u8>) -> bool {
        self.messages.send(payload).await.is_ok()
    }

    /// Shared status slot, for the status endpoint.
    pub fn status_slot(&self) -> Arc<RwLock<ExportStatus>> {
        self.status.clone()
    }

    /// Snapshot of the current status.
    pub async fn status(&self) -> ExportStatus {
        self.status.read().await.clone()
    }

    /// Wait for the actor task to finish.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

enum Event {
    Message(Vec<u8>),
    Tick,
    Stop,
}

struct ExportActor {
    name: String,
    topic: String,
    parser: Arc<Parser>,
    templates: Arc<TemplateSet>,
    interval: Duration,
    output: mpsc::Sender<Point>,
    status: Arc<RwLock<ExportStatus>>,
    last_point: Option<Point>,
    timer: Option<Interval>,
}

/// Wait for the next tick, or pend forever when no timer is armed.
async fn armed_tick(timer: &mut Option<Interval>) -> Option<Instant> {
    match timer {
        Some(timer) => Some(timer.tick().await),
        None => None,
    }
}

impl ExportActor {
    async fn run(
        mut self,
        mut messages: mpsc::Receiver<Vec<u8>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => Event::Stop,
                message = messages.recv() => match message {
                    Some(payload) => Event::Message(payload),
                    None => Event::Stop,
                },
                Some(_) = armed_tick(&mut self.timer) => Event::Tick,
            };

            match event {
                Event::Message(payload) => self.handle_message(&payload).await,
                Event::Tick => self.republish().await,
                Event::Stop => break,
            }
        }

        self.timer = None;
        tracing::debug!(export = %self.name, topic = %self.topic, "export stopped");
    }

    /// Handle one incoming message, per the export state machine: parse,
    /// render, emit, then drop the old timer and maybe arm a new one. Every
    /// failure path leaves the last-known point and the timer untouched.
    async fn handle_message(&mut self, payload: &[u8]) {
        let values = match self.parser.parse(payload) {
            Ok(values) => values,
            Err(err) => {
                tracing::warn!(export = %self.name, topic = %self.topic, error = %err,
                    "failed to parse message");
                return;
            }
        };

        let ctx = Context::new(&self.topic, &values);

        let metric = match self.templates.metric.render(&ctx) {
            Ok(metric) => metric,
            Err(err) => {
                tracing::warn!(export = %self.name, topic = %self.topic, error = %err,
                    "failed to render metric template");
                return;
            }
        };

        let mut tags = BTreeMap::new();
        for (tag, template) in &self.templates.tags {
            match template.render(&ctx) {
                Ok(value) => {
                    tags.insert(tag.clone(), value);
                }
                Err(err) => {
                    tracing::warn!(export = %self.name, topic = %self.topic, tag = %tag,
                        error = %err, "failed to render tag template");
                    return;
                }
            }
        }

        let field = match self.templates.field.render(&ctx) {
            Ok(field) => field,
            Err(err) => {
                tracing::warn!(export = %self.name, topic = %self.topic, error = %err,
                    "failed to render field template");
                return;
            }
        };

        let value = match values.get(&field) {
            Some(value) => value.clone(),
            None => {
                tracing::warn!(export = %self.name, topic = %self.topic, field = %field,
                    "parsed values carry no such field");
                return;
            }
        };

        let now = Utc::now();
        let point = Point {
            metric,
            tags,
            field,
            value,
            time: now,
        };

        self.last_point = Some(point.clone());
        {
            let mut status = self.status.write().await;
            status.last_point = Some(point.clone());
            status.received_time = Some(now);
        }

        self.emit(point).await;

        // Stop-then-maybe-rearm: the previous timer must be gone before a
        // new one is armed, so old and new value can never tick together.
        self.timer = None;
        if !self.interval.is_zero() {
            let mut timer = interval_at(Instant::now() + self.interval, self.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.timer = Some(timer);
        }
    }

    /// Re-emit the last point with a fresh timestamp.
    async fn republish(&mut self) {
        let Some(last) = &self.last_point else {
            return;
        };

        let mut point = last.clone();
        point.time = Utc::now();
        tracing::debug!(export = %self.name, topic = %self.topic, metric = %point.metric,
            "republishing last point");
        self.emit(point).await;
    }

    async fn emit(&self, point: Point) {
        // A full output queue applies backpressure here, throttling this
        // export without dropping data.
        if self.output.send(point).await.is_err() {
            tracing::warn!(export = %self.name, topic = %self.topic,
                "output channel closed, dropping point");
            return;
        }
        self.status.write().await.published_time = Some(Utc::now());
    }
}
