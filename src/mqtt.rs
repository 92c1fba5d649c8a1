// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT source: broker connection, subscriptions and dispatch.
//!
//! Subscribes every Export's concrete topic at QoS 0 (delivery is
//! at-most-once) and feeds incoming publishes into the matching Export's
//! message queue. Several Exports may share a topic; each gets its own copy.

use crate::config::MqttConfig;
use crate::export::ExportHandle;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_QUEUE_CAPACITY: usize = 64;
const DEFAULT_PORT: u16 = 1883;

/// MQTT source errors.
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("invalid MQTT address: {0:?}")]
    Address(String),

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// A connected MQTT source with a running event-loop task.
pub struct MqttSource {
    client: AsyncClient,
    task: JoinHandle<()>,
}

impl MqttSource {
    /// Connect to the broker, start the dispatch loop and subscribe every
    /// export topic. Subscription failures are fatal.
    pub async fn start(
        config: &MqttConfig,
        exports: &[ExportHandle],
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, MqttError> {
        let (host, port) = split_address(&config.address)?;

        let mut options = MqttOptions::new(&config.client_id, host, port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);

        let (client, event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);

        let mut routes: HashMap<String, Vec<mpsc::Sender<Vec<u8>>>> = HashMap::new();
        for handle in exports {
            routes
                .entry(handle.topic().to_string())
                .or_default()
                .push(handle.sender());
        }

        let task = tokio::spawn(run_event_loop(client.clone(), event_loop, routes, shutdown));

        for handle in exports {
            client.subscribe(handle.topic(), QoS::AtMostOnce).await?;
            tracing::info!(topic = %handle.topic(), export = %handle.name(), "subscribed");
        }

        Ok(Self { client, task })
    }

    /// Disconnect and wait for the dispatch loop to finish.
    pub async fn shutdown(self) {
        let _ = self.client.disconnect().await;
        let _ = self.task.await;
    }
}

fn split_address(address: &str) -> Result<(String, u16), MqttError> {
    // Bracketed IPv6 literal: `[host]` or `[host]:port`.
    if let Some(rest) = address.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| MqttError::Address(address.to_string()))?;
        if host.is_empty() {
            return Err(MqttError::Address(address.to_string()));
        }
        return match after {
            "" => Ok((host.to_string(), DEFAULT_PORT)),
            after => {
                let port = after
                    .strip_prefix(':')
                    .and_then(|p| p.parse::<u16>().ok())
                    .ok_or_else(|| MqttError::Address(address.to_string()))?;
                Ok((host.to_string(), port))
            }
        };
    }

    // Several colons without brackets: a bare IPv6 literal, no port.
    if address.matches(':').count() > 1 {
        return Ok((address.to_string(), DEFAULT_PORT));
    }

    match address.rsplit_once(':') {
        None => Ok((address.to_string(), DEFAULT_PORT)),
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| MqttError::Address(address.to_string()))?;
            if host.is_empty() {
                return Err(MqttError::Address(address.to_string()));
            }
            Ok((host.to_string(), port))
        }
    }
}

/// Subscribe every routed topic at QoS 0.
///
/// Sessions are clean, so the broker forgets all subscriptions whenever the
/// connection drops; this must run on every ConnAck, not just the first.
async fn subscribe_all(
    client: &AsyncClient,
    topics: impl Iterator<Item = &str>,
) -> Result<(), rumqttc::ClientError> {
    for topic in topics {
        client.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

async fn run_event_loop(
    client: AsyncClient,
    mut event_loop: EventLoop,
    routes: HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match routes.get(publish.topic.as_str()) {
                        Some(senders) => {
                            for sender in senders {
                                if sender.send(publish.payload.to_vec()).await.is_err() {
                                    tracing::debug!(topic = %publish.topic,
                                        "export stopped, dropping message");
                                }
                            }
                        }
                        None => {
                            tracing::debug!(topic = %publish.topic, "no export for topic");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("connected to MQTT broker");
                    let topics = routes.keys().map(String::as_str);
                    if let Err(err) = subscribe_all(&client, topics).await {
                        tracing::error!(error = %err, "failed to restore subscriptions");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(error = %err, "MQTT connection error");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
    }
    tracing::debug!("MQTT dispatch loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_address_with_port() {
        assert_eq!(
            split_address("broker.local:1884").expect("split"),
            ("broker.local".to_string(), 1884)
        );
    }

    #[test]
    fn test_split_address_default_port() {
        assert_eq!(
            split_address("broker.local").expect("split"),
            ("broker.local".to_string(), DEFAULT_PORT)
        );
    }

    #[test]
    fn test_split_address_invalid() {
        assert!(split_address("broker.local:notaport").is_err());
        assert!(split_address(":1883").is_err());
    }

    #[test]
    fn test_split_address_ipv6() {
        assert_eq!(
            split_address("[::1]:1884").expect("split"),
            ("::1".to_string(), 1884)
        );
        assert_eq!(
            split_address("[fe80::2]").expect("split"),
            ("fe80::2".to_string(), DEFAULT_PORT)
        );
        assert_eq!(
            split_address("::1").expect("split"),
            ("::1".to_string(), DEFAULT_PORT)
        );
        assert!(split_address("[::1").is_err());
        assert!(split_address("[]").is_err());
        assert!(split_address("[::1]:notaport").is_err());
    }

    #[tokio::test]
    async fn test_connack_resubscribes_every_route() {
        // Requests are queued towards the (unpolled) event loop, so the
        // ConnAck path can be exercised without a broker.
        let options = MqttOptions::new("test", "localhost", 1883);
        let (client, _event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);

        let topics = ["sensors/a", "sensors/b", "sensors/c"];
        subscribe_all(&client, topics.iter().copied())
            .await
            .expect("subscribe all routes");
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_reconnect_backoff() {
        // Port 1 refuses immediately, so the loop is inside its reconnect
        // backoff when the shutdown fires.
        let options = MqttOptions::new("test", "127.0.0.1", 1);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_event_loop(
            client,
            event_loop,
            HashMap::new(),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(true).expect("signal shutdown");

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop must stop well before the backoff elapses")
            .expect("join");
    }
}
