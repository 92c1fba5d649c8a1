// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT export bridge CLI.
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! mqtt-export --config mqtt-export.yaml
//!
//! # Validate a configuration file without connecting anywhere
//! mqtt-export validate --config mqtt-export.yaml
//! ```

use clap::{Parser as ClapParser, Subcommand};
use mqtt_export::{build_exports, Config, ExportHandle, InfluxWriter, MqttSource};
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

/// Capacity of the shared point channel between Exports and the sink writer.
const POINT_QUEUE_CAPACITY: usize = 64;

/// MQTT to InfluxDB export bridge
#[derive(ClapParser, Debug)]
#[command(name = "mqtt-export")]
#[command(about = "MQTT to InfluxDB export bridge")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "mqtt-export.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(Commands::Validate { config }) = args.command {
        return cmd_validate(config);
    }

    let config = Config::from_file(&args.config)?;

    // Build the pipeline before touching the network; a broken definition
    // must abort startup rather than subscribe a partial pipeline.
    let (point_tx, point_rx) = mpsc::channel(POINT_QUEUE_CAPACITY);
    let exports = build_exports(&config, point_tx)?;
    tracing::info!(
        exports = exports.len(),
        definitions = config.exports.len(),
        "pipeline built"
    );

    let writer = InfluxWriter::new(&config.influxdb);
    let writer_task = tokio::spawn(writer.run(point_rx));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handles: Vec<ExportHandle> = exports
        .into_iter()
        .map(|export| export.spawn(shutdown_rx.clone()))
        .collect();

    let status_task = config.status.as_ref().map(|status| {
        let address = status.address.clone();
        let shutdown = shutdown_rx.clone();
        let state = mqtt_export::status::StatusState::from_handles(&handles);
        tokio::spawn(async move {
            if let Err(err) = mqtt_export::status::serve(address, state, shutdown).await {
                tracing::error!(error = %err, "status endpoint failed");
            }
        })
    });

    let mqtt = MqttSource::start(&config.mqtt, &handles, shutdown_rx.clone()).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    let _ = shutdown_tx.send(true);
    mqtt.shutdown().await;
    for handle in handles {
        handle.join().await;
    }
    // All point senders are gone now; the writer drains and flushes.
    let _ = writer_task.await;
    if let Some(task) = status_task {
        let _ = task.await;
    }

    Ok(())
}

fn cmd_validate(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match Config::from_file(&path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Exports: {}", config.exports.len());
            for (name, export) in &config.exports {
                let topics = mqtt_export::expand(&export.topic);
                println!(
                    "  {} -> {} ({} topic{})",
                    name,
                    export.metric,
                    topics.len(),
                    if topics.len() == 1 { "" } else { "s" }
                );
                for topic in topics {
                    println!("    {}", topic);
                }
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("Configuration invalid: {}", err);
            std::process::exit(1);
        }
    }
}
