// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! shmbus Discovery Broker
//!
//! Standalone rendezvous point for shmbus producers and consumers on one
//! host. Participants send `REGISTER`/`DEREGISTER` datagrams to the broker
//! socket; the broker pushes `PEER` notifications carrying each peer's
//! address and ring name.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default socket
//! shmbus-broker
//!
//! # Custom socket path and verbose logging
//! shmbus-broker --socket /run/shmbus/broker.sock --log-level debug
//! ```

use clap::Parser;
use shmbus::{Broker, DEFAULT_BROKER_SOCKET};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// shmbus discovery broker - local rendezvous for ring producers and consumers
#[derive(Parser, Debug)]
#[command(name = "shmbus-broker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Datagram socket path to listen on
    #[arg(short, long, default_value = DEFAULT_BROKER_SOCKET)]
    socket: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("shmbus broker v{}", env!("CARGO_PKG_VERSION"));
    info!("socket: {}", args.socket.display());

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })?;

    let mut broker = Broker::bind(&args.socket)?;
    broker.run(&shutdown);

    let stats = broker.stats();
    info!(
        "received={} registrations={} deregistrations={} peers_sent={} peers_dropped={}",
        stats.datagrams_received,
        stats.registrations,
        stats.deregistrations,
        stats.peers_sent,
        stats.peers_dropped
    );
    info!("broker stopped");
    Ok(())
}
