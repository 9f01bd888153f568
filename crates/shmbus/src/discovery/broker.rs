// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The discovery broker: a stateful bookkeeper over one datagram socket.
//!
//! The broker is deliberately single-threaded. Datagrams preserve message
//! boundaries, the registry is small, and notification sends are
//! non-blocking, so one slow or vanished client can never stall the loop.
//! Failed sends are dropped: no retry, no registry removal. A client whose
//! socket path died will be re-announced to nobody, which is exactly what a
//! dead client deserves.

use super::protocol::{Message, PeerNotice, Registration};
use super::{Result, MAX_DATAGRAM};
use std::collections::HashMap;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How long the serve loop waits in `recv` before re-checking shutdown.
const RECV_TIMEOUT: Duration = Duration::from_millis(250);

/// Counters accumulated over a broker's lifetime.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrokerStats {
    pub datagrams_received: u64,
    pub registrations: u64,
    pub deregistrations: u64,
    pub peers_sent: u64,
    pub peers_dropped: u64,
}

/// Discovery broker bound to a local datagram socket.
pub struct Broker {
    /// Bound socket requests arrive on (blocking, with a short recv timeout).
    socket: UnixDatagram,
    /// Unbound non-blocking socket notifications go out on.
    notify: UnixDatagram,
    path: PathBuf,
    registry: HashMap<String, Vec<Registration>>,
    stats: BrokerStats,
}

impl Broker {
    /// Bind the broker socket, replacing a stale socket file if one is left
    /// over from a previous run.
    pub fn bind(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path).ok();
        }

        let socket = UnixDatagram::bind(path)?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;

        let notify = UnixDatagram::unbound()?;
        notify.set_nonblocking(true)?;

        Ok(Self {
            socket,
            notify,
            path: path.to_path_buf(),
            registry: HashMap::new(),
            stats: BrokerStats::default(),
        })
    }

    /// Serve until `shutdown` is set.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        log::info!("[broker] listening on {}", self.path.display());
        let mut buf = [0u8; MAX_DATAGRAM];

        while !shutdown.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut buf) {
                Ok((len, _from)) => {
                    self.stats.datagrams_received += 1;
                    match std::str::from_utf8(&buf[..len]) {
                        Ok(text) => self.handle_datagram(text),
                        Err(_) => {
                            log::warn!("[broker] dropping non-UTF-8 datagram ({len} bytes)");
                        }
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => log::warn!("[broker] recv error: {e}"),
            }
        }

        log::info!("[broker] shutting down");
    }

    /// Process one inbound datagram. Anything that does not parse as a
    /// request is logged and ignored; one bad client must not poison the
    /// registry.
    fn handle_datagram(&mut self, text: &str) {
        match Message::parse(text) {
            Ok(Message::Register(reg)) => self.handle_register(reg),
            Ok(Message::Deregister(reg)) => self.handle_deregister(&reg),
            Ok(Message::Peer(notice)) => {
                log::warn!("[broker] ignoring PEER sent to the broker: {notice:?}");
            }
            Err(e) => log::warn!("[broker] ignoring datagram: {e}"),
        }
    }

    fn handle_register(&mut self, reg: Registration) {
        self.stats.registrations += 1;
        log::debug!(
            "[broker] REGISTER {} from {} (ring: {:?})",
            reg.service_key,
            reg.address,
            reg.ring_name
        );

        // A re-register from the same address replaces its old record, so a
        // restarted client does not accumulate ghosts.
        let existing: Vec<Registration> = {
            let entries = self.registry.entry(reg.service_key.clone()).or_default();
            entries.retain(|r| r.address != reg.address);
            entries.clone()
        };

        // Replay everyone already here to the newcomer...
        for peer in &existing {
            let notice = PeerNotice::from(peer);
            self.send_peer(&reg.address, &notice);
        }

        // ...then announce the newcomer to everyone already here.
        let notice = PeerNotice::from(&reg);
        for peer in &existing {
            self.send_peer(&peer.address, &notice);
        }

        if let Some(entries) = self.registry.get_mut(&reg.service_key) {
            entries.push(reg);
        }
    }

    fn handle_deregister(&mut self, reg: &Registration) {
        let mut removed = false;
        if let Some(entries) = self.registry.get_mut(&reg.service_key) {
            let before = entries.len();
            entries.retain(|r| r.address != reg.address);
            removed = entries.len() != before;
            if entries.is_empty() {
                self.registry.remove(&reg.service_key);
            }
        }

        if removed {
            self.stats.deregistrations += 1;
            log::debug!(
                "[broker] DEREGISTER {} from {}",
                reg.service_key,
                reg.address
            );
        } else {
            log::debug!(
                "[broker] DEREGISTER for unknown participant {} under {}",
                reg.address,
                reg.service_key
            );
        }
    }

    fn send_peer(&mut self, to: &str, notice: &PeerNotice) {
        let wire = Message::Peer(notice.clone()).to_wire();
        match self.notify.send_to(wire.as_bytes(), to) {
            Ok(_) => self.stats.peers_sent += 1,
            Err(e) => {
                self.stats.peers_dropped += 1;
                log::debug!("[broker] dropping notification to {to}: {e}");
            }
        }
    }

    /// Lifetime counters.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        self.stats
    }

    /// Number of participants currently registered under `service_key`.
    #[must_use]
    pub fn participant_count(&self, service_key: &str) -> usize {
        self.registry.get(service_key).map_or(0, Vec::len)
    }

    /// The socket path the broker is bound to.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        std::fs::remove_file(&self.path).ok();
    }
}
