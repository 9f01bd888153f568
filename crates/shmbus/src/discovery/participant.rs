// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client-side discovery envelope.
//!
//! A [`Participant`] owns one datagram socket at a per-process unique path.
//! Construction sends `REGISTER`; drop sends `DEREGISTER` and removes the
//! socket file. In between, [`Participant::recv_peer`] yields the `PEER`
//! notifications the broker pushes.
//!
//! A producer typically registers with its ring name and then writes to the
//! ring; a consumer registers with no ring, waits for a `PEER` whose ring
//! name is set, and attaches to that.

use super::protocol::{Message, PeerNotice, Registration};
use super::{Result, MAX_DATAGRAM};
use std::fs;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Which side of a service a participant is on. Only affects the default
/// socket path, but that makes `ls /tmp` legible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Producer,
    Consumer,
}

impl PeerRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distinguishes sockets of one process from another incarnation with the
/// same pid, and multiple participants within one process.
static SOCKET_SEQ: AtomicU32 = AtomicU32::new(0);

fn default_socket_path(role: PeerRole) -> PathBuf {
    let pid = std::process::id();
    let seq = SOCKET_SEQ.fetch_add(1, Ordering::Relaxed);
    PathBuf::from(format!("/tmp/shmbus_{role}_{pid}_{seq}.sock"))
}

/// A registered discovery participant.
pub struct Participant {
    socket: UnixDatagram,
    socket_path: PathBuf,
    broker_path: PathBuf,
    registration: Registration,
}

impl Participant {
    /// Register with the broker at `broker_path` under `service_key`.
    ///
    /// Producers pass their ring name; consumers pass `None`. The
    /// participant's own socket lands at a unique path under `/tmp`.
    pub fn register(
        broker_path: &Path,
        role: PeerRole,
        service_key: &str,
        ring_name: Option<&str>,
    ) -> Result<Self> {
        Self::register_at(broker_path, &default_socket_path(role), service_key, ring_name)
    }

    /// Register with the participant socket at an explicit path.
    ///
    /// For callers that keep their sockets somewhere other than `/tmp`
    /// (tests, sandboxes). The path must be unique per participant.
    pub fn register_at(
        broker_path: &Path,
        socket_path: &Path,
        service_key: &str,
        ring_name: Option<&str>,
    ) -> Result<Self> {
        if socket_path.exists() {
            fs::remove_file(socket_path).ok();
        }
        let socket = UnixDatagram::bind(socket_path)?;

        let registration = Registration {
            service_key: service_key.to_string(),
            address: socket_path.to_string_lossy().into_owned(),
            ring_name: ring_name.map(String::from),
        };

        let wire = Message::Register(registration.clone()).to_wire();
        if let Err(e) = socket.send_to(wire.as_bytes(), broker_path) {
            fs::remove_file(socket_path).ok();
            return Err(e.into());
        }

        log::debug!(
            "[participant] registered {} at {} (ring: {:?})",
            service_key,
            socket_path.display(),
            ring_name
        );

        Ok(Self {
            socket,
            socket_path: socket_path.to_path_buf(),
            broker_path: broker_path.to_path_buf(),
            registration,
        })
    }

    /// Receive the next `PEER` notification.
    ///
    /// Returns `Ok(None)` when the timeout expires first, or when a stray
    /// non-PEER datagram arrived instead (logged and discarded). `None` as
    /// the timeout blocks indefinitely.
    pub fn recv_peer(&self, timeout: Option<Duration>) -> Result<Option<PeerNotice>> {
        self.socket.set_read_timeout(timeout)?;

        let mut buf = [0u8; MAX_DATAGRAM];
        match self.socket.recv(&mut buf) {
            Ok(len) => {
                let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                    log::warn!("[participant] dropping non-UTF-8 datagram ({len} bytes)");
                    return Ok(None);
                };
                match Message::parse(text)? {
                    Message::Peer(notice) => Ok(Some(notice)),
                    other => {
                        log::warn!("[participant] unexpected message on notify socket: {other:?}");
                        Ok(None)
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// This participant's socket path as the broker knows it.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.registration.address
    }

    /// The service key registered under.
    #[must_use]
    pub fn service_key(&self) -> &str {
        &self.registration.service_key
    }

    /// The ring name announced at registration, if any.
    #[must_use]
    pub fn ring_name(&self) -> Option<&str> {
        self.registration.ring_name.as_deref()
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        let wire = Message::Deregister(self.registration.clone()).to_wire();
        if let Err(e) = self.socket.send_to(wire.as_bytes(), &self.broker_path) {
            // Broker may already be gone; deregistration is best effort.
            log::debug!("[participant] deregister send failed: {e}");
        }
        fs::remove_file(&self.socket_path).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_socket_paths_are_unique() {
        let a = default_socket_path(PeerRole::Producer);
        let b = default_socket_path(PeerRole::Producer);
        let c = default_socket_path(PeerRole::Consumer);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.to_string_lossy().contains("producer"));
        assert!(c.to_string_lossy().contains("consumer"));
    }

    #[test]
    fn test_register_and_drop_cleans_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let broker_path = dir.path().join("broker.sock");
        // Stand-in broker endpoint that just absorbs the datagrams.
        let broker_sock = UnixDatagram::bind(&broker_path).unwrap();

        let socket_path = dir.path().join("client.sock");
        let participant =
            Participant::register_at(&broker_path, &socket_path, "demo", Some("/r1")).unwrap();
        assert!(socket_path.exists());
        assert_eq!(participant.service_key(), "demo");
        assert_eq!(participant.ring_name(), Some("/r1"));

        // The broker endpoint saw the REGISTER.
        let mut buf = [0u8; MAX_DATAGRAM];
        let len = broker_sock.recv(&mut buf).unwrap();
        let text = std::str::from_utf8(&buf[..len]).unwrap();
        assert!(text.starts_with("REGISTER demo"));
        assert!(text.ends_with("/r1"));

        drop(participant);
        assert!(!socket_path.exists());

        // And the DEREGISTER.
        let len = broker_sock.recv(&mut buf).unwrap();
        let text = std::str::from_utf8(&buf[..len]).unwrap();
        assert!(text.starts_with("DEREGISTER demo"));
    }

    #[test]
    fn test_register_without_broker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let broker_path = dir.path().join("nobody_home.sock");
        let socket_path = dir.path().join("client.sock");

        let result = Participant::register_at(&broker_path, &socket_path, "demo", None);
        assert!(result.is_err());
        // The half-made socket file is cleaned up on the error path.
        assert!(!socket_path.exists());
    }

    #[test]
    fn test_recv_peer_timeout_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let broker_path = dir.path().join("broker.sock");
        let _broker_sock = UnixDatagram::bind(&broker_path).unwrap();

        let participant = Participant::register_at(
            &broker_path,
            &dir.path().join("client.sock"),
            "demo",
            None,
        )
        .unwrap();

        let got = participant
            .recv_peer(Some(Duration::from_millis(50)))
            .unwrap();
        assert!(got.is_none());
    }
}
