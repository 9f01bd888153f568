// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service discovery over a local Unix datagram socket.
//!
//! Producers and consumers cannot attach to a ring they cannot name, so a
//! small broker at a well-known socket path keeps a registry of participants
//! per *service key* and pushes `PEER` notifications carrying each
//! participant's address and ring name.
//!
//! # Wire grammar
//!
//! ASCII, whitespace-delimited tokens, one message per datagram, at most
//! [`MAX_DATAGRAM`] bytes:
//!
//! ```text
//! REGISTER   <service_key> <client_address> <ring_name_or_->
//! DEREGISTER <service_key> <client_address> <ring_name_or_->
//! PEER       <service_key> <peer_address> <peer_ring_or_->
//! ```
//!
//! A `-` ring token means the participant has no ring to announce (a
//! consumer). On `REGISTER` the broker first replays every existing
//! participant under the key to the newcomer, then announces the newcomer to
//! everyone else; a consumer thus always learns the producer's ring name, no
//! matter which side arrived first.

mod broker;
mod participant;
mod protocol;

pub use broker::{Broker, BrokerStats};
pub use participant::{Participant, PeerRole};
pub use protocol::{Message, PeerNotice, ProtocolError, Registration};

use std::fmt;
use std::io;

/// Well-known broker socket path used when the caller does not override it.
pub const DEFAULT_BROKER_SOCKET: &str = "/tmp/shmbus_broker.sock";

/// Maximum datagram size on the discovery socket.
pub const MAX_DATAGRAM: usize = 1024;

/// Errors surfaced by the discovery client side.
#[derive(Debug)]
pub enum DiscoveryError {
    /// Socket operation failed.
    Io(io::Error),

    /// A received datagram did not parse.
    Protocol(ProtocolError),
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Discovery socket error: {e}"),
            Self::Protocol(e) => write!(f, "Discovery protocol error: {e}"),
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Protocol(e) => Some(e),
        }
    }
}

impl From<io::Error> for DiscoveryError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ProtocolError> for DiscoveryError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// Result type for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
