// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery wire protocol: typed messages and the token grammar.
//!
//! Everything on the wire is one line of whitespace-separated ASCII tokens.
//! Service keys, addresses, and ring names therefore cannot contain
//! whitespace; socket paths and shm names never do.

use std::fmt;

/// A participant as the registry stores it: who, where, and which ring (if
/// any) it publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Rendezvous key shared by a producer and its consumers.
    pub service_key: String,
    /// The participant's own datagram socket path.
    pub address: String,
    /// Ring name the participant publishes, `None` for consumers (`-` on
    /// the wire).
    pub ring_name: Option<String>,
}

/// A `PEER` notification as delivered to a registered participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerNotice {
    pub service_key: String,
    /// The peer's datagram socket path.
    pub address: String,
    /// The peer's ring name, if it publishes one.
    pub ring_name: Option<String>,
}

impl From<&Registration> for PeerNotice {
    fn from(reg: &Registration) -> Self {
        Self {
            service_key: reg.service_key.clone(),
            address: reg.address.clone(),
            ring_name: reg.ring_name.clone(),
        }
    }
}

/// Any message of the discovery grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Register(Registration),
    Deregister(Registration),
    Peer(PeerNotice),
}

/// Parse failures on inbound datagrams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Wrong token count or empty message.
    Malformed(String),

    /// First token is not a known verb.
    UnknownCommand(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "Malformed datagram: {msg:?}"),
            Self::UnknownCommand(verb) => write!(f, "Unknown command: {verb:?}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

fn ring_token(ring_name: Option<&str>) -> &str {
    ring_name.unwrap_or("-")
}

fn parse_ring_token(token: &str) -> Option<String> {
    if token == "-" {
        None
    } else {
        Some(token.to_string())
    }
}

impl Message {
    /// Parse one datagram.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let tokens: Vec<&str> = text.split_ascii_whitespace().collect();
        let [verb, service_key, address, ring] = tokens[..] else {
            return Err(ProtocolError::Malformed(text.to_string()));
        };

        let service_key = service_key.to_string();
        let address = address.to_string();
        let ring_name = parse_ring_token(ring);

        match verb {
            "REGISTER" => Ok(Self::Register(Registration {
                service_key,
                address,
                ring_name,
            })),
            "DEREGISTER" => Ok(Self::Deregister(Registration {
                service_key,
                address,
                ring_name,
            })),
            "PEER" => Ok(Self::Peer(PeerNotice {
                service_key,
                address,
                ring_name,
            })),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    /// Render the message for the wire.
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            Self::Register(r) => format!(
                "REGISTER {} {} {}",
                r.service_key,
                r.address,
                ring_token(r.ring_name.as_deref())
            ),
            Self::Deregister(r) => format!(
                "DEREGISTER {} {} {}",
                r.service_key,
                r.address,
                ring_token(r.ring_name.as_deref())
            ),
            Self::Peer(p) => format!(
                "PEER {} {} {}",
                p.service_key,
                p.address,
                ring_token(p.ring_name.as_deref())
            ),
        }
    }
}
