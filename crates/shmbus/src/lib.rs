// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # shmbus - shared-memory message bus for local IPC
//!
//! A local-host inter-process communication substrate built on two cooperating
//! mechanisms:
//!
//! - a **shared-memory ring buffer** carrying length-framed binary messages
//!   between exactly one producer and one or more consumer processes, with
//!   three POSIX named semaphores coordinating free slots, filled slots, and
//!   header mutation;
//! - a **discovery broker** over a Unix datagram socket that rendezvous
//!   producers and consumers by service key and hands each the shared-memory
//!   name of its peer.
//!
//! ## Architecture
//!
//! ```text
//! +-------------+                       +-------------+
//! |  Producer   |     Shared Memory     |  Consumer   |
//! |             |     (POSIX shm)       |             |
//! | write_msg --+------> [ ring ] ------+--> read_msg |
//! +------+------+                       +------+------+
//!        |       free / filled / mutex         |
//!        |       named semaphores              |
//!        |                                     |
//!        |   REGISTER       +--------+         |
//!        +----------------->| broker |<--------+  REGISTER
//!            PEER <---------+--------+---------> PEER
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shmbus::{Ring, Result};
//!
//! fn main() -> Result<()> {
//!     // Producer: create the ring and publish.
//!     let mut ring = Ring::create("/shmbus_demo", 64, 4096)?;
//!     ring.write_message(b"hello")?;
//!
//!     // Consumer: attach blindly, layout is adopted from the header.
//!     let mut peer = Ring::attach("/shmbus_demo")?;
//!     let mut buf = Vec::new();
//!     peer.read_message(&mut buf)?;
//!
//!     // Only the creator removes the kernel objects.
//!     ring.unlink_resources()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules Overview
//!
//! - [`shm`] - ring buffer core: layout, attachment, semaphores, lifecycle
//! - [`discovery`] - broker and participant adapter for service rendezvous

/// Shared-memory ring buffer core (layout, semaphores, lifecycle).
pub mod shm;

/// Service discovery over a local datagram socket.
pub mod discovery;

pub use discovery::{
    Broker, BrokerStats, DiscoveryError, Participant, PeerNotice, PeerRole, DEFAULT_BROKER_SOCKET,
};
pub use shm::{cleanup_stale_rings, Ring, RingError};

/// Result type for ring operations, re-exported for the common case.
pub type Result<T> = std::result::Result<T, RingError>;
