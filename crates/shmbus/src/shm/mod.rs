// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared-memory ring buffer for single-producer, multi-consumer IPC.
//!
//! One process (the *owner*) creates a named POSIX shared-memory region laid
//! out as a fixed header plus `slot_count` equal-sized slots, together with
//! three named semaphores coordinating the producer/consumer protocol. Any
//! number of other processes attach to the same name and read messages in
//! FIFO order.
//!
//! # Memory Layout
//!
//! ```text
//! +--------------------------------------------------------------+
//! | RingHeader (48 bytes: magic, version, counts, head, tail)    |
//! +--------------------------------------------------------------+
//! | slot[0]: length (4 bytes) | payload (slot_size bytes)        |
//! | slot[1]                                                      |
//! | ...                                                          |
//! | slot[slot_count - 1]                                         |
//! +--------------------------------------------------------------+
//! ```
//!
//! # Synchronization Protocol
//!
//! Three named semaphores derived from the ring name:
//!
//! - *free* - counting, starts at `slot_count`; a writer takes one token per
//!   message and blocks when the ring is full.
//! - *filled* - counting, starts at 0; a reader takes one token per message
//!   and blocks when the ring is empty.
//! - *mutex* - binary, starts at 1; guards `head`/`tail` mutation.
//!
//! The counting pair provides the happens-before edges between a producer's
//! payload writes and a consumer's reads; `head`/`tail` are only touched
//! under the mutex.
//!
//! # Lifecycle
//!
//! The owner is the only process allowed to unlink the region and semaphore
//! names (`Ring::unlink_resources`). Everyone else merely detaches on drop.
//! An attacher that arrives while the owner is still initializing retries for
//! about two seconds before giving up.

mod layout;
mod ring;
mod segment;
mod sem;

pub use layout::{ring_region_size, HEADER_SIZE, LEN_PREFIX_SIZE, RING_MAGIC, RING_VERSION};
pub use ring::{cleanup_stale_rings, Ring};
pub use segment::ShmRegion;

use std::fmt;
use std::io;
use std::time::Duration;

/// Attempts made while waiting for a mid-initialization owner.
pub const ATTACH_RETRY_ATTEMPTS: u32 = 20;

/// Pause between attach attempts.
pub const ATTACH_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Errors surfaced by the ring core.
#[derive(Debug)]
pub enum RingError {
    /// Ring name does not fit the kernel namespace rules.
    InvalidName(String),

    /// Requested slot count was zero.
    InvalidCapacity(u32),

    /// Shared-memory region could not be created or opened.
    RegionOpen(io::Error),

    /// Attached region is shorter than the header or the computed total.
    RegionTooSmall { actual: usize, required: usize },

    /// Header magic mismatch.
    BadMagic { found: u32 },

    /// Semaphores not available after the retry window.
    AttachFailed(String),

    /// Write with a payload longer than `slot_size`.
    PayloadTooLarge { size: usize, capacity: usize },

    /// Semaphore operation returned an unexpected error (not EINTR).
    Synchronizer(io::Error),
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "Invalid ring name: {name}"),
            Self::InvalidCapacity(count) => {
                write!(f, "Invalid slot count: {count} (must be at least 1)")
            }
            Self::RegionOpen(e) => write!(f, "Shared-memory region open failed: {e}"),
            Self::RegionTooSmall { actual, required } => {
                write!(
                    f,
                    "Region too small: {actual} bytes, need at least {required}"
                )
            }
            Self::BadMagic { found } => {
                write!(f, "Header magic mismatch: found {found:#010x}")
            }
            Self::AttachFailed(name) => {
                write!(f, "Attach to {name} failed: semaphores not available")
            }
            Self::PayloadTooLarge { size, capacity } => {
                write!(
                    f,
                    "Payload too large: {size} bytes exceeds slot capacity {capacity}"
                )
            }
            Self::Synchronizer(e) => write!(f, "Semaphore operation failed: {e}"),
        }
    }
}

impl std::error::Error for RingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RegionOpen(e) | Self::Synchronizer(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for ring operations.
pub type Result<T> = std::result::Result<T, RingError>;

/// Derive the name of one of the coordination semaphores from a ring name.
///
/// The ring name keeps its leading `/`; every other `/` becomes `_` so the
/// result is a single-component name the semaphore namespace accepts.
/// `/sensor/raw` with suffix `free` becomes `/sensor_raw_free`.
pub(crate) fn sem_name(ring_name: &str, suffix: &str) -> String {
    let body = ring_name.strip_prefix('/').unwrap_or(ring_name);
    format!("/{}_{suffix}", body.replace('/', "_"))
}

pub(crate) const SEM_FREE: &str = "free";
pub(crate) const SEM_FILLED: &str = "filled";
pub(crate) const SEM_MUTEX: &str = "mutex";
