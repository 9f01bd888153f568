// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ring handle: attachment, the write/read protocol, and lifecycle.
//!
//! A [`Ring`] owns the region mapping and the three semaphore handles as one
//! aggregate with an explicit owner flag. The flag decides the one lifecycle
//! asymmetry: only the creator may remove the kernel names
//! ([`Ring::unlink_resources`]); every other teardown path, normal or not,
//! merely detaches.
//!
//! # Write protocol (producer)
//!
//! 1. wait *free* (blocks while the ring is full)
//! 2. wait *mutex*
//! 3. store length + payload at `tail`, advance `tail`
//! 4. post *mutex*
//! 5. post *filled*
//!
//! # Read protocol (consumer)
//!
//! 1. wait *filled* (blocks while the ring is empty)
//! 2. wait *mutex*
//! 3. copy length + payload at `head`, advance `head`
//! 4. post *mutex*
//! 5. post *free*
//!
//! Exactly one writer may exist per ring: `tail` advancement assumes a single
//! mutator. Any number of readers may attach; two concurrent readers receive
//! disjoint messages.

use super::layout::{self, ring_region_size, RingHeader, HEADER_SIZE, RING_VERSION};
use super::segment::ShmRegion;
use super::sem::NamedSem;
use super::{
    sem_name, Result, RingError, ATTACH_RETRY_ATTEMPTS, ATTACH_RETRY_INTERVAL, SEM_FILLED,
    SEM_FREE, SEM_MUTEX,
};
use std::io;
use std::thread;

/// Handle to a shared-memory message ring.
///
/// Created once per process per ring; the creator gets the owner role, every
/// later process attaches. Dropping the handle closes the semaphores and
/// unmaps the region without touching the kernel names.
#[derive(Debug)]
pub struct Ring {
    region: ShmRegion,
    free: NamedSem,
    filled: NamedSem,
    mutex: NamedSem,
    slot_count: u32,
    slot_size: u32,
    owner: bool,
}

impl Ring {
    /// Create a ring under `name` with `slot_count` slots of `slot_size`
    /// payload bytes each. The calling process becomes the owner.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken ([`RingError::RegionOpen`] with
    /// `AlreadyExists`), the name is invalid, `slot_count` is zero, or the
    /// semaphores cannot be created. A failed create leaves no kernel
    /// objects behind.
    pub fn create(name: &str, slot_count: u32, slot_size: u32) -> Result<Self> {
        if slot_count == 0 {
            return Err(RingError::InvalidCapacity(slot_count));
        }

        let total = ring_region_size(slot_count, slot_size);
        let region = ShmRegion::create(name, total)?;

        let (free, filled, mutex) = match Self::create_sems(name, slot_count) {
            Ok(triple) => triple,
            Err(e) => {
                // Roll back whatever namespace entries made it in.
                Self::unlink_names(name).ok();
                return Err(e);
            }
        };

        // SAFETY: the region holds a full ring layout per the size above,
        // and the name was created exclusively, so no attacher can observe a
        // published magic before this completes.
        unsafe {
            RingHeader::initialize(region.as_ptr().cast::<RingHeader>(), slot_count, slot_size);
        }

        log::debug!("[ring] created {name}: {slot_count} slots x {slot_size} bytes");

        Ok(Self {
            region,
            free,
            filled,
            mutex,
            slot_count,
            slot_size,
            owner: true,
        })
    }

    /// Attach to a ring created by another process.
    ///
    /// The geometry is adopted from the header; the attacher never supplies
    /// it. An attacher that arrives before the owner has finished
    /// initializing (region not yet created, magic not yet published,
    /// semaphores not yet made) retries for roughly
    /// `ATTACH_RETRY_ATTEMPTS x ATTACH_RETRY_INTERVAL` before surfacing the
    /// error it last saw.
    pub fn attach(name: &str) -> Result<Self> {
        let mut last_err = None;

        for attempt in 0..ATTACH_RETRY_ATTEMPTS {
            if attempt > 0 {
                thread::sleep(ATTACH_RETRY_INTERVAL);
            }

            match Self::attach_once(name) {
                Ok(ring) => {
                    if attempt > 0 {
                        log::debug!("[ring] attached to {name} after {attempt} retries");
                    }
                    return Ok(ring);
                }
                Err(e) if Self::attach_retryable(&e) => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }

        log::warn!("[ring] giving up attaching to {name}");
        Err(last_err.unwrap_or_else(|| RingError::AttachFailed(name.to_string())))
    }

    /// Symptoms of an owner that is still mid-initialization.
    fn attach_retryable(err: &RingError) -> bool {
        match err {
            RingError::RegionOpen(e) => e.kind() == io::ErrorKind::NotFound,
            RingError::BadMagic { .. } | RingError::AttachFailed(_) => true,
            _ => false,
        }
    }

    fn attach_once(name: &str) -> Result<Self> {
        let region = ShmRegion::open(name, HEADER_SIZE)?;

        // SAFETY: the mapping is at least HEADER_SIZE bytes per open();
        // reads before the semaphores are held touch only the init-once
        // fields and the Acquire-loaded magic.
        let header = unsafe { &*region.as_ptr().cast::<RingHeader>() };
        if !header.is_initialized() {
            return Err(RingError::BadMagic {
                found: header.magic(),
            });
        }
        if header.version() != RING_VERSION {
            log::warn!(
                "[ring] {name}: layout version {} (this build speaks {})",
                header.version(),
                RING_VERSION
            );
        }

        // Header wins: whatever the owner supplied is the geometry.
        let slot_count = header.slot_count();
        let slot_size = header.slot_size();
        if slot_count == 0 {
            return Err(RingError::InvalidCapacity(slot_count));
        }

        let required = ring_region_size(slot_count, slot_size);
        if region.size() < required {
            return Err(RingError::RegionTooSmall {
                actual: region.size(),
                required,
            });
        }

        let free = Self::open_sem(name, SEM_FREE)?;
        let filled = Self::open_sem(name, SEM_FILLED)?;
        let mutex = Self::open_sem(name, SEM_MUTEX)?;

        Ok(Self {
            region,
            free,
            filled,
            mutex,
            slot_count,
            slot_size,
            owner: false,
        })
    }

    fn create_sems(name: &str, slot_count: u32) -> Result<(NamedSem, NamedSem, NamedSem)> {
        let create = |suffix: &str, initial: u32| {
            NamedSem::create_exclusive(&sem_name(name, suffix), initial)
                .map_err(RingError::Synchronizer)
        };
        let free = create(SEM_FREE, slot_count)?;
        let filled = create(SEM_FILLED, 0)?;
        let mutex = create(SEM_MUTEX, 1)?;
        Ok((free, filled, mutex))
    }

    fn open_sem(name: &str, suffix: &str) -> Result<NamedSem> {
        NamedSem::open(&sem_name(name, suffix)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                RingError::AttachFailed(name.to_string())
            } else {
                RingError::Synchronizer(e)
            }
        })
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        // SAFETY: the mapping is at least HEADER_SIZE bytes and was validated
        // (create) or adopted (attach); the reference lives shorter than the
        // mapping owned by self.
        unsafe { &*self.region.as_ptr().cast::<RingHeader>() }
    }

    /// Publish one message to the ring.
    ///
    /// Blocks while the ring is full. Messages become visible to exactly one
    /// subsequent [`Ring::read_message`], in FIFO order.
    ///
    /// # Errors
    ///
    /// [`RingError::PayloadTooLarge`] if `data` exceeds the slot size; no
    /// semaphore is touched in that case. [`RingError::Synchronizer`] if a
    /// semaphore operation fails for a reason other than signal delivery; if
    /// the mutex wait is the step that fails, the free token already taken is
    /// not restored and the ring permanently loses one slot of capacity.
    pub fn write_message(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.slot_size as usize {
            return Err(RingError::PayloadTooLarge {
                size: data.len(),
                capacity: self.slot_size as usize,
            });
        }

        self.free.wait().map_err(RingError::Synchronizer)?;
        self.mutex.wait().map_err(RingError::Synchronizer)?;

        let header = self.header();
        let idx = header.tail();
        layout::slot_view(&self.region, idx, self.slot_size).write(data);
        header.set_tail((idx + 1) % self.slot_count);

        self.mutex.post().map_err(RingError::Synchronizer)?;
        self.filled.post().map_err(RingError::Synchronizer)?;
        Ok(())
    }

    /// Take the next message from the ring into `out`, resizing it to the
    /// message length.
    ///
    /// Blocks while the ring is empty. Each message is delivered to exactly
    /// one reader.
    pub fn read_message(&mut self, out: &mut Vec<u8>) -> Result<()> {
        self.filled.wait().map_err(RingError::Synchronizer)?;
        self.mutex.wait().map_err(RingError::Synchronizer)?;

        let header = self.header();
        let idx = header.head();
        layout::slot_view(&self.region, idx, self.slot_size).read_into(out);
        header.set_head((idx + 1) % self.slot_count);

        self.mutex.post().map_err(RingError::Synchronizer)?;
        self.free.post().map_err(RingError::Synchronizer)?;
        Ok(())
    }

    /// Remove the region and semaphore names from the kernel namespace.
    ///
    /// Owner only; on an attachee this is a logged no-op. Live handles in
    /// other processes keep working until they drop, but nobody can attach
    /// under this name afterwards. Skipping the call leaves the objects in
    /// the kernel until reboot or manual removal.
    pub fn unlink_resources(&self) -> Result<()> {
        if !self.owner {
            log::debug!(
                "[ring] {}: unlink requested by attachee, ignoring",
                self.region.name()
            );
            return Ok(());
        }
        log::debug!("[ring] unlinking {}", self.region.name());
        Self::unlink_names(self.region.name())
    }

    fn unlink_names(name: &str) -> Result<()> {
        ShmRegion::unlink(name)?;
        for suffix in [SEM_FREE, SEM_FILLED, SEM_MUTEX] {
            NamedSem::unlink(&sem_name(name, suffix)).map_err(RingError::Synchronizer)?;
        }
        Ok(())
    }

    /// Check whether a ring region with this name currently exists.
    #[must_use]
    pub fn exists(name: &str) -> bool {
        ShmRegion::exists(name)
    }

    /// The ring name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Number of slots.
    #[must_use]
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Maximum payload bytes per slot.
    #[must_use]
    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    /// Whether this handle created the ring.
    #[must_use]
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Snapshot of the free-slot count. Diagnostic only.
    pub fn free_slots(&self) -> Result<u32> {
        let v = self.free.value().map_err(RingError::Synchronizer)?;
        Ok(v.max(0) as u32)
    }

    /// Snapshot of the filled-slot count. Diagnostic only.
    pub fn filled_slots(&self) -> Result<u32> {
        let v = self.filled.value().map_err(RingError::Synchronizer)?;
        Ok(v.max(0) as u32)
    }
}

/// Remove leftover rings whose names start with `prefix`.
///
/// Scans `/dev/shm` for regions matching the prefix and unlinks each one
/// together with its derived semaphores. Meant for startup cleanup after a
/// crashed owner, with a prefix that no live ring uses. Returns the number
/// of rings removed.
pub fn cleanup_stale_rings(prefix: &str) -> usize {
    let Some(stripped) = prefix.strip_prefix('/') else {
        return 0;
    };
    if stripped.is_empty() {
        return 0;
    }

    let shm_dir = std::path::Path::new("/dev/shm");
    let Ok(entries) = std::fs::read_dir(shm_dir) else {
        return 0;
    };

    let mut cleaned = 0;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        // Semaphores show up as "sem.<name>"; they go away with their ring.
        if name.starts_with("sem.") || !name.starts_with(stripped) {
            continue;
        }

        let ring_name = format!("/{name}");
        if Ring::unlink_names(&ring_name).is_ok() {
            log::debug!("[ring] cleaned up stale ring {ring_name}");
            cleaned += 1;
        }
    }

    cleaned
}
