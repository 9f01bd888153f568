// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Binary layout of a ring region: header plus slot array.
//!
//! # Header (48 bytes, native byte order)
//!
//! ```text
//! Offset  Size   Field
//! 0       4      magic       (0xA1B2C3D4; published last during init)
//! 4       4      version     (currently 1)
//! 8       4      slot_count  (immutable post-init)
//! 12      4      slot_size   (immutable post-init)
//! 16      4      head        (next slot a consumer reads)
//! 20      4      tail        (next slot a producer writes)
//! 24      24     reserved
//! ```
//!
//! # Slots
//!
//! `slot_count` cells follow the header, each `4 + slot_size` bytes: a 32-bit
//! length prefix and the payload. The stride is not rounded up, so the length
//! prefix of slot `i > 0` may be unaligned; all access to it goes through
//! unaligned reads/writes.
//!
//! All slot addressing lives in [`slot_view`]; nothing else in the crate
//! computes slot offsets.

use super::segment::ShmRegion;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Sentinel confirming an initialized region.
pub const RING_MAGIC: u32 = 0xA1B2_C3D4;

/// Layout version.
pub const RING_VERSION: u32 = 1;

/// Header bytes preceding the slot array.
pub const HEADER_SIZE: usize = 48;

/// Bytes of length prefix per slot.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Total region size for a given geometry.
#[must_use]
pub const fn ring_region_size(slot_count: u32, slot_size: u32) -> usize {
    HEADER_SIZE + slot_count as usize * (LEN_PREFIX_SIZE + slot_size as usize)
}

/// Ring header at offset 0 of the mapped region.
///
/// `head` and `tail` are only mutated under the ring's mutex semaphore, and
/// the semaphore wait/post pairs carry the cross-process ordering, so Relaxed
/// atomics suffice for them. `magic` is the one field with publication
/// semantics: the owner stores it Release after every other field, and
/// attachers load it Acquire, so a visible magic implies a visible geometry.
#[repr(C)]
pub struct RingHeader {
    magic: AtomicU32,
    version: u32,
    slot_count: u32,
    slot_size: u32,
    head: AtomicU32,
    tail: AtomicU32,
    _reserved: [u8; 24],
}

impl RingHeader {
    /// Initialize a header in place.
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least [`HEADER_SIZE`] writable bytes that no
    /// other process is reading as an initialized header yet (the creator
    /// holds the name exclusively until magic is published).
    pub unsafe fn initialize(ptr: *mut RingHeader, slot_count: u32, slot_size: u32) {
        ptr::write(
            ptr,
            RingHeader {
                magic: AtomicU32::new(0),
                version: RING_VERSION,
                slot_count,
                slot_size,
                head: AtomicU32::new(0),
                tail: AtomicU32::new(0),
                _reserved: [0u8; 24],
            },
        );
        // Geometry must be visible before the magic is.
        (*ptr).magic.store(RING_MAGIC, Ordering::Release);
    }

    /// Magic as currently visible to this process.
    #[inline]
    pub fn magic(&self) -> u32 {
        self.magic.load(Ordering::Acquire)
    }

    /// Whether the header carries the expected magic.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.magic() == RING_MAGIC
    }

    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[inline]
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    #[inline]
    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    /// Next slot a consumer will read. Only meaningful under the mutex.
    #[inline]
    pub fn head(&self) -> u32 {
        self.head.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_head(&self, value: u32) {
        self.head.store(value, Ordering::Relaxed);
    }

    /// Next slot a producer will write. Only meaningful under the mutex.
    #[inline]
    pub fn tail(&self) -> u32 {
        self.tail.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_tail(&self, value: u32) {
        self.tail.store(value, Ordering::Relaxed);
    }
}

/// View over one slot's length prefix and payload span.
///
/// Borrow-tied to the region so the pointers cannot outlive the mapping.
pub(crate) struct SlotView<'a> {
    len_ptr: *mut u8,
    payload_ptr: *mut u8,
    slot_size: usize,
    _region: PhantomData<&'a ShmRegion>,
}

/// The single place that computes `base + HEADER_SIZE + i * (4 + slot_size)`.
pub(crate) fn slot_view(region: &ShmRegion, index: u32, slot_size: u32) -> SlotView<'_> {
    let stride = LEN_PREFIX_SIZE + slot_size as usize;
    let offset = HEADER_SIZE + index as usize * stride;
    debug_assert!(offset + stride <= region.size());

    // SAFETY: the offset is within the mapping per the debug assertion; the
    // callers (Ring operations) only pass indexes below slot_count of a
    // region sized with ring_region_size.
    let len_ptr = unsafe { region.as_ptr().add(offset) };
    // SAFETY: same bounds; the payload begins right after the length prefix.
    let payload_ptr = unsafe { len_ptr.add(LEN_PREFIX_SIZE) };

    SlotView {
        len_ptr,
        payload_ptr,
        slot_size: slot_size as usize,
        _region: PhantomData,
    }
}

impl SlotView<'_> {
    /// Stored payload length. Unaligned read: the slot stride need not be
    /// 4-aligned.
    pub fn len(&self) -> u32 {
        // SAFETY: len_ptr points at the 4-byte length prefix inside the
        // mapping; the semaphore protocol guarantees no concurrent writer.
        unsafe { ptr::read_unaligned(self.len_ptr.cast::<u32>()) }
    }

    /// Store a message into the slot: length prefix then payload bytes.
    pub fn write(&self, data: &[u8]) {
        debug_assert!(data.len() <= self.slot_size);
        // SAFETY: both pointers are in bounds for this slot, data fits per
        // the assertion (checked against slot_size by the caller), and the
        // free-token the producer holds excludes all readers from this slot.
        unsafe {
            ptr::write_unaligned(self.len_ptr.cast::<u32>(), data.len() as u32);
            ptr::copy_nonoverlapping(data.as_ptr(), self.payload_ptr, data.len());
        }
    }

    /// Copy the stored payload out, resizing `out` to the stored length.
    pub fn read_into(&self, out: &mut Vec<u8>) {
        // A filled slot never stores more than slot_size.
        let len = (self.len() as usize).min(self.slot_size);
        out.resize(len, 0);
        // SAFETY: len is within the slot's payload span, out has exactly len
        // bytes after the resize, and the filled-token the consumer holds
        // excludes the producer from this slot.
        unsafe {
            ptr::copy_nonoverlapping(self.payload_ptr, out.as_mut_ptr(), len);
        }
    }
}
