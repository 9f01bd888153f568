// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX shared-memory region management.
//!
//! Safe wrappers around `shm_open`, `ftruncate`, and `mmap` for the two ways
//! a ring participant obtains its mapping:
//!
//! 1. The owner creates the region with [`ShmRegion::create`] (exclusive; an
//!    existing name is an error, never silently replaced).
//! 2. Attachers open it with [`ShmRegion::open`], which sizes the mapping
//!    from the kernel's view of the region so the caller can adopt the
//!    layout stored in the header.
//!
//! The mapping is unmapped on drop. Unlinking the name is a separate,
//! owner-only step ([`ShmRegion::unlink`]).

use super::{Result, RingError};
use std::ffi::CString;
use std::io;
use std::ptr;

/// A mapped POSIX shared-memory region.
///
/// Automatically unmapped on drop; never unlinked implicitly.
#[derive(Debug)]
pub struct ShmRegion {
    /// Pointer to the mapped memory
    ptr: *mut u8,
    /// Size of the mapping
    size: usize,
    /// Region name (for diagnostics and unlink)
    name: String,
}

// SAFETY: the pointer targets shared memory designed for cross-process use;
// all concurrent access is mediated by the ring's semaphore protocol.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Create a new region of exactly `size` bytes, zero-initialized.
    ///
    /// Fails with [`RingError::RegionOpen`] if the name already exists: the
    /// caller is claiming ownership, and a leftover region under the same
    /// name is a conflict to surface, not to paper over.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;

        let c_name = CString::new(name).map_err(|_| RingError::InvalidName(name.to_string()))?;

        // SAFETY:
        // - c_name is a valid null-terminated CString created above
        // - O_CREAT|O_RDWR|O_EXCL creates a new region or fails if one exists
        // - 0o600 is a valid permission mask
        // - shm_open returns a valid fd on success or -1 on error (checked below)
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };

        if fd < 0 {
            return Err(RingError::RegionOpen(io::Error::last_os_error()));
        }

        // SAFETY:
        // - fd is a valid descriptor from the successful shm_open above
        // - ftruncate fails gracefully if size exceeds system limits
        let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is still valid; close once on the error path.
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(RingError::RegionOpen(err));
        }

        let ptr = Self::map(fd, size);

        // SAFETY: fd is valid; the mapping (if any) holds its own reference,
        // so closing is safe regardless of mmap's outcome.
        unsafe { libc::close(fd) };

        let Some(ptr) = ptr else {
            let err = io::Error::last_os_error();
            // SAFETY: c_name is valid; unlink the name we just created so a
            // failed create leaves nothing behind.
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(RingError::RegionOpen(err));
        };

        // SAFETY:
        // - ptr points to exactly `size` writable bytes from the successful mmap
        // - no other process can hold a reference yet (name was created O_EXCL)
        unsafe {
            ptr::write_bytes(ptr, 0, size);
        }

        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
        })
    }

    /// Open an existing region, mapping however many bytes the kernel says
    /// it holds.
    ///
    /// Requires the region to be at least `min_size` bytes (callers pass the
    /// header size so the layout can be read before the full total is known).
    pub fn open(name: &str, min_size: usize) -> Result<Self> {
        Self::validate_name(name)?;

        let c_name = CString::new(name).map_err(|_| RingError::InvalidName(name.to_string()))?;

        // SAFETY:
        // - c_name is a valid null-terminated CString created above
        // - O_RDWR without O_CREAT opens an existing region only
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };

        if fd < 0 {
            return Err(RingError::RegionOpen(io::Error::last_os_error()));
        }

        // SAFETY: st is a plain-old-data out parameter; fstat fills it or
        // fails, and fd is valid from the successful shm_open above.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::fstat(fd, &mut st) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd valid, closed once on the error path.
            unsafe { libc::close(fd) };
            return Err(RingError::RegionOpen(err));
        }

        let size = st.st_size as usize;
        if size < min_size {
            // SAFETY: fd valid, closed once on the error path.
            unsafe { libc::close(fd) };
            return Err(RingError::RegionTooSmall {
                actual: size,
                required: min_size,
            });
        }

        let ptr = Self::map(fd, size);

        // SAFETY: fd is valid; the mapping keeps its own reference.
        unsafe { libc::close(fd) };

        let Some(ptr) = ptr else {
            return Err(RingError::RegionOpen(io::Error::last_os_error()));
        };

        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
        })
    }

    /// Map `size` bytes of `fd` shared read/write. Returns `None` on failure
    /// with the OS error left in errno.
    fn map(fd: libc::c_int, size: usize) -> Option<*mut u8> {
        // SAFETY:
        // - null first argument lets the kernel pick the address
        // - PROT_READ|PROT_WRITE with MAP_SHARED is the standard shared mapping
        // - fd is valid per both callers; offset 0 maps from the start
        // - MAP_FAILED is checked below
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            None
        } else {
            Some(ptr.cast::<u8>())
        }
    }

    /// Check the namespace rules for a region name.
    ///
    /// Must start with `/` and fit the kernel's name length cap. Embedded
    /// slashes are left to the kernel to accept or reject; the semaphore
    /// names derived from the ring name flatten them regardless.
    pub(crate) fn validate_name(name: &str) -> Result<()> {
        if !name.starts_with('/') || name.len() < 2 {
            return Err(RingError::InvalidName(format!(
                "region name must start with '/' and not be empty: {name:?}"
            )));
        }
        if name.len() > 255 {
            return Err(RingError::InvalidName(format!(
                "region name too long (max 255): {name}"
            )));
        }
        Ok(())
    }

    /// Unlink (delete) a region by name.
    ///
    /// Idempotent: a name that is already gone is not an error. The memory
    /// itself lives on until the last process unmaps it.
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = CString::new(name).map_err(|_| RingError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid null-terminated CString; shm_unlink only
        // touches the filesystem namespace.
        let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(RingError::RegionOpen(err));
            }
        }

        Ok(())
    }

    /// Check whether a region with the given name currently exists.
    #[must_use]
    pub fn exists(name: &str) -> bool {
        let Ok(c_name) = CString::new(name) else {
            return false;
        };

        // SAFETY: c_name is a valid null-terminated CString; O_RDONLY probes
        // without creating.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };

        if fd >= 0 {
            // SAFETY: fd valid, closed once, never reused.
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    }

    /// Raw pointer to the mapped memory.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Size of the mapping.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The region name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        // SAFETY:
        // - self.ptr and self.size came from a successful mmap in create/open
        // - Drop runs once, so the region is not yet unmapped
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.size);
        }
        // The name is not unlinked here; that is the owner's explicit call.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unique_name() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        static SEQ: AtomicU32 = AtomicU32::new(0);
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        format!("/shmbus_seg_test_{ts}_{seq}")
    }

    #[test]
    fn test_validate_name() {
        assert!(ShmRegion::validate_name("/foo").is_ok());
        assert!(ShmRegion::validate_name("/shmbus_demo_123").is_ok());
        assert!(ShmRegion::validate_name("foo").is_err());
        assert!(ShmRegion::validate_name("/").is_err());
        let long = format!("/{}", "x".repeat(300));
        assert!(ShmRegion::validate_name(&long).is_err());
    }

    #[test]
    fn test_create_and_open() {
        let name = unique_name();
        let size = 4096;

        let region = ShmRegion::create(&name, size).expect("create failed");
        assert_eq!(region.size(), size);
        assert_eq!(region.name(), name);

        // SAFETY: region was just created with 4096 bytes; offsets 0 and 1
        // are in bounds.
        unsafe {
            *region.as_ptr() = 0x42;
            *region.as_ptr().add(1) = 0x43;
        }

        let peer = ShmRegion::open(&name, size).expect("open failed");
        assert_eq!(peer.size(), size);

        // SAFETY: peer maps the same region; the bytes were written above.
        unsafe {
            assert_eq!(*peer.as_ptr(), 0x42);
            assert_eq!(*peer.as_ptr().add(1), 0x43);
        }

        drop(region);
        drop(peer);
        ShmRegion::unlink(&name).ok();
    }

    #[test]
    fn test_create_is_zeroed() {
        let name = unique_name();
        let region = ShmRegion::create(&name, 128).expect("create failed");

        // SAFETY: region holds 128 freshly created bytes.
        let all_zero = unsafe { (0..128).all(|i| *region.as_ptr().add(i) == 0) };
        assert!(all_zero);

        ShmRegion::unlink(&name).ok();
    }

    #[test]
    fn test_create_exclusive_conflict() {
        let name = unique_name();
        let _first = ShmRegion::create(&name, 4096).expect("create failed");

        let second = ShmRegion::create(&name, 4096);
        match second {
            Err(RingError::RegionOpen(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::AlreadyExists);
            }
            other => panic!("expected RegionOpen(AlreadyExists), got {other:?}"),
        }

        ShmRegion::unlink(&name).ok();
    }

    #[test]
    fn test_open_nonexistent() {
        let result = ShmRegion::open("/shmbus_seg_missing_424242", 48);
        match result {
            Err(RingError::RegionOpen(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected RegionOpen(NotFound), got {other:?}"),
        }
    }

    #[test]
    fn test_open_too_small() {
        let name = unique_name();
        let _region = ShmRegion::create(&name, 16).expect("create failed");

        let result = ShmRegion::open(&name, 48);
        assert!(matches!(
            result,
            Err(RingError::RegionTooSmall {
                actual: 16,
                required: 48
            })
        ));

        ShmRegion::unlink(&name).ok();
    }

    #[test]
    fn test_exists() {
        let name = unique_name();
        assert!(!ShmRegion::exists(&name));

        let _region = ShmRegion::create(&name, 4096).expect("create failed");
        assert!(ShmRegion::exists(&name));

        ShmRegion::unlink(&name).ok();
        assert!(!ShmRegion::exists(&name));
    }

    #[test]
    fn test_unlink_idempotent() {
        let name = unique_name();
        let _region = ShmRegion::create(&name, 4096).expect("create failed");

        assert!(ShmRegion::unlink(&name).is_ok());
        assert!(ShmRegion::unlink(&name).is_ok());
    }
}
