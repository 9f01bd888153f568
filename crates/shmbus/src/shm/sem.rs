// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX named-semaphore wrapper.
//!
//! The ring's synchronizers are *named* semaphores (`sem_open`), not
//! anonymous ones, so independent processes can find them by deriving the
//! names from the ring name. The wrapper keeps the raw `sem_t` handle private
//! and exposes exactly the operations the ring protocol needs.
//!
//! # EINTR
//!
//! `wait` restarts transparently when interrupted by signal delivery. A wait
//! that fails for any other reason is surfaced to the caller; short signals
//! must never corrupt the slot protocol, but real errors must not be spun on.

use std::ffi::CString;
use std::io;

/// Handle to a POSIX named semaphore.
///
/// The handle is closed on drop. Removing the *name* from the kernel
/// namespace is the separate, idempotent [`NamedSem::unlink`].
#[derive(Debug)]
pub(crate) struct NamedSem {
    handle: *mut libc::sem_t,
    name: String,
}

// SAFETY: sem_t operations are async-signal-safe and thread-safe; the handle
// may be used from any thread, and all mutation goes through the kernel.
unsafe impl Send for NamedSem {}
unsafe impl Sync for NamedSem {}

impl NamedSem {
    /// Create a semaphore with `O_CREAT | O_EXCL` and the given initial value.
    pub fn create_exclusive(name: &str, initial: u32) -> io::Result<Self> {
        let c_name = CString::new(name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in semaphore name"))?;

        // SAFETY:
        // - c_name is a valid null-terminated CString created above
        // - sem_open is variadic: with O_CREAT the mode and initial value
        //   follow the flags
        // - SEM_FAILED is checked below
        let handle = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                initial,
            )
        };

        if handle == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            handle,
            name: name.to_string(),
        })
    }

    /// Open an existing semaphore. `ENOENT` means the creator has not made it
    /// yet; attach paths treat that as retryable.
    pub fn open(name: &str) -> io::Result<Self> {
        let c_name = CString::new(name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in semaphore name"))?;

        // SAFETY: c_name is a valid null-terminated CString; without O_CREAT
        // no extra arguments are read. SEM_FAILED is checked below.
        let handle = unsafe { libc::sem_open(c_name.as_ptr(), 0) };

        if handle == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            handle,
            name: name.to_string(),
        })
    }

    /// Decrement, blocking until the value is positive.
    ///
    /// Restarts on EINTR; any other failure is returned.
    pub fn wait(&self) -> io::Result<()> {
        loop {
            // SAFETY: self.handle is a live semaphore from a successful
            // sem_open; sem_wait blocks until post or signal.
            let ret = unsafe { libc::sem_wait(self.handle) };
            if ret == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }
    }

    /// Increment, waking one blocked waiter if any.
    pub fn post(&self) -> io::Result<()> {
        // SAFETY: self.handle is a live semaphore from a successful sem_open.
        let ret = unsafe { libc::sem_post(self.handle) };
        if ret == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Current value (`sem_getvalue`). Diagnostic only: the value can change
    /// the instant this returns.
    pub fn value(&self) -> io::Result<i32> {
        let mut value: libc::c_int = 0;
        // SAFETY: self.handle is a live semaphore; value is a plain out
        // parameter on this stack frame.
        let ret = unsafe { libc::sem_getvalue(self.handle, &mut value) };
        if ret == 0 {
            Ok(value)
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Remove a semaphore name from the kernel namespace.
    ///
    /// Idempotent: a name that is already gone is not an error.
    pub fn unlink(name: &str) -> io::Result<()> {
        let c_name = CString::new(name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in semaphore name"))?;

        // SAFETY: c_name is a valid null-terminated CString; sem_unlink only
        // touches the namespace, open handles stay usable.
        let ret = unsafe { libc::sem_unlink(c_name.as_ptr()) };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(err);
            }
        }

        Ok(())
    }

    /// The semaphore name.
    #[allow(dead_code)]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NamedSem {
    fn drop(&mut self) {
        // SAFETY: self.handle is a live semaphore and Drop runs once.
        unsafe {
            libc::sem_close(self.handle);
        }
    }
}
