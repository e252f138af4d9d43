//! Memory protection for sensitive data
//!
//! Provides two hardening measures:
//!
//! 1. **Core dump prevention** — Disables core dumps via `setrlimit(RLIMIT_CORE, 0)`
//!    so that a crash never writes seed material to disk.
//!
//! 2. **Memory locking** — Locks a memory region via `mlock()` to prevent the OS
//!    from swapping sensitive data (seeds, keys) to disk.
//!
//! Both are best-effort: failures are logged but don't crash the application,
//! since some environments (containers, unprivileged users) may not permit these
//! operations.
//!
//! # Platform Support
//!
//! - Unix/macOS/Linux: Full support via libc
//! - Windows: Core dump prevention via SetErrorMode (partial), no mlock yet
//! - Other: No-ops with warnings

use std::sync::atomic::{AtomicBool, Ordering};

/// Track whether core dumps have been disabled (call only once)
static CORE_DUMPS_DISABLED: AtomicBool = AtomicBool::new(false);

/// Disable core dumps for the current process.
///
/// This prevents sensitive data (seeds, keys) from being written to disk
/// if the process crashes. Should be called early in application startup,
/// before any keychain is unlocked.
///
/// Returns `true` if core dumps were successfully disabled.
pub fn disable_core_dumps() -> bool {
    if CORE_DUMPS_DISABLED.swap(true, Ordering::SeqCst) {
        return true; // Already disabled
    }

    #[cfg(unix)]
    {
        unix::disable_core_dumps_impl()
    }

    #[cfg(windows)]
    {
        windows::disable_core_dumps_impl()
    }

    #[cfg(not(any(unix, windows)))]
    {
        log::warn!("core dump prevention not supported on this platform");
        false
    }
}

/// Lock a memory region to prevent it from being swapped to disk.
///
/// This is critical for seed material — if the OS swaps a page containing
/// a seed to disk, it could persist in swap space long after the process exits.
///
/// Returns `true` if the memory was successfully locked.
///
/// # Safety
///
/// The caller must ensure that:
/// - `ptr` points to a valid allocation of at least `len` bytes
/// - The locked region is unlocked (via `munlock`) before being freed,
///   or the process exits (which implicitly unlocks all pages)
pub unsafe fn mlock(ptr: *const u8, len: usize) -> bool {
    if len == 0 {
        return true;
    }

    #[cfg(unix)]
    {
        unix::mlock_impl(ptr, len)
    }

    #[cfg(not(unix))]
    {
        let _ = (ptr, len);
        log::warn!("mlock not supported on this platform");
        false
    }
}

/// Unlock a previously locked memory region.
///
/// # Safety
///
/// The caller must ensure `ptr` and `len` match a previous `mlock` call.
pub unsafe fn munlock(ptr: *const u8, len: usize) -> bool {
    if len == 0 {
        return true;
    }

    #[cfg(unix)]
    {
        unix::munlock_impl(ptr, len)
    }

    #[cfg(not(unix))]
    {
        let _ = (ptr, len);
        true
    }
}

/// A wrapper that mlocks its contents on creation and munlocks + zeroizes on drop.
///
/// Used to hold a decrypted seed or private key for the lifetime of a single
/// signing operation — never stored longer than that.
pub struct LockedBuffer {
    data: Vec<u8>,
    locked: bool,
}

impl LockedBuffer {
    /// Create a new zero-filled buffer and lock it in memory.
    pub fn new(len: usize) -> Self {
        let data = vec![0u8; len];
        let locked = if !data.is_empty() {
            unsafe { mlock(data.as_ptr(), data.len()) }
        } else {
            true
        };

        if !locked {
            log::warn!("failed to mlock {} bytes — data may be swappable", len);
        }

        Self { data, locked }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Whether the memory is actually locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Drop for LockedBuffer {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.data.zeroize();

        if self.locked && !self.data.is_empty() {
            unsafe {
                munlock(self.data.as_ptr(), self.data.len());
            }
        }
    }
}

#[cfg(unix)]
mod unix {
    pub fn disable_core_dumps_impl() -> bool {
        // SAFETY: setrlimit with RLIMIT_CORE=0 is a standard POSIX operation
        unsafe {
            let rlim = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            let result = libc::setrlimit(libc::RLIMIT_CORE, &rlim);
            if result != 0 {
                let errno = std::io::Error::last_os_error();
                log::warn!("failed to disable core dumps: {}", errno);
                return false;
            }
        }
        true
    }

    pub unsafe fn mlock_impl(ptr: *const u8, len: usize) -> bool {
        let result = libc::mlock(ptr as *const libc::c_void, len);
        if result != 0 {
            let errno = std::io::Error::last_os_error();
            log::warn!("mlock failed for {} bytes: {}", len, errno);
            return false;
        }
        true
    }

    pub unsafe fn munlock_impl(ptr: *const u8, len: usize) -> bool {
        let result = libc::munlock(ptr as *const libc::c_void, len);
        result == 0
    }
}

#[cfg(windows)]
mod windows {
    pub fn disable_core_dumps_impl() -> bool {
        log::warn!("Windows core dump prevention not yet implemented");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_core_dumps_is_idempotent() {
        let first = disable_core_dumps();
        let second = disable_core_dumps();
        assert_eq!(first, second || second);
        assert!(second);
    }

    #[test]
    fn locked_buffer_holds_written_bytes() {
        let mut buf = LockedBuffer::new(64);
        buf.as_mut_slice()[..5].copy_from_slice(b"hello");
        assert_eq!(&buf.as_slice()[..5], b"hello");
        assert_eq!(buf.as_slice().len(), 64);
    }

    #[test]
    fn locked_buffer_zero_length() {
        let buf = LockedBuffer::new(0);
        assert!(buf.is_locked());
        assert!(buf.as_slice().is_empty());
    }

    #[test]
    fn locked_buffer_zeroizes_on_drop() {
        let mut buf = LockedBuffer::new(32);
        buf.as_mut_slice().fill(0xFF);
        assert!(buf.as_slice().iter().all(|&b| b == 0xFF));
        drop(buf);
        // Can't inspect freed memory; this documents intent and exercises the Drop path.
    }

    #[test]
    fn mlock_munlock_roundtrip_does_not_panic() {
        let data = vec![42u8; 128];
        unsafe {
            mlock(data.as_ptr(), data.len());
            munlock(data.as_ptr(), data.len());
        }
    }
}
