//! Advisory locking of report sinks across processes.
//!
//! `flock` is taken on the sink's own file descriptor, non-blocking, retried
//! every 10ms until the timeout. The lock is released when the guard drops or
//! the process exits. On non-Unix targets locking is a no-op and only the
//! in-process lock applies.

use std::fs::File;
use std::io;
use std::time::Duration;

/// Held while appending to a sink.
pub(crate) struct SinkLockGuard<'a> {
    #[cfg_attr(not(unix), allow(dead_code))]
    file: &'a File,
}

impl std::fmt::Debug for SinkLockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkLockGuard").field("locked", &true).finish()
    }
}

/// Why the lock was not acquired.
#[derive(Debug)]
pub(crate) enum LockFailure {
    /// Another holder kept the lock past the timeout.
    Timeout,
    /// `flock` failed for another reason.
    Io(io::Error),
}

#[cfg(unix)]
mod imp {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::time::Instant;

    impl Drop for SinkLockGuard<'_> {
        fn drop(&mut self) {
            // SAFETY: the descriptor belongs to a File borrowed for the guard's lifetime.
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }

    pub(crate) fn lock_exclusive(
        file: &File,
        timeout: Duration,
    ) -> Result<SinkLockGuard<'_>, LockFailure> {
        let fd = file.as_raw_fd();
        let start = Instant::now();

        loop {
            // SAFETY: fd is a valid open descriptor for the duration of the call.
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result == 0 {
                return Ok(SinkLockGuard { file });
            }

            let errno = io::Error::last_os_error();
            if errno.kind() != io::ErrorKind::WouldBlock {
                return Err(LockFailure::Io(errno));
            }
            if start.elapsed() >= timeout {
                return Err(LockFailure::Timeout);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::*;

    pub(crate) fn lock_exclusive(
        file: &File,
        _timeout: Duration,
    ) -> Result<SinkLockGuard<'_>, LockFailure> {
        Ok(SinkLockGuard { file })
    }
}

pub(crate) use imp::lock_exclusive;
