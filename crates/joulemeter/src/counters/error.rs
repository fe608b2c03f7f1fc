//! Counter read errors.

use std::io;
use std::path::PathBuf;

/// Errors that can occur while reading a cumulative energy counter.
#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    /// The counter file exists but the process may not read it.
    #[error("permission denied reading {path} (energy counters are often root-only; try sudo or relax the file mode)")]
    PermissionDenied {
        /// Path that could not be read.
        path: PathBuf,
    },

    /// Any other I/O failure on a counter file.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The counter file held something other than a non-negative integer.
    #[error("unparseable counter value {content:?} in {path}")]
    Parse {
        /// Path of the counter file.
        path: PathBuf,
        /// Trimmed file content.
        content: String,
    },

    /// An accelerator driver query failed.
    #[error("accelerator {device} query failed: {message}")]
    Accelerator {
        /// Device name.
        device: String,
        /// Driver error message.
        message: String,
    },

    /// A counter that is currently not readable (device removed, simulated failure).
    #[error("counter {name} is unavailable")]
    Unavailable {
        /// Domain name.
        name: String,
    },
}

impl CounterError {
    /// Classify an I/O error on `path`.
    pub(crate) fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::PermissionDenied {
            CounterError::PermissionDenied { path }
        } else {
            CounterError::Io { path, source }
        }
    }

    /// Whether this failure stems from missing privileges.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CounterError::PermissionDenied { .. })
    }
}
