//! CPU power domains exposed by the Linux powercap interface.
//!
//! The hierarchy looks like this:
//!
//! ```text
//! /sys/class/powercap/intel-rapl/
//! ├── intel-rapl:0/            socket 0 ("package-0")
//! │   ├── name
//! │   ├── energy_uj
//! │   ├── max_energy_range_uj
//! │   ├── intel-rapl:0:0/      sub-domain ("core")
//! │   └── intel-rapl:0:1/      sub-domain ("uncore")
//! └── intel-rapl:1/            socket 1
//! ```
//!
//! Sockets and sub-domains are probed with consecutive indices starting at 0;
//! probing stops at the first missing index. Sub-domain names are suffixed
//! with their socket index (`core-0`), socket names are used as the kernel
//! reports them.

use std::fs;
use std::path::{Path, PathBuf};

use super::error::CounterError;
use super::CounterSource;

/// Default powercap root for Intel RAPL zones.
pub const DEFAULT_RAPL_ROOT: &str = "/sys/class/powercap/intel-rapl";

const ZONE_PREFIX: &str = "intel-rapl";
const ENERGY_FILE: &str = "energy_uj";
const NAME_FILE: &str = "name";
const RANGE_FILE: &str = "max_energy_range_uj";

/// One discovered powercap zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaplZone {
    /// Display name (`package-0`, `core-0`, ...).
    pub name: String,
    /// Zone directory.
    pub dir: PathBuf,
    /// Socket index.
    pub socket: usize,
    /// Sub-domain index within the socket, `None` for the socket itself.
    pub subdomain: Option<usize>,
    /// Value the counter wraps to zero at, if the kernel exposes its range.
    pub wrap_modulus: Option<u64>,
}

impl RaplZone {
    /// Counter source reading this zone's `energy_uj`.
    pub fn source(&self) -> RaplCounter {
        RaplCounter {
            path: self.dir.join(ENERGY_FILE),
        }
    }
}

/// Reads a single `energy_uj` file.
#[derive(Debug, Clone)]
pub struct RaplCounter {
    path: PathBuf,
}

impl RaplCounter {
    /// Counter backed by an arbitrary `energy_uj` path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the counter file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CounterSource for RaplCounter {
    fn read(&self) -> Result<u64, CounterError> {
        read_u64(&self.path)
    }
}

/// Discover every zone under `root`, sockets first, each followed by its sub-domains.
///
/// Returns an empty list when `root` has no `intel-rapl:0` zone. A zone whose
/// `name` file is missing or unreadable is named after its directory.
pub fn discover(root: &Path) -> Vec<RaplZone> {
    let mut zones = Vec::new();

    for socket in 0.. {
        let socket_dir = root.join(format!("{ZONE_PREFIX}:{socket}"));
        if !socket_dir.is_dir() {
            break;
        }

        let name = read_name(&socket_dir);
        zones.push(RaplZone {
            wrap_modulus: read_modulus(&socket_dir),
            dir: socket_dir.clone(),
            name,
            socket,
            subdomain: None,
        });

        for sub in 0.. {
            let sub_dir = socket_dir.join(format!("{ZONE_PREFIX}:{socket}:{sub}"));
            if !sub_dir.is_dir() {
                break;
            }
            let name = format!("{}-{}", read_name(&sub_dir), socket);
            zones.push(RaplZone {
                wrap_modulus: read_modulus(&sub_dir),
                dir: sub_dir,
                name,
                socket,
                subdomain: Some(sub),
            });
        }
    }

    tracing::debug!(root = %root.display(), zones = zones.len(), "probed powercap zones");
    zones
}

fn read_name(dir: &Path) -> String {
    match fs::read_to_string(dir.join(NAME_FILE)) {
        Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => {
            let fallback = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| ZONE_PREFIX.to_string());
            tracing::warn!(zone = %dir.display(), "zone has no readable name, using {}", fallback);
            fallback
        }
    }
}

/// `max_energy_range_uj` is the largest value the counter reports, so it wraps
/// to zero at one past it.
fn read_modulus(dir: &Path) -> Option<u64> {
    match read_u64(&dir.join(RANGE_FILE)) {
        Ok(0) => None,
        Ok(range) => range.checked_add(1),
        Err(e) => {
            tracing::debug!(zone = %dir.display(), error = %e, "no counter range");
            None
        }
    }
}

/// Read a file holding one non-negative integer.
pub(crate) fn read_u64(path: &Path) -> Result<u64, CounterError> {
    let content = fs::read_to_string(path).map_err(|e| CounterError::from_io(path, e))?;
    let trimmed = content.trim();
    trimmed.parse().map_err(|_| CounterError::Parse {
        path: path.to_path_buf(),
        content: trimmed.to_string(),
    })
}
