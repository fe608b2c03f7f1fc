//! Appending measurement rows to CSV report sinks.
//!
//! A sink is a comma-separated file with the header
//! `Domain,Energy (micro joules),Duration (s)` followed by one line per
//! domain per measured interval. Energies are written in each counter's
//! native unit (microjoules for CPU domains, millijoules for accelerators).
//!
//! Appends to one sink are serialised by an in-process lock keyed on the
//! sink path and an advisory file lock, so header detection and the append
//! itself happen atomically even with concurrent writers.

mod lock;

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;

use joulemeter_core::EnergyDelta;
use serde::{Deserialize, Serialize};

use lock::{lock_exclusive, LockFailure};

/// Header line of every sink.
pub const REPORT_HEADER: &str = "Domain,Energy (micro joules),Duration (s)";

/// Default time to wait for another process holding a sink.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors writing or reading a sink.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// I/O failure on the sink.
    #[error("I/O error on report {path}: {source}")]
    Io {
        /// Sink path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Another writer held the sink lock for too long.
    #[error("timed out after {waited:?} waiting for lock on {path}")]
    LockTimeout {
        /// Sink path.
        path: PathBuf,
        /// Time spent waiting.
        waited: Duration,
    },

    /// A line of an existing sink could not be parsed.
    #[error("{path}:{line}: {message}")]
    Parse {
        /// Sink path.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        message: String,
    },
}

/// One line of a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    /// Domain name.
    pub domain: String,
    /// Energy in the counter's native unit.
    pub energy: u64,
    /// Interval duration in seconds.
    pub duration_s: f64,
}

impl ReportRow {
    /// One row per domain of `delta`, in registry order.
    pub fn from_delta(delta: &EnergyDelta) -> Vec<ReportRow> {
        let duration_s = delta.duration_secs();
        delta
            .iter()
            .map(|e| ReportRow {
                domain: e.name.clone(),
                energy: e.energy,
                duration_s,
            })
            .collect()
    }

    fn to_csv_line(&self) -> String {
        format!("{},{},{}", escape_csv(&self.domain), self.energy, self.duration_s)
    }
}

/// What an append did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Whether the header was written (sink was new or empty).
    pub header_written: bool,
    /// Number of rows written.
    pub rows: usize,
}

/// Appends rows to sinks.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    lock_timeout: Duration,
}

impl Default for ReportWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportWriter {
    /// Writer with the default lock timeout.
    pub fn new() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Set how long to wait for a sink held by another process.
    ///
    /// # Panics
    ///
    /// Panics if `timeout` is zero.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        assert!(!timeout.is_zero(), "lock_timeout must be > 0");
        self.lock_timeout = timeout;
        self
    }

    /// Append `rows` to `sink`, writing the header first if the sink is
    /// absent or empty.
    ///
    /// The parent directory must exist. An empty `rows` slice still creates
    /// the sink and its header.
    pub fn append(&self, rows: &[ReportRow], sink: &Path) -> Result<AppendOutcome, ReportError> {
        let io_err = |source| ReportError::Io {
            path: sink.to_path_buf(),
            source,
        };

        let local = sink_mutex(sink);
        let _local = local.lock().unwrap_or_else(PoisonError::into_inner);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(sink)
            .map_err(io_err)?;

        let _guard = lock_exclusive(&file, self.lock_timeout).map_err(|e| match e {
            LockFailure::Timeout => ReportError::LockTimeout {
                path: sink.to_path_buf(),
                waited: self.lock_timeout,
            },
            LockFailure::Io(source) => io_err(source),
        })?;

        let header_written = file.metadata().map_err(io_err)?.len() == 0;

        let mut writer = BufWriter::new(&file);
        if header_written {
            writeln!(writer, "{}", REPORT_HEADER).map_err(io_err)?;
        }
        for row in rows {
            writeln!(writer, "{}", row.to_csv_line()).map_err(io_err)?;
        }
        writer.flush().map_err(io_err)?;

        tracing::debug!(sink = %sink.display(), rows = rows.len(), header_written, "appended report rows");
        Ok(AppendOutcome {
            header_written,
            rows: rows.len(),
        })
    }
}

/// Read every row of an existing sink.
pub fn read_report(sink: &Path) -> Result<Vec<ReportRow>, ReportError> {
    let content = fs::read_to_string(sink).map_err(|source| ReportError::Io {
        path: sink.to_path_buf(),
        source,
    })?;
    let parse_err = |line: usize, message: String| ReportError::Parse {
        path: sink.to_path_buf(),
        line,
        message,
    };

    let mut rows = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line_num = idx + 1;
        if line.trim().is_empty() || (idx == 0 && line == REPORT_HEADER) {
            continue;
        }
        // Domain may be quoted, energy and duration never are.
        let mut fields = line.rsplitn(3, ',');
        let (Some(duration), Some(energy), Some(domain)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(parse_err(line_num, format!("expected 3 fields in {line:?}")));
        };
        rows.push(ReportRow {
            domain: unescape_csv(domain),
            energy: energy
                .parse()
                .map_err(|_| parse_err(line_num, format!("invalid energy {energy:?}")))?,
            duration_s: duration
                .parse()
                .map_err(|_| parse_err(line_num, format!("invalid duration {duration:?}")))?,
        });
    }
    Ok(rows)
}

/// In-process locks of sinks being appended to. Entries die with the last
/// in-flight append.
static SINKS: OnceLock<Mutex<HashMap<PathBuf, Weak<Mutex<()>>>>> = OnceLock::new();

fn sink_mutex(sink: &Path) -> Arc<Mutex<()>> {
    let key = if sink.is_absolute() {
        sink.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(sink))
            .unwrap_or_else(|_| sink.to_path_buf())
    };

    let mut sinks = SINKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(live) = sinks.get(&key).and_then(Weak::upgrade) {
        return live;
    }
    sinks.retain(|_, lock| lock.strong_count() > 0);
    let fresh = Arc::new(Mutex::new(()));
    sinks.insert(key, Arc::downgrade(&fresh));
    fresh
}

/// Quote a field containing commas, quotes, or newlines.
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn unescape_csv(s: &str) -> String {
    match s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) => inner.replace("\"\"", "\""),
        None => s.to_string(),
    }
}
