//! Wraparound-corrected energy deltas.
//!
//! Hardware energy counters are cumulative and, for most CPU domains, wrap
//! back to zero after `max_energy_range`. A stop reading numerically smaller
//! than the start reading therefore means one of two things:
//!
//! - the counter wrapped, if it has a known wrap modulus, and the true delta
//!   is `(wrap_modulus - start) + stop`;
//! - the counter went backwards, if it does not wrap. This is a read failure
//!   and is reported as an error, never as a negative energy.
//!
//! At most one wrap per interval is assumed. RAPL package counters wrap every
//! few minutes under load, so intervals longer than that undercount.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;
use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{CounterKind, DomainSpec, Snapshot};

/// Which snapshot of a session a reading belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Snapshot taken by `start()`.
    Start,
    /// Snapshot taken by `stop()`.
    Stop,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Start => write!(f, "start"),
            Phase::Stop => write!(f, "stop"),
        }
    }
}

/// Error computing a delta from two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaError {
    /// A registered domain has no reading in one of the snapshots.
    MissingReading {
        /// Domain name.
        domain: String,
        /// Snapshot lacking the reading.
        phase: Phase,
    },

    /// A non-wrapping counter decreased between start and stop.
    CounterWentBackwards {
        /// Domain name.
        domain: String,
        /// Start reading.
        start: u64,
        /// Stop reading.
        stop: u64,
    },

    /// A wrapping counter reported a value at or above its wrap modulus.
    ReadingOutOfRange {
        /// Domain name.
        domain: String,
        /// The offending reading.
        reading: u64,
        /// The counter's wrap modulus.
        wrap_modulus: u64,
    },

    /// The stop snapshot is timestamped before the start snapshot.
    ClockWentBackwards,
}

impl fmt::Display for DeltaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaError::MissingReading { domain, phase } => {
                write!(f, "no {} reading for domain '{}'", phase, domain)
            }
            DeltaError::CounterWentBackwards {
                domain,
                start,
                stop,
            } => write!(
                f,
                "counter '{}' went backwards ({} -> {}) and has no wrap modulus",
                domain, start, stop
            ),
            DeltaError::ReadingOutOfRange {
                domain,
                reading,
                wrap_modulus,
            } => write!(
                f,
                "counter '{}' read {} which is not below its wrap modulus {}",
                domain, reading, wrap_modulus
            ),
            DeltaError::ClockWentBackwards => {
                write!(f, "stop snapshot is older than start snapshot")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DeltaError {}

/// Failure of [`corrected_delta`] before a domain name is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawFault {
    Backwards,
    OutOfRange(u64),
}

fn raw_delta(start: u64, stop: u64, wrap_modulus: Option<u64>) -> Result<(u64, bool), RawFault> {
    if let Some(modulus) = wrap_modulus {
        if let Some(reading) = [start, stop].into_iter().find(|&r| r >= modulus) {
            return Err(RawFault::OutOfRange(reading));
        }
    }
    if stop >= start {
        return Ok((stop - start, false));
    }
    match wrap_modulus {
        // stop < start < modulus, so the sum stays below the modulus.
        Some(modulus) => Ok(((modulus - start) + stop, true)),
        None => Err(RawFault::Backwards),
    }
}

/// Energy consumed by one counter between two readings.
///
/// Returns the corrected delta for a single counter. See the module docs for
/// the wraparound rule.
///
/// # Errors
///
/// - [`DeltaError::CounterWentBackwards`] if `stop < start` without a modulus
/// - [`DeltaError::ReadingOutOfRange`] if either reading is not below the modulus
pub fn corrected_delta(
    domain: &str,
    start: u64,
    stop: u64,
    wrap_modulus: Option<u64>,
) -> Result<u64, DeltaError> {
    raw_delta(start, stop, wrap_modulus)
        .map(|(delta, _)| delta)
        .map_err(|fault| fault_to_error(domain, start, stop, wrap_modulus, fault))
}

fn fault_to_error(
    domain: &str,
    start: u64,
    stop: u64,
    wrap_modulus: Option<u64>,
    fault: RawFault,
) -> DeltaError {
    match fault {
        RawFault::Backwards => DeltaError::CounterWentBackwards {
            domain: domain.to_string(),
            start,
            stop,
        },
        RawFault::OutOfRange(reading) => DeltaError::ReadingOutOfRange {
            domain: domain.to_string(),
            reading,
            wrap_modulus: wrap_modulus.unwrap_or(0),
        },
    }
}

/// Energy consumed by one domain over a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEnergy {
    /// Domain name.
    pub name: String,
    /// Counter family.
    pub kind: CounterKind,
    /// Energy in the counter's native unit.
    pub energy: u64,
    /// Whether the counter wrapped during the interval.
    pub wrapped: bool,
}

/// Per-domain energy and wall-clock duration of one measured interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyDelta {
    /// Time between the start and stop snapshots.
    pub duration: Duration,
    energies: Vec<DomainEnergy>,
}

impl EnergyDelta {
    /// A delta with no energy domains (duration-only measurement).
    pub fn duration_only(duration: Duration) -> Self {
        Self {
            duration,
            energies: Vec::new(),
        }
    }

    /// Energy for `name`, in the counter's native unit.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.energies
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.energy)
    }

    /// Iterate over domains in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &DomainEnergy> {
        self.energies.iter()
    }

    /// Number of domains.
    pub fn len(&self) -> usize {
        self.energies.len()
    }

    /// Whether no energy domains were measured.
    pub fn is_empty(&self) -> bool {
        self.energies.is_empty()
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }
}

/// Compute the energy delta for every domain between two snapshots.
///
/// Domains are emitted in the order `domains` yields them.
///
/// # Errors
///
/// Fails on the first domain with a missing reading or an invalid delta, and
/// if the stop snapshot predates the start snapshot.
pub fn compute_delta<'a, I>(
    domains: I,
    start: &Snapshot,
    stop: &Snapshot,
) -> Result<EnergyDelta, DeltaError>
where
    I: IntoIterator<Item = &'a DomainSpec>,
{
    let duration = stop
        .taken_at
        .checked_sub(start.taken_at)
        .ok_or(DeltaError::ClockWentBackwards)?;

    let mut energies = Vec::new();
    for domain in domains {
        let begin = start.get(&domain.name).ok_or_else(|| DeltaError::MissingReading {
            domain: domain.name.clone(),
            phase: Phase::Start,
        })?;
        let end = stop.get(&domain.name).ok_or_else(|| DeltaError::MissingReading {
            domain: domain.name.clone(),
            phase: Phase::Stop,
        })?;

        let (energy, wrapped) = raw_delta(begin, end, domain.wrap_modulus)
            .map_err(|fault| fault_to_error(&domain.name, begin, end, domain.wrap_modulus, fault))?;

        energies.push(DomainEnergy {
            name: domain.name.clone(),
            kind: domain.kind,
            energy,
            wrapped,
        });
    }

    Ok(EnergyDelta { duration, energies })
}
