//! Counter identities and snapshots.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;
use core::time::Duration;

use serde::{Deserialize, Serialize};

/// Family a counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// A CPU power domain (package, core, uncore, dram, psys).
    CpuDomain,
    /// A discrete accelerator device.
    Accelerator,
}

impl CounterKind {
    /// Unit the hardware reports this family's cumulative energy in.
    ///
    /// Readings are never normalised across families: a report row carries
    /// whatever unit its source produced.
    pub fn unit(self) -> EnergyUnit {
        match self {
            CounterKind::CpuDomain => EnergyUnit::Microjoules,
            CounterKind::Accelerator => EnergyUnit::Millijoules,
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterKind::CpuDomain => write!(f, "cpu"),
            CounterKind::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// Energy unit of a raw counter reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyUnit {
    /// Microjoules (powercap `energy_uj`).
    Microjoules,
    /// Millijoules (NVML total energy consumption).
    Millijoules,
}

impl EnergyUnit {
    /// Short unit symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            EnergyUnit::Microjoules => "uJ",
            EnergyUnit::Millijoules => "mJ",
        }
    }

    /// Convert a raw reading in this unit to joules.
    pub fn to_joules(self, raw: u64) -> f64 {
        match self {
            EnergyUnit::Microjoules => raw as f64 / 1_000_000.0,
            EnergyUnit::Millijoules => raw as f64 / 1_000.0,
        }
    }
}

/// Static description of one counter, as needed for delta computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSpec {
    /// Registry-unique domain name (e.g. `package-0`, `core-0`, `nvidia-gpu-0`).
    pub name: String,
    /// Counter family.
    pub kind: CounterKind,
    /// Value at which the counter wraps back to zero, if it wraps at all.
    pub wrap_modulus: Option<u64>,
}

impl DomainSpec {
    /// Create a domain description.
    pub fn new(name: impl Into<String>, kind: CounterKind, wrap_modulus: Option<u64>) -> Self {
        Self {
            name: name.into(),
            kind,
            wrap_modulus,
        }
    }
}

/// One counter value inside a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Domain name.
    pub name: String,
    /// Cumulative counter value.
    pub value: u64,
}

/// Readings of every counter at (approximately) one instant.
///
/// Counters are read one after another, so a snapshot spans the time needed
/// to read all sources once; `taken_at` is the clock value captured right
/// after the last read. Readings keep registry order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Monotonic timestamp, measured from an arbitrary per-process origin.
    pub taken_at: Duration,
    readings: Vec<Reading>,
}

impl Snapshot {
    /// Create an empty snapshot stamped with `taken_at`.
    pub fn new(taken_at: Duration) -> Self {
        Self {
            taken_at,
            readings: Vec::new(),
        }
    }

    /// Build a snapshot from `(name, value)` pairs.
    pub fn from_readings<'a, I>(taken_at: Duration, readings: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, u64)>,
    {
        let mut snapshot = Self::new(taken_at);
        for (name, value) in readings {
            snapshot.push(name, value);
        }
        snapshot
    }

    /// Append a reading.
    pub fn push(&mut self, name: &str, value: u64) {
        self.readings.push(Reading {
            name: name.to_string(),
            value,
        });
    }

    /// Look up the reading for `name`.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.readings
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.value)
    }

    /// Iterate over readings in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    /// Number of readings.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Whether the snapshot holds no readings (duration-only mode).
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
