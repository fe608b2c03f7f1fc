//! # joulemeter
//!
//! Measure the energy a piece of work draws from CPU power domains and GPUs.
//!
//! joulemeter reads the cumulative energy counters the hardware already
//! keeps (Linux powercap/RAPL zones for CPU packages, cores, uncore and DRAM;
//! NVML for NVIDIA GPUs), snapshots them around each run of an operation,
//! corrects for counter wraparound, and appends one CSV row per domain per
//! run to a report file.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use joulemeter::{enumerate, EnergyTracker, MeterConfig};
//!
//! let config = MeterConfig::default().with_env_overrides();
//! let registry = Arc::new(enumerate(&config.counters).registry);
//!
//! let mut tracker = EnergyTracker::new(registry);
//! let (_, delta) = tracker.measure(|| expensive_work())?;
//! for domain in delta.iter() {
//!     println!("{}: {} {}", domain.name, domain.energy, domain.kind.unit().symbol());
//! }
//! ```
//!
//! ## Repeated runs
//!
//! The [`Harness`] runs a named operation from an [`OperationRegistry`]
//! several times, measuring each iteration with a fresh tracker and
//! appending every iteration's rows to the same report sink. Failed
//! iterations are reported in the run output and never stop the run.
//!
//! ## Units
//!
//! Rows carry each counter's native unit: microjoules for CPU domains,
//! millijoules for accelerators. See [`CounterKind::unit`].

#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod counters;
pub mod data;
pub mod harness;
pub mod output;
pub mod preflight;
pub mod report;
pub mod tracker;

pub use config::{ConfigError, CounterConfig, HarnessConfig, MeterConfig};
pub use context::{Bindings, MeterContext};
pub use counters::{
    enumerate, CounterError, CounterSource, Enumeration, Family, FamilyReport, FamilyStatus,
    Registry,
};
pub use harness::{
    CancelFlag, Harness, IterationRecord, IterationStatus, OperationError,
    OperationLocator, OperationRegistry, RunOutput, RunRequest, Value,
};
pub use preflight::{run_checks, PreflightResult, PreflightWarning};
pub use report::{ReportError, ReportRow, ReportWriter, REPORT_HEADER};
pub use tracker::{EnergyTracker, TrackerError};

pub use joulemeter_core::{
    CounterKind, DomainEnergy, EnergyDelta, EnergyUnit, MeasurementSummary, Misuse, SessionState,
    Transition,
};
