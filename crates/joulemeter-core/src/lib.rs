//! Core energy accounting for joulemeter.
//!
//! This crate holds the hardware-independent half of an energy measurement:
//! counter snapshots, wraparound-corrected deltas, the idle/running session
//! state machine, and per-domain aggregation. It is `no_std` compatible and
//! only needs an allocator; reading actual counters is the job of the main
//! `joulemeter` crate.
//!
//! # Features
//!
//! - `std` (default): implement `std::error::Error` for the error types
//!
//! # Usage
//!
//! ```ignore
//! use core::time::Duration;
//! use joulemeter_core::{CounterKind, DomainSpec, Session, Snapshot};
//!
//! let domains = [DomainSpec::new("package-0", CounterKind::CpuDomain, Some(262_143_328_850))];
//!
//! let mut session = Session::new();
//! session.begin(Snapshot::from_readings(Duration::ZERO, [("package-0", 1_000)]));
//! session.end(Snapshot::from_readings(Duration::from_millis(250), [("package-0", 1_500)]));
//!
//! let delta = session.compute(&domains)?;
//! assert_eq!(delta.get("package-0"), Some(500));
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod delta;
pub mod session;
pub mod summary;
pub mod types;

pub use delta::{compute_delta, corrected_delta, DeltaError, DomainEnergy, EnergyDelta, Phase};
pub use session::{Misuse, Session, SessionError, SessionState, Transition};
pub use summary::{summarize, DomainSummary, MeasurementSummary};
pub use types::{CounterKind, DomainSpec, EnergyUnit, Reading, Snapshot};
