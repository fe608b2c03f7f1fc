//! Per-domain aggregation across repeated measurements.

use alloc::string::String;
use alloc::vec::Vec;
use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::delta::EnergyDelta;
use crate::types::CounterKind;

/// Aggregate energy of one domain over several intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSummary {
    /// Domain name.
    pub name: String,
    /// Counter family (determines the unit).
    pub kind: CounterKind,
    /// Number of intervals that measured this domain.
    pub samples: usize,
    /// Sum of energies, saturating.
    pub total: u64,
    /// Mean energy per interval.
    pub mean: f64,
    /// Smallest energy observed.
    pub min: u64,
    /// Largest energy observed.
    pub max: u64,
}

/// Aggregate of a set of energy deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSummary {
    /// Number of deltas aggregated.
    pub intervals: usize,
    /// Mean interval duration.
    pub mean_duration: Duration,
    /// Shortest interval.
    pub min_duration: Duration,
    /// Longest interval.
    pub max_duration: Duration,
    /// Per-domain aggregates, in order of first appearance.
    pub domains: Vec<DomainSummary>,
}

impl MeasurementSummary {
    /// Aggregate for `name`.
    pub fn domain(&self, name: &str) -> Option<&DomainSummary> {
        self.domains.iter().find(|d| d.name == name)
    }
}

/// Aggregate a sequence of deltas.
pub fn summarize<'a, I>(deltas: I) -> MeasurementSummary
where
    I: IntoIterator<Item = &'a EnergyDelta>,
{
    let mut summary = MeasurementSummary::default();
    let mut total_duration = Duration::ZERO;

    for delta in deltas {
        if summary.intervals == 0 {
            summary.min_duration = delta.duration;
            summary.max_duration = delta.duration;
        } else {
            summary.min_duration = summary.min_duration.min(delta.duration);
            summary.max_duration = summary.max_duration.max(delta.duration);
        }
        summary.intervals += 1;
        total_duration = total_duration.saturating_add(delta.duration);

        for energy in delta.iter() {
            match summary.domains.iter_mut().find(|d| d.name == energy.name) {
                Some(domain) => {
                    domain.samples += 1;
                    domain.total = domain.total.saturating_add(energy.energy);
                    domain.min = domain.min.min(energy.energy);
                    domain.max = domain.max.max(energy.energy);
                }
                None => summary.domains.push(DomainSummary {
                    name: energy.name.clone(),
                    kind: energy.kind,
                    samples: 1,
                    total: energy.energy,
                    mean: 0.0,
                    min: energy.energy,
                    max: energy.energy,
                }),
            }
        }
    }

    if summary.intervals > 0 {
        summary.mean_duration = total_duration / summary.intervals as u32;
    }
    for domain in &mut summary.domains {
        domain.mean = domain.total as f64 / domain.samples as f64;
    }

    summary
}
