//! JSON serialization for run results and counter inventories.

use std::path::Path;

use joulemeter_core::{CounterKind, MeasurementSummary};
use serde::Serialize;

use crate::counters::{FamilyReport, Registry};
use crate::harness::{IterationRecord, RunOutput, RunRequest};
use crate::preflight::PreflightResult;

/// Machine-readable view of a finished run.
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    /// What was run.
    pub request: &'a RunRequest,
    /// Sink the rows went to.
    pub sink: &'a Path,
    /// Measured iterations.
    pub succeeded: usize,
    /// Failed iterations.
    pub failed: usize,
    /// Iterations skipped by cancellation.
    pub cancelled: usize,
    /// Aggregate over measured iterations.
    pub summary: MeasurementSummary,
    /// Per-iteration outcomes.
    pub iterations: &'a [IterationRecord],
}

impl<'a> RunReport<'a> {
    /// Build from a request and its output.
    pub fn new(request: &'a RunRequest, output: &'a RunOutput) -> Self {
        Self {
            request,
            sink: &output.sink,
            succeeded: output.succeeded(),
            failed: output.failed(),
            cancelled: output.cancelled(),
            summary: output.summary(),
            iterations: &output.iterations,
        }
    }
}

/// One counter, as listed by `counters`.
#[derive(Debug, Serialize)]
pub struct DomainInfo<'a> {
    /// Domain name.
    pub name: &'a str,
    /// Family.
    pub kind: CounterKind,
    /// Unit symbol of raw readings.
    pub unit: &'static str,
    /// Wrap range, if known.
    pub wrap_modulus: Option<u64>,
}

/// Counters, family outcomes, and preflight findings.
#[derive(Debug, Serialize)]
pub struct CounterInventory<'a> {
    /// Registered counters.
    pub domains: Vec<DomainInfo<'a>>,
    /// Per-family probe outcome.
    pub families: &'a [FamilyReport],
    /// Preflight findings.
    pub preflight: &'a PreflightResult,
}

impl<'a> CounterInventory<'a> {
    /// Collect from a registry.
    pub fn new(
        registry: &'a Registry,
        families: &'a [FamilyReport],
        preflight: &'a PreflightResult,
    ) -> Self {
        let domains = registry
            .iter()
            .map(|c| DomainInfo {
                name: c.name(),
                kind: c.kind(),
                unit: c.kind().unit().symbol(),
                wrap_modulus: c.wrap_modulus(),
            })
            .collect();
        Self {
            domains,
            families,
            preflight,
        }
    }
}

/// Serialize a run report to a compact JSON string.
///
/// # Errors
///
/// Returns an error if serialization fails (should not happen for run reports).
pub fn to_json(report: &RunReport<'_>) -> Result<String, serde_json::Error> {
    serde_json::to_string(report)
}

/// Serialize a run report to a pretty-printed JSON string.
///
/// # Errors
///
/// Returns an error if serialization fails (should not happen for run reports).
pub fn to_json_pretty(report: &RunReport<'_>) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Serialize a counter inventory to pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn counters_to_json(inventory: &CounterInventory<'_>) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{Family, FamilyStatus, ManualCounter};
    use crate::harness::{FailureKind, IterationStatus};
    use joulemeter_core::{compute_delta, DomainSpec, Snapshot};
    use std::path::PathBuf;
    use std::time::Duration;

    fn output() -> RunOutput {
        let domains = [DomainSpec::new("package-0", CounterKind::CpuDomain, None)];
        let delta = compute_delta(
            &domains,
            &Snapshot::from_readings(Duration::ZERO, [("package-0", 10)]),
            &Snapshot::from_readings(Duration::from_millis(500), [("package-0", 35)]),
        )
        .unwrap();
        RunOutput {
            sink: PathBuf::from("/tmp/run.csv"),
            output: String::new(),
            iterations: vec![
                IterationRecord {
                    iteration: 1,
                    status: IterationStatus::Measured { delta },
                },
                IterationRecord {
                    iteration: 2,
                    status: IterationStatus::Failed {
                        kind: FailureKind::Exception,
                        message: "boom".into(),
                    },
                },
            ],
        }
    }

    #[test]
    fn test_run_report_json() {
        let request = RunRequest::new("builtin", "spin").repeat(2);
        let output = output();
        let json = to_json(&RunReport::new(&request, &output)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["succeeded"], 1);
        assert_eq!(value["failed"], 1);
        assert_eq!(value["request"]["module"], "builtin");
        assert_eq!(value["iterations"][0]["status"], "measured");
        assert_eq!(value["iterations"][1]["kind"], "exception");
        assert_eq!(value["summary"]["domains"][0]["total"], 25);
    }

    #[test]
    fn test_counter_inventory_json() {
        let registry = Registry::builder()
            .counter(
                "nvidia-gpu-0",
                CounterKind::Accelerator,
                None,
                ManualCounter::new("nvidia-gpu-0", 0),
            )
            .build();
        let families = [FamilyReport {
            family: Family::Nvml,
            status: FamilyStatus::Available { domains: 1 },
        }];
        let preflight = PreflightResult::new();
        let json = counters_to_json(&CounterInventory::new(&registry, &families, &preflight)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["domains"][0]["unit"], "mJ");
        assert_eq!(value["families"][0]["family"], "nvml");
        assert_eq!(value["families"][0]["status"], "available");
        assert_eq!(value["preflight"]["is_valid"], true);
    }
}
