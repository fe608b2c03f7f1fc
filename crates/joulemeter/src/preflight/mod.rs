//! Preflight checks run before a measurement.
//!
//! These catch setups that would make every iteration fail or make the
//! numbers less useful than they look:
//!
//! - **Counters**: no counters at all (duration-only mode), or counters that
//!   cannot be read right now (usually permissions)
//! - **Families**: a counter family that was probed but is unavailable
//! - **Wraparound**: counters without a known range, whose wrap cannot be
//!   corrected

use std::fmt;

use joulemeter_core::CounterKind;
use serde::{Deserialize, Serialize};

use crate::counters::{Family, FamilyReport, FamilyStatus, Registry};

/// How much a warning matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Worth knowing.
    Info,
    /// Results may be degraded.
    Warning,
    /// Iterations will fail.
    Critical,
}

/// One preflight finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreflightWarning {
    /// No counters: only durations will be recorded.
    NoCounters,

    /// A counter could not be read.
    UnreadableCounter {
        /// Domain name.
        domain: String,
        /// Read error.
        reason: String,
        /// Whether the cause is missing privileges.
        permission_denied: bool,
    },

    /// A probed family contributed nothing.
    FamilyUnavailable {
        /// Family.
        family: Family,
        /// Why.
        reason: String,
    },

    /// A counter has no known wrap range.
    NoWrapModulus {
        /// Domain name.
        domain: String,
    },
}

impl PreflightWarning {
    /// Severity of this finding.
    pub fn severity(&self) -> Severity {
        match self {
            PreflightWarning::UnreadableCounter { .. } => Severity::Critical,
            PreflightWarning::NoCounters => Severity::Warning,
            PreflightWarning::FamilyUnavailable { .. } | PreflightWarning::NoWrapModulus { .. } => {
                Severity::Info
            }
        }
    }

    /// Whether this finding means iterations cannot produce measurements.
    pub fn is_result_undermining(&self) -> bool {
        self.severity() == Severity::Critical
    }
}

impl fmt::Display for PreflightWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreflightWarning::NoCounters => {
                write!(f, "No energy counters found; only durations will be recorded")
            }
            PreflightWarning::UnreadableCounter {
                domain,
                reason,
                permission_denied,
            } => {
                write!(f, "Counter {} is unreadable: {}", domain, reason)?;
                if *permission_denied {
                    write!(f, " (run with elevated privileges)")?;
                }
                Ok(())
            }
            PreflightWarning::FamilyUnavailable { family, reason } => {
                write!(f, "{} counters unavailable: {}", family, reason)
            }
            PreflightWarning::NoWrapModulus { domain } => write!(
                f,
                "Counter {} has no known range; a wrap during an iteration will fail it",
                domain
            ),
        }
    }
}

/// Result of all preflight checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightResult {
    /// Findings in check order.
    pub warnings: Vec<PreflightWarning>,

    /// Whether any critical warnings were found.
    pub has_critical: bool,

    /// Whether measurements are expected to succeed.
    pub is_valid: bool,
}

impl Default for PreflightResult {
    fn default() -> Self {
        Self::new()
    }
}

impl PreflightResult {
    /// Create a new empty preflight result.
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            has_critical: false,
            is_valid: true,
        }
    }

    /// Add a warning.
    pub fn add_warning(&mut self, warning: PreflightWarning) {
        if warning.is_result_undermining() {
            self.has_critical = true;
            self.is_valid = false;
        }
        self.warnings.push(warning);
    }

    /// Check if there are any warnings.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Check a registry and the family outcomes that produced it.
///
/// Reads every counter once.
pub fn run_checks(registry: &Registry, families: &[FamilyReport]) -> PreflightResult {
    let mut result = PreflightResult::new();

    if registry.is_empty() {
        result.add_warning(PreflightWarning::NoCounters);
    }

    for report in families {
        if let FamilyStatus::Unavailable { reason } = &report.status {
            result.add_warning(PreflightWarning::FamilyUnavailable {
                family: report.family,
                reason: reason.clone(),
            });
        }
    }

    for counter in registry.iter() {
        if let Err(e) = counter.read() {
            result.add_warning(PreflightWarning::UnreadableCounter {
                domain: counter.name().to_string(),
                reason: e.to_string(),
                permission_denied: e.is_permission_denied(),
            });
        }
        if counter.wrap_modulus().is_none() && counter.kind() == CounterKind::CpuDomain {
            result.add_warning(PreflightWarning::NoWrapModulus {
                domain: counter.name().to_string(),
            });
        }
    }

    for warning in &result.warnings {
        match warning.severity() {
            Severity::Critical => tracing::warn!("preflight: {}", warning),
            _ => tracing::debug!("preflight: {}", warning),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::ManualCounter;

    #[test]
    fn test_empty_registry_is_valid_but_warned() {
        let families = [FamilyReport {
            family: Family::Rapl,
            status: FamilyStatus::Unavailable {
                reason: "no zones".into(),
            },
        }];
        let result = run_checks(&Registry::empty(), &families);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(result.warnings[0], PreflightWarning::NoCounters);
    }

    #[test]
    fn test_unreadable_counter_is_critical() {
        let pkg = ManualCounter::new("package-0", 0);
        pkg.set_readable(false);
        let registry = Registry::builder()
            .counter("package-0", CounterKind::CpuDomain, Some(1000), pkg)
            .counter(
                "nvidia-gpu-0",
                CounterKind::Accelerator,
                None,
                ManualCounter::new("nvidia-gpu-0", 0),
            )
            .build();

        let result = run_checks(&registry, &[]);
        assert!(result.has_critical);
        assert!(!result.is_valid);
        assert_eq!(result.warnings.len(), 1);
        assert!(matches!(
            result.warnings[0],
            PreflightWarning::UnreadableCounter {
                permission_denied: false,
                ..
            }
        ));
    }

    #[test]
    fn test_cpu_counter_without_range() {
        let registry = Registry::builder()
            .counter("psys-0", CounterKind::CpuDomain, None, ManualCounter::new("psys-0", 0))
            .build();
        let result = run_checks(&registry, &[]);
        assert!(result.is_valid);
        assert_eq!(
            result.warnings,
            vec![PreflightWarning::NoWrapModulus {
                domain: "psys-0".into()
            }]
        );
    }
}
