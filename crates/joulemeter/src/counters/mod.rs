//! Energy counter sources and the registry built from them.
//!
//! A [`Registry`] is an ordered, immutable list of named counters. It is
//! normally produced by [`enumerate`], which probes every counter family the
//! host may have:
//!
//! - CPU power domains through the powercap filesystem ([`rapl`])
//! - NVIDIA GPUs through NVML ([`nvml`], behind the `nvml` feature)
//!
//! A family that is absent is reported in [`Enumeration::families`] and simply
//! contributes no counters. An empty registry is valid: measurements then
//! carry only a duration.

mod error;
#[cfg(feature = "nvml")]
pub mod nvml;
pub mod rapl;
mod scripted;

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use joulemeter_core::{CounterKind, DomainSpec, Snapshot};
use serde::{Deserialize, Serialize};

pub use error::CounterError;
pub use scripted::{ManualCounter, ScriptedCounter};

use crate::config::CounterConfig;

/// Something that reports a cumulative, monotonically increasing energy value.
pub trait CounterSource: Send + Sync + fmt::Debug {
    /// Read the current raw value in the family's native unit.
    fn read(&self) -> Result<u64, CounterError>;
}

/// A named counter in a [`Registry`].
#[derive(Debug)]
pub struct CounterDescriptor {
    spec: DomainSpec,
    source: Box<dyn CounterSource>,
}

impl CounterDescriptor {
    /// Registry-unique domain name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Counter family.
    pub fn kind(&self) -> CounterKind {
        self.spec.kind
    }

    /// Value at which the counter wraps, if known.
    pub fn wrap_modulus(&self) -> Option<u64> {
        self.spec.wrap_modulus
    }

    /// Static description used for delta computation.
    pub fn spec(&self) -> &DomainSpec {
        &self.spec
    }

    /// Read the counter.
    pub fn read(&self) -> Result<u64, CounterError> {
        self.source.read()
    }
}

/// Failure to read one counter of a registry.
#[derive(Debug, thiserror::Error)]
#[error("reading {domain}: {source}")]
pub struct SnapshotError {
    /// Domain that failed.
    pub domain: String,
    /// Underlying error.
    #[source]
    pub source: CounterError,
}

/// Ordered set of counters with unique names.
#[derive(Debug, Default)]
pub struct Registry {
    counters: Vec<CounterDescriptor>,
}

impl Registry {
    /// A registry with no counters (duration-only measurements).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building a registry by hand.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Number of counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether there are no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Iterate over counters in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &CounterDescriptor> {
        self.counters.iter()
    }

    /// Counter named `name`.
    pub fn get(&self, name: &str) -> Option<&CounterDescriptor> {
        self.counters.iter().find(|c| c.name() == name)
    }

    /// Domain descriptions in registry order.
    pub fn specs(&self) -> impl Iterator<Item = &DomainSpec> {
        self.counters.iter().map(|c| &c.spec)
    }

    /// Read every counter once, in order, and stamp the result with `clock()`
    /// taken after the last read.
    ///
    /// # Errors
    ///
    /// Fails on the first counter that cannot be read.
    pub fn snapshot(&self, clock: impl FnOnce() -> Duration) -> Result<Snapshot, SnapshotError> {
        let mut values = Vec::with_capacity(self.counters.len());
        for counter in &self.counters {
            let value = counter.read().map_err(|source| SnapshotError {
                domain: counter.name().to_string(),
                source,
            })?;
            values.push(value);
        }

        let mut snapshot = Snapshot::new(clock());
        for (counter, value) in self.counters.iter().zip(values) {
            snapshot.push(counter.name(), value);
        }
        Ok(snapshot)
    }
}

/// Builder for [`Registry`].
///
/// Duplicate names are disambiguated with a numeric suffix.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    counters: Vec<CounterDescriptor>,
    names: HashSet<String>,
}

impl RegistryBuilder {
    /// Append a counter and return the name it was registered under.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        kind: CounterKind,
        wrap_modulus: Option<u64>,
        source: impl CounterSource + 'static,
    ) -> String {
        let requested = name.into();
        let mut name = requested.clone();
        let mut n = 2;
        while self.names.contains(&name) {
            name = format!("{requested}#{n}");
            n += 1;
        }
        if name != requested {
            tracing::warn!("duplicate domain name {}, registered as {}", requested, name);
        }

        self.names.insert(name.clone());
        self.counters.push(CounterDescriptor {
            spec: DomainSpec::new(name.clone(), kind, wrap_modulus),
            source: Box::new(source),
        });
        name
    }

    /// Chaining form of [`add`](Self::add).
    pub fn counter(
        mut self,
        name: impl Into<String>,
        kind: CounterKind,
        wrap_modulus: Option<u64>,
        source: impl CounterSource + 'static,
    ) -> Self {
        self.add(name, kind, wrap_modulus, source);
        self
    }

    /// Finish building.
    pub fn build(self) -> Registry {
        Registry {
            counters: self.counters,
        }
    }
}

// =============================================================================
// Enumeration
// =============================================================================

/// Hardware counter family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// CPU power domains via powercap.
    Rapl,
    /// NVIDIA GPUs via NVML.
    Nvml,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Rapl => write!(f, "RAPL"),
            Family::Nvml => write!(f, "NVML"),
        }
    }
}

/// Outcome of probing one family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FamilyStatus {
    /// The family contributed `domains` counters.
    Available {
        /// Number of counters registered.
        domains: usize,
    },
    /// Switched off by configuration or build features.
    Disabled {
        /// Why.
        reason: String,
    },
    /// Probed but not usable on this host.
    Unavailable {
        /// Why.
        reason: String,
    },
}

impl FamilyStatus {
    /// Whether the family contributed counters.
    pub fn is_available(&self) -> bool {
        matches!(self, FamilyStatus::Available { .. })
    }
}

/// Probe outcome for one family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyReport {
    /// Family probed.
    pub family: Family,
    /// What happened.
    #[serde(flatten)]
    pub status: FamilyStatus,
}

/// Result of [`enumerate`].
#[derive(Debug)]
pub struct Enumeration {
    /// Counters found, RAPL zones first, then GPUs.
    pub registry: Registry,
    /// Per-family outcome.
    pub families: Vec<FamilyReport>,
}

/// Probe every counter family and build a registry.
///
/// Never fails: absent hardware shows up as an unavailable family.
pub fn enumerate(config: &CounterConfig) -> Enumeration {
    let mut builder = Registry::builder();
    let mut families = Vec::with_capacity(2);

    let rapl = if config.enable_rapl {
        enumerate_rapl(config, &mut builder)
    } else {
        FamilyStatus::Disabled {
            reason: "disabled by configuration".to_string(),
        }
    };
    families.push(FamilyReport {
        family: Family::Rapl,
        status: rapl,
    });

    let nvml = if config.enable_nvml {
        enumerate_nvml(&mut builder)
    } else {
        FamilyStatus::Disabled {
            reason: "disabled by configuration".to_string(),
        }
    };
    families.push(FamilyReport {
        family: Family::Nvml,
        status: nvml,
    });

    let registry = builder.build();
    tracing::info!(counters = registry.len(), "counter enumeration finished");
    Enumeration { registry, families }
}

fn enumerate_rapl(config: &CounterConfig, builder: &mut RegistryBuilder) -> FamilyStatus {
    let zones = rapl::discover(&config.rapl_root);
    if zones.is_empty() {
        return FamilyStatus::Unavailable {
            reason: format!("no powercap zones under {}", config.rapl_root.display()),
        };
    }

    let domains = zones.len();
    for zone in zones {
        let source = zone.source();
        builder.add(zone.name, CounterKind::CpuDomain, zone.wrap_modulus, source);
    }
    FamilyStatus::Available { domains }
}

#[cfg(feature = "nvml")]
fn enumerate_nvml(builder: &mut RegistryBuilder) -> FamilyStatus {
    match nvml::discover() {
        Ok(devices) => {
            let domains = devices.len();
            for device in devices {
                let name = device.name().to_string();
                builder.add(name, CounterKind::Accelerator, None, device);
            }
            FamilyStatus::Available { domains }
        }
        Err(e) => FamilyStatus::Unavailable {
            reason: e.to_string(),
        },
    }
}

#[cfg(not(feature = "nvml"))]
fn enumerate_nvml(_builder: &mut RegistryBuilder) -> FamilyStatus {
    FamilyStatus::Disabled {
        reason: "built without the nvml feature".to_string(),
    }
}
