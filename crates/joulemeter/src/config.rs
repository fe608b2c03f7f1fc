//! Configuration for counter enumeration and measurement runs.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. [`MeterConfig::default`]
//! 2. an optional JSON file ([`MeterConfig::from_file`])
//! 3. environment variables ([`MeterConfig::with_env_overrides`])

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::counters::rapl::DEFAULT_RAPL_ROOT;

/// Overrides [`CounterConfig::rapl_root`].
pub const ENV_RAPL_ROOT: &str = "JOULEMETER_RAPL_ROOT";
/// Any non-empty value other than `0`/`false` disables NVML.
pub const ENV_DISABLE_NVML: &str = "JOULEMETER_DISABLE_NVML";
/// Overrides [`HarnessConfig::output_dir`].
pub const ENV_OUTPUT_DIR: &str = "JOULEMETER_OUTPUT_DIR";

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("invalid config {path}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A setting is out of range.
    #[error("invalid config {path}: {field} {message}")]
    Invalid {
        /// Config path.
        path: PathBuf,
        /// Offending setting.
        field: &'static str,
        /// What is wrong with it.
        message: &'static str,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Counter enumeration settings.
    pub counters: CounterConfig,
    /// Run settings.
    pub harness: HarnessConfig,
}

impl MeterConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, is not valid JSON, or holds a
    /// setting the harness would reject (a zero `lock_timeout`).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if self.harness.lock_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                field: "harness.lock_timeout",
                message: "must be > 0",
            });
        }
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(root) = lookup(ENV_RAPL_ROOT).filter(|v| !v.is_empty()) {
            self.counters.rapl_root = PathBuf::from(root);
        }
        if let Some(flag) = lookup(ENV_DISABLE_NVML) {
            if is_truthy(&flag) {
                self.counters.enable_nvml = false;
            }
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR).filter(|v| !v.is_empty()) {
            self.harness.output_dir = PathBuf::from(dir);
        }
        self
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "no")
}

/// Which counter families to probe and where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Powercap directory containing `intel-rapl:<socket>` zones.
    ///
    /// Default: `/sys/class/powercap/intel-rapl`.
    pub rapl_root: PathBuf,

    /// Probe CPU power domains. Default: true.
    pub enable_rapl: bool,

    /// Probe NVIDIA GPUs. Default: true (no-op without the `nvml` feature).
    pub enable_nvml: bool,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            rapl_root: PathBuf::from(DEFAULT_RAPL_ROOT),
            enable_rapl: true,
            enable_nvml: true,
        }
    }
}

/// Settings for measurement runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    // =========================================================================
    // Report sinks
    // =========================================================================
    /// Directory for generated sink names. Explicit sink paths are used as
    /// given. Default: the current directory.
    pub output_dir: PathBuf,

    /// How long an append waits for another process holding the sink lock.
    ///
    /// Default: 5 seconds.
    #[serde(with = "millis")]
    pub lock_timeout: Duration,

    // =========================================================================
    // Pacing
    // =========================================================================
    /// Also sleep the interval after the last iteration. Default: false.
    pub trailing_sleep: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            lock_timeout: Duration::from_secs(5),
            trailing_sleep: false,
        }
    }
}

/// Durations as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = MeterConfig::default();
        assert_eq!(config.counters.rapl_root, Path::new(DEFAULT_RAPL_ROOT));
        assert!(config.counters.enable_nvml);
        assert!(!config.harness.trailing_sleep);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"harness": {{"trailing_sleep": true, "lock_timeout": 250}}}}"#
        )
        .unwrap();

        let config = MeterConfig::from_file(file.path()).unwrap();
        assert!(config.harness.trailing_sleep);
        assert_eq!(config.harness.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.counters, CounterConfig::default());
    }

    #[test]
    fn test_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        assert!(matches!(
            MeterConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_zero_lock_timeout_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"harness": {{"lock_timeout": 0}}}}"#).unwrap();

        let err = MeterConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "harness.lock_timeout", .. }
        ));
        assert!(err.to_string().contains("must be > 0"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_RAPL_ROOT, "/tmp/fake-rapl"),
            (ENV_DISABLE_NVML, "1"),
            (ENV_OUTPUT_DIR, "reports"),
        ]
        .into_iter()
        .collect();

        let config =
            MeterConfig::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.counters.rapl_root, Path::new("/tmp/fake-rapl"));
        assert!(!config.counters.enable_nvml);
        assert_eq!(config.harness.output_dir, Path::new("reports"));

        let config = MeterConfig::default()
            .with_overrides(|k| (k == ENV_DISABLE_NVML).then(|| "false".to_string()));
        assert!(config.counters.enable_nvml);
    }
}
