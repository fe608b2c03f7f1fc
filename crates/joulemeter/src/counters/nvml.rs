//! NVIDIA accelerator energy through NVML.
//!
//! The driver library is loaded once per enumeration. If loading or
//! initialising it fails, accelerator support stays off for the rest of the
//! process: later enumerations report the recorded reason instead of retrying.
//! The library handle is shared by every device counter and shut down when the
//! last counter is dropped.

use std::fmt;
use std::sync::{Arc, OnceLock};

use nvml_wrapper::Nvml;

use super::error::CounterError;
use super::CounterSource;

static INIT_FAILURE: OnceLock<String> = OnceLock::new();

/// Why NVML counters are not available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NvmlUnavailable {
    /// Initialisation failed in this call.
    InitFailed(String),
    /// Initialisation failed earlier in this process.
    PreviouslyFailed(String),
    /// Initialised, but enumerating devices failed.
    DeviceQuery(String),
}

impl fmt::Display for NvmlUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NvmlUnavailable::InitFailed(reason) => write!(f, "NVML initialisation failed: {reason}"),
            NvmlUnavailable::PreviouslyFailed(reason) => {
                write!(f, "NVML disabled after earlier failure: {reason}")
            }
            NvmlUnavailable::DeviceQuery(reason) => write!(f, "NVML device query failed: {reason}"),
        }
    }
}

/// Cumulative energy of one GPU, in millijoules.
pub struct NvmlCounter {
    nvml: Arc<Nvml>,
    index: u32,
    name: String,
}

impl NvmlCounter {
    /// Device index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Domain name (`nvidia-gpu-<index>`).
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for NvmlCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NvmlCounter")
            .field("index", &self.index)
            .field("name", &self.name)
            .finish()
    }
}

impl CounterSource for NvmlCounter {
    fn read(&self) -> Result<u64, CounterError> {
        self.nvml
            .device_by_index(self.index)
            .and_then(|device| device.total_energy_consumption())
            .map_err(|e| CounterError::Accelerator {
                device: self.name.clone(),
                message: e.to_string(),
            })
    }
}

/// Domain name for GPU `index`.
pub fn device_name(index: u32) -> String {
    format!("nvidia-gpu-{index}")
}

/// Initialise NVML and create a counter for every device it reports.
pub fn discover() -> Result<Vec<NvmlCounter>, NvmlUnavailable> {
    if let Some(reason) = INIT_FAILURE.get() {
        return Err(NvmlUnavailable::PreviouslyFailed(reason.clone()));
    }

    let nvml = match Nvml::init() {
        Ok(nvml) => Arc::new(nvml),
        Err(e) => {
            let reason = e.to_string();
            let _ = INIT_FAILURE.set(reason.clone());
            tracing::info!("NVML unavailable, accelerator counters disabled: {}", reason);
            return Err(NvmlUnavailable::InitFailed(reason));
        }
    };

    let count = nvml
        .device_count()
        .map_err(|e| NvmlUnavailable::DeviceQuery(e.to_string()))?;

    let mut counters = Vec::with_capacity(count as usize);
    for index in 0..count {
        if let Err(e) = nvml.device_by_index(index) {
            tracing::warn!(index, "skipping GPU: {}", e);
            continue;
        }
        counters.push(NvmlCounter {
            nvml: Arc::clone(&nvml),
            index,
            name: device_name(index),
        });
    }

    tracing::debug!(devices = counters.len(), "NVML devices enumerated");
    Ok(counters)
}
