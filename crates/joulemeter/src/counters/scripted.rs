//! Software counters for tests and hosts without energy hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::error::CounterError;
use super::CounterSource;

/// A counter whose value is set by hand.
///
/// Clones share the same value, so a test can keep one handle and hand the
/// other to a [`Registry`](super::Registry).
#[derive(Debug, Clone)]
pub struct ManualCounter {
    name: String,
    value: Arc<AtomicU64>,
    readable: Arc<AtomicBool>,
}

impl ManualCounter {
    /// New counter named `name` starting at `initial`.
    pub fn new(name: impl Into<String>, initial: u64) -> Self {
        Self {
            name: name.into(),
            value: Arc::new(AtomicU64::new(initial)),
            readable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Add `amount`, wrapping at `u64::MAX`.
    pub fn add(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::SeqCst);
    }

    /// Overwrite the value (e.g. to simulate a hardware wrap).
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Current value, ignoring readability.
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Make subsequent reads fail (`false`) or succeed (`true`).
    pub fn set_readable(&self, readable: bool) {
        self.readable.store(readable, Ordering::SeqCst);
    }
}

impl CounterSource for ManualCounter {
    fn read(&self) -> Result<u64, CounterError> {
        if !self.readable.load(Ordering::SeqCst) {
            return Err(CounterError::Unavailable {
                name: self.name.clone(),
            });
        }
        Ok(self.value())
    }
}

/// A counter replaying a fixed sequence of readings.
///
/// `None` entries produce a read failure. Once the script runs out, the last
/// successful value repeats.
#[derive(Debug)]
pub struct ScriptedCounter {
    name: String,
    script: Mutex<Script>,
}

#[derive(Debug)]
struct Script {
    pending: VecDeque<Option<u64>>,
    last: Option<u64>,
}

impl ScriptedCounter {
    /// Replay `values` in order.
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = u64>) -> Self {
        Self::with_failures(name, values.into_iter().map(Some))
    }

    /// Replay `steps`, failing wherever a step is `None`.
    pub fn with_failures(
        name: impl Into<String>,
        steps: impl IntoIterator<Item = Option<u64>>,
    ) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(Script {
                pending: steps.into_iter().collect(),
                last: None,
            }),
        }
    }
}

impl CounterSource for ScriptedCounter {
    fn read(&self) -> Result<u64, CounterError> {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        let step = match script.pending.pop_front() {
            Some(step) => step,
            None => script.last,
        };
        match step {
            Some(value) => {
                script.last = Some(value);
                Ok(value)
            }
            None => Err(CounterError::Unavailable {
                name: self.name.clone(),
            }),
        }
    }
}
