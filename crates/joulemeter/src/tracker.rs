//! Measure the energy of one interval.
//!
//! An [`EnergyTracker`] snapshots every counter of a [`Registry`] on
//! [`start`](EnergyTracker::start) and [`stop`](EnergyTracker::stop), and
//! turns the pair into an [`EnergyDelta`]. Calls made in the wrong state are
//! logged and reported as [`Transition::Ignored`] without touching the
//! tracker. A tracker measures one interval at a time and is not shared
//! between threads; create a fresh one per measurement.

use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use joulemeter_core::{
    DeltaError, EnergyDelta, Misuse, Session, SessionError, SessionState, Transition,
};

use crate::counters::{Registry, SnapshotError};
use crate::report::{ReportError, ReportRow, ReportWriter};

/// Errors from an [`EnergyTracker`].
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A counter could not be read while taking a snapshot.
    #[error(transparent)]
    Read(#[from] SnapshotError),

    /// The snapshots did not yield a valid delta.
    #[error("invalid energy delta: {0}")]
    Delta(#[from] DeltaError),

    /// There is no completed interval to save.
    #[error("no completed measurement: {0}")]
    Incomplete(Misuse),

    /// Writing the report failed.
    #[error(transparent)]
    Report(#[from] ReportError),
}

impl From<SessionError> for TrackerError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Incomplete(misuse) => TrackerError::Incomplete(misuse),
            SessionError::Delta(e) => TrackerError::Delta(e),
        }
    }
}

/// Monotonic time since a per-process origin.
pub fn monotonic_now() -> Duration {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    ORIGIN.get_or_init(Instant::now).elapsed()
}

/// Tracks the energy of one start/stop interval.
#[derive(Debug)]
pub struct EnergyTracker {
    registry: Arc<Registry>,
    session: Session,
}

impl EnergyTracker {
    /// Idle tracker over `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            session: Session::new(),
        }
    }

    /// Counters this tracker reads.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Snapshot every counter and open the interval.
    ///
    /// Ignored with a warning if already running.
    ///
    /// # Errors
    ///
    /// Fails if a counter cannot be read; the tracker stays idle.
    pub fn start(&mut self) -> Result<Transition, TrackerError> {
        if let Err(misuse) = self.session.can_begin() {
            tracing::warn!("start ignored: {}", misuse);
            return Ok(Transition::Ignored(misuse));
        }
        let snapshot = self.registry.snapshot(monotonic_now)?;
        Ok(self.session.begin(snapshot))
    }

    /// Snapshot every counter and close the interval.
    ///
    /// Ignored with a warning if not running.
    ///
    /// # Errors
    ///
    /// Fails if a counter cannot be read; the tracker stays running.
    pub fn stop(&mut self) -> Result<Transition, TrackerError> {
        if let Err(misuse) = self.session.can_end() {
            tracing::warn!("stop ignored: {}", misuse);
            return Ok(Transition::Ignored(misuse));
        }
        let snapshot = self.registry.snapshot(monotonic_now)?;
        Ok(self.session.end(snapshot))
    }

    /// Energy delta of the completed interval.
    ///
    /// Returns `Ok(None)` (with a warning) while running or before any
    /// interval completed.
    pub fn compute(&self) -> Result<Option<EnergyDelta>, TrackerError> {
        match self.session.compute(self.registry.specs()) {
            Ok(delta) => Ok(Some(delta)),
            Err(SessionError::Incomplete(misuse)) => {
                tracing::warn!("compute skipped: {}", misuse);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run `f` between `start()` and `stop()` and return its result with the delta.
    ///
    /// # Errors
    ///
    /// Fails if the tracker is already running or a snapshot fails.
    pub fn measure<T>(&mut self, f: impl FnOnce() -> T) -> Result<(T, EnergyDelta), TrackerError> {
        if let Transition::Ignored(misuse) = self.start()? {
            return Err(TrackerError::Incomplete(misuse));
        }
        let value = f();
        self.stop()?;
        let delta = self.session.compute(self.registry.specs())?;
        Ok((value, delta))
    }

    /// Append one row per domain of the completed interval to `sink`.
    ///
    /// Returns the delta that was written.
    pub fn save(&self, writer: &ReportWriter, sink: &Path) -> Result<EnergyDelta, TrackerError> {
        let delta = self.session.compute(self.registry.specs())?;
        writer.append(&ReportRow::from_delta(&delta), sink)?;
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{ManualCounter, ScriptedCounter};
    use joulemeter_core::CounterKind;

    fn registry(pkg: &ManualCounter) -> Arc<Registry> {
        Arc::new(
            Registry::builder()
                .counter("package-0", CounterKind::CpuDomain, None, pkg.clone())
                .build(),
        )
    }

    #[test]
    fn test_start_stop_compute() {
        let pkg = ManualCounter::new("package-0", 1_000);
        let mut tracker = EnergyTracker::new(registry(&pkg));

        assert_eq!(tracker.start().unwrap(), Transition::Applied);
        pkg.add(500);
        assert_eq!(tracker.stop().unwrap(), Transition::Applied);

        let delta = tracker.compute().unwrap().unwrap();
        assert_eq!(delta.get("package-0"), Some(500));
        assert_eq!(tracker.compute().unwrap().unwrap(), delta);
    }

    #[test]
    fn test_misuse_is_reported() {
        let pkg = ManualCounter::new("package-0", 0);
        let mut tracker = EnergyTracker::new(registry(&pkg));

        assert_eq!(
            tracker.stop().unwrap(),
            Transition::Ignored(Misuse::NotRunning)
        );
        assert_eq!(tracker.state(), SessionState::Idle);
        assert!(tracker.compute().unwrap().is_none());

        tracker.start().unwrap();
        assert_eq!(
            tracker.start().unwrap(),
            Transition::Ignored(Misuse::AlreadyRunning)
        );
        assert!(tracker.compute().unwrap().is_none());
    }

    #[test]
    fn test_unreadable_counter_fails_stop() {
        let pkg = ManualCounter::new("package-0", 0);
        let mut tracker = EnergyTracker::new(registry(&pkg));
        tracker.start().unwrap();
        pkg.set_readable(false);

        assert!(matches!(tracker.stop(), Err(TrackerError::Read(_))));
        assert_eq!(tracker.state(), SessionState::Running);
    }

    #[test]
    fn test_backwards_counter_is_an_error() {
        let registry = Arc::new(
            Registry::builder()
                .counter(
                    "nvidia-gpu-0",
                    CounterKind::Accelerator,
                    None,
                    ScriptedCounter::new("nvidia-gpu-0", [500, 300]),
                )
                .build(),
        );
        let mut tracker = EnergyTracker::new(registry);
        tracker.start().unwrap();
        tracker.stop().unwrap();
        assert!(matches!(tracker.compute(), Err(TrackerError::Delta(_))));
    }

    #[test]
    fn test_measure_closure() {
        let pkg = ManualCounter::new("package-0", 0);
        let mut tracker = EnergyTracker::new(registry(&pkg));
        let (value, delta) = tracker.measure(|| {
            pkg.add(42);
            "done"
        })
        .unwrap();
        assert_eq!(value, "done");
        assert_eq!(delta.get("package-0"), Some(42));
    }

    #[test]
    fn test_empty_registry_measures_duration_only() {
        let mut tracker = EnergyTracker::new(Arc::new(Registry::empty()));
        let (_, delta) = tracker
            .measure(|| std::thread::sleep(Duration::from_millis(2)))
            .unwrap();
        assert!(delta.is_empty());
        assert!(delta.duration >= Duration::from_millis(2));
    }

    #[test]
    fn test_save_without_interval() {
        let tmp = tempfile::TempDir::new().unwrap();
        let tracker = EnergyTracker::new(Arc::new(Registry::empty()));
        let err = tracker
            .save(&ReportWriter::new(), &tmp.path().join("x.csv"))
            .unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Incomplete(Misuse::NoCompletedInterval)
        ));
    }
}
