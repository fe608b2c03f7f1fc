//! The idle/running state machine bracketing one measured interval.
//!
//! A [`Session`] accepts a start snapshot while idle and a stop snapshot while
//! running. Out-of-order calls do not fail: they leave the session untouched
//! and return [`Transition::Ignored`] with the reason, so callers can log the
//! misuse and tests can observe it.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::delta::{compute_delta, DeltaError, EnergyDelta};
use crate::types::{DomainSpec, Snapshot};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No interval is open.
    Idle,
    /// A start snapshot has been taken and no stop snapshot yet.
    Running,
}

/// Reason an operation was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Misuse {
    /// `start()` while already running.
    AlreadyRunning,
    /// `stop()` while idle.
    NotRunning,
    /// `compute()` while the interval is still open.
    StillRunning,
    /// `compute()` before any start/stop pair completed.
    NoCompletedInterval,
}

impl fmt::Display for Misuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Misuse::AlreadyRunning => write!(f, "Already running"),
            Misuse::NotRunning => write!(f, "Not running"),
            Misuse::StillRunning => write!(f, "Still running"),
            Misuse::NoCompletedInterval => write!(f, "No completed interval"),
        }
    }
}

/// Result of a state transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// The transition happened.
    Applied,
    /// The request was out of sequence and had no effect.
    Ignored(Misuse),
}

impl Transition {
    /// Whether the transition happened.
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied)
    }
}

/// Error from [`Session::compute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// There is no completed interval to compute.
    Incomplete(Misuse),
    /// The snapshots did not yield a valid delta.
    Delta(DeltaError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Incomplete(misuse) => write!(f, "nothing to compute: {}", misuse),
            SessionError::Delta(e) => write!(f, "{}", e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Delta(e) => Some(e),
            SessionError::Incomplete(_) => None,
        }
    }
}

impl From<DeltaError> for SessionError {
    fn from(e: DeltaError) -> Self {
        SessionError::Delta(e)
    }
}

/// Start/stop snapshots of one measured interval.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    start: Option<Snapshot>,
    stop: Option<Snapshot>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create an idle session with no snapshots.
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            start: None,
            stop: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether an interval is open.
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Start snapshot, if taken.
    pub fn start_snapshot(&self) -> Option<&Snapshot> {
        self.start.as_ref()
    }

    /// Stop snapshot, if taken.
    pub fn stop_snapshot(&self) -> Option<&Snapshot> {
        self.stop.as_ref()
    }

    /// Check whether [`begin`](Self::begin) would be accepted.
    pub fn can_begin(&self) -> Result<(), Misuse> {
        match self.state {
            SessionState::Idle => Ok(()),
            SessionState::Running => Err(Misuse::AlreadyRunning),
        }
    }

    /// Check whether [`end`](Self::end) would be accepted.
    pub fn can_end(&self) -> Result<(), Misuse> {
        match self.state {
            SessionState::Running => Ok(()),
            SessionState::Idle => Err(Misuse::NotRunning),
        }
    }

    /// Open an interval with `snapshot`.
    ///
    /// Discards the stop snapshot of any previous interval.
    pub fn begin(&mut self, snapshot: Snapshot) -> Transition {
        if let Err(misuse) = self.can_begin() {
            return Transition::Ignored(misuse);
        }
        self.start = Some(snapshot);
        self.stop = None;
        self.state = SessionState::Running;
        Transition::Applied
    }

    /// Close the open interval with `snapshot`.
    pub fn end(&mut self, snapshot: Snapshot) -> Transition {
        if let Err(misuse) = self.can_end() {
            return Transition::Ignored(misuse);
        }
        self.stop = Some(snapshot);
        self.state = SessionState::Idle;
        Transition::Applied
    }

    /// Both snapshots of the last completed interval.
    pub fn completed(&self) -> Result<(&Snapshot, &Snapshot), Misuse> {
        if self.is_running() {
            return Err(Misuse::StillRunning);
        }
        match (&self.start, &self.stop) {
            (Some(start), Some(stop)) => Ok((start, stop)),
            _ => Err(Misuse::NoCompletedInterval),
        }
    }

    /// Energy delta of the last completed interval.
    ///
    /// Pure: calling it repeatedly returns the same delta.
    pub fn compute<'a, I>(&self, domains: I) -> Result<EnergyDelta, SessionError>
    where
        I: IntoIterator<Item = &'a DomainSpec>,
    {
        let (start, stop) = self.completed().map_err(SessionError::Incomplete)?;
        Ok(compute_delta(domains, start, stop)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CounterKind;
    use alloc::vec;
    use core::time::Duration;

    fn snap(ms: u64, pkg: u64) -> Snapshot {
        Snapshot::from_readings(Duration::from_millis(ms), [("package-0", pkg)])
    }

    #[test]
    fn test_stop_before_start_is_ignored() {
        let mut session = Session::new();
        assert_eq!(session.end(snap(1, 10)), Transition::Ignored(Misuse::NotRunning));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.start_snapshot().is_none());
        assert!(session.stop_snapshot().is_none());
    }

    #[test]
    fn test_double_start_keeps_first_snapshot() {
        let mut session = Session::new();
        assert!(session.begin(snap(0, 10)).is_applied());
        assert_eq!(
            session.begin(snap(5, 99)),
            Transition::Ignored(Misuse::AlreadyRunning)
        );
        assert_eq!(session.start_snapshot().unwrap().get("package-0"), Some(10));
    }

    #[test]
    fn test_compute_while_running() {
        let domains = vec![DomainSpec::new("package-0", CounterKind::CpuDomain, None)];
        let mut session = Session::new();
        assert_eq!(
            session.compute(&domains),
            Err(SessionError::Incomplete(Misuse::NoCompletedInterval))
        );

        session.begin(snap(0, 10));
        assert_eq!(
            session.compute(&domains),
            Err(SessionError::Incomplete(Misuse::StillRunning))
        );
    }

    #[test]
    fn test_compute_is_idempotent() {
        let domains = vec![DomainSpec::new("package-0", CounterKind::CpuDomain, None)];
        let mut session = Session::new();
        session.begin(snap(0, 10));
        session.end(snap(40, 75));

        let first = session.compute(&domains).unwrap();
        let second = session.compute(&domains).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.get("package-0"), Some(65));
        assert_eq!(first.duration, Duration::from_millis(40));
    }

    #[test]
    fn test_restart_discards_previous_stop() {
        let mut session = Session::new();
        session.begin(snap(0, 10));
        session.end(snap(10, 20));
        session.begin(snap(20, 30));
        assert!(session.stop_snapshot().is_none());
        assert_eq!(session.completed(), Err(Misuse::StillRunning));
    }
}
