//! Repeatedly run an operation and record the energy of each iteration.
//!
//! A run resolves its report sink once, then for every iteration:
//!
//! 1. locates the operation and checks argument names against its parameters
//! 2. coerces the textual arguments ([`args`])
//! 3. brackets the invocation with a fresh [`EnergyTracker`]
//! 4. appends the iteration's rows to the sink
//! 5. sleeps the configured interval before the next iteration
//!
//! A failing iteration never aborts the run. Its failure is rendered into the
//! run output behind one of two markers at the start of a line:
//! [`SYNTAX_ERROR_MARKER`] when the invocation itself is malformed, and
//! [`EXCEPTION_MARKER`] for everything else.

pub mod args;
pub mod operation;

pub use args::{coerce, coerce_all, Arguments, Value};
pub use operation::{
    FnOperation, LocateError, Operation, OperationError, OperationLocator, OperationRegistry,
};

use std::any::Any;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use joulemeter_core::{summarize, EnergyDelta, MeasurementSummary};
use serde::Serialize;

use crate::config::HarnessConfig;
use crate::context::Bindings;
use crate::counters::Registry;
use crate::report::ReportWriter;
use crate::tracker::EnergyTracker;

/// Marks a malformed invocation in run output.
pub const SYNTAX_ERROR_MARKER: &str = "Syntax Error:";
/// Marks any other iteration failure in run output.
pub const EXCEPTION_MARKER: &str = "Exception occurred:";
/// Prefix of the last line of run output.
pub const TRAILER_PREFIX: &str = "Wrote measurement to ";

/// Granularity of cancellation checks while sleeping.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

type ProgressCallback = Box<dyn Fn(&ProgressEvent<'_>) + Send + Sync>;

// =============================================================================
// Requests and results
// =============================================================================

/// What to run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRequest {
    /// Module name.
    pub module: String,
    /// Operation name.
    pub operation: String,
    /// Raw `(name, value)` arguments.
    pub arguments: Vec<(String, String)>,
    /// Number of iterations.
    pub repeat_count: usize,
    /// Pause between iterations.
    pub interval: Duration,
    /// Explicit sink path; generated when `None`.
    pub sink: Option<PathBuf>,
}

impl RunRequest {
    /// One iteration of `module.operation`, no arguments, no pause.
    pub fn new(module: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            operation: operation.into(),
            arguments: Vec::new(),
            repeat_count: 1,
            interval: Duration::ZERO,
            sink: None,
        }
    }

    /// Add an argument.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.push((name.into(), value.into()));
        self
    }

    /// Set the iteration count.
    pub fn repeat(mut self, count: usize) -> Self {
        self.repeat_count = count;
        self
    }

    /// Set the pause between iterations.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Write to `path` instead of a generated sink.
    pub fn sink(mut self, path: impl Into<PathBuf>) -> Self {
        self.sink = Some(path.into());
        self
    }

    fn invocation(&self) -> String {
        let args: Vec<String> = self
            .arguments
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .collect();
        format!("{}.{}({})", self.module, self.operation, args.join(", "))
    }
}

/// Category of an iteration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The invocation was malformed.
    Syntax,
    /// Anything else: lookup, counters, the operation, the sink.
    Exception,
}

/// Outcome of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IterationStatus {
    /// Measured and written.
    Measured {
        /// The measurement.
        delta: EnergyDelta,
    },
    /// Failed; nothing was written.
    Failed {
        /// Category.
        kind: FailureKind,
        /// Rendered message.
        message: String,
    },
    /// Not run because the run was cancelled.
    Cancelled,
}

/// One iteration of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    /// 1-based iteration number.
    pub iteration: usize,
    /// What happened.
    #[serde(flatten)]
    pub status: IterationStatus,
}

impl IterationRecord {
    /// The measurement, if the iteration succeeded.
    pub fn delta(&self) -> Option<&EnergyDelta> {
        match &self.status {
            IterationStatus::Measured { delta } => Some(delta),
            _ => None,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    /// Sink the rows went to.
    pub sink: PathBuf,
    /// Text written by the operation and failure reports.
    pub output: String,
    /// One record per requested iteration, in order.
    pub iterations: Vec<IterationRecord>,
}

impl RunOutput {
    /// Captured output followed by the `Wrote measurement to <sink>` line.
    pub fn text(&self) -> String {
        format!("{}{}{}", self.output, TRAILER_PREFIX, self.sink.display())
    }

    /// Number of measured iterations.
    pub fn succeeded(&self) -> usize {
        self.iterations.iter().filter(|r| r.delta().is_some()).count()
    }

    /// Number of failed iterations.
    pub fn failed(&self) -> usize {
        self.iterations
            .iter()
            .filter(|r| matches!(r.status, IterationStatus::Failed { .. }))
            .count()
    }

    /// Number of iterations skipped by cancellation.
    pub fn cancelled(&self) -> usize {
        self.iterations
            .iter()
            .filter(|r| r.status == IterationStatus::Cancelled)
            .count()
    }

    /// Measurements of successful iterations, in order.
    pub fn deltas(&self) -> impl Iterator<Item = &EnergyDelta> {
        self.iterations.iter().filter_map(IterationRecord::delta)
    }

    /// Per-domain aggregate over successful iterations.
    pub fn summary(&self) -> MeasurementSummary {
        summarize(self.deltas())
    }
}

/// Count failure markers in run output.
pub fn count_failures(text: &str) -> usize {
    text.lines()
        .filter(|l| l.starts_with(SYNTAX_ERROR_MARKER) || l.starts_with(EXCEPTION_MARKER))
        .count()
}

/// Reported after each iteration.
#[derive(Debug)]
pub struct ProgressEvent<'a> {
    /// Iterations finished so far.
    pub completed: usize,
    /// Iterations requested.
    pub total: usize,
    /// The iteration just finished.
    pub record: &'a IterationRecord,
}

/// Shared flag to stop a run between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// New, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Runs operations under energy measurement.
pub struct Harness {
    registry: Arc<Registry>,
    locator: Arc<dyn OperationLocator>,
    writer: ReportWriter,
    config: HarnessConfig,
    cancel: CancelFlag,
    progress_callback: Option<ProgressCallback>,
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("counters", &self.registry.len())
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Harness {
    /// Harness over `registry`, resolving operations through `locator`.
    pub fn new(registry: Arc<Registry>, locator: Arc<dyn OperationLocator>) -> Self {
        let config = HarnessConfig::default();
        Self {
            registry,
            locator,
            writer: ReportWriter::new().lock_timeout(config.lock_timeout),
            config,
            cancel: CancelFlag::new(),
            progress_callback: None,
        }
    }

    /// Replace all settings.
    ///
    /// # Panics
    ///
    /// Panics if `config.lock_timeout` is zero.
    pub fn config(mut self, config: HarnessConfig) -> Self {
        self.writer = ReportWriter::new().lock_timeout(config.lock_timeout);
        self.config = config;
        self
    }

    /// Directory for generated sink names.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    /// Also sleep after the last iteration.
    pub fn trailing_sleep(mut self, enabled: bool) -> Self {
        self.config.trailing_sleep = enabled;
        self
    }

    /// How long an append waits for a sink locked by another process.
    ///
    /// # Panics
    ///
    /// Panics if `timeout` is zero.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.writer = ReportWriter::new().lock_timeout(timeout);
        self.config.lock_timeout = timeout;
        self
    }

    /// Use `flag` to cancel runs from another thread.
    pub fn cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// Set progress callback, called after every iteration.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProgressEvent<'_>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Handle to cancel this harness's runs.
    pub fn canceller(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Counters read by every iteration.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current settings.
    pub fn settings(&self) -> &HarnessConfig {
        &self.config
    }

    /// Sink a request will write to.
    pub fn resolve_sink(&self, request: &RunRequest) -> PathBuf {
        match &request.sink {
            Some(path) => path.clone(),
            None => {
                let stamp = chrono::Local::now().format("%Y-%m-%dT%H-%M-%S%.6f");
                self.config.output_dir.join(format!(
                    "{}-{}-{}.csv",
                    request.module, request.operation, stamp
                ))
            }
        }
    }

    /// Run `request` on the calling thread.
    ///
    /// Never fails as a whole: a malformed request, an unusable sink or a
    /// failing operation is recorded per iteration in the output.
    pub fn run(&self, request: &RunRequest, bindings: &Bindings) -> RunOutput {
        let sink = self.resolve_sink(request);
        if let Err(e) = ensure_parent(&sink) {
            // The save step of every iteration reports the unusable sink.
            tracing::warn!(sink = %sink.display(), "cannot create report directory: {}", e);
        }

        let total = request.repeat_count;
        tracing::info!(
            invocation = %request.invocation(),
            repeat = total,
            sink = %sink.display(),
            "starting run"
        );

        let mut out = String::new();
        let mut iterations = Vec::with_capacity(total);

        for index in 0..total {
            let iteration = index + 1;
            let status = if self.cancel.is_cancelled() {
                IterationStatus::Cancelled
            } else {
                self.run_iteration(request, bindings, &sink, &mut out)
            };

            match &status {
                IterationStatus::Measured { delta } => {
                    tracing::debug!(iteration, domains = delta.len(), "iteration measured");
                }
                IterationStatus::Failed { kind, message } => {
                    tracing::error!(iteration, "iteration failed: {}", message);
                    render_failure(&mut out, *kind, message, iteration, total, request);
                }
                IterationStatus::Cancelled => {
                    if iterations
                        .last()
                        .map_or(true, |r: &IterationRecord| r.status != IterationStatus::Cancelled)
                    {
                        tracing::warn!(iteration, "run cancelled");
                        let _ = writeln!(out, "Run cancelled before iteration {iteration}/{total}");
                    }
                }
            }

            let skipped = status == IterationStatus::Cancelled;
            iterations.push(IterationRecord { iteration, status });
            if let (Some(callback), Some(record)) = (&self.progress_callback, iterations.last()) {
                callback(&ProgressEvent {
                    completed: iteration,
                    total,
                    record,
                });
            }

            let last = iteration == total;
            if !skipped && !request.interval.is_zero() && (!last || self.config.trailing_sleep) {
                self.pause(request.interval);
            }
        }

        let output = RunOutput {
            sink,
            output: out,
            iterations,
        };
        tracing::info!(
            succeeded = output.succeeded(),
            failed = output.failed(),
            cancelled = output.cancelled(),
            "run finished"
        );
        output
    }

    /// Run `request` on a new thread.
    pub fn spawn(self: Arc<Self>, request: RunRequest, bindings: Bindings) -> JoinHandle<RunOutput> {
        thread::spawn(move || self.run(&request, &bindings))
    }

    fn run_iteration(
        &self,
        request: &RunRequest,
        bindings: &Bindings,
        sink: &Path,
        out: &mut String,
    ) -> IterationStatus {
        let exception = |message: String| IterationStatus::Failed {
            kind: FailureKind::Exception,
            message,
        };

        if request.module.is_empty() || request.operation.is_empty() {
            return IterationStatus::Failed {
                kind: FailureKind::Syntax,
                message: format!(
                    "invalid target '{}.{}': module and operation must be non-empty",
                    request.module, request.operation
                ),
            };
        }

        let operation = match self.locator.locate(&request.module, &request.operation) {
            Ok(op) => op,
            Err(e) => return exception(e.to_string()),
        };

        if let Some((name, _)) = request
            .arguments
            .iter()
            .find(|(name, _)| !operation.params().iter().any(|p| p == name))
        {
            return IterationStatus::Failed {
                kind: FailureKind::Syntax,
                message: format!(
                    "{}.{}() got an unexpected argument '{}'",
                    request.module, request.operation, name
                ),
            };
        }

        let args = coerce_all(&request.arguments, bindings);
        let mut tracker = EnergyTracker::new(Arc::clone(&self.registry));

        if let Err(e) = tracker.start() {
            return exception(e.to_string());
        }
        let result = catch_unwind(AssertUnwindSafe(|| operation.invoke(&args, out)));
        if let Err(e) = tracker.stop() {
            return exception(e.to_string());
        }

        match result {
            Ok(Ok(_value)) => {}
            Ok(Err(e)) => return exception(e.to_string()),
            Err(payload) => {
                return exception(format!("operation panicked: {}", panic_message(&*payload)))
            }
        }

        match tracker.save(&self.writer, sink) {
            Ok(delta) => IterationStatus::Measured { delta },
            Err(e) => exception(e.to_string()),
        }
    }

    fn pause(&self, interval: Duration) {
        let deadline = Instant::now() + interval;
        while !self.cancel.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

fn ensure_parent(sink: &Path) -> io::Result<()> {
    match sink.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

fn render_failure(
    out: &mut String,
    kind: FailureKind,
    message: &str,
    iteration: usize,
    total: usize,
    request: &RunRequest,
) {
    // Writing to a String cannot fail.
    let _ = match kind {
        FailureKind::Syntax => writeln!(
            out,
            "{SYNTAX_ERROR_MARKER}\nMessage: {message}\nIteration: {iteration}/{total}\nText: {}",
            request.invocation()
        ),
        FailureKind::Exception => {
            writeln!(out, "{EXCEPTION_MARKER}{message} (iteration {iteration}/{total})")
        }
    };
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder_and_invocation() {
        let request = RunRequest::new("table", "mean")
            .arg("df", "df_0")
            .arg("column", "'age'")
            .repeat(3)
            .interval(Duration::from_millis(10));
        assert_eq!(request.repeat_count, 3);
        assert_eq!(request.invocation(), "table.mean(df=df_0, column='age')");
    }

    #[test]
    fn test_count_failures() {
        let text = "hello\nException occurred:boom (iteration 2/3)\nSyntax Error:\nMessage: x\n";
        assert_eq!(count_failures(text), 2);
    }

    #[test]
    fn test_generated_sink_name() {
        let harness = Harness::new(Arc::new(Registry::empty()), Arc::new(OperationRegistry::new()))
            .output_dir("/tmp/reports");
        let sink = harness.resolve_sink(&RunRequest::new("builtin", "sleep"));
        assert_eq!(sink.parent(), Some(Path::new("/tmp/reports")));
        let name = sink.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("builtin-sleep-"), "{name}");
        assert!(name.ends_with(".csv"));
        assert!(!name.contains(':'));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
    }
}
