//! Repeated runs through the harness.

use std::fmt::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use joulemeter::counters::{ManualCounter, ScriptedCounter};
use joulemeter::data::parse_csv;
use joulemeter::harness::{count_failures, FailureKind, EXCEPTION_MARKER, SYNTAX_ERROR_MARKER};
use joulemeter::report::read_report;
use joulemeter::{
    Bindings, CancelFlag, CounterKind, Harness, IterationStatus, MeterContext, OperationError,
    OperationRegistry, Registry, RunRequest, Value, REPORT_HEADER,
};
use tempfile::TempDir;

fn two_domain_registry(pkg: &ManualCounter, gpu: &ManualCounter) -> Arc<Registry> {
    Arc::new(
        Registry::builder()
            .counter("package-0", CounterKind::CpuDomain, Some(1_000_000), pkg.clone())
            .counter("nvidia-gpu-0", CounterKind::Accelerator, None, gpu.clone())
            .build(),
    )
}

/// `work.burn` adds energy to both counters; its `n`-th call fails when `fail_on` is set.
fn burn_ops(pkg: &ManualCounter, gpu: &ManualCounter, fail_on: Option<usize>) -> OperationRegistry {
    let (pkg, gpu) = (pkg.clone(), gpu.clone());
    let calls = AtomicUsize::new(0);
    let mut ops = OperationRegistry::new();
    ops.register("work", "burn", &["amount"], move |args, out| {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if Some(call) == fail_on {
            return Err(OperationError::new("division by zero"));
        }
        let amount = args.get("amount").and_then(Value::as_i64).unwrap_or(100) as u64;
        pkg.add(amount);
        gpu.add(amount / 10);
        writeln!(out, "burned {amount}")?;
        Ok(Value::None)
    });
    ops
}

#[test]
fn three_iterations_yield_three_row_sets() {
    let tmp = TempDir::new().unwrap();
    let (pkg, gpu) = (ManualCounter::new("pkg", 5_000), ManualCounter::new("gpu", 0));
    let harness = Harness::new(two_domain_registry(&pkg, &gpu), Arc::new(burn_ops(&pkg, &gpu, None)));

    let request = RunRequest::new("work", "burn")
        .arg("amount", "250")
        .repeat(3)
        .sink(tmp.path().join("burn.csv"));
    let output = harness.run(&request, &Bindings::new());

    assert_eq!(output.succeeded(), 3);
    assert_eq!(count_failures(&output.output), 0);
    assert_eq!(output.output.matches("burned 250").count(), 3);
    assert!(output
        .text()
        .ends_with(&format!("Wrote measurement to {}", output.sink.display())));

    let rows = read_report(&output.sink).unwrap();
    assert_eq!(rows.len(), 6);
    let domains: Vec<&str> = rows.iter().map(|r| r.domain.as_str()).collect();
    assert_eq!(
        domains,
        ["package-0", "nvidia-gpu-0", "package-0", "nvidia-gpu-0", "package-0", "nvidia-gpu-0"]
    );
    assert!(rows.iter().step_by(2).all(|r| r.energy == 250));
    assert!(rows.iter().skip(1).step_by(2).all(|r| r.energy == 25));
}

#[test]
fn failing_iteration_does_not_stop_the_run() {
    let tmp = TempDir::new().unwrap();
    let (pkg, gpu) = (ManualCounter::new("pkg", 0), ManualCounter::new("gpu", 0));
    let harness =
        Harness::new(two_domain_registry(&pkg, &gpu), Arc::new(burn_ops(&pkg, &gpu, Some(2))));

    let request = RunRequest::new("work", "burn")
        .repeat(3)
        .sink(tmp.path().join("burn.csv"));
    let output = harness.run(&request, &Bindings::new());

    assert_eq!(output.succeeded(), 2);
    assert_eq!(output.failed(), 1);
    assert!(matches!(
        output.iterations[1].status,
        IterationStatus::Failed {
            kind: FailureKind::Exception,
            ..
        }
    ));
    let marker_line = output
        .output
        .lines()
        .find(|l| l.starts_with(EXCEPTION_MARKER))
        .unwrap();
    assert!(marker_line.contains("division by zero"));
    assert!(marker_line.contains("iteration 2/3"));

    // Rows for iterations 1 and 3 only.
    assert_eq!(read_report(&output.sink).unwrap().len(), 4);
}

#[test]
fn undeclared_argument_is_a_syntax_error() {
    let tmp = TempDir::new().unwrap();
    let (pkg, gpu) = (ManualCounter::new("pkg", 0), ManualCounter::new("gpu", 0));
    let harness = Harness::new(two_domain_registry(&pkg, &gpu), Arc::new(burn_ops(&pkg, &gpu, None)));

    let request = RunRequest::new("work", "burn")
        .arg("amonut", "5")
        .repeat(2)
        .sink(tmp.path().join("typo.csv"));
    let output = harness.run(&request, &Bindings::new());

    assert_eq!(output.failed(), 2);
    assert_eq!(
        output.output.lines().filter(|l| *l == SYNTAX_ERROR_MARKER).count(),
        2
    );
    assert!(output.output.contains("unexpected argument 'amonut'"));
    assert_eq!(pkg.value(), 0, "operation must not run");
    assert!(!output.sink.exists());
}

#[test]
fn unknown_operation_is_reported_per_iteration() {
    let tmp = TempDir::new().unwrap();
    let harness = Harness::new(Arc::new(Registry::empty()), Arc::new(OperationRegistry::new()))
        .output_dir(tmp.path());
    let output = harness
        .run(&RunRequest::new("nosuch", "op").repeat(2), &Bindings::new());

    assert_eq!(count_failures(&output.output), 2);
    assert!(output.output.contains("No module named 'nosuch'"));
    assert!(output.sink.starts_with(tmp.path()));
}

#[test]
fn panicking_operation_is_contained() {
    let tmp = TempDir::new().unwrap();
    let mut ops = OperationRegistry::new();
    ops.register("bad", "panic", &[], |_, _| panic!("kaboom"));
    let harness = Harness::new(Arc::new(Registry::empty()), Arc::new(ops));

    let output = harness
        .run(
            &RunRequest::new("bad", "panic").repeat(2).sink(tmp.path().join("p.csv")),
            &Bindings::new(),
        );
    assert_eq!(output.failed(), 2);
    assert!(output.output.contains("operation panicked: kaboom"));
}

#[test]
fn empty_registry_records_durations_only() {
    let tmp = TempDir::new().unwrap();
    let mut ops = OperationRegistry::new();
    ops.register("t", "nap", &[], |_, _| {
        std::thread::sleep(Duration::from_millis(5));
        Ok(Value::None)
    });
    let harness = Harness::new(Arc::new(Registry::empty()), Arc::new(ops));

    let output = harness
        .run(&RunRequest::new("t", "nap").repeat(2).sink(tmp.path().join("d.csv")), &Bindings::new());
    assert_eq!(output.succeeded(), 2);
    assert!(output.deltas().all(|d| d.is_empty() && d.duration >= Duration::from_millis(5)));

    let text = std::fs::read_to_string(&output.sink).unwrap();
    assert_eq!(text.trim_end(), REPORT_HEADER);
}

#[test]
fn dataset_bindings_reach_the_operation() {
    let tmp = TempDir::new().unwrap();
    let mut ctx = MeterContext::new();
    let name = ctx.insert_dataset(parse_csv("age\n30\n40\nNA\n").unwrap());
    ctx.operations_mut()
        .register("table", "mean", &["df", "column"], |args, out| {
            let values = args.dataset("df")?.numeric(args.str("column")?)?;
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            write!(out, "{mean}")?;
            Ok(Value::Float(mean))
        });

    let harness = Harness::new(Arc::new(Registry::empty()), Arc::new(ctx.operations().clone()));
    let request = RunRequest::new("table", "mean")
        .arg("df", &name)
        .arg("column", "'age'")
        .sink(tmp.path().join("m.csv"));
    let output = harness.run(&request, ctx.bindings());

    assert_eq!(output.succeeded(), 1, "{}", output.output);
    assert_eq!(output.output, "35");
}

#[test]
fn interval_applies_between_iterations_only() {
    let tmp = TempDir::new().unwrap();
    let mut ops = OperationRegistry::new();
    ops.register("t", "noop", &[], |_, _| Ok(Value::None));
    let harness = Harness::new(Arc::new(Registry::empty()), Arc::new(ops));
    let request = RunRequest::new("t", "noop")
        .repeat(3)
        .interval(Duration::from_millis(40))
        .sink(tmp.path().join("i.csv"));

    let start = Instant::now();
    harness.run(&request, &Bindings::new());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(80), "{elapsed:?}");

    let harness = harness.trailing_sleep(true);
    let start = Instant::now();
    harness.run(&request, &Bindings::new());
    assert!(start.elapsed() >= Duration::from_millis(120));
}

#[test]
fn cancellation_skips_remaining_iterations() {
    let tmp = TempDir::new().unwrap();
    let flag = CancelFlag::new();
    let trigger = flag.clone();
    let mut ops = OperationRegistry::new();
    ops.register("t", "once", &[], move |_, _| {
        trigger.cancel();
        Ok(Value::None)
    });
    let harness = Harness::new(Arc::new(Registry::empty()), Arc::new(ops)).cancel_flag(flag);

    let output = harness
        .run(
            &RunRequest::new("t", "once")
                .repeat(4)
                .interval(Duration::from_secs(30))
                .sink(tmp.path().join("c.csv")),
            &Bindings::new(),
        );

    assert_eq!(output.succeeded(), 1);
    assert_eq!(output.cancelled(), 3);
    assert_eq!(output.iterations.len(), 4);
    assert_eq!(output.output.matches("Run cancelled").count(), 1);
}

#[test]
fn progress_and_background_dispatch() {
    let tmp = TempDir::new().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let mut ops = OperationRegistry::new();
    ops.register("t", "noop", &[], |_, _| Ok(Value::None));

    let harness = Arc::new(
        Harness::new(Arc::new(Registry::empty()), Arc::new(ops)).on_progress(move |event| {
            sink_seen
                .lock()
                .unwrap()
                .push((event.completed, event.total));
        }),
    );
    let handle = harness.spawn(
        RunRequest::new("t", "noop").repeat(3).sink(tmp.path().join("bg.csv")),
        Bindings::new(),
    );
    let output = handle.join().unwrap();

    assert_eq!(output.succeeded(), 3);
    assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
}

#[test]
fn counter_failure_mid_run_fails_only_that_iteration() {
    let tmp = TempDir::new().unwrap();
    // Reads: start 1, stop 1 (fails), start 2, stop 2.
    let gpu = ScriptedCounter::with_failures("nvidia-gpu-0", [Some(0), None, Some(10), Some(40)]);
    let registry = Arc::new(
        Registry::builder()
            .counter("nvidia-gpu-0", CounterKind::Accelerator, None, gpu)
            .build(),
    );
    let mut ops = OperationRegistry::new();
    ops.register("t", "noop", &[], |_, _| Ok(Value::None));
    let harness = Harness::new(registry, Arc::new(ops));

    let output = harness
        .run(
            &RunRequest::new("t", "noop").repeat(2).sink(tmp.path().join("f.csv")),
            &Bindings::new(),
        );
    assert_eq!(output.failed(), 1);
    assert_eq!(output.succeeded(), 1);
    assert!(output.output.contains("reading nvidia-gpu-0"));
    assert_eq!(output.iterations[1].delta().unwrap().get("nvidia-gpu-0"), Some(30));
}

#[test]
fn unusable_sink_fails_each_iteration_not_the_run() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("not_a_dir");
    std::fs::write(&blocker, "plain file").unwrap();

    let (pkg, gpu) = (ManualCounter::new("pkg", 0), ManualCounter::new("gpu", 0));
    let harness = Harness::new(two_domain_registry(&pkg, &gpu), Arc::new(burn_ops(&pkg, &gpu, None)));
    let request = RunRequest::new("work", "burn")
        .repeat(3)
        .sink(blocker.join("r.csv"));
    let output = harness.run(&request, &Bindings::new());

    assert_eq!(output.iterations.len(), 3);
    assert_eq!(output.failed(), 3);
    assert_eq!(output.output.matches(EXCEPTION_MARKER).count(), 3);
    assert_eq!(output.output.matches("burned 100").count(), 3);
    assert!(output.text().ends_with(&format!("Wrote measurement to {}", blocker.join("r.csv").display())));
}

#[test]
fn empty_target_is_a_syntax_error_per_iteration() {
    let tmp = TempDir::new().unwrap();
    let harness = Harness::new(Arc::new(Registry::empty()), Arc::new(OperationRegistry::new()));
    let output = harness.run(
        &RunRequest::new("", "burn").repeat(2).sink(tmp.path().join("e.csv")),
        &Bindings::new(),
    );

    assert_eq!(output.failed(), 2);
    assert_eq!(output.output.matches(SYNTAX_ERROR_MARKER).count(), 2);
    assert!(output
        .iterations
        .iter()
        .all(|r| matches!(r.status, IterationStatus::Failed { kind: FailureKind::Syntax, .. })));
}
