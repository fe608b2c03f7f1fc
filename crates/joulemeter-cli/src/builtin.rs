//! General-purpose operations: `builtin.sleep`, `builtin.spin`, `builtin.echo`.

use std::fmt::Write;
use std::hint::black_box;
use std::time::{Duration, Instant};

use joulemeter::harness::{OperationError, OperationRegistry, Value};

/// Module name.
pub const MODULE: &str = "builtin";

/// Register the builtin operations.
pub fn register(ops: &mut OperationRegistry) {
    ops.register(MODULE, "sleep", &["seconds"], |args, _| {
        std::thread::sleep(duration_arg(args.f64("seconds")?)?);
        Ok(Value::None)
    })
    .register(MODULE, "spin", &["seconds"], |args, out| {
        let iterations = spin(duration_arg(args.f64("seconds")?)?);
        writeln!(out, "spun {iterations} iterations")?;
        Ok(Value::Int(iterations as i64))
    })
    .register(MODULE, "echo", &["value"], |args, out| {
        let value = args.require("value")?.clone();
        writeln!(out, "{value}")?;
        Ok(value)
    });
}

fn duration_arg(seconds: f64) -> Result<Duration, OperationError> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(OperationError::new(format!(
            "seconds must be a non-negative number, got {seconds}"
        )));
    }
    Ok(Duration::from_secs_f64(seconds))
}

/// Keep one core busy for `duration`; returns the loop count.
fn spin(duration: Duration) -> u64 {
    let deadline = Instant::now() + duration;
    let mut acc = 0u64;
    let mut iterations = 0u64;
    while Instant::now() < deadline {
        for i in 0..1024u64 {
            acc = black_box(acc.wrapping_mul(6364136223846793005).wrapping_add(i));
        }
        iterations += 1;
    }
    black_box(acc);
    iterations
}
