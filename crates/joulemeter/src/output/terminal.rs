//! Terminal output formatting with colors and box drawing.

use colored::Colorize;

use crate::counters::{FamilyReport, FamilyStatus, Registry};
use crate::harness::{IterationStatus, RunOutput, RunRequest};
use crate::preflight::{PreflightResult, Severity};

const RULE_WIDTH: usize = 62;

/// Format a finished run for human-readable terminal output.
///
/// # Example output
///
/// ```text
/// ┌─ builtin.spin × 3 ────────────────────────────────────────
/// │ Iterations: 3 measured, 0 failed
/// │ Duration:   mean 0.101s (min 0.100s, max 0.103s)
/// │
/// │ Domain              Mean           Min           Max
/// │ package-0      2.104 J       2.050 J       2.201 J
/// │ nvidia-gpu-0   0.512 J       0.498 J       0.530 J
/// │
/// │ Report: ./builtin-spin-2026-10-17T10-00-00.000000.csv
/// └───────────────────────────────────────────────────────────
/// ```
pub fn format_run(request: &RunRequest, output: &RunOutput) -> String {
    let mut out = String::new();
    let title = format!(
        "{}.{} \u{00d7} {}",
        request.module, request.operation, request.repeat_count
    );
    out.push_str(&header(&title));

    let failed = output.failed();
    let failed_str = if failed > 0 {
        format!("{failed} failed").red().to_string()
    } else {
        format!("{failed} failed")
    };
    out.push_str(&format!(
        "\u{2502} Iterations: {} measured, {}",
        output.succeeded().to_string().green(),
        failed_str
    ));
    if output.cancelled() > 0 {
        out.push_str(&format!(", {}", format!("{} cancelled", output.cancelled()).yellow()));
    }
    out.push('\n');

    let summary = output.summary();
    if summary.intervals > 0 {
        out.push_str(&format!(
            "\u{2502} Duration:   mean {:.3}s (min {:.3}s, max {:.3}s)\n",
            summary.mean_duration.as_secs_f64(),
            summary.min_duration.as_secs_f64(),
            summary.max_duration.as_secs_f64(),
        ));
    }

    if !summary.domains.is_empty() {
        out.push_str("\u{2502}\n");
        out.push_str(&format!(
            "\u{2502} {:<16} {:>12}  {:>12}  {:>12}\n",
            "Domain".bold(),
            "Mean",
            "Min",
            "Max"
        ));
        for domain in &summary.domains {
            let unit = domain.kind.unit();
            out.push_str(&format!(
                "\u{2502} {:<16} {:>10.3} J  {:>10.3} J  {:>10.3} J\n",
                domain.name,
                unit.to_joules(1) * domain.mean,
                unit.to_joules(domain.min),
                unit.to_joules(domain.max),
            ));
        }
    } else if summary.intervals > 0 {
        out.push_str(&format!(
            "\u{2502} {}\n",
            "No energy counters; durations only".yellow()
        ));
    }

    let failures: Vec<(usize, &str)> = output
        .iterations
        .iter()
        .filter_map(|r| match &r.status {
            IterationStatus::Failed { message, .. } => Some((r.iteration, message.as_str())),
            _ => None,
        })
        .collect();
    if !failures.is_empty() {
        out.push_str(&format!("\u{2502}\n\u{2502} {} Failures\n", "\u{26A0}".yellow()));
        for (iteration, message) in failures {
            out.push_str(&format!("\u{2502}   \u{2022} #{iteration}: {message}\n"));
        }
    }

    out.push_str("\u{2502}\n");
    out.push_str(&format!("\u{2502} Report: {}\n", output.sink.display()));
    out.push_str(&footer());
    out
}

/// Format the counter registry and family outcomes.
pub fn format_counters(registry: &Registry, families: &[FamilyReport]) -> String {
    let mut out = header("Energy counters");

    for report in families {
        let status = match &report.status {
            FamilyStatus::Available { domains } => format!("{domains} domain(s)").green().to_string(),
            FamilyStatus::Disabled { reason } => format!("disabled ({reason})").dimmed().to_string(),
            FamilyStatus::Unavailable { reason } => {
                format!("unavailable ({reason})").yellow().to_string()
            }
        };
        out.push_str(&format!("\u{2502} {:<6} {}\n", report.family.to_string().bold(), status));
    }

    if !registry.is_empty() {
        out.push_str("\u{2502}\n");
        for counter in registry.iter() {
            let range = counter
                .wrap_modulus()
                .map(|m| format!("wraps at {m}"))
                .unwrap_or_else(|| "no range".to_string());
            out.push_str(&format!(
                "\u{2502} {:<16} {:<12} {:<3} {}\n",
                counter.name(),
                counter.kind().to_string(),
                counter.kind().unit().symbol(),
                range.dimmed()
            ));
        }
    }

    out.push_str(&footer());
    out
}

/// Format preflight findings; empty when there are none.
pub fn format_preflight(result: &PreflightResult) -> String {
    let mut out = String::new();
    for warning in &result.warnings {
        let marker = match warning.severity() {
            Severity::Critical => "\u{2717}".red(),
            Severity::Warning => "\u{26A0}".yellow(),
            Severity::Info => "\u{2139}".blue(),
        };
        out.push_str(&format!("  {} {}\n", marker, warning));
    }
    out
}

fn header(title: &str) -> String {
    let used = title.chars().count() + 4;
    let fill = "\u{2500}".repeat(RULE_WIDTH.saturating_sub(used));
    format!("\u{250c}\u{2500} {} {}\n", title.bold(), fill)
}

fn footer() -> String {
    format!("\u{2514}{}\n", "\u{2500}".repeat(RULE_WIDTH - 1))
}
