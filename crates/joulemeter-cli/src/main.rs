//! `joulemeter`: measure the energy of repeated operation runs.
//!
//! # Usage
//!
//! ```bash
//! # Show energy counters, their families, and preflight findings
//! joulemeter counters
//!
//! # List available operations and their parameters
//! joulemeter list
//!
//! # Busy-loop for 0.5s, five times, one second apart
//! joulemeter run builtin.spin -a seconds=0.5 -n 5 -i 1
//!
//! # Mean of a column of a CSV dataset (bound as df_0)
//! joulemeter run table.mean -d us_census.csv -a df=df_0 -a "column='age'" -n 10
//! ```

mod builtin;
mod table;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use joulemeter::output::{
    counters_to_json, format_counters, format_preflight, format_run, to_json_pretty,
    CounterInventory, RunReport,
};
use joulemeter::{enumerate, run_checks, Harness, MeterConfig, MeterContext, RunRequest};

/// Measure CPU and GPU energy while repeatedly running an operation
#[derive(Parser, Debug)]
#[command(name = "joulemeter")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enumerate energy counters and run preflight checks
    Counters {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List available operations
    List,
    /// Run an operation repeatedly and record its energy
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Operation to run, as MODULE.OPERATION
    target: String,

    /// Argument as NAME=VALUE (repeatable). VALUE is parsed as a literal
    /// (42, 2.5, True, None, 'text', [1, 2]), a dataset name (df_0), or
    /// kept as a plain string.
    #[arg(short = 'a', long = "arg", value_parser = parse_key_val)]
    args: Vec<(String, String)>,

    /// Number of iterations
    #[arg(short = 'n', long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    repeat: u64,

    /// Seconds to pause between iterations
    #[arg(short, long, default_value = "0", value_parser = parse_seconds)]
    interval: Duration,

    /// Report file (default: <module>-<operation>-<timestamp>.csv in the output directory)
    #[arg(short, long)]
    sink: Option<PathBuf>,

    /// Directory for generated report names
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// CSV dataset to bind as df_0, df_1, ... (repeatable)
    #[arg(short, long = "dataset")]
    datasets: Vec<PathBuf>,

    /// Also pause after the last iteration
    #[arg(long)]
    trailing_sleep: bool,

    /// Print a JSON report instead of the summary
    #[arg(long)]
    json: bool,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty argument name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|_| format!("not a number: '{s}'"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("interval must be a non-negative number of seconds, got {s}"));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<MeterConfig, String> {
    let config = match path {
        Some(path) => MeterConfig::from_file(path).map_err(|e| e.to_string())?,
        None => MeterConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn build_context() -> MeterContext {
    let mut ctx = MeterContext::new();
    builtin::register(ctx.operations_mut());
    table::register(ctx.operations_mut());
    ctx
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Counters { json } => counters(&config, json),
        Command::List => {
            list(&build_context());
            Ok(())
        }
        Command::Run(args) => run(config, args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn counters(config: &MeterConfig, json: bool) -> Result<(), String> {
    let enumeration = enumerate(&config.counters);
    let preflight = run_checks(&enumeration.registry, &enumeration.families);

    if json {
        let inventory = CounterInventory::new(&enumeration.registry, &enumeration.families, &preflight);
        println!("{}", counters_to_json(&inventory).map_err(|e| e.to_string())?);
    } else {
        print!("{}", format_counters(&enumeration.registry, &enumeration.families));
        print!("{}", format_preflight(&preflight));
    }
    Ok(())
}

fn list(ctx: &MeterContext) {
    let ops = ctx.operations();
    for module in ops.modules() {
        println!("{}", module.bold());
        for (name, params) in ops.operations(module) {
            println!("  {}.{}({})", module, name.green(), params.join(", "));
        }
    }
}

fn run(mut config: MeterConfig, args: RunArgs) -> Result<(), String> {
    let (module, operation) = args
        .target
        .rsplit_once('.')
        .ok_or_else(|| format!("expected MODULE.OPERATION, got '{}'", args.target))?;

    if let Some(dir) = args.output_dir {
        config.harness.output_dir = dir;
    }
    if args.trailing_sleep {
        config.harness.trailing_sleep = true;
    }

    let mut ctx = build_context();
    for path in &args.datasets {
        let name = ctx
            .add_dataset(path)
            .map_err(|e| format!("loading {}: {}", path.display(), e))?;
        if !args.json {
            eprintln!("{} {} = {}", "dataset".dimmed(), name, path.display());
        }
    }

    let enumeration = enumerate(&config.counters);
    let preflight = run_checks(&enumeration.registry, &enumeration.families);
    if !args.json && preflight.has_warnings() {
        eprint!("{}", format_preflight(&preflight));
    }

    let repeat = usize::try_from(args.repeat).map_err(|_| "repeat count too large".to_string())?;
    let mut request = RunRequest::new(module, operation)
        .repeat(repeat)
        .interval(args.interval);
    request.arguments = args.args;
    if let Some(sink) = args.sink {
        request = request.sink(sink);
    }

    let mut harness = Harness::new(
        Arc::new(enumeration.registry),
        Arc::new(ctx.operations().clone()),
    )
    .config(config.harness);

    let progress_bar = if args.no_progress || args.json || repeat < 2 {
        None
    } else {
        let pb = ProgressBar::new(repeat as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .map_err(|e| e.to_string())?
                .progress_chars("=>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    };
    if let Some(pb) = progress_bar.clone() {
        harness = harness.on_progress(move |event| {
            pb.set_position(event.completed as u64);
            if event.record.delta().is_none() {
                pb.set_message(format!("{} failed", event.completed));
            }
        });
    }

    let output = harness.run(&request, ctx.bindings());
    if let Some(pb) = progress_bar {
        pb.finish_and_clear();
    }

    if args.json {
        let report = RunReport::new(&request, &output);
        println!("{}", to_json_pretty(&report).map_err(|e| e.to_string())?);
    } else {
        println!("{}", output.text());
        eprint!("{}", format_run(&request, &output));
    }

    if output.succeeded() == 0 && repeat > 0 && output.cancelled() == 0 {
        return Err("every iteration failed".to_string());
    }
    Ok(())
}
