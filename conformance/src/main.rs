//! Conformance runner for interpose subjects.
//!
//! Starts the subject once per scenario, drives it, and reports which
//! scenarios matched the expected event trace and client-visible bytes.
//!
//! # Usage
//!
//! Run the whole matrix:
//! ```bash
//! interpose-conformance --subject ./my-proxy
//! ```
//!
//! Run one suite, or one scenario:
//! ```bash
//! interpose-conformance --subject ./my-proxy --suite continue
//! interpose-conformance --subject ./my-proxy \
//!     --case behaviors.default.collect.POST.body_200_chunked
//! ```
//!
//! List scenarios:
//! ```bash
//! interpose-conformance --list --suite tunnel
//! ```
//!
//! # Exit Codes
//!
//! - 0: Every scenario passed
//! - 1: At least one scenario failed
//! - 2: Infrastructure fault or usage error

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use interpose_harness::config::{EVENT_TIMEOUT_ENV, SEED_ENV, SUBJECT_ENV};
use interpose_harness::matrix::expand_all;
use interpose_harness::{
    HarnessConfig, OutputMode, RunSummary, Scenario, ScenarioRunner, Suite, logging,
};
use owo_colors::OwoColorize;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "interpose-conformance")]
#[command(about = "Conformance runner for streaming HTTP interception subjects")]
struct Args {
    /// Subject executable; receives the event channel path first
    #[arg(long, env = SUBJECT_ENV)]
    subject: Option<PathBuf>,

    /// Argument placed before the channel path (repeatable)
    #[arg(long = "subject-arg", allow_hyphen_values = true)]
    subject_args: Vec<String>,

    /// List scenarios instead of running them
    #[arg(long)]
    list: bool,

    /// Restrict to one suite (behaviors, continue, tunnel, keepalive)
    #[arg(long)]
    suite: Option<String>,

    /// Run a single scenario (e.g. "behaviors.default.immediately.GET.body_200_length")
    #[arg(long)]
    case: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Base seed for body lengths and chunk partitions
    #[arg(long, env = SEED_ENV, default_value_t = 0)]
    seed: u64,

    /// Bound on each event wait in milliseconds; 0 waits forever
    #[arg(long, env = EVENT_TIMEOUT_ENV, default_value_t = 0)]
    event_timeout_ms: u64,

    /// Relay subject stdout/stderr behind an uptime stamp
    #[arg(long)]
    prefix_output: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// JSON output for a scenario listing.
#[derive(Serialize)]
struct ScenarioJson {
    name: String,
    suite: &'static str,
}

impl Args {
    fn config(&self, subject: PathBuf) -> HarnessConfig {
        let mut config = HarnessConfig::new(subject);
        config.leading_args = self.subject_args.clone();
        config.seed = self.seed;
        config.event_timeout =
            (self.event_timeout_ms > 0).then(|| Duration::from_millis(self.event_timeout_ms));
        if self.prefix_output {
            config.output = OutputMode::Prefixed;
        }
        config
    }
}

fn main() {
    logging::init();
    let args = Args::parse();

    let scenarios = match select(&args) {
        Ok(scenarios) => scenarios,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    if args.list {
        list_scenarios(&scenarios, args.format);
        return;
    }

    let Some(subject) = args.subject.clone() else {
        eprintln!("Usage: interpose-conformance --subject <path> [--suite <name> | --case <name>]");
        eprintln!("       interpose-conformance --list");
        std::process::exit(2);
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to create runtime: {e}");
            std::process::exit(2);
        }
    };

    let config = args.config(subject);
    let runner = ScenarioRunner::new(config.launcher(), config);
    tracing::info!(scenarios = scenarios.len(), "starting run");
    let summary = runtime.block_on(runner.run_all(&scenarios));

    report(&summary, scenarios.len(), args.format);
    std::process::exit(summary.exit_code());
}

/// Scenarios picked by `--case` or `--suite`, or the whole matrix.
fn select(args: &Args) -> Result<Vec<Scenario>, String> {
    if let Some(case) = &args.case {
        let scenario = Scenario::from_name(case)
            .filter(|s| s.suite.expand().contains(s))
            .ok_or_else(|| format!("unknown scenario {case:?}; see --list"))?;
        if let Some(suite) = &args.suite
            && suite != scenario.suite.as_str()
        {
            return Err(format!("scenario {case:?} is not in suite {suite:?}"));
        }
        return Ok(vec![scenario]);
    }

    match &args.suite {
        Some(name) => Suite::from_name(name)
            .map(Suite::expand)
            .ok_or_else(|| {
                let known: Vec<_> = Suite::ALL.iter().map(|s| s.as_str()).collect();
                format!("unknown suite {name:?}; expected one of {}", known.join(", "))
            }),
        None => Ok(expand_all()),
    }
}

fn list_scenarios(scenarios: &[Scenario], format: Format) {
    if format == Format::Json {
        let output: Vec<ScenarioJson> = scenarios
            .iter()
            .map(|s| ScenarioJson {
                name: s.name(),
                suite: s.suite.as_str(),
            })
            .collect();
        match serde_json::to_string(&output) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("failed to encode listing: {e}");
                std::process::exit(2);
            }
        }
        return;
    }

    println!("Available scenarios:\n");
    let mut current_suite = None;
    for scenario in scenarios {
        if current_suite != Some(scenario.suite) {
            if current_suite.is_some() {
                println!();
            }
            println!("## {}", scenario.suite);
            current_suite = Some(scenario.suite);
        }
        println!("  {}", scenario.name());
    }
    println!("\nTotal: {} scenarios", scenarios.len());
}

fn report(summary: &RunSummary, selected: usize, format: Format) {
    if format == Format::Json {
        match serde_json::to_string(summary) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("failed to encode summary: {e}"),
        }
        return;
    }

    for outcome in &summary.outcomes {
        if outcome.passed {
            println!("{} {}", "PASS".green(), outcome.scenario);
            continue;
        }
        println!("{} {}", "FAIL".red().bold(), outcome.scenario);
        if let Some(report) = outcome.failure_report() {
            for line in report.lines() {
                println!("    {line}");
            }
        }
    }

    let skipped = selected - summary.outcomes.len();
    println!();
    println!(
        "{} passed, {} failed, {} not run",
        summary.passed(),
        summary.failed(),
        skipped
    );
    if summary.aborted {
        println!("{}", "run aborted by an infrastructure fault".red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("interpose-conformance").chain(argv.iter().copied()))
            .unwrap()
    }

    #[test]
    fn no_filter_selects_the_whole_matrix() {
        assert_eq!(select(&args(&["--list"])).unwrap().len(), expand_all().len());
    }

    #[test]
    fn suite_filter() {
        let scenarios = select(&args(&["--suite", "tunnel"])).unwrap();
        assert_eq!(scenarios.len(), Suite::Tunnel.expand().len());
        assert!(scenarios.iter().all(|s| s.suite == Suite::Tunnel));
        assert!(select(&args(&["--suite", "bogus"])).is_err());
    }

    #[test]
    fn case_must_be_in_the_matrix() {
        let name = "behaviors.default.immediately.GET.body_200_length";
        assert_eq!(select(&args(&["--case", name])).unwrap()[0].name(), name);
        // Rejecting origins are only paired with the default behavior.
        assert!(
            select(&args(&[
                "--case",
                "continue.response_body_append.immediately.POST.reject_continue_body"
            ]))
            .is_err()
        );
        assert!(select(&args(&["--case", name, "--suite", "continue"])).is_err());
    }

    #[test]
    fn config_from_flags() {
        let args = args(&[
            "--subject",
            "/bin/proxy",
            "--subject-arg",
            "--verbose",
            "--seed",
            "9",
            "--event-timeout-ms",
            "250",
            "--prefix-output",
        ]);
        let config = args.config(args.subject.clone().unwrap());
        assert_eq!(config.leading_args, ["--verbose"]);
        assert_eq!(config.seed, 9);
        assert_eq!(config.event_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.output, OutputMode::Prefixed);
    }
}
