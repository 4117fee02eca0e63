//! Scenario matrix runner.
//!
//! This binary:
//! 1. Reads the subject and run settings from `INTERPOSE_*` variables
//! 2. Expands every suite into scenarios, one trial each
//! 3. Runs each trial on its own runtime against a fresh subject process
//! 4. Reports failures with the mismatch and a hex dump of client traffic

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use interpose_harness::config::SUBJECT_ENV;
use interpose_harness::matrix::expand_all;
use interpose_harness::{HarnessConfig, ProcessLauncher, Scenario, ScenarioRunner, logging};
use libtest_mimic::{Arguments, Failed, Trial};
use owo_colors::OwoColorize;

/// Set once a scenario hits an infrastructure fault; later trials fail fast.
static ABORTED: AtomicBool = AtomicBool::new(false);

fn main() {
    logging::init();
    let mut args = Arguments::from_args();
    // Each scenario owns the subject and a fresh origin; never overlap them.
    args.test_threads = Some(1);

    let config = match HarnessConfig::from_env() {
        Ok(Some(config)) => config,
        Ok(None) => {
            eprintln!("Warning: {SUBJECT_ENV} is not set, returning empty scenario list");
            eprintln!("Set {SUBJECT_ENV}=/path/to/subject to run the matrix");
            libtest_mimic::run(&args, vec![]).exit();
        }
        Err(e) => {
            eprintln!("invalid harness configuration: {e}");
            std::process::exit(2);
        }
    };

    let scenarios = expand_all();
    eprintln!(
        "Found {} scenarios for {}",
        scenarios.len(),
        config.subject.display()
    );

    let trials: Vec<Trial> = scenarios
        .into_iter()
        .map(|scenario| {
            let config = config.clone();
            Trial::test(scenario.name(), move || run_trial(&config, &scenario))
                .with_kind(scenario.suite.as_str())
        })
        .collect();

    libtest_mimic::run(&args, trials).exit();
}

fn run_trial(config: &HarnessConfig, scenario: &Scenario) -> Result<(), Failed> {
    if ABORTED.load(Ordering::SeqCst) {
        return Err("not run: an earlier scenario hit an infrastructure fault".into());
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to create runtime: {e}"))?;

    let start = Instant::now();
    let runner = ScenarioRunner::<ProcessLauncher>::new(config.launcher(), config.clone());
    let outcome = rt.block_on(runner.run_scenario(scenario));
    eprintln!(
        "{} {} {} finished: {}",
        format_uptime(start),
        "[harn]".cyan(),
        scenario,
        if outcome.passed { "pass" } else { "fail" }
    );

    if outcome.fatal {
        ABORTED.store(true, Ordering::SeqCst);
    }
    match outcome.failure_report() {
        Some(report) if !outcome.passed => Err(report.into()),
        _ => Ok(()),
    }
}

/// Elapsed time as an uptime-style string (e.g. "0.00123s").
fn format_uptime(start: Instant) -> String {
    format!("{:>8.5}s", start.elapsed().as_secs_f64())
}
