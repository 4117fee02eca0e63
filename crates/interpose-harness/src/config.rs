//! Run configuration.
//!
//! The CLI fills a [`HarnessConfig`] from its arguments; the matrix runner
//! reads one from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::launcher::ProcessLauncher;

pub const SUBJECT_ENV: &str = "INTERPOSE_SUBJECT";
pub const SUBJECT_ARGS_ENV: &str = "INTERPOSE_SUBJECT_ARGS";
pub const SEED_ENV: &str = "INTERPOSE_SEED";
pub const EVENT_TIMEOUT_ENV: &str = "INTERPOSE_EVENT_TIMEOUT_MS";
pub const PREFIX_OUTPUT_ENV: &str = "INTERPOSE_PREFIX_OUTPUT";

/// Where the subject's stdout and stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Passed through verbatim.
    #[default]
    Inherit,
    /// Relayed line by line to stderr behind an uptime stamp and a tag.
    Prefixed,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {what}, got {value:?}")]
    InvalidVar {
        name: &'static str,
        what: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Subject executable.
    pub subject: PathBuf,
    /// Arguments placed before the channel path, for wrappers.
    pub leading_args: Vec<String>,
    /// Base seed for body lengths and chunk partitions.
    pub seed: u64,
    /// Bound on each event read and on the final process wait. `None`
    /// blocks indefinitely.
    pub event_timeout: Option<Duration>,
    pub output: OutputMode,
}

impl HarnessConfig {
    pub fn new(subject: impl Into<PathBuf>) -> Self {
        Self {
            subject: subject.into(),
            leading_args: Vec::new(),
            seed: 0,
            event_timeout: None,
            output: OutputMode::Inherit,
        }
    }

    /// Read the configuration from `INTERPOSE_*` variables. `Ok(None)` when
    /// no subject is configured.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>, ConfigError> {
        let Some(subject) = lookup(SUBJECT_ENV).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let mut config = Self::new(subject);

        if let Some(args) = lookup(SUBJECT_ARGS_ENV) {
            config.leading_args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(raw) = lookup(SEED_ENV) {
            config.seed = raw.trim().parse().map_err(|_| ConfigError::InvalidVar {
                name: SEED_ENV,
                what: "an unsigned integer",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup(EVENT_TIMEOUT_ENV) {
            let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidVar {
                name: EVENT_TIMEOUT_ENV,
                what: "a number of milliseconds",
                value: raw.clone(),
            })?;
            config.event_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if lookup(PREFIX_OUTPUT_ENV).is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes")) {
            config.output = OutputMode::Prefixed;
        }

        Ok(Some(config))
    }

    /// Process launcher for the configured subject.
    pub fn launcher(&self) -> ProcessLauncher {
        ProcessLauncher::new(&self.subject)
            .with_leading_args(self.leading_args.clone())
            .with_output(self.output)
            .with_stop_timeout(self.event_timeout)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn missing_subject_means_no_config() {
        assert_eq!(HarnessConfig::from_lookup(lookup(&[])).unwrap(), None);
        assert_eq!(
            HarnessConfig::from_lookup(lookup(&[(SUBJECT_ENV, "")])).unwrap(),
            None
        );
    }

    #[test]
    fn reads_every_variable() {
        let config = HarnessConfig::from_lookup(lookup(&[
            (SUBJECT_ENV, "/usr/local/bin/proxy"),
            (SUBJECT_ARGS_ENV, "--quiet  --threads 1"),
            (SEED_ENV, "99"),
            (EVENT_TIMEOUT_ENV, "2500"),
            (PREFIX_OUTPUT_ENV, "1"),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(config.subject, PathBuf::from("/usr/local/bin/proxy"));
        assert_eq!(config.leading_args, ["--quiet", "--threads", "1"]);
        assert_eq!(config.seed, 99);
        assert_eq!(config.event_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.output, OutputMode::Prefixed);
    }

    #[test]
    fn zero_timeout_means_block_forever() {
        let config = HarnessConfig::from_lookup(lookup(&[
            (SUBJECT_ENV, "proxy"),
            (EVENT_TIMEOUT_ENV, "0"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(config.event_timeout, None);
        assert_eq!(config.output, OutputMode::Inherit);
    }

    #[test]
    fn bad_numbers_are_reported() {
        let err = HarnessConfig::from_lookup(lookup(&[(SUBJECT_ENV, "proxy"), (SEED_ENV, "x")]))
            .unwrap_err();
        assert!(err.to_string().contains(SEED_ENV));
    }
}
