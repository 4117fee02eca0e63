//! Scenario outcomes and run summaries.

use serde::Serialize;

use crate::error::HarnessError;

/// Result of running one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioOutcome {
    pub scenario: String,
    pub passed: bool,
    /// Error category, see [`HarnessError::category`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the failure should stop the run.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fatal: bool,
    /// Hex dump of the client connection, for failures.
    #[serde(skip)]
    pub traffic: Option<String>,
}

impl ScenarioOutcome {
    pub fn pass(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            passed: true,
            category: None,
            error: None,
            fatal: false,
            traffic: None,
        }
    }

    pub fn fail(scenario: impl Into<String>, error: &HarnessError) -> Self {
        Self {
            scenario: scenario.into(),
            passed: false,
            category: Some(error.category()),
            error: Some(error.to_string()),
            fatal: error.is_fatal(),
            traffic: None,
        }
    }

    pub fn with_traffic(mut self, traffic: Option<String>) -> Self {
        self.traffic = traffic;
        self
    }

    /// Failure text with the traffic dump appended when there is one.
    pub fn failure_report(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        Some(match &self.traffic {
            Some(dump) if !dump.is_empty() => format!("{error}\n\nclient traffic:\n{dump}"),
            _ => error.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub outcomes: Vec<ScenarioOutcome>,
    /// Set when a fatal fault stopped the run before every scenario ran.
    pub aborted: bool,
}

impl RunSummary {
    pub fn record(&mut self, outcome: ScenarioOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        !self.aborted && self.failed() == 0
    }

    /// 0 when everything passed, 1 on scenario failures, 2 when the run
    /// was aborted by an infrastructure fault.
    pub fn exit_code(&self) -> i32 {
        if self.aborted {
            2
        } else if self.failed() > 0 {
            1
        } else {
            0
        }
    }
}
