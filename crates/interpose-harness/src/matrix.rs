//! Declarative scenario matrix.
//!
//! Each suite declares its axes and an exclusion predicate; expansion is the
//! cross product in a fixed order (behavior outermost, then send mode, then
//! method, then path suffix).

use std::fmt;

use crate::origin::{OriginConfig, Protocol};
use crate::scenario::{Behavior, Method, PathSuffix, Scenario, SendMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suite {
    /// Plain proxied requests against an HTTP/1.0 origin.
    Behaviors,
    /// `Expect: 100-continue` negotiation against an HTTP/1.1 origin.
    Continue,
    /// CONNECT tunnels carrying a plain request.
    Tunnel,
    /// Two requests on one persistent client connection.
    KeepAlive,
}

const NON_404_BEHAVIORS: &[Behavior] = &[
    Behavior::Default,
    Behavior::BufferRequestDefault,
    Behavior::RequestPreBodyGeneratesResponseWithBody,
    Behavior::RequestPreBodyGeneratesResponseWithoutBody,
    Behavior::RequestBodyLastGeneratesResponseWithBody,
    Behavior::RequestBodyLastGeneratesResponseWithoutBody,
    Behavior::ResponsePreBodyGeneratesResponseWithBody,
    Behavior::ResponsePreBodyGeneratesResponseWithoutBody,
    Behavior::BufferRequestResponsePreBodyGeneratesResponseWithBody,
    Behavior::BufferRequestResponsePreBodyGeneratesResponseWithoutBody,
    Behavior::ResponsePreBodyPrepend,
    Behavior::ResponseBodyPrepend,
    Behavior::ResponseBodyAppend,
    Behavior::BufferRequestResponsePreBodyPrepend,
    Behavior::BufferRequestResponseBodyPrepend,
    Behavior::BufferRequestResponseBodyAppend,
];

const CONTINUE_BEHAVIORS: &[Behavior] = &[
    Behavior::Default,
    Behavior::RequestPreBodyGeneratesResponseWithBody,
    Behavior::RequestPreBodyGeneratesResponseWithoutBody,
    Behavior::RequestBodyLastGeneratesResponseWithBody,
    Behavior::RequestBodyLastGeneratesResponseWithoutBody,
    Behavior::ResponsePreBodyGeneratesResponseWithBody,
    Behavior::ResponsePreBodyGeneratesResponseWithoutBody,
    Behavior::ResponsePreBodyPrepend,
    Behavior::ResponseBodyPrepend,
    Behavior::ResponseBodyAppend,
    Behavior::RequestPreBodyGenerates404ResponseWithBody,
    Behavior::RequestPreBodyGenerates404ResponseWithoutBody,
];

const BOTH_SEND_MODES: &[SendMode] = &[SendMode::Immediate, SendMode::Collect];

impl Suite {
    pub const ALL: [Suite; 4] = [Self::Behaviors, Self::Continue, Self::Tunnel, Self::KeepAlive];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Behaviors => "behaviors",
            Self::Continue => "continue",
            Self::Tunnel => "tunnel",
            Self::KeepAlive => "keepalive",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }

    pub fn behaviors(self) -> &'static [Behavior] {
        match self {
            Self::Behaviors | Self::KeepAlive => NON_404_BEHAVIORS,
            Self::Continue => CONTINUE_BEHAVIORS,
            Self::Tunnel => &[Behavior::Default],
        }
    }

    pub fn send_modes(self) -> &'static [SendMode] {
        BOTH_SEND_MODES
    }

    pub fn methods(self) -> &'static [Method] {
        match self {
            Self::Behaviors => &[Method::Head, Method::Get, Method::Post],
            Self::Continue => &[Method::Post],
            Self::Tunnel | Self::KeepAlive => &[Method::Get],
        }
    }

    pub fn suffixes(self) -> &'static [PathSuffix] {
        use PathSuffix::*;
        match self {
            Self::Behaviors => &[
                Body200Length,
                Body200NoLength,
                Body200Chunked,
                Body200ChunkedPaddedLength,
                NoBody200Length,
                NoBody200NoLength,
            ],
            Self::Continue => &[
                Body200Length,
                NoBody200Length,
                RejectContinueBody,
                RejectContinueNoBody,
            ],
            Self::Tunnel => &[Body200Length, Body200NoLength, Body200Chunked],
            Self::KeepAlive => &[Body200Length, Body200Chunked, CloseAfterResponse],
        }
    }

    /// Exclusion predicate applied during expansion.
    fn admits(self, behavior: Behavior, suffix: PathSuffix) -> bool {
        match self {
            // The origin only rejects when the subject forwards the
            // expectation untouched.
            Self::Continue => !suffix.rejects_continue() || behavior == Behavior::Default,
            _ => true,
        }
    }

    /// Requests sent on each client connection.
    pub fn requests_per_connection(self) -> usize {
        match self {
            Self::KeepAlive => 2,
            _ => 1,
        }
    }

    /// Origin fixture configuration for scenarios of this suite.
    pub fn origin_config(self, seed: u64) -> OriginConfig {
        let (protocol, persistent) = match self {
            Self::Behaviors | Self::Tunnel => (Protocol::Http10, false),
            Self::Continue => (Protocol::Http11, false),
            Self::KeepAlive => (Protocol::Http11, true),
        };
        OriginConfig {
            protocol,
            persistent,
            seed,
        }
    }

    pub fn expand(self) -> Vec<Scenario> {
        let mut scenarios = Vec::new();
        for &behavior in self.behaviors() {
            for &send_mode in self.send_modes() {
                for &method in self.methods() {
                    for &suffix in self.suffixes() {
                        if !self.admits(behavior, suffix) {
                            continue;
                        }
                        scenarios.push(Scenario {
                            suite: self,
                            behavior,
                            send_mode,
                            method,
                            suffix,
                        });
                    }
                }
            }
        }
        scenarios
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every suite's scenarios, suites in declaration order.
pub fn expand_all() -> Vec<Scenario> {
    Suite::ALL.into_iter().flat_map(Suite::expand).collect()
}
