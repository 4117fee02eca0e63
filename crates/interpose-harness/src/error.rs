//! Error taxonomy for scenario runs.
//!
//! Every failure is fail-fast: a scenario stops at the first error and is
//! never retried. Only [`HarnessError::ChannelFailure`] aborts the whole run.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::chunked::ChunkError;
use crate::event::EventParseError;
use crate::http::HttpParseError;

/// Result alias used throughout the harness.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// An event line did not match the oracle.
    #[error("protocol violation: expected event line {expected:?}, got {actual:?}")]
    ProtocolViolation { expected: String, actual: String },

    /// The decoded response disagrees with the oracle.
    #[error("content mismatch in {field}: expected {expected}, got {actual}")]
    ContentMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },

    /// The subject exited (or could not be started or stopped) mid-scenario.
    #[error("subject process failure: {0}")]
    ProcessFailure(String),

    /// The named pipe could not be created or opened.
    #[error("event channel failure at {}: {source}", path.display())]
    ChannelFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The subject closed its end of the event channel.
    #[error("event channel closed while waiting for {expected:?}")]
    ChannelClosed { expected: Option<String> },

    /// Opt-in event timeout elapsed.
    #[error("no event within {0:?}")]
    EventTimeout(Duration),

    /// The subject wrote a line outside the event grammar.
    #[error("malformed event line {line:?}: {source}")]
    MalformedEvent {
        line: String,
        #[source]
        source: EventParseError,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HarnessError {
    /// Whether the error is an infrastructure fault that should stop the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ChannelFailure { .. })
    }

    /// Short category name used in reports.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ProtocolViolation { .. } => "protocol_violation",
            Self::ContentMismatch { .. } => "content_mismatch",
            Self::ProcessFailure(_) => "process_failure",
            Self::ChannelFailure { .. } => "channel_failure",
            Self::ChannelClosed { .. } => "channel_closed",
            Self::EventTimeout(_) => "event_timeout",
            Self::MalformedEvent { .. } => "malformed_event",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Io(_) => "io",
        }
    }

    pub(crate) fn mismatch(
        field: &'static str,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ContentMismatch {
            field,
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<ChunkError> for HarnessError {
    fn from(e: ChunkError) -> Self {
        Self::MalformedResponse(e.to_string())
    }
}

impl From<HttpParseError> for HarnessError {
    fn from(e: HttpParseError) -> Self {
        Self::MalformedResponse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_channel_failures_are_fatal() {
        let fatal = HarnessError::ChannelFailure {
            path: PathBuf::from("/tmp/x/events"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(fatal.is_fatal());
        assert_eq!(fatal.category(), "channel_failure");

        let violation = HarnessError::ProtocolViolation {
            expected: "connection\n".into(),
            actual: "connection_finished\n".into(),
        };
        assert!(!violation.is_fatal());
        let msg = violation.to_string();
        assert!(msg.contains("\"connection\\n\""));
        assert!(msg.contains("\"connection_finished\\n\""));
    }

    #[test]
    fn malformed_event_names_the_raw_line() {
        let err = HarnessError::MalformedEvent {
            line: "connection extra\n".into(),
            source: EventParseError::Empty,
        };
        assert!(!err.is_fatal());
        assert_eq!(err.category(), "malformed_event");
        assert!(err.to_string().contains("\"connection extra\\n\""));
    }
}
