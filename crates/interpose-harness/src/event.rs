//! Lifecycle events written by the subject on the event channel.

use std::fmt;
use std::str::FromStr;

/// Kind of lifecycle event, the first token of an event line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connection,
    Connect,
    RequestPreBody,
    RequestBodySomeLast,
    ResponsePreBody,
    ResponseBodySomeLast,
    ResponseFinished,
    ConnectionFinished,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        Self::Connection,
        Self::Connect,
        Self::RequestPreBody,
        Self::RequestBodySomeLast,
        Self::ResponsePreBody,
        Self::ResponseBodySomeLast,
        Self::ResponseFinished,
        Self::ConnectionFinished,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Connect => "connect",
            Self::RequestPreBody => "request_pre_body",
            Self::RequestBodySomeLast => "request_body_some_last",
            Self::ResponsePreBody => "response_pre_body",
            Self::ResponseBodySomeLast => "response_body_some_last",
            Self::ResponseFinished => "response_finished",
            Self::ConnectionFinished => "connection_finished",
        }
    }

    /// Number of arguments following the kind token.
    pub fn arity(self) -> usize {
        match self {
            Self::Connection | Self::ResponseFinished | Self::ConnectionFinished => 0,
            Self::RequestBodySomeLast | Self::ResponseBodySomeLast => 1,
            Self::Connect | Self::RequestPreBody => 2,
            Self::ResponsePreBody => 3,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EventParseError::UnknownKind(s.to_string()))
    }
}

/// Whether body bytes are relayed live or buffered before any byte is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamMode {
    /// Bytes are relayed as they arrive from the origin.
    Upstream,
    /// Bytes are delivered to the client as they are produced.
    Downstream,
    /// The body is fully buffered or synthesized first.
    None,
}

impl StreamMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Downstream => "downstream",
            Self::None => "none",
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamMode {
    type Err = EventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upstream" => Ok(Self::Upstream),
            "downstream" => Ok(Self::Downstream),
            "none" => Ok(Self::None),
            other => Err(EventParseError::InvalidStreamMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventParseError {
    #[error("empty event line")]
    Empty,
    #[error("unknown event kind {0:?}")]
    UnknownKind(String),
    #[error("{kind} takes {expected} argument(s), got {actual}")]
    Arity {
        kind: EventKind,
        expected: usize,
        actual: usize,
    },
    #[error("invalid stream mode {0:?}")]
    InvalidStreamMode(String),
    #[error("invalid status code {0:?}")]
    InvalidStatus(String),
}

/// One parsed event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    kind: EventKind,
    args: Vec<String>,
}

impl Event {
    fn new(kind: EventKind, args: Vec<String>) -> Self {
        debug_assert_eq!(args.len(), kind.arity());
        Self { kind, args }
    }

    pub fn connection() -> Self {
        Self::new(EventKind::Connection, Vec::new())
    }

    pub fn connect(host: &str, port: u16) -> Self {
        Self::new(EventKind::Connect, vec![host.to_string(), port.to_string()])
    }

    pub fn request_pre_body(path: &str, mode: StreamMode) -> Self {
        Self::new(
            EventKind::RequestPreBody,
            vec![path.to_string(), mode.as_str().to_string()],
        )
    }

    pub fn request_body_some_last(path: &str) -> Self {
        Self::new(EventKind::RequestBodySomeLast, vec![path.to_string()])
    }

    pub fn response_pre_body(path: &str, status: u16, mode: StreamMode) -> Self {
        Self::new(
            EventKind::ResponsePreBody,
            vec![
                path.to_string(),
                status.to_string(),
                mode.as_str().to_string(),
            ],
        )
    }

    pub fn response_body_some_last(path: &str) -> Self {
        Self::new(EventKind::ResponseBodySomeLast, vec![path.to_string()])
    }

    pub fn response_finished() -> Self {
        Self::new(EventKind::ResponseFinished, Vec::new())
    }

    pub fn connection_finished() -> Self {
        Self::new(EventKind::ConnectionFinished, Vec::new())
    }

    /// Parse a single line; the trailing line terminator is optional.
    pub fn parse(line: &str) -> Result<Self, EventParseError> {
        let mut tokens = line.split_whitespace();
        let kind: EventKind = tokens.next().ok_or(EventParseError::Empty)?.parse()?;
        let args: Vec<String> = tokens.map(str::to_string).collect();
        if args.len() != kind.arity() {
            return Err(EventParseError::Arity {
                kind,
                expected: kind.arity(),
                actual: args.len(),
            });
        }

        match kind {
            EventKind::RequestPreBody => {
                args[1].parse::<StreamMode>()?;
            }
            EventKind::ResponsePreBody => {
                args[1]
                    .parse::<u16>()
                    .map_err(|_| EventParseError::InvalidStatus(args[1].clone()))?;
                args[2].parse::<StreamMode>()?;
            }
            _ => {}
        }

        Ok(Self { kind, args })
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Request path carried by request/response events.
    pub fn path(&self) -> Option<&str> {
        match self.kind {
            EventKind::RequestPreBody
            | EventKind::RequestBodySomeLast
            | EventKind::ResponsePreBody
            | EventKind::ResponseBodySomeLast => Some(&self.args[0]),
            _ => None,
        }
    }

    pub fn stream_mode(&self) -> Option<StreamMode> {
        let raw = match self.kind {
            EventKind::RequestPreBody => &self.args[1],
            EventKind::ResponsePreBody => &self.args[2],
            _ => return None,
        };
        raw.parse().ok()
    }

    /// The canonical newline-terminated line for this event.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.as_str())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl FromStr for Event {
    type Err = EventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
