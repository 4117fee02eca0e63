//! interpose-harness: trace-synchronised conformance testing for a streaming
//! HTTP interception subject.
//!
//! The subject under test is an external process. It is started with the path
//! of a named pipe as its first argument and writes one line per lifecycle
//! event to that pipe. The harness drives real network exchanges through the
//! subject and checks, in order, that the event lines and the bytes seen on
//! the client socket match an oracle computed purely from the scenario.
//!
//! # Event grammar
//!
//! ```text
//! <port>
//! connection
//! connect <host> <port>
//! request_pre_body <path> <stream-mode>
//! request_body_some_last <path>
//! response_pre_body <path> <status> <stream-mode>
//! response_body_some_last <path>
//! response_finished
//! connection_finished
//! ```
//!
//! # Layout
//!
//! - [`channel`] and [`launcher`] start the subject and collect its events.
//! - [`origin`] is the reference origin the subject forwards to; it owns the
//!   request [`counter`].
//! - [`matrix`], [`scenario`] and [`oracle`] declare what to run and what to
//!   expect.
//! - [`driver`] executes one scenario and [`report`] summarises a run.

pub mod asserter;
pub mod channel;
pub mod chunked;
pub mod client;
pub mod config;
pub mod counter;
pub mod driver;
pub mod error;
pub mod event;
pub mod http;
pub mod launcher;
pub mod logging;
pub mod matrix;
pub mod oracle;
pub mod origin;
pub mod report;
pub mod scenario;

pub use config::{HarnessConfig, OutputMode};
pub use counter::RequestCounter;
pub use driver::ScenarioRunner;
pub use error::{HarnessError, Result};
pub use event::{Event, EventKind, StreamMode};
pub use launcher::{Launcher, ProcessLauncher, Subject, SubjectProcess};
pub use matrix::Suite;
pub use oracle::Oracle;
pub use report::{RunSummary, ScenarioOutcome};
pub use scenario::{Behavior, Method, PathSuffix, Scenario, SendMode};
