//! Ordered assertions against the event channel and the client's responses.

use crate::channel::EventChannel;
use crate::client::Response;
use crate::counter::RequestCounter;
use crate::error::{HarnessError, Result};
use crate::event::{Event, EventKind, StreamMode};
use crate::oracle::ExpectedResponse;

/// Consumes the event channel one line at a time, each against the next
/// expected event.
pub struct TraceAsserter {
    channel: EventChannel,
    observed: Vec<Event>,
}

impl TraceAsserter {
    pub fn new(channel: EventChannel) -> Self {
        Self {
            channel,
            observed: Vec::new(),
        }
    }

    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }

    pub async fn read_port(&mut self) -> Result<u16> {
        self.channel.read_port().await
    }

    /// Dequeue the next line; it must parse as an event and be exactly
    /// `expected`'s line.
    pub async fn expect(&mut self, expected: &Event) -> Result<()> {
        let wanted = expected.to_line();
        let line = self.channel.next_line_for(&wanted).await?;
        let event = match Event::parse(&line) {
            Ok(event) => event,
            Err(source) => return Err(HarnessError::MalformedEvent { line, source }),
        };
        if line != wanted {
            return Err(HarnessError::ProtocolViolation {
                expected: wanted,
                actual: line,
            });
        }
        self.observed.push(event);
        Ok(())
    }

    /// Events read from the subject so far, in order.
    pub fn observed(&self) -> &[Event] {
        &self.observed
    }

    /// Stream mode of the most recent `response_pre_body`.
    pub fn response_stream_mode(&self) -> Option<StreamMode> {
        self.observed
            .iter()
            .rev()
            .find(|e| e.kind() == EventKind::ResponsePreBody)
            .and_then(Event::stream_mode)
    }

    pub fn check_response(&self, expected: &ExpectedResponse, actual: &Response) -> Result<()> {
        if actual.interim != expected.interim {
            return Err(HarnessError::mismatch(
                "interim statuses",
                format!("{:?}", expected.interim),
                format!("{:?}", actual.interim),
            ));
        }
        if actual.head.status != expected.status {
            return Err(HarnessError::mismatch(
                "status",
                expected.status.to_string(),
                actual.head.status.to_string(),
            ));
        }
        if actual.body != expected.body {
            return Err(HarnessError::mismatch(
                "body",
                format!("{:?}", String::from_utf8_lossy(&expected.body)),
                format!("{:?}", String::from_utf8_lossy(&actual.body)),
            ));
        }
        let mode = self.response_stream_mode();
        if mode != expected.stream_mode {
            return Err(HarnessError::mismatch(
                "stream mode",
                format!("{:?}", expected.stream_mode),
                format!("{mode:?}"),
            ));
        }
        Ok(())
    }
}

/// The counter must have moved by exactly `delta` since `baseline`.
pub fn check_counter(counter: &RequestCounter, baseline: u64, delta: u64) -> Result<()> {
    let actual = counter.value().saturating_sub(baseline);
    if actual != delta {
        return Err(HarnessError::mismatch(
            "request count",
            delta.to_string(),
            actual.to_string(),
        ));
    }
    Ok(())
}
