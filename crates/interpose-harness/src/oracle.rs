//! Expected behavior of a scenario, computed from its parameters alone.
//!
//! The oracle is a script: the client actions to perform interleaved with the
//! event lines that must arrive, in order. The expected trace is exactly the
//! [`Step::Expect`] entries of the script. Nothing here looks at what a
//! subject actually did.

use crate::event::{Event, StreamMode};
use crate::http::RequestHead;
use crate::matrix::Suite;
use crate::origin::origin_body;
use crate::scenario::{Behavior, Method, PathSuffix, Scenario};

/// Host the origin fixture listens on.
pub const ORIGIN_HOST: &str = "127.0.0.1";

/// Facts fixed before the subject starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleContext {
    pub origin_port: u16,
    pub request_body_len: usize,
}

impl OracleContext {
    pub fn new(scenario: &Scenario, origin_port: u16, base_seed: u64) -> Self {
        Self {
            origin_port,
            request_body_len: scenario.request_body_len(base_seed),
        }
    }
}

/// A request the client writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub method: Method,
    pub target: String,
    pub host: String,
    pub body_len: usize,
    pub expect_continue: bool,
}

impl RequestSpec {
    pub fn head(&self) -> RequestHead {
        let mut head = RequestHead::new(self.method.as_str(), self.target.clone())
            .header("Host", self.host.clone())
            .header("Accept-Encoding", "identity");
        if self.method.has_request_body() {
            head = head.header("Content-Length", self.body_len.to_string());
        }
        if self.expect_continue {
            head = head.header("Expect", "100-continue");
        }
        head
    }

    pub fn body(&self) -> Vec<u8> {
        request_body(self.body_len)
    }
}

/// Filler bytes used for request bodies.
pub fn request_body(len: usize) -> Vec<u8> {
    vec![b'a'; len]
}

/// What the client must read back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedResponse {
    /// Interim statuses relayed ahead of the final response.
    pub interim: Vec<u16>,
    pub status: u16,
    pub body: Vec<u8>,
    /// Stream mode carried by the last `response_pre_body` event before the
    /// response is read, if the subject emits one.
    pub stream_mode: Option<StreamMode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Open the client connection to the subject.
    Connect,
    /// Send CONNECT and read the 2xx that establishes the tunnel.
    OpenTunnel { host: String, port: u16 },
    /// Write a complete request per the scenario's send mode.
    SendRequest(RequestSpec),
    /// Write only the head, holding the body back.
    SendHead(RequestSpec),
    /// Write the body held back by the last [`Step::SendHead`].
    SendBody,
    /// Read one interim response head with this status.
    ReadInterim(u16),
    ReadResponse(ExpectedResponse),
    Expect(Event),
    Close,
    /// The origin's counter must have grown by this much since the start.
    CheckCounter(u64),
}

#[derive(Debug, Clone)]
pub struct Oracle {
    steps: Vec<Step>,
    counter_delta: u64,
}

impl Oracle {
    pub fn for_scenario(scenario: &Scenario, ctx: &OracleContext) -> Self {
        let mut oracle = Self {
            steps: Vec::new(),
            counter_delta: 0,
        };
        match scenario.suite {
            Suite::Behaviors | Suite::KeepAlive => oracle.plain(scenario, ctx),
            Suite::Continue => oracle.expect_continue(scenario, ctx),
            Suite::Tunnel => oracle.tunnel(scenario, ctx),
        }
        oracle
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Event lines the subject must write after its port, in order.
    pub fn trace(&self) -> Vec<Event> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                Step::Expect(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn responses(&self) -> impl Iterator<Item = &ExpectedResponse> {
        self.steps.iter().filter_map(|step| match step {
            Step::ReadResponse(expected) => Some(expected),
            _ => None,
        })
    }

    pub fn counter_delta(&self) -> u64 {
        self.counter_delta
    }

    fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    fn expect(&mut self, event: Event) {
        self.steps.push(Step::Expect(event));
    }

    fn finish(&mut self) {
        self.push(Step::Close);
        self.push(Step::CheckCounter(self.counter_delta));
        self.expect(Event::connection_finished());
    }

    fn plain(&mut self, scenario: &Scenario, ctx: &OracleContext) {
        let behavior = scenario.behavior;
        let path = scenario.suffix.path();

        self.push(Step::Connect);
        self.expect(Event::connection());

        for _ in 0..scenario.suite.requests_per_connection() {
            self.push(Step::SendRequest(absolute_request(scenario, ctx, false)));
            self.expect(Event::request_pre_body(
                &path,
                request_stream_mode(behavior, false),
            ));
            self.expect(Event::request_body_some_last(&path));
            if behavior.reaches_origin() {
                self.expect(Event::response_pre_body(&path, 200, StreamMode::Downstream));
                self.expect(Event::response_body_some_last(&path));
                self.counter_delta += 1;
            }
            self.expect(Event::response_finished());
            self.push(Step::ReadResponse(ExpectedResponse {
                interim: Vec::new(),
                status: 200,
                body: response_body(scenario, ctx.request_body_len),
                stream_mode: behavior.reaches_origin().then_some(StreamMode::Downstream),
            }));
        }

        self.finish();
    }

    fn expect_continue(&mut self, scenario: &Scenario, ctx: &OracleContext) {
        let behavior = scenario.behavior;
        let suffix = scenario.suffix;
        let path = suffix.path();

        self.push(Step::Connect);
        self.expect(Event::connection());
        self.push(Step::SendHead(absolute_request(scenario, ctx, true)));
        self.expect(Event::request_pre_body(
            &path,
            request_stream_mode(behavior, true),
        ));

        let mut last_mode = None;
        if behavior.reaches_origin() {
            let code = if behavior.generates_at_response_pre_body() {
                200
            } else if suffix.rejects_continue() {
                404
            } else {
                100
            };
            self.expect(Event::response_pre_body(&path, code, StreamMode::Downstream));
            last_mode = Some(StreamMode::Downstream);
        }

        if suffix.rejects_continue() || behavior.generates_404() {
            self.push(Step::ReadResponse(ExpectedResponse {
                interim: Vec::new(),
                status: 404,
                body: rejection_body(behavior, suffix),
                stream_mode: last_mode,
            }));
            if suffix.rejects_continue() {
                self.expect(Event::response_body_some_last(&path));
            }
            self.expect(Event::response_finished());
        } else {
            self.push(Step::ReadInterim(100));
            self.push(Step::SendBody);
            self.expect(Event::request_body_some_last(&path));
            if behavior.reaches_origin() {
                self.expect(Event::response_pre_body(&path, 200, StreamMode::Downstream));
                self.expect(Event::response_body_some_last(&path));
                self.counter_delta += 1;
            }
            self.expect(Event::response_finished());
            self.push(Step::ReadResponse(ExpectedResponse {
                interim: Vec::new(),
                status: 200,
                body: response_body(scenario, ctx.request_body_len),
                stream_mode: last_mode,
            }));
        }

        self.finish();
    }

    fn tunnel(&mut self, scenario: &Scenario, ctx: &OracleContext) {
        self.push(Step::Connect);
        self.expect(Event::connection());
        self.push(Step::OpenTunnel {
            host: ORIGIN_HOST.to_string(),
            port: ctx.origin_port,
        });
        self.expect(Event::connect(ORIGIN_HOST, ctx.origin_port));

        let mut request = absolute_request(scenario, ctx, false);
        request.target = scenario.suffix.path();
        self.push(Step::SendRequest(request));
        self.push(Step::ReadResponse(ExpectedResponse {
            interim: Vec::new(),
            status: 200,
            body: origin_body(scenario.method, ctx.request_body_len),
            stream_mode: None,
        }));
        self.counter_delta += 1;

        self.finish();
    }
}

fn absolute_request(
    scenario: &Scenario,
    ctx: &OracleContext,
    expect_continue: bool,
) -> RequestSpec {
    let authority = format!("{ORIGIN_HOST}:{}", ctx.origin_port);
    RequestSpec {
        method: scenario.method,
        target: format!("http://{authority}{}", scenario.suffix.path()),
        host: authority,
        body_len: ctx.request_body_len,
        expect_continue,
    }
}

/// Stream mode the subject reports in `request_pre_body`.
pub fn request_stream_mode(behavior: Behavior, expect_continue: bool) -> StreamMode {
    if expect_continue {
        // The subject answers the expectation itself when it short-circuits.
        return if behavior.short_circuits() {
            StreamMode::Downstream
        } else {
            StreamMode::Upstream
        };
    }
    if behavior.buffers_request() || behavior.generates_at_request_body_last() {
        StreamMode::None
    } else if behavior.generates_at_request_pre_body() {
        StreamMode::Downstream
    } else {
        StreamMode::Upstream
    }
}

/// Final body the client must decode for a 200 response.
pub fn response_body(scenario: &Scenario, request_body_len: usize) -> Vec<u8> {
    let behavior = scenario.behavior;
    if scenario.method == Method::Head {
        return Vec::new();
    }
    if behavior.synthesizes_body() {
        return synthesized_body(behavior);
    }

    let base = if !scenario.suffix.has_body() || behavior.synthesizes_response() {
        Vec::new()
    } else {
        origin_body(scenario.method, request_body_len)
    };

    if behavior.prepends() {
        [b"<h1>Pre body</h1>".as_slice(), base.as_slice()].concat()
    } else if behavior.appends() {
        [base.as_slice(), b"<h1>Post body</h1>".as_slice()].concat()
    } else {
        base
    }
}

fn synthesized_body(behavior: Behavior) -> Vec<u8> {
    format!("<h1>{behavior}</h1>").into_bytes()
}

fn rejection_body(behavior: Behavior, suffix: PathSuffix) -> Vec<u8> {
    match suffix {
        PathSuffix::RejectContinueBody => b"nope".to_vec(),
        PathSuffix::RejectContinueNoBody => Vec::new(),
        _ if behavior.synthesizes_body() => synthesized_body(behavior),
        _ => Vec::new(),
    }
}
