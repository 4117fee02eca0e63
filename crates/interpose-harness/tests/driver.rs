//! Full scenarios against an in-process pass-through subject.
//!
//! The fake subject forwards each request to the origin unchanged and writes
//! the event lines a conforming subject writes for the `default` behavior:
//! plain requests, `Expect: 100-continue`, CONNECT tunnels and several
//! requests on one client connection.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use interpose_harness::chunked::{self, Decoded};
use interpose_harness::http::{self, BodyFraming, RequestHead, ResponseHead};
use interpose_harness::{
    HarnessConfig, HarnessError, Launcher, Result, Scenario, ScenarioRunner, Subject,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fake {
    /// Behaves like a conforming subject for `default`.
    PassThrough,
    /// Reports buffering although it streams.
    WrongStreamMode,
    /// The channel cannot be opened at all.
    BrokenChannel,
    /// Dies while relaying the first response body.
    Crash,
}

struct FakeLauncher(Fake);

struct FakeSubject {
    thread: Option<JoinHandle<io::Result<()>>>,
    crashed: Arc<AtomicBool>,
}

impl Launcher for FakeLauncher {
    type Subject = FakeSubject;

    async fn launch(&self, channel: &Path, scenario_args: &[&str]) -> Result<FakeSubject> {
        if self.0 == Fake::BrokenChannel {
            return Err(HarnessError::ChannelFailure {
                path: channel.to_path_buf(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        assert_eq!(scenario_args[0], "default");
        let fake = FakeProxy {
            kind: self.0,
            crashed: Arc::new(AtomicBool::new(false)),
        };
        let crashed = fake.crashed.clone();
        let path = channel.to_path_buf();
        Ok(FakeSubject {
            thread: Some(std::thread::spawn(move || fake.serve(path))),
            crashed,
        })
    }
}

impl Subject for FakeSubject {
    fn ensure_running(&mut self) -> Result<()> {
        if self.crashed.load(Ordering::Acquire) {
            return Err(HarnessError::ProcessFailure(
                "subject exited with status 101".into(),
            ));
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(thread) = self.thread.take()
            && thread.is_finished()
        {
            let _ = thread.join();
        }
        Ok(())
    }
}

fn invalid(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

/// Next request head, or `None` if the client closed between requests.
fn read_request_head(reader: &mut impl BufRead) -> io::Result<Option<RequestHead>> {
    let mut head = Vec::new();
    loop {
        let start = head.len();
        if reader.read_until(b'\n', &mut head)? == 0 {
            if head.is_empty() {
                return Ok(None);
            }
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        if matches!(&head[start..], b"\r\n" | b"\n") {
            return RequestHead::parse(&head).map(Some).map_err(invalid);
        }
    }
}

/// A connection to the origin, read one response at a time.
struct Upstream {
    stream: TcpStream,
    buf: Vec<u8>,
    method: String,
}

/// One response as the origin sent it.
struct Relayed {
    head: ResponseHead,
    framing: BodyFraming,
    raw: Vec<u8>,
}

impl Upstream {
    fn open(authority: &str, method: &str) -> io::Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(authority)?,
            buf: Vec::new(),
            method: method.to_string(),
        })
    }

    fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; 8192];
        let n = self.stream.read(&mut chunk)?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn fill_or_eof(&mut self) -> io::Result<()> {
        match self.fill()? {
            0 => Err(io::ErrorKind::UnexpectedEof.into()),
            _ => Ok(()),
        }
    }

    /// Read one response head and the body its framing announces.
    fn read_response(&mut self) -> io::Result<Relayed> {
        let head_end = loop {
            if let Some(end) = http::find_head_end(&self.buf) {
                break end;
            }
            self.fill_or_eof()?;
        };
        let head = ResponseHead::parse(&self.buf[..head_end]).map_err(invalid)?;
        let framing = head.body_framing(&self.method).map_err(invalid)?;
        let body_len = match framing {
            BodyFraming::Empty => 0,
            BodyFraming::Length(len) => {
                while self.buf.len() < head_end + len {
                    self.fill_or_eof()?;
                }
                len
            }
            BodyFraming::Chunked => loop {
                if let Decoded::Complete { consumed, .. } =
                    chunked::decode(&self.buf[head_end..]).map_err(invalid)?
                {
                    break consumed;
                }
                self.fill_or_eof()?;
            },
            BodyFraming::UntilClose => {
                while self.fill()? > 0 {}
                self.buf.len() - head_end
            }
        };
        let raw = self.buf.drain(..head_end + body_len).collect();
        Ok(Relayed { head, framing, raw })
    }
}

struct FakeProxy {
    kind: Fake,
    crashed: Arc<AtomicBool>,
}

impl FakeProxy {
    fn serve(self, channel: PathBuf) -> io::Result<()> {
        let mut events = OpenOptions::new().write(true).open(channel)?;
        let listener = TcpListener::bind("127.0.0.1:0")?;
        writeln!(events, "{}", listener.local_addr()?.port())?;

        let (mut client, _) = listener.accept()?;
        events.write_all(b"connection\n")?;
        let mut reader = BufReader::new(client.try_clone()?);

        while let Some(request) = read_request_head(&mut reader)? {
            if request.method == "CONNECT" {
                tunnel(&request, &mut events, reader, client)?;
                break;
            }
            if !self.exchange(&request, &mut events, &mut reader, &mut client)? {
                client.shutdown(Shutdown::Write)?;
                let mut rest = Vec::new();
                let _ = reader.read_to_end(&mut rest);
                break;
            }
        }

        events.write_all(b"connection_finished\n")?;
        Ok(())
    }

    /// Forward one request and relay its response; returns whether the
    /// client connection stays usable.
    fn exchange(
        &self,
        request: &RequestHead,
        events: &mut File,
        reader: &mut BufReader<TcpStream>,
        client: &mut TcpStream,
    ) -> io::Result<bool> {
        let path = request.path().to_string();
        let mode = match self.kind {
            Fake::WrongStreamMode => "none",
            _ => "upstream",
        };
        writeln!(events, "request_pre_body {path} {mode}")?;

        let authority = request
            .target
            .strip_prefix("http://")
            .and_then(|rest| rest.split('/').next())
            .ok_or_else(|| invalid("expected an absolute-form target"))?;
        let mut upstream = Upstream::open(authority, &request.method)?;
        let mut forwarded = RequestHead::new(&request.method, path.clone());
        for (name, value) in request.headers.iter() {
            forwarded = forwarded.header(name, value);
        }
        upstream.stream.write_all(&forwarded.to_bytes())?;

        if request.headers.expects_continue() {
            let answer = upstream.read_response()?;
            writeln!(events, "response_pre_body {path} {} downstream", answer.head.status)?;
            client.write_all(&answer.raw)?;
            if !answer.head.is_interim() {
                writeln!(events, "response_body_some_last {path}")?;
                events.write_all(b"response_finished\n")?;
                return Ok(answer.framing != BodyFraming::UntilClose);
            }
        }

        let mut body = vec![0; request.headers.content_length().map_err(invalid)?.unwrap_or(0)];
        reader.read_exact(&mut body)?;
        writeln!(events, "request_body_some_last {path}")?;
        upstream.stream.write_all(&body)?;

        let response = upstream.read_response()?;
        writeln!(events, "response_pre_body {path} {} downstream", response.head.status)?;
        if self.kind == Fake::Crash {
            writeln!(events, "response_body_some_last {path}")?;
            events.write_all(b"response_finished\n")?;
            client.write_all(&response.raw[..response.raw.len() - 3])?;
            self.crashed.store(true, Ordering::Release);
            return Err(io::Error::other("crashed mid-body"));
        }
        client.write_all(&response.raw)?;
        writeln!(events, "response_body_some_last {path}")?;
        events.write_all(b"response_finished\n")?;
        Ok(response.framing != BodyFraming::UntilClose)
    }
}

/// Accept a CONNECT and splice bytes both ways until each side finishes.
fn tunnel(
    request: &RequestHead,
    events: &mut File,
    mut reader: BufReader<TcpStream>,
    mut client: TcpStream,
) -> io::Result<()> {
    let (host, port) = request
        .target
        .rsplit_once(':')
        .ok_or_else(|| invalid("CONNECT target without a port"))?;
    writeln!(events, "connect {host} {port}")?;

    let mut upstream = TcpStream::connect(&request.target)?;
    client.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")?;

    let mut upstream_writer = upstream.try_clone()?;
    std::thread::scope(|scope| {
        let outbound = scope.spawn(move || {
            io::copy(&mut reader, &mut upstream_writer)?;
            upstream_writer.shutdown(Shutdown::Write)
        });
        io::copy(&mut upstream, &mut client)?;
        client.shutdown(Shutdown::Write)?;
        outbound
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("tunnel thread panicked")))
    })
}

fn runner(fake: Fake) -> ScenarioRunner<FakeLauncher> {
    let mut config = HarnessConfig::new("in-process");
    config.seed = 11;
    config.event_timeout = Some(Duration::from_secs(10));
    ScenarioRunner::new(FakeLauncher(fake), config)
}

fn scenario(name: &str) -> Scenario {
    Scenario::from_name(name).unwrap()
}

async fn assert_passes(names: &[&str]) {
    let scenarios: Vec<Scenario> = names.iter().copied().map(scenario).collect();
    let summary = runner(Fake::PassThrough).run_all(&scenarios).await;
    for outcome in &summary.outcomes {
        assert!(outcome.passed, "{}: {:?}", outcome.scenario, outcome.failure_report());
    }
    assert_eq!(summary.passed(), scenarios.len());
    assert_eq!(summary.exit_code(), 0);
}

#[tokio::test]
async fn pass_through_get() {
    let outcome = runner(Fake::PassThrough)
        .run_scenario(&scenario("behaviors.default.immediately.GET.body_200_length"))
        .await;
    assert!(outcome.passed, "{:?}", outcome.failure_report());
}

#[tokio::test]
async fn pass_through_matrix_slice() {
    assert_passes(&[
        "behaviors.default.collect.GET.body_200_no_length",
        "behaviors.default.immediately.HEAD.body_200_length",
        "behaviors.default.collect.POST.body_200_chunked_padded_length",
        "behaviors.default.immediately.POST.no_body_200_no_length",
        "behaviors.default.immediately.GET.body_200_chunked",
    ])
    .await;
}

#[tokio::test]
async fn tunnel_to_the_origin() {
    assert_passes(&[
        "tunnel.default.immediately.GET.body_200_length",
        "tunnel.default.collect.GET.body_200_chunked",
    ])
    .await;
}

#[tokio::test]
async fn accepted_continue_relays_the_interim_response() {
    assert_passes(&[
        "continue.default.collect.POST.body_200_length",
        "continue.default.immediately.POST.no_body_200_length",
    ])
    .await;
}

#[tokio::test]
async fn rejected_continue_never_sends_the_body() {
    assert_passes(&[
        "continue.default.immediately.POST.reject_continue_no_body",
        "continue.default.collect.POST.reject_continue_body",
    ])
    .await;
}

#[tokio::test]
async fn keepalive_serves_two_requests_on_one_connection() {
    assert_passes(&[
        "keepalive.default.immediately.GET.body_200_length",
        "keepalive.default.collect.GET.body_200_chunked",
    ])
    .await;
}

#[tokio::test]
async fn wrong_stream_mode_is_a_protocol_violation() {
    let outcome = runner(Fake::WrongStreamMode)
        .run_scenario(&scenario("behaviors.default.immediately.GET.body_200_length"))
        .await;

    assert!(!outcome.passed);
    assert!(!outcome.fatal);
    assert_eq!(outcome.category, Some("protocol_violation"));
    let error = outcome.error.as_deref().unwrap();
    assert!(error.contains("request_pre_body /body_200_length/ upstream"), "{error}");
    assert!(error.contains("request_pre_body /body_200_length/ none"), "{error}");
    assert!(outcome.traffic.as_deref().unwrap().contains("client->subject"));
}

#[tokio::test]
async fn subject_exit_mid_body_is_a_process_failure() {
    let outcome = runner(Fake::Crash)
        .run_scenario(&scenario("behaviors.default.immediately.GET.body_200_length"))
        .await;

    assert!(!outcome.passed);
    assert!(!outcome.fatal);
    assert_eq!(outcome.category, Some("process_failure"), "{:?}", outcome.error);
    assert!(outcome.error.as_deref().unwrap().contains("status 101"));
}

#[tokio::test]
async fn channel_failure_aborts_the_run() {
    let scenarios = [
        scenario("behaviors.default.immediately.GET.body_200_length"),
        scenario("behaviors.default.collect.GET.body_200_length"),
    ];
    let summary = runner(Fake::BrokenChannel).run_all(&scenarios).await;

    assert!(summary.aborted);
    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(summary.outcomes[0].category, Some("channel_failure"));
    assert_eq!(summary.exit_code(), 2);
}
