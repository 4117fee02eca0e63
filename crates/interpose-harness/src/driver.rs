//! Scenario execution.
//!
//! Per scenario: a fresh origin, the oracle, a fresh event channel, a fresh
//! subject. The oracle's script is then executed step by step, socket I/O
//! interleaved with blocking event reads, and the subject is stopped whether
//! or not the script succeeded.

use std::net::{Ipv4Addr, SocketAddr};

use crate::asserter::{TraceAsserter, check_counter};
use crate::channel::EventChannel;
use crate::client::{ClientConnection, Direction, TrafficLog};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::launcher::{Launcher, Subject};
use crate::oracle::{Oracle, OracleContext, Step};
use crate::origin::OriginServer;
use crate::report::{RunSummary, ScenarioOutcome};
use crate::scenario::Scenario;

pub struct ScenarioRunner<L> {
    launcher: L,
    config: HarnessConfig,
}

impl<L: Launcher> ScenarioRunner<L> {
    pub fn new(launcher: L, config: HarnessConfig) -> Self {
        Self { launcher, config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run scenarios in order, stopping early on a fatal fault.
    pub async fn run_all(&self, scenarios: &[Scenario]) -> RunSummary {
        let mut summary = RunSummary::default();
        for scenario in scenarios {
            let outcome = self.run_scenario(scenario).await;
            let fatal = outcome.fatal;
            summary.record(outcome);
            if fatal {
                tracing::error!(%scenario, "infrastructure fault, aborting the run");
                summary.aborted = true;
                break;
            }
        }
        summary
    }

    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioOutcome {
        let name = scenario.name();
        tracing::info!(scenario = %name, "scenario started");

        let mut traffic = TrafficLog::default();
        match self.execute(scenario, &mut traffic).await {
            Ok(()) => {
                tracing::info!(scenario = %name, "scenario passed");
                ScenarioOutcome::pass(name)
            }
            Err(e) => {
                tracing::warn!(scenario = %name, error = %e, "scenario failed");
                let dump = (!traffic.is_empty()).then(|| traffic.hex_dump());
                ScenarioOutcome::fail(name, &e).with_traffic(dump)
            }
        }
    }

    async fn execute(&self, scenario: &Scenario, traffic: &mut TrafficLog) -> Result<()> {
        let seed = scenario.seed(self.config.seed);
        let origin = OriginServer::start(scenario.suite.origin_config(seed)).await?;
        let ctx = OracleContext::new(scenario, origin.port(), self.config.seed);
        let oracle = Oracle::for_scenario(scenario, &ctx);

        let channel = EventChannel::create()?.with_timeout(self.config.event_timeout);
        let mut subject = self
            .launcher
            .launch(
                channel.path(),
                &[scenario.behavior.as_str(), scenario.send_mode.as_str()],
            )
            .await?;

        let mut run = ScriptRun {
            asserter: TraceAsserter::new(channel),
            origin: &origin,
            scenario,
            client: None,
            closed: TrafficLog::default(),
            baseline: origin.counter().value(),
        };
        let mut result = run.execute(&oracle).await;
        *traffic = run.take_traffic();

        // A subject that died mid-script shows up first as a closed channel,
        // a reset socket or a truncated response; report the exit instead.
        if !result.as_ref().is_err_and(HarnessError::is_fatal)
            && let Err(e) = subject.ensure_running()
        {
            result = Err(e);
        }
        let stopped = subject.stop().await;
        // The channel outlives the subject so a parked drain thread is
        // released only after the writer is gone.
        drop(run);
        origin.shutdown();

        result.and(stopped)
    }
}

struct ScriptRun<'a> {
    asserter: TraceAsserter,
    origin: &'a OriginServer,
    scenario: &'a Scenario,
    client: Option<ClientConnection>,
    closed: TrafficLog,
    baseline: u64,
}

impl ScriptRun<'_> {
    fn client(&mut self) -> Result<&mut ClientConnection> {
        self.client.as_mut().ok_or_else(|| {
            HarnessError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "script step needs an open client connection",
            ))
        })
    }

    /// Traffic of the open connection, or of the last one closed.
    fn take_traffic(&mut self) -> TrafficLog {
        match self.client.take() {
            Some(client) => client.into_traffic(),
            None => std::mem::take(&mut self.closed),
        }
    }

    async fn execute(&mut self, oracle: &Oracle) -> Result<()> {
        let port = self.asserter.read_port().await?;
        tracing::debug!(scenario = %self.scenario, port, "subject listening");
        let subject_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

        for step in oracle.steps() {
            tracing::trace!(?step, "step");
            match step {
                Step::Connect => {
                    let client =
                        ClientConnection::connect(subject_addr, self.scenario.send_mode).await?;
                    self.client = Some(client);
                }
                Step::OpenTunnel { host, port } => self.client()?.open_tunnel(host, *port).await?,
                Step::SendRequest(request) => self.client()?.send_request(request).await?,
                Step::SendHead(request) => self.client()?.send_head(request).await?,
                Step::SendBody => self.client()?.send_body().await?,
                Step::ReadInterim(status) => {
                    let head = self.client()?.read_interim().await?;
                    if head.status != *status {
                        return Err(HarnessError::mismatch(
                            "interim status",
                            status.to_string(),
                            head.status.to_string(),
                        ));
                    }
                }
                Step::ReadResponse(expected) => {
                    let response = self.client()?.read_response().await?;
                    self.asserter.check_response(expected, &response)?;
                }
                Step::Expect(event) => self.asserter.expect(event).await?,
                Step::Close => {
                    if let Some(client) = self.client.take() {
                        self.closed = client.close().await;
                        tracing::debug!(
                            sent = self.closed.total(Direction::Sent),
                            received = self.closed.total(Direction::Received),
                            "client closed"
                        );
                    }
                }
                Step::CheckCounter(delta) => {
                    check_counter(self.origin.counter(), self.baseline, *delta)?;
                }
            }
        }
        Ok(())
    }
}
