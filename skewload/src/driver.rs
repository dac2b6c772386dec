// Copyright 2025 skewload Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The load driver: a pool of request workers, a supervisor enforcing the termination policy and the shutdown
//! sequence that keeps the report consistent.

use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::Local;
use hdrhistogram::Histogram;
use itertools::Itertools;
use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};
use skewload_common::error::{Error, ErrorKind, Result};
use tokio::task::JoinHandle;

use crate::{
    client::{PacketLost, UdpClient},
    config::ExperimentConfig,
    outcome::RequestOutcome,
    selector::KeySelector,
    server::ServerEndpoint,
    sink::{outcome_channel, OutcomeSender, ResultSink, SinkConfig, SinkHandle},
};

/// Supervisor polling period.
pub const SUPERVISOR_TICK: Duration = Duration::from_secs(1);

/// Upper bound on waiting for the sink to flush the report on shutdown.
pub const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Why an experiment stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured duration elapsed.
    Deadline,
    /// The report holds the configured number of outcomes.
    MaxRequests,
    /// Every worker exited on its own.
    WorkersFinished,
    /// The sink terminated.
    SinkFinished,
    /// A worker hit a fatal error.
    WorkerFailed,
    /// Stopped through a [`DriverHandle`].
    External,
}

#[derive(Debug, Default)]
struct Control {
    stopped: AtomicBool,
    reason: Mutex<Option<StopReason>>,
    tickets: AtomicU64,
}

impl Control {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Returns `true` for the call that actually stopped the experiment.
    fn stop(&self, reason: StopReason) -> bool {
        let mut guard = self.reason.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(reason);
        self.stopped.store(true, Ordering::Release);
        tracing::info!("[driver]: stopping, reason: {reason:?}");
        true
    }

    fn reason(&self) -> Option<StopReason> {
        *self.reason.lock()
    }

    /// Reserve one of `max` requests. Returns `false` once all are taken.
    fn take_ticket(&self, max: u64) -> bool {
        self.tickets
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| (taken < max).then_some(taken + 1))
            .is_ok()
    }
}

/// Stops a running [`Driver`] from outside, e.g. on CTRL-C.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    control: Arc<Control>,
}

impl DriverHandle {
    /// Stop the experiment. Calling it more than once, or after the experiment stopped, has no effect.
    pub fn stop(&self) {
        self.control.stop(StopReason::External);
    }

    /// Whether the experiment is stopping or stopped.
    pub fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }
}

/// Everything a worker owns. Moved into the worker task.
struct WorkerContext {
    id: usize,
    client: UdpClient,
    rng: StdRng,
    histogram: Histogram<u64>,
    requests: u64,
    lost: u64,
    selector: Arc<KeySelector>,
    config: Arc<ExperimentConfig>,
    control: Arc<Control>,
    tx: OutcomeSender,
}

/// What a worker hands back when it exits.
#[derive(Debug)]
struct WorkerSummary {
    requests: u64,
    lost: u64,
    histogram: Histogram<u64>,
}

impl WorkerContext {
    async fn run(mut self) -> Result<WorkerSummary> {
        tracing::debug!("[worker {}]: started", self.id);
        let res = self.run_loop().await;
        self.client.close();

        if let Err(e) = res {
            tracing::error!("[worker {}]: terminated by fatal error: {e}", self.id);
            self.control.stop(StopReason::WorkerFailed);
            return Err(e.with_context("worker", self.id));
        }

        tracing::debug!("[worker {}]: finished after {} requests", self.id, self.requests);
        Ok(WorkerSummary {
            requests: self.requests,
            lost: self.lost,
            histogram: self.histogram,
        })
    }

    async fn run_loop(&mut self) -> Result<()> {
        let max_requests = self.config.termination.max_requests();

        while !self.control.is_stopped() {
            if self.config.exact_count {
                if let Some(max) = max_requests {
                    if !self.control.take_ticket(max) {
                        break;
                    }
                }
            }

            let key = self.selector.pick_key(&mut self.rng)?.key();
            let time = Local::now();
            let start = Instant::now();
            let res = self.client.get(key).await;
            let elapsed = start.elapsed();

            match res {
                Ok(response) => {
                    let latency_ms = elapsed.as_secs_f64() * 1000.0;
                    self.histogram.saturating_record(elapsed.as_micros() as u64);
                    self.send(RequestOutcome::completed(time, key, latency_ms, &response));
                }
                Err(e) if e.is_packet_lost() => {
                    let lost = e.downcast_ref::<PacketLost>().ok_or_else(|| {
                        Error::new(ErrorKind::Internal, "packet lost without details").with_source(e.clone())
                    })?;
                    tracing::warn!("[worker {}]: {lost}", self.id);
                    self.lost += 1;
                    self.send(RequestOutcome::lost(time, lost));
                }
                Err(e) => return Err(e),
            }
            self.requests += 1;

            if self.control.is_stopped() {
                break;
            }
            tokio::time::sleep(self.config.interval).await;
        }
        Ok(())
    }

    fn send(&self, outcome: RequestOutcome) {
        // The sink is gone once its write cap is reached, later outcomes are not recorded.
        if self.tx.send(outcome).is_err() {
            tracing::trace!("[worker {}]: outcome dropped, sink closed", self.id);
        }
    }
}

/// Latency distribution of successful requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    /// Median.
    pub p50: Duration,
    /// 90th percentile.
    pub p90: Duration,
    /// 99th percentile.
    pub p99: Duration,
    /// 99.9th percentile.
    pub p999: Duration,
    /// Maximum.
    pub max: Duration,
}

impl LatencySummary {
    fn from_histogram(histogram: &Histogram<u64>) -> Option<Self> {
        if histogram.len() == 0 {
            return None;
        }
        let at = |q: f64| Duration::from_micros(histogram.value_at_quantile(q));
        Some(Self {
            p50: at(0.5),
            p90: at(0.9),
            p99: at(0.99),
            p999: at(0.999),
            max: Duration::from_micros(histogram.max()),
        })
    }
}

/// Final result of an experiment.
#[derive(Debug, Clone)]
pub struct DriverReport {
    /// Requests issued by each worker, in worker order.
    pub worker_requests: Vec<u64>,
    /// Requests issued in total.
    pub total_requests: u64,
    /// Requests with lost fragments.
    pub lost_requests: u64,
    /// Outcomes written to the report, `None` if the sink did not finish in time.
    pub written: Option<u64>,
    /// Why the experiment stopped.
    pub reason: Option<StopReason>,
    /// Wall time from start to stop.
    pub elapsed: Duration,
    /// Latency of successful requests, `None` if there were none.
    pub latency: Option<LatencySummary>,
}

impl Display for DriverReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "elapsed: {:?}", self.elapsed)?;
        writeln!(f, "stop reason: {:?}", self.reason)?;
        writeln!(f, "requests per worker: [{}]", self.worker_requests.iter().join(", "))?;
        writeln!(f, "total requests: {}", self.total_requests)?;
        writeln!(f, "lost requests: {}", self.lost_requests)?;
        match self.written {
            Some(written) => writeln!(f, "outcomes written: {written}")?,
            None => writeln!(f, "outcomes written: unknown, report not closed")?,
        }
        if let Some(latency) = &self.latency {
            writeln!(f, "latency p50: {:?}", latency.p50)?;
            writeln!(f, "latency p90: {:?}", latency.p90)?;
            writeln!(f, "latency p99: {:?}", latency.p99)?;
            writeln!(f, "latency p999: {:?}", latency.p999)?;
            write!(f, "latency max: {:?}", latency.max)?;
        }
        Ok(())
    }
}

/// Runs an experiment: workers, supervisor and result sink.
#[derive(Debug)]
pub struct Driver {
    config: Arc<ExperimentConfig>,
    selector: Arc<KeySelector>,
    control: Arc<Control>,
}

impl Driver {
    /// Create a driver. The selector must be fully built, it is shared read-only by every worker.
    pub fn new(config: ExperimentConfig, selector: KeySelector) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            selector: Arc::new(selector),
            control: Arc::default(),
        })
    }

    /// A handle to stop the experiment from outside.
    pub fn handle(&self) -> DriverHandle {
        DriverHandle {
            control: self.control.clone(),
        }
    }

    /// Run the experiment to completion.
    ///
    /// On a fatal worker error the experiment is still shut down in order, the report is flushed and the first fatal
    /// error is returned.
    pub async fn run(self) -> Result<DriverReport> {
        let config = &self.config;
        let max_requests = config.termination.max_requests();

        let mut header = self.selector.describe();
        header.extend(config.metadata.iter().cloned());
        let sink_config = SinkConfig {
            path: config.report.clone(),
            header,
            servers: config.servers.iter().map(ToString::to_string).collect(),
            max_writes: max_requests,
        };
        let (tx, rx) = outcome_channel();
        let sink = ResultSink::new(sink_config, rx).spawn();

        let start = Instant::now();
        let threads = if max_requests == Some(0) { 0 } else { config.threads };
        let servers: Arc<[ServerEndpoint]> = config.servers.clone().into();
        let workers = (0..threads)
            .map(|id| -> Result<JoinHandle<Result<WorkerSummary>>> {
                let rng = match config.seed {
                    Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64 + 1)),
                    None => StdRng::from_os_rng(),
                };
                let histogram = Histogram::new(3)
                    .map_err(|e| Error::new(ErrorKind::Internal, "cannot create histogram").with_source(e))?;
                let context = WorkerContext {
                    id,
                    client: UdpClient::new(servers.clone(), config.client_options())?,
                    rng,
                    histogram,
                    requests: 0,
                    lost: 0,
                    selector: self.selector.clone(),
                    config: self.config.clone(),
                    control: self.control.clone(),
                    tx: tx.clone(),
                };
                Ok(tokio::spawn(context.run()))
            })
            .collect::<Result<Vec<_>>>();
        drop(tx);

        let workers = match workers {
            Ok(workers) => workers,
            Err(e) => {
                self.control.stop(StopReason::WorkerFailed);
                sink.close(SINK_CLOSE_TIMEOUT).await?;
                return Err(e);
            }
        };
        tracing::info!(
            "[driver]: experiment started with {threads} workers against {} servers, termination: {:?}",
            config.servers.len(),
            config.termination
        );

        self.supervise(&sink, &workers, start).await;
        self.shutdown(sink, workers, start).await
    }

    async fn supervise(&self, sink: &SinkHandle, workers: &[JoinHandle<Result<WorkerSummary>>], start: Instant) {
        let duration = self.config.termination.duration();
        let max_requests = self.config.termination.max_requests();

        loop {
            if self.control.is_stopped() {
                return;
            }
            if let Some(max) = max_requests {
                if sink.writes() >= max {
                    tracing::info!("[driver]: {} outcomes written", sink.writes());
                    self.control.stop(StopReason::MaxRequests);
                    return;
                }
            }
            if sink.is_finished() {
                self.control.stop(StopReason::SinkFinished);
                return;
            }
            if workers.iter().all(|worker| worker.is_finished()) {
                self.control.stop(StopReason::WorkersFinished);
                return;
            }

            let mut tick = SUPERVISOR_TICK;
            if let Some(duration) = duration {
                let elapsed = start.elapsed();
                if elapsed >= duration {
                    tracing::info!("[driver]: deadline reached after {elapsed:?}");
                    self.control.stop(StopReason::Deadline);
                    return;
                }
                tick = tick.min(duration - elapsed);
            }
            tokio::time::sleep(tick).await;
        }
    }

    async fn shutdown(
        &self,
        sink: SinkHandle,
        workers: Vec<JoinHandle<Result<WorkerSummary>>>,
        start: Instant,
    ) -> Result<DriverReport> {
        self.control.stop(StopReason::External);

        let mut fatal = None;
        let mut summaries = Vec::with_capacity(workers.len());
        for (id, worker) in workers.into_iter().enumerate() {
            match worker.await {
                Ok(Ok(summary)) => summaries.push(summary),
                Ok(Err(e)) => {
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    fatal.get_or_insert(
                        Error::new(ErrorKind::Join, "worker panicked")
                            .with_context("worker", id)
                            .with_source(e),
                    );
                }
            }
        }
        let elapsed = start.elapsed();
        tracing::info!("[driver]: all workers joined after {elapsed:?}");

        let written = sink.close(SINK_CLOSE_TIMEOUT).await;
        if let Some(e) = fatal {
            return Err(e);
        }
        let written = written?;

        let mut merged = Histogram::<u64>::new(3)
            .map_err(|e| Error::new(ErrorKind::Internal, "cannot create histogram").with_source(e))?;
        for summary in summaries.iter() {
            merged
                .add(&summary.histogram)
                .map_err(|e| Error::new(ErrorKind::Internal, "cannot merge histograms").with_source(e))?;
        }

        let worker_requests = summaries.iter().map(|s| s.requests).collect_vec();
        Ok(DriverReport {
            total_requests: worker_requests.iter().sum(),
            lost_requests: summaries.iter().map(|s| s.lost).sum(),
            worker_requests,
            written,
            reason: self.control.reason(),
            elapsed,
            latency: LatencySummary::from_histogram(&merged),
        })
    }
}
