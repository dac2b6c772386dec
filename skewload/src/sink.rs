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

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use skewload_common::error::{Error, ErrorKind, Result};
use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt, BufWriter},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::outcome::RequestOutcome;

/// Prefix of report header lines.
pub const HEADER_MARKER: char = ';';

/// How long the sink waits for an outcome before re-checking whether it was told to stop.
pub const IDLE_BACKOFF: Duration = Duration::from_millis(20);

/// Producer side of the outcome queue. Sending never blocks.
pub type OutcomeSender = UnboundedSender<RequestOutcome>;

/// Consumer side of the outcome queue.
pub type OutcomeReceiver = UnboundedReceiver<RequestOutcome>;

/// Create the unbounded multi-producer, single-consumer outcome queue.
pub fn outcome_channel() -> (OutcomeSender, OutcomeReceiver) {
    unbounded_channel()
}

/// Where and what the sink writes.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Report file path.
    pub path: PathBuf,
    /// Free-text metadata lines written before the server line.
    pub header: Vec<String>,
    /// Server endpoints, written comma separated as the last header line.
    pub servers: Vec<String>,
    /// Stop after this many data lines.
    pub max_writes: Option<u64>,
}

/// Background consumer that drains the outcome queue into the report file.
#[derive(Debug)]
pub struct ResultSink {
    config: SinkConfig,
    rx: OutcomeReceiver,
    writes: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
}

impl ResultSink {
    /// Create a sink draining `rx`.
    pub fn new(config: SinkConfig, rx: OutcomeReceiver) -> Self {
        Self {
            config,
            rx,
            writes: Arc::default(),
            stop: Arc::default(),
        }
    }

    /// Run the sink on the current runtime.
    pub fn spawn(self) -> SinkHandle {
        let writes = self.writes.clone();
        let stop = self.stop.clone();
        let handle = tokio::spawn(self.run());
        SinkHandle { writes, stop, handle }
    }

    async fn run(mut self) -> Result<u64> {
        let path = self.config.path.clone();
        let file = File::create(&path).await.map_err(|e| {
            Error::resource("cannot create report file", e).with_context("path", path.display())
        })?;
        let mut writer = BufWriter::new(file);

        let res = self.write(&mut writer).await;
        // Flush even when writing failed, the lines already written stay readable.
        let flushed = writer.shutdown().await;

        let writes = res?;
        flushed?;
        tracing::info!("[result sink]: {writes} outcomes written to {}", path.display());
        Ok(writes)
    }

    async fn write<W>(&mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        for line in self.config.header.iter().flat_map(|h| h.split('\n')) {
            writer.write_all(format!("{HEADER_MARKER}{line}\n").as_bytes()).await?;
        }
        writer
            .write_all(format!("{HEADER_MARKER}{}\n", self.config.servers.join(",")).as_bytes())
            .await?;
        tracing::info!("[result sink]: started");

        loop {
            let writes = self.writes.load(Ordering::Acquire);
            if self.config.max_writes.is_some_and(|max| writes >= max) {
                break;
            }

            match tokio::time::timeout(IDLE_BACKOFF, self.rx.recv()).await {
                Ok(Some(outcome)) => {
                    writer.write_all(format!("{outcome}\n").as_bytes()).await?;
                    self.writes.fetch_add(1, Ordering::AcqRel);
                }
                // Every producer is gone and the queue is drained.
                Ok(None) => break,
                Err(_) => {
                    if self.stop.load(Ordering::Acquire) && self.rx.is_empty() {
                        break;
                    }
                }
            }
        }

        tracing::info!("[result sink]: terminated");
        Ok(self.writes.load(Ordering::Acquire))
    }
}

/// Handle of a running [`ResultSink`].
#[derive(Debug)]
pub struct SinkHandle {
    writes: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<u64>>,
}

impl SinkHandle {
    /// Data lines written so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    /// Whether the sink has terminated.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Tell the sink to stop once the queue is drained.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop the sink and wait up to `timeout` for it to flush and close the report.
    ///
    /// Returns the number of data lines written, or `None` if the sink did not finish in time.
    pub async fn close(mut self, timeout: Duration) -> Result<Option<u64>> {
        self.stop();
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(Ok(res)) => res.map(Some),
            Ok(Err(e)) => Err(Error::new(ErrorKind::Join, "result sink panicked").with_source(e)),
            Err(_) => {
                tracing::warn!("[result sink]: not terminated after {timeout:?}");
                Ok(None)
            }
        }
    }
}
