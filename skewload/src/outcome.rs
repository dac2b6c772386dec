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

use std::fmt::Display;

use chrono::{DateTime, Local};

use crate::client::{GetResponse, PacketLost};

/// Result of one GET attempt, one line of the report.
///
/// Rendered as `time,key,latency_or_-1,requested_server,responding_server,received/total`, where `-1` marks unknown
/// values.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    time: DateTime<Local>,
    key: String,
    latency_ms: Option<f64>,
    server_index: usize,
    responder_index: Option<usize>,
    received: u16,
    total: Option<u16>,
}

impl RequestOutcome {
    /// A completed request.
    pub fn completed(time: DateTime<Local>, key: &str, latency_ms: f64, response: &GetResponse) -> Self {
        Self {
            time,
            key: key.to_string(),
            latency_ms: Some(latency_ms),
            server_index: response.server_index(),
            responder_index: response.responder_index(),
            received: response.received(),
            total: Some(response.total()),
        }
    }

    /// A request whose response did not fully arrive.
    pub fn lost(time: DateTime<Local>, lost: &PacketLost) -> Self {
        Self {
            time,
            key: lost.key.clone(),
            latency_ms: None,
            server_index: lost.server_index,
            responder_index: lost.responder_index,
            received: lost.received,
            total: lost.total,
        }
    }

    /// Requested key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Latency in milliseconds, `None` if lost.
    pub fn latency_ms(&self) -> Option<f64> {
        self.latency_ms
    }

    /// Whether this outcome records a loss.
    pub fn is_lost(&self) -> bool {
        self.latency_ms.is_none()
    }
}

impl Display for RequestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn or_unknown(v: Option<impl Into<i64>>) -> i64 {
            v.map(Into::into).unwrap_or(-1)
        }

        write!(
            f,
            "{},{},{:?},{},{},{}/{}",
            self.time.format("%H:%M:%S:%3f"),
            self.key,
            self.latency_ms.unwrap_or(-1.0),
            self.server_index,
            or_unknown(self.responder_index.map(|i| i as i64)),
            self.received,
            or_unknown(self.total),
        )
    }
}
