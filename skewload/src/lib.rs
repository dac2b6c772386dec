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

//! A load generator and latency meter for key-value cache clusters reached over a UDP-framed variant of the text
//! cache protocol.
//!
//! Workers issue GET requests for keys chosen by a [`selector::KeySelector`], reassemble multi-datagram responses,
//! and stream one [`outcome::RequestOutcome`] per request into a report file. Packet loss is recorded as data.

/// Client of the UDP-framed cache protocol.
pub mod client;
/// Experiment parameters.
pub mod config;
pub mod driver;
pub mod frame;
/// Workload objects.
pub mod object;
/// Per-request outcomes, the lines of the report.
pub mod outcome;
/// Commonly used types.
pub mod prelude;
pub mod selector;
/// Cache server endpoints.
pub mod server;
/// Background writer of the report file.
pub mod sink;

pub use prelude::*;
