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

pub use skewload_common::{
    error::{Error, ErrorKind, Result},
    hasher::{native_hash, server_index},
};

pub use crate::{
    client::{ClientOptions, GetResponse, PacketLost, UdpClient, DEFAULT_RECV_TIMEOUT},
    config::{ExperimentConfig, Termination},
    driver::{Driver, DriverHandle, DriverReport, LatencySummary, StopReason},
    object::{generate_objects, CacheObject, KEY_PREFIX},
    outcome::RequestOutcome,
    selector::{zipf_thresholds, Distribution, KeySelector, ServerSkew, UniformSelector, ZipfSelector},
    server::{ServerEndpoint, DEFAULT_PORT},
    sink::{outcome_channel, ResultSink, SinkConfig, SinkHandle, HEADER_MARKER},
};
