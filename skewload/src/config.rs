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

use std::{net::IpAddr, path::PathBuf, time::Duration};

use skewload_common::error::{Error, Result};

use crate::{
    client::{ClientOptions, DEFAULT_RECV_TIMEOUT},
    server::ServerEndpoint,
};

/// When an experiment ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Termination {
    /// Run until stopped from outside.
    #[default]
    Unbounded,
    /// Run for a fixed wall-clock time.
    Duration(Duration),
    /// Run until this many outcomes are written to the report.
    MaxRequests(u64),
}

impl Termination {
    /// Build from the mutually exclusive duration and max-requests options.
    pub fn from_options(duration: Option<Duration>, max_requests: Option<u64>) -> Result<Self> {
        match (duration, max_requests) {
            (None, None) => Ok(Termination::Unbounded),
            (Some(duration), None) => Ok(Termination::Duration(duration)),
            (None, Some(max)) => Ok(Termination::MaxRequests(max)),
            (Some(_), Some(_)) => Err(Error::config("duration and max requests are mutually exclusive")),
        }
    }

    /// The request cap, if any.
    pub fn max_requests(&self) -> Option<u64> {
        match self {
            Termination::MaxRequests(max) => Some(*max),
            _ => None,
        }
    }

    /// The deadline, if any.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Termination::Duration(duration) => Some(*duration),
            _ => None,
        }
    }
}

/// Immutable run parameters of an experiment.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    /// Target servers, indexed in list order.
    pub servers: Vec<ServerEndpoint>,
    /// Concurrent workers.
    pub threads: usize,
    /// Sleep between two requests of the same worker.
    pub interval: Duration,
    /// When the experiment ends.
    pub termination: Termination,
    /// Cap the requests issued at exactly the max-requests count.
    pub exact_count: bool,
    /// Local address for client sockets.
    pub bind: Option<IpAddr>,
    /// Per-datagram receive timeout.
    pub recv_timeout: Duration,
    /// Seed of the workers' generators. Workers draw from the OS if unset.
    pub seed: Option<u64>,
    /// Report file.
    pub report: PathBuf,
    /// Free-text report header lines.
    pub metadata: Vec<String>,
}

impl ExperimentConfig {
    /// Create a config with defaults for everything but the servers.
    pub fn new(servers: Vec<ServerEndpoint>) -> Self {
        Self {
            servers,
            threads: 1,
            interval: Duration::from_secs(1),
            termination: Termination::Unbounded,
            exact_count: false,
            bind: None,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            seed: None,
            report: PathBuf::from("latency.txt"),
            metadata: vec![],
        }
    }

    /// Reject inconsistent parameters before anything runs.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::config("at least one worker is required"));
        }
        if self.servers.is_empty() {
            return Err(Error::config("at least one server is required"));
        }
        if self.exact_count && self.termination.max_requests().is_none() {
            return Err(Error::config("exact requests count needs max requests").with_context(
                "termination",
                format!("{:?}", self.termination),
            ));
        }
        Ok(())
    }

    /// Options of the workers' protocol clients.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            recv_timeout: self.recv_timeout,
            bind: self.bind,
        }
    }
}

#[cfg(test)]
mod tests {
    use skewload_common::error::ErrorKind;

    use super::*;

    fn servers() -> Vec<ServerEndpoint> {
        ServerEndpoint::resolve_list("127.0.0.1:11211").unwrap()
    }

    #[test]
    fn test_termination_from_options() {
        assert_eq!(Termination::from_options(None, None).unwrap(), Termination::Unbounded);
        assert_eq!(
            Termination::from_options(Some(Duration::from_secs(3)), None).unwrap(),
            Termination::Duration(Duration::from_secs(3))
        );
        assert_eq!(
            Termination::from_options(None, Some(5)).unwrap(),
            Termination::MaxRequests(5)
        );
        let err = Termination::from_options(Some(Duration::from_secs(3)), Some(5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_validate() {
        let config = ExperimentConfig::new(servers());
        config.validate().unwrap();

        let config = ExperimentConfig {
            threads: 0,
            ..ExperimentConfig::new(servers())
        };
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Config);

        assert_eq!(
            ExperimentConfig::new(vec![]).validate().unwrap_err().kind(),
            ErrorKind::Config
        );

        let mut config = ExperimentConfig {
            exact_count: true,
            ..ExperimentConfig::new(servers())
        };
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Config);
        config.termination = Termination::MaxRequests(10);
        config.validate().unwrap();
    }
}
