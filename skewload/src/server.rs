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
    fmt::Display,
    net::{SocketAddr, ToSocketAddrs},
};

use skewload_common::error::{Error, ErrorKind, Result};

/// Port used when a server is configured without one.
pub const DEFAULT_PORT: u16 = 11211;

/// One cache server, identified by its stable position in the configured server list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    index: usize,
    host: String,
    port: u16,
    addr: SocketAddr,
}

impl ServerEndpoint {
    /// Parse and resolve `host[:port]`.
    ///
    /// Resolution happens once, here. An unknown host is a [`ErrorKind::Resource`] error.
    pub fn resolve(index: usize, address: &str) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::config("empty server address").with_context("index", index));
        }

        let (host, port) = match address.parse::<SocketAddr>() {
            Ok(addr) => (addr.ip().to_string(), addr.port()),
            Err(_) => match address.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') => {
                    let port = port.parse::<u16>().map_err(|e| {
                        Error::new(ErrorKind::Parse, "invalid server port")
                            .with_context("server", address)
                            .with_source(e)
                    })?;
                    (host.to_string(), port)
                }
                _ => (address.trim_matches(|c| c == '[' || c == ']').to_string(), DEFAULT_PORT),
            },
        };

        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| Error::resource("cannot resolve server", e).with_context("server", address))?
            .next()
            .ok_or_else(|| Error::new(ErrorKind::Resource, "unknown host").with_context("server", address))?;

        Ok(Self { index, host, port, addr })
    }

    /// Parse and resolve a comma-separated server list, indexing servers by position.
    pub fn resolve_list(list: &str) -> Result<Vec<Self>> {
        let servers = list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .enumerate()
            .map(|(index, address)| Self::resolve(index, address))
            .collect::<Result<Vec<_>>>()?;
        if servers.is_empty() {
            return Err(Error::config("no servers configured"));
        }
        Ok(servers)
    }

    /// Position of the server in the configured list.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Host as configured.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port as configured.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolved socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Display for ServerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
