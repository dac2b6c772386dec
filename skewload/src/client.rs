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
    collections::HashMap,
    fmt::Display,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use skewload_common::{
    error::{Error, ErrorKind, Result},
    hasher::server_index,
};
use tokio::net::UdpSocket;

use crate::{
    frame::{self, FrameHeader, Reassembler, RequestIdGenerator},
    server::ServerEndpoint,
};

/// Default receive timeout, applied to every single datagram receive.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(1);

const RECV_BUFFER_LEN: usize = 64 * 1024;

/// Options of [`UdpClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How long to wait for each datagram before declaring the response lost.
    pub recv_timeout: Duration,
    /// Local address to bind sockets to, for multi-homed load generators.
    pub bind: Option<IpAddr>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            bind: None,
        }
    }
}

/// Details of a GET whose response did not fully arrive before the receive timeout.
///
/// Carried as the source of an [`ErrorKind::PacketLost`] error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketLost {
    /// Requested key.
    pub key: String,
    /// Request id of the lost request.
    pub request_id: u16,
    /// Index of the server the key hashes to.
    pub server_index: usize,
    /// Index of the server that answered, `None` if nothing arrived or the source was unknown.
    pub responder_index: Option<usize>,
    /// Target server address.
    pub server: SocketAddr,
    /// Fragments received before the timeout.
    pub received: u16,
    /// Fragments expected, `None` if no fragment ever arrived.
    pub total: Option<u16>,
}

impl Display for PacketLost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "get incomplete [key={}, request_id={}, server_index={}, server={}, received={}, total={}]",
            self.key,
            self.request_id,
            self.server_index,
            self.server,
            self.received,
            self.total.map(|t| t as i32).unwrap_or(-1),
        )
    }
}

impl std::error::Error for PacketLost {}

/// A fully reassembled GET response.
///
/// Only built once every fragment arrived, a missing fragment surfaces as [`PacketLost`] instead.
#[derive(Debug, Clone)]
pub struct GetResponse {
    payload: Bytes,
    server_index: usize,
    responder_index: Option<usize>,
    received: u16,
    total: u16,
}

impl GetResponse {
    /// Raw reassembled payload, fragment headers stripped.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Index of the server the key hashes to.
    pub fn server_index(&self) -> usize {
        self.server_index
    }

    /// Index of the server the first datagram came from.
    pub fn responder_index(&self) -> Option<usize> {
        self.responder_index
    }

    /// Distinct fragments received.
    pub fn received(&self) -> u16 {
        self.received
    }

    /// Fragments the response consists of.
    pub fn total(&self) -> u16 {
        self.total
    }

    /// Extract the value from `VALUE <key> <flags> <bytes>\r\n<data>\r\nEND\r\n`.
    ///
    /// Returns `None` on a miss (`END\r\n`).
    pub fn value(&self) -> Result<Option<Bytes>> {
        let payload = &self.payload;
        if &payload[..] == b"END\r\n" {
            return Ok(None);
        }

        let malformed = || Error::protocol("malformed get response").with_context("len", payload.len());

        let line_end = payload.windows(2).position(|w| w == b"\r\n").ok_or_else(malformed)?;
        let line = std::str::from_utf8(&payload[..line_end]).map_err(|_| malformed())?;
        let mut tokens = line.split_ascii_whitespace();
        if tokens.next() != Some("VALUE") {
            return Err(malformed().with_context("line", line));
        }
        let len = tokens
            .nth(2)
            .and_then(|bytes| bytes.parse::<usize>().ok())
            .ok_or_else(|| malformed().with_context("line", line))?;

        let start = line_end + 2;
        let end = start.checked_add(len).ok_or_else(|| malformed().with_context("declared", len))?;
        if payload.len() < end || &payload[end..] != b"\r\nEND\r\n" {
            return Err(malformed().with_context("declared", len));
        }
        Ok(Some(payload.slice(start..end)))
    }
}

/// Client of the UDP-framed cache protocol.
///
/// Owns one socket per server, created on first use and kept until [`UdpClient::close`]. A client is used by a single
/// worker and is never shared.
#[derive(Debug)]
pub struct UdpClient {
    servers: Arc<[ServerEndpoint]>,
    by_addr: HashMap<SocketAddr, usize>,
    by_ip: HashMap<IpAddr, usize>,
    sockets: Vec<Option<Arc<UdpSocket>>>,
    ids: RequestIdGenerator,
    options: ClientOptions,
    buf: Vec<u8>,
}

impl UdpClient {
    /// Create a client for `servers`. No socket is opened until the first request.
    ///
    /// Every key must map to a server, an empty list is a [`ErrorKind::Config`] error.
    pub fn new(servers: Arc<[ServerEndpoint]>, options: ClientOptions) -> Result<Self> {
        if servers.is_empty() {
            return Err(Error::config("client needs at least one server"));
        }
        let by_addr = servers.iter().map(|s| (s.addr(), s.index())).collect();
        let mut by_ip = HashMap::new();
        for server in servers.iter() {
            by_ip.entry(server.addr().ip()).or_insert(server.index());
        }
        let sockets = vec![None; servers.len()];
        Ok(Self {
            servers,
            by_addr,
            by_ip,
            sockets,
            ids: RequestIdGenerator::new(&mut rand::rng()),
            options,
            buf: vec![0; RECV_BUFFER_LEN],
        })
    }

    /// The servers this client talks to.
    pub fn servers(&self) -> &[ServerEndpoint] {
        &self.servers
    }

    /// Index of the server `key` is stored on.
    pub fn pick_server(&self, key: &str) -> usize {
        server_index(key, self.servers.len())
    }

    /// Store `value` under `key`. Any reply but `STORED` is a protocol violation.
    pub async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let index = self.pick_server(key);
        let socket = self.socket(index).await?;
        let request_id = self.ids.next_id();
        let target = self.servers[index].addr();

        self.discard_stale(&socket);
        socket
            .send_to(&frame::encode(request_id, &frame::set_command(key, value)), target)
            .await?;

        let (len, _) = match tokio::time::timeout(self.options.recv_timeout, socket.recv_from(&mut self.buf)).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(Error::new(ErrorKind::Io, "no reply to set before receive timeout")
                    .with_context("key", key)
                    .with_context("server", target))
            }
        };

        let (header, payload) = FrameHeader::read(&self.buf[..len])?;
        if header.request_id != request_id {
            return Err(Error::protocol("request id mismatch")
                .with_context("sent", request_id)
                .with_context("received", header.request_id));
        }
        let reply = String::from_utf8_lossy(payload);
        if reply.lines().next().map(str::trim) != Some("STORED") {
            return Err(Error::protocol("set not stored")
                .with_context("key", key)
                .with_context("reply", reply.trim_end()));
        }
        Ok(())
    }

    /// Fetch `key`, reassembling a response of any number of datagrams.
    ///
    /// A receive timeout before every fragment arrived yields an [`ErrorKind::PacketLost`] error with a
    /// [`PacketLost`] source. Other errors are fatal for the channel.
    pub async fn get(&mut self, key: &str) -> Result<GetResponse> {
        let index = self.pick_server(key);
        let socket = self.socket(index).await?;
        let request_id = self.ids.next_id();
        let target = self.servers[index].addr();

        self.discard_stale(&socket);
        socket
            .send_to(&frame::encode(request_id, &frame::get_command(key)), target)
            .await?;

        let mut reassembler = Reassembler::new(request_id);
        let mut responder = None;
        while !reassembler.is_complete() {
            let (len, from) = match tokio::time::timeout(self.options.recv_timeout, socket.recv_from(&mut self.buf))
                .await
            {
                Ok(res) => res?,
                Err(_) => {
                    let lost = PacketLost {
                        key: key.to_string(),
                        request_id,
                        server_index: index,
                        responder_index: responder.flatten(),
                        server: target,
                        received: reassembler.received(),
                        total: reassembler.total(),
                    };
                    return Err(Error::new(ErrorKind::PacketLost, "").with_source(lost));
                }
            };
            reassembler.accept(&self.buf[..len])?;
            if responder.is_none() {
                responder = Some(self.responder_index(from));
            }
        }

        let received = reassembler.received();
        let total = reassembler.total().unwrap_or_default();
        Ok(GetResponse {
            payload: reassembler.into_payload(),
            server_index: index,
            responder_index: responder.flatten(),
            received,
            total,
        })
    }

    /// Release all sockets.
    pub fn close(&mut self) {
        self.sockets.iter_mut().for_each(|socket| *socket = None);
    }

    async fn socket(&mut self, index: usize) -> Result<Arc<UdpSocket>> {
        if let Some(socket) = &self.sockets[index] {
            return Ok(socket.clone());
        }

        let server = &self.servers[index];
        let ip = match (self.options.bind, server.addr()) {
            (Some(ip), _) => ip,
            (None, SocketAddr::V4(_)) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            (None, SocketAddr::V6(_)) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind(SocketAddr::new(ip, 0)).await.map_err(|e| {
            Error::resource("cannot create socket", e)
                .with_context("bind", ip)
                .with_context("server", server)
        })?;
        tracing::debug!(
            "[udp client]: socket for server {server} bound to {:?}",
            socket.local_addr().ok()
        );

        let socket = Arc::new(socket);
        self.sockets[index] = Some(socket.clone());
        Ok(socket)
    }

    /// Drop datagrams left over from requests that already timed out.
    fn discard_stale(&mut self, socket: &UdpSocket) {
        while let Ok((len, from)) = socket.try_recv_from(&mut self.buf) {
            tracing::debug!("[udp client]: discard stale datagram of {len} bytes from {from}");
        }
    }

    fn responder_index(&self, from: SocketAddr) -> Option<usize> {
        let index = self
            .by_addr
            .get(&from)
            .or_else(|| self.by_ip.get(&from.ip()))
            .copied();
        if index.is_none() {
            tracing::warn!("[udp client]: response from unknown server {from}");
        }
        index
    }
}
