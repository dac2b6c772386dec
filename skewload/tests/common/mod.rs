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

//! An in-process cache server speaking the UDP-framed protocol, with knobs to misbehave.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use skewload::frame::{FrameHeader, HEADER_LEN};
use tokio::{net::UdpSocket, task::JoinHandle};

/// How the server answers.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Split GET responses into fragments of this many payload bytes. 0 sends one datagram.
    pub fragment_size: usize,
    /// Send fragments in a shuffled order.
    pub shuffle: bool,
    /// Sequence numbers never sent.
    pub drop: Vec<u16>,
    /// Swallow every request.
    pub silent: bool,
    /// Added to the request id of every reply.
    pub id_offset: u16,
}

pub struct FakeServer {
    addr: SocketAddr,
    store: Arc<Mutex<HashMap<String, Bytes>>>,
    behavior: Arc<Mutex<Behavior>>,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start(behavior: Behavior) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let store = Arc::new(Mutex::new(HashMap::new()));
        let behavior = Arc::new(Mutex::new(behavior));
        let handle = tokio::spawn(serve(socket, store.clone(), behavior.clone()));
        Self {
            addr,
            store,
            behavior,
            handle,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.store
            .lock()
            .insert(key.to_string(), Bytes::copy_from_slice(value.as_bytes()));
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.store.lock().get(key).cloned()
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Comma separated server list for `servers`.
pub fn server_list(servers: &[&FakeServer]) -> String {
    servers
        .iter()
        .map(|s| s.addr().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

async fn serve(socket: UdpSocket, store: Arc<Mutex<HashMap<String, Bytes>>>, behavior: Arc<Mutex<Behavior>>) {
    let mut rng = StdRng::seed_from_u64(7);
    let mut buf = vec![0; 64 * 1024];
    loop {
        let Ok((len, from)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let current = behavior.lock().clone();
        if current.silent || len < HEADER_LEN {
            continue;
        }
        let Ok((header, payload)) = FrameHeader::read(&buf[..len]) else {
            continue;
        };
        let request_id = header.request_id.wrapping_add(current.id_offset);
        let request = String::from_utf8_lossy(payload).to_string();

        let reply = if let Some(rest) = request.strip_prefix("get ") {
            let key = rest.trim_end();
            match store.lock().get(key) {
                Some(value) => {
                    let mut reply = BytesMut::new();
                    reply.put_slice(format!("VALUE {key} 0 {}\r\n", value.len()).as_bytes());
                    reply.put_slice(value);
                    reply.put_slice(b"\r\nEND\r\n");
                    reply.freeze()
                }
                None => Bytes::from_static(b"END\r\n"),
            }
        } else if let Some(rest) = request.strip_prefix("set ") {
            let (line, data) = rest.split_once("\r\n").unwrap_or((rest, ""));
            let key = line.split_ascii_whitespace().next().unwrap_or_default();
            let value = data.strip_suffix("\r\n").unwrap_or(data);
            store
                .lock()
                .insert(key.to_string(), Bytes::copy_from_slice(value.as_bytes()));
            Bytes::from_static(b"STORED\r\n")
        } else {
            Bytes::from_static(b"ERROR\r\n")
        };

        let chunk = match current.fragment_size {
            0 => reply.len().max(1),
            size => size,
        };
        let fragments = reply.chunks(chunk).collect::<Vec<_>>();
        let total = fragments.len() as u16;
        let mut order = (0..total).collect::<Vec<_>>();
        if current.shuffle {
            order.shuffle(&mut rng);
        }

        for sequence in order {
            if current.drop.contains(&sequence) {
                continue;
            }
            let mut datagram = BytesMut::with_capacity(HEADER_LEN + chunk);
            FrameHeader {
                request_id,
                sequence,
                total,
                reserved: 0,
            }
            .write(&mut datagram);
            datagram.put_slice(fragments[sequence as usize]);
            if socket.send_to(&datagram, from).await.is_err() {
                return;
            }
        }
    }
}
