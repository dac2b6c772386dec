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

//! One-time population of the cluster over TCP before the experiment starts.

use std::time::Instant;

use itertools::Itertools;
use skewload::{CacheObject, ServerEndpoint};
use skewload_common::hasher::server_index;

use crate::error::Result;

/// Keys never expire.
const EXPIRATION: u32 = 0;

/// The memcache connection url of `server`.
fn url(server: &ServerEndpoint) -> String {
    format!("memcache://{}?tcp_nodelay=true", server.addr())
}

/// Store every object on the server its key hashes to, so the layout matches what the UDP client requests.
///
/// Runs on a blocking thread and returns once every object is stored.
pub async fn populate(servers: &[ServerEndpoint], objects: Vec<CacheObject>) -> Result<()> {
    let urls = servers.iter().map(url).collect_vec();
    let start = Instant::now();

    let written = tokio::task::spawn_blocking(move || -> Result<Vec<usize>> {
        let clients = urls
            .iter()
            .map(|url| memcache::connect(url.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut written = vec![0; clients.len()];
        for object in objects.iter() {
            let index = server_index(object.key(), clients.len());
            clients[index].set(object.key(), object.value(), EXPIRATION)?;
            written[index] += 1;
        }
        Ok(written)
    })
    .await
    .map_err(anyhow::Error::from)??;

    tracing::info!(
        "[bulk load]: {} objects stored in {:?}, per server: [{}]",
        written.iter().sum::<usize>(),
        start.elapsed(),
        written.iter().join(", ")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        let server = ServerEndpoint::resolve(0, "127.0.0.1:11311").unwrap();
        assert_eq!(url(&server), "memcache://127.0.0.1:11311?tcp_nodelay=true");
        let server = ServerEndpoint::resolve(1, "[::1]:11211").unwrap();
        assert_eq!(url(&server), "memcache://[::1]:11211?tcp_nodelay=true");
    }
}
