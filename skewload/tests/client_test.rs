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

mod common;

use std::{sync::Arc, time::Duration};

use common::{server_list, Behavior, FakeServer};
use skewload::{
    client::{ClientOptions, PacketLost, UdpClient},
    object::generate_value,
    server::ServerEndpoint,
};
use skewload_common::{error::ErrorKind, hasher::server_index};

fn client(list: &str, recv_timeout: Duration) -> UdpClient {
    let servers: Arc<[ServerEndpoint]> = ServerEndpoint::resolve_list(list).unwrap().into();
    UdpClient::new(
        servers,
        ClientOptions {
            recv_timeout,
            ..Default::default()
        },
    )
    .unwrap()
}

#[test_log::test(tokio::test)]
async fn test_set_then_get() {
    let server = FakeServer::start(Behavior::default()).await;
    let mut client = client(&server_list(&[&server]), Duration::from_secs(1));

    client.set("key", "value").await.unwrap();
    assert_eq!(server.get("key").unwrap(), &b"value"[..]);

    let response = client.get("key").await.unwrap();
    assert_eq!(response.value().unwrap().unwrap(), &b"value"[..]);
    assert_eq!(response.server_index(), 0);
    assert_eq!(response.responder_index(), Some(0));
    assert_eq!((response.received(), response.total()), (1, 1));

    assert!(client.get("missing").await.unwrap().value().unwrap().is_none());
    client.close();
}

#[test_log::test(tokio::test)]
async fn test_get_reassembles_shuffled_fragments() {
    let server = FakeServer::start(Behavior {
        fragment_size: 97,
        shuffle: true,
        ..Default::default()
    })
    .await;
    let mut client = client(&server_list(&[&server]), Duration::from_secs(1));

    for size in [1, 96, 97, 98, 1000, 20000] {
        let key = format!("mem-key-{size}");
        let value = generate_value(&key, size);
        server.insert(&key, &value);

        let response = client.get(&key).await.unwrap();
        let expected = (format!("VALUE {key} 0 {size}\r\n").len() + size + 7).div_ceil(97) as u16;
        assert_eq!(response.total(), expected);
        assert_eq!(response.received(), expected);
        assert_eq!(response.value().unwrap().unwrap(), value.as_bytes());
    }
}

#[test_log::test(tokio::test)]
async fn test_missing_fragment_is_packet_lost() {
    let server = FakeServer::start(Behavior {
        fragment_size: 50,
        drop: vec![2],
        ..Default::default()
    })
    .await;
    let mut client = client(&server_list(&[&server]), Duration::from_millis(200));
    server.insert("mem-key-0", &generate_value("mem-key-0", 400));

    let err = client.get("mem-key-0").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PacketLost);
    let lost = err.downcast_ref::<PacketLost>().unwrap();
    assert_eq!(lost.key, "mem-key-0");
    assert_eq!(lost.server_index, 0);
    assert_eq!(lost.responder_index, Some(0));
    assert_eq!(lost.server, server.addr());
    let total = lost.total.unwrap();
    assert_eq!(lost.received, total - 1);

    // The channel stays usable after a loss.
    server.set_behavior(Behavior::default());
    let response = client.get("mem-key-0").await.unwrap();
    assert_eq!(response.value().unwrap().unwrap().len(), 400);
}

#[test_log::test(tokio::test)]
async fn test_no_reply_is_packet_lost() {
    let server = FakeServer::start(Behavior {
        silent: true,
        ..Default::default()
    })
    .await;
    let mut client = client(&server_list(&[&server]), Duration::from_millis(100));

    let err = client.get("mem-key-1").await.unwrap_err();
    let lost = err.downcast_ref::<PacketLost>().unwrap();
    assert_eq!(lost.received, 0);
    assert_eq!(lost.total, None);
    assert_eq!(lost.responder_index, None);
    assert!(lost.to_string().ends_with("received=0, total=-1]"));

    let err = client.set("key", "value").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test_log::test(tokio::test)]
async fn test_request_id_mismatch_is_fatal() {
    let server = FakeServer::start(Behavior {
        id_offset: 1,
        ..Default::default()
    })
    .await;
    let mut client = client(&server_list(&[&server]), Duration::from_millis(200));
    server.insert("key", "value");

    assert_eq!(client.get("key").await.unwrap_err().kind(), ErrorKind::Protocol);
    assert_eq!(client.set("key", "value").await.unwrap_err().kind(), ErrorKind::Protocol);
}

#[test_log::test(tokio::test)]
async fn test_keys_route_by_native_hash() {
    let servers = [
        FakeServer::start(Behavior::default()).await,
        FakeServer::start(Behavior::default()).await,
    ];
    let mut client = client(&server_list(&[&servers[0], &servers[1]]), Duration::from_secs(1));

    for i in 0..20 {
        let key = format!("mem-key-{i}");
        let index = server_index(&key, 2);
        assert_eq!(client.pick_server(&key), index);

        client.set(&key, "v").await.unwrap();
        assert!(servers[index].get(&key).is_some());
        assert!(servers[1 - index].get(&key).is_none());

        let response = client.get(&key).await.unwrap();
        assert_eq!(response.server_index(), index);
        assert_eq!(response.responder_index(), Some(index));
    }
}
