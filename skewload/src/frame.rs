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

//! Datagram framing of the UDP cache protocol.
//!
//! Every datagram, request or response, starts with an 8-byte big-endian header:
//!
//! ```text
//! | request id (16b) | sequence number (16b) | total datagrams (16b) | reserved (16b) |
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;
use skewload_common::error::{Error, Result};

/// Frame header length in bytes.
pub const HEADER_LEN: usize = 8;

/// Request ids wrap back to `0` after exceeding this value.
///
/// Kept below the signed 16-bit maximum so ids stay positive for peers that read them as signed.
pub const REQUEST_ID_CEILING: u16 = 30000;

/// Exclusive upper bound of the randomized first request id.
const REQUEST_ID_SEED_BOUND: u16 = 32767;

/// The per-datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Correlates every datagram of a response with its request.
    pub request_id: u16,
    /// Zero-based position of this datagram in the message.
    pub sequence: u16,
    /// Number of datagrams in the message.
    pub total: u16,
    /// Reserved, always zero.
    pub reserved: u16,
}

impl FrameHeader {
    /// Header of a single-datagram request.
    pub fn request(request_id: u16) -> Self {
        Self {
            request_id,
            sequence: 0,
            total: 1,
            reserved: 0,
        }
    }

    /// Append the encoded header to `buf`.
    pub fn write(&self, mut buf: impl BufMut) {
        buf.put_u16(self.request_id);
        buf.put_u16(self.sequence);
        buf.put_u16(self.total);
        buf.put_u16(self.reserved);
    }

    /// Split a datagram into its header and payload.
    pub fn read(datagram: &[u8]) -> Result<(Self, &[u8])> {
        if datagram.len() < HEADER_LEN {
            return Err(Error::protocol("datagram shorter than frame header").with_context("len", datagram.len()));
        }
        let (mut header, payload) = datagram.split_at(HEADER_LEN);
        let header = Self {
            request_id: header.get_u16(),
            sequence: header.get_u16(),
            total: header.get_u16(),
            reserved: header.get_u16(),
        };
        Ok((header, payload))
    }
}

/// Encode a single-datagram request.
pub fn encode(request_id: u16, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    FrameHeader::request(request_id).write(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// `get <key>\r\n`
pub fn get_command(key: &str) -> Vec<u8> {
    format!("get {key}\r\n").into_bytes()
}

/// `set <key> 0 0 <len>\r\n<value>\r\n`
pub fn set_command(key: &str, value: &str) -> Vec<u8> {
    format!("set {key} 0 0 {}\r\n{value}\r\n", value.len()).into_bytes()
}

/// Generates request ids for one client.
///
/// Ids increase by one and wrap to `0` once they exceed [`REQUEST_ID_CEILING`].
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: u16,
}

impl RequestIdGenerator {
    /// Start at a random id.
    pub fn new<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::starting_at(rng.random_range(0..REQUEST_ID_SEED_BOUND))
    }

    /// Start at `first`.
    pub fn starting_at(first: u16) -> Self {
        Self { next: first }
    }

    /// Take the next id.
    pub fn next_id(&mut self) -> u16 {
        let id = self.next;
        self.next = if id >= REQUEST_ID_CEILING { 0 } else { id + 1 };
        id
    }
}

/// Collects the fragments of one response, in whatever order they arrive.
#[derive(Debug)]
pub struct Reassembler {
    request_id: u16,
    fragments: Vec<Option<Bytes>>,
    received: u16,
}

impl Reassembler {
    /// Expect fragments tagged with `request_id`.
    pub fn new(request_id: u16) -> Self {
        Self {
            request_id,
            fragments: vec![],
            received: 0,
        }
    }

    /// Record one datagram.
    ///
    /// The fragment count is learned from the first datagram. Mismatching request ids, sequence numbers outside the
    /// fragment count, or a fragment count that changes mid-response are protocol violations. Duplicates are ignored.
    pub fn accept(&mut self, datagram: &[u8]) -> Result<()> {
        let (header, payload) = FrameHeader::read(datagram)?;

        if header.request_id != self.request_id {
            return Err(Error::protocol("request id mismatch")
                .with_context("sent", self.request_id)
                .with_context("received", header.request_id));
        }
        if header.total == 0 {
            return Err(Error::protocol("response declares zero datagrams").with_context("request_id", self.request_id));
        }

        match self.total() {
            None => self.fragments = vec![None; header.total as usize],
            Some(total) if total != header.total => {
                return Err(Error::protocol("datagram count changed mid-response")
                    .with_context("request_id", self.request_id)
                    .with_context("expected", total)
                    .with_context("received", header.total));
            }
            Some(_) => {}
        }

        let slot = self.fragments.get_mut(header.sequence as usize).ok_or_else(|| {
            Error::protocol("sequence number out of range")
                .with_context("request_id", header.request_id)
                .with_context("sequence", header.sequence)
                .with_context("total", header.total)
        })?;
        if slot.is_none() {
            *slot = Some(Bytes::copy_from_slice(payload));
            self.received += 1;
        }
        Ok(())
    }

    /// Number of distinct fragments received so far.
    pub fn received(&self) -> u16 {
        self.received
    }

    /// Number of fragments in the response, once known.
    pub fn total(&self) -> Option<u16> {
        match self.fragments.len() {
            0 => None,
            n => Some(n as u16),
        }
    }

    /// Whether every fragment has arrived.
    pub fn is_complete(&self) -> bool {
        self.total().is_some_and(|total| self.received == total)
    }

    /// Concatenate the fragments in sequence order.
    ///
    /// Missing fragments are skipped, call [`Reassembler::is_complete`] first.
    pub fn into_payload(self) -> Bytes {
        let len = self.fragments.iter().flatten().map(|f| f.len()).sum();
        let mut buf = BytesMut::with_capacity(len);
        for fragment in self.fragments.into_iter().flatten() {
            buf.put(fragment);
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

    use super::*;

    fn datagram(request_id: u16, sequence: u16, total: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![];
        FrameHeader {
            request_id,
            sequence,
            total,
            reserved: 0,
        }
        .write(&mut buf);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_encode_request() {
        let buf = encode(0x0102, b"get k\r\n");
        assert_eq!(&buf[..HEADER_LEN], &[0x01, 0x02, 0, 0, 0, 1, 0, 0]);
        assert_eq!(&buf[HEADER_LEN..], b"get k\r\n");

        let (header, payload) = FrameHeader::read(&buf).unwrap();
        assert_eq!(header, FrameHeader::request(0x0102));
        assert_eq!(payload, b"get k\r\n");
    }

    #[test]
    fn test_commands() {
        assert_eq!(get_command("mem-key-1"), b"get mem-key-1\r\n");
        assert_eq!(set_command("key", "value"), b"set key 0 0 5\r\nvalue\r\n");
    }

    #[test]
    fn test_short_datagram() {
        assert!(FrameHeader::read(&[0; 7]).is_err());
    }

    #[test]
    fn test_request_id_wrap() {
        let mut ids = RequestIdGenerator::starting_at(REQUEST_ID_CEILING - 1);
        assert_eq!(ids.next_id(), REQUEST_ID_CEILING - 1);
        assert_eq!(ids.next_id(), REQUEST_ID_CEILING);
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);

        // Random starts above the ceiling wrap right away.
        let mut ids = RequestIdGenerator::starting_at(31000);
        assert_eq!(ids.next_id(), 31000);
        assert_eq!(ids.next_id(), 0);
    }

    #[test]
    fn test_request_ids_unique_within_window() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut ids = RequestIdGenerator::new(&mut rng);
        let mut window = std::collections::VecDeque::new();
        for _ in 0..3 * REQUEST_ID_CEILING as usize {
            let id = ids.next_id();
            assert!(id <= REQUEST_ID_SEED_BOUND);
            assert!(!window.contains(&id));
            window.push_back(id);
            if window.len() > 64 {
                window.pop_front();
            }
        }
    }

    #[test]
    fn test_reassemble_any_order() {
        let value = generate_payload(10_000);
        let chunks = value.chunks(1400).collect::<Vec<_>>();
        let total = chunks.len() as u16;

        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..16 {
            let mut order = (0..total).collect::<Vec<_>>();
            order.shuffle(&mut rng);

            let mut reassembler = Reassembler::new(9);
            for seq in order {
                assert!(!reassembler.is_complete());
                reassembler
                    .accept(&datagram(9, seq, total, chunks[seq as usize]))
                    .unwrap();
            }
            assert!(reassembler.is_complete());
            assert_eq!(reassembler.received(), total);
            assert_eq!(reassembler.into_payload(), value);
        }
    }

    #[test]
    fn test_reassemble_duplicates_ignored() {
        let mut reassembler = Reassembler::new(1);
        reassembler.accept(&datagram(1, 1, 2, b"b")).unwrap();
        reassembler.accept(&datagram(1, 1, 2, b"b")).unwrap();
        assert_eq!(reassembler.received(), 1);
        assert_eq!(reassembler.total(), Some(2));
        assert!(!reassembler.is_complete());
        reassembler.accept(&datagram(1, 0, 2, b"a")).unwrap();
        assert!(reassembler.is_complete());
        assert_eq!(reassembler.into_payload(), &b"ab"[..]);
    }

    #[test]
    fn test_reassemble_violations() {
        let mut reassembler = Reassembler::new(1);
        assert!(reassembler.accept(&datagram(2, 0, 1, b"x")).is_err());
        assert_eq!(reassembler.total(), None);

        let mut reassembler = Reassembler::new(1);
        assert!(reassembler.accept(&datagram(1, 3, 3, b"x")).is_err());

        let mut reassembler = Reassembler::new(1);
        reassembler.accept(&datagram(1, 0, 3, b"x")).unwrap();
        assert!(reassembler.accept(&datagram(1, 1, 4, b"y")).is_err());

        let mut reassembler = Reassembler::new(1);
        assert!(reassembler.accept(&datagram(1, 0, 0, b"")).is_err());
    }

    fn generate_payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| b'a' + (i % 26) as u8).collect()
    }
}
