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


/// The "native" key hash of memcached client libraries on the JVM.
///
/// The state evolves as `h = 31 * h + unit` over the UTF-16 code units of the key with 32-bit wrapping arithmetic, and
/// the result is truncated to an unsigned 32-bit value. Server affinity must match the clients that populated the
/// cluster, so this has to stay bit-for-bit compatible.
pub fn native_hash(key: &str) -> u64 {
    key.encode_utf16()
        .fold(0u32, |state, unit| state.wrapping_mul(31).wrapping_add(unit as u32)) as u64
}

/// Map a key onto `[0, servers)`.
///
/// # Panics
///
/// Panics if `servers` is zero.
pub fn server_index(key: &str, servers: usize) -> usize {
    assert!(servers > 0, "server count must be positive");
    (native_hash(key) % servers as u64) as usize
}
