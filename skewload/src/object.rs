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

use md5::{Digest, Md5};

/// Prefix of generated object keys.
pub const KEY_PREFIX: &str = "mem-key-";

/// A key/value pair used as workload input.
///
/// Created once for the full object set before the experiment starts and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheObject {
    key: String,
    value: String,
}

impl CacheObject {
    /// Create an object from an explicit key and value.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Generate the `index`-th object with a value of exactly `size` bytes.
    pub fn generate(index: usize, size: usize) -> Self {
        let key = format!("{KEY_PREFIX}{index}");
        let value = generate_value(&key, size);
        Self { key, value }
    }

    /// The object key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The object value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Deterministically derive a `size`-byte value from `key`.
///
/// The value is the lowercase hex MD5 digest of the key, repeated and cut at `size`.
pub fn generate_value(key: &str, size: usize) -> String {
    let digest = format!("{:x}", Md5::digest(key.as_bytes()));
    digest.chars().cycle().take(size).collect()
}

/// Generate `count` objects (`mem-key-0` .. `mem-key-{count-1}`) with `size`-byte values.
pub fn generate_objects(count: usize, size: usize) -> Vec<CacheObject> {
    (0..count).map(|i| CacheObject::generate(i, size)).collect()
}
