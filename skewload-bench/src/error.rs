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

/// Experiment runner error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error raised by the load generator.
    #[error(transparent)]
    Skewload(#[from] skewload::Error),
    /// Bulk population through the cache client failed.
    #[error("bulk load error: {0}")]
    Memcache(#[from] memcache::MemcacheError),
    /// The sanity check read back something else than it stored.
    #[error("sanity check failed: expected {expected:?}, got {actual:?}")]
    SanityCheck {
        /// Stored value.
        expected: String,
        /// Value read back, `None` on a miss.
        actual: Option<String>,
    },
    /// Other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Experiment runner result type.
pub type Result<T> = core::result::Result<T, Error>;
