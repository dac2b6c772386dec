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

use rand::Rng;
use skewload_common::error::{Error, Result};

use crate::object::CacheObject;

/// Picks every object with the same probability.
#[derive(Debug)]
pub struct UniformSelector {
    objects: Vec<CacheObject>,
}

impl UniformSelector {
    /// Select over `objects`, which must not be empty.
    pub fn new(objects: Vec<CacheObject>) -> Result<Self> {
        if objects.is_empty() {
            return Err(Error::config("uniform selection needs at least one object"));
        }
        Ok(Self { objects })
    }

    /// Pick the next object.
    pub fn pick_key<R: Rng + ?Sized>(&self, rng: &mut R) -> &CacheObject {
        &self.objects[rng.random_range(0..self.objects.len())]
    }

    /// The objects in selection order.
    pub fn objects(&self) -> &[CacheObject] {
        &self.objects
    }
}
