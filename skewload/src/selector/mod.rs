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

//! Key selection strategies that shape the workload.

mod replay;
mod uniform;
mod zipf;

use std::{path::Path, str::FromStr};

use rand::Rng;
use skewload_common::error::{Error, ErrorKind, Result};

pub use self::{
    uniform::UniformSelector,
    zipf::{zipf_thresholds, ServerSkew, ZipfSelector, ZIPF_SCALE},
};
use crate::object::CacheObject;

/// Key distribution requested for an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// Every key equally likely.
    Uniform,
    /// Zipf-skewed keys, optionally with a fixed seed.
    Zipf {
        /// Seed for the rank shuffle and the workers' generators.
        seed: Option<u64>,
    },
}

impl Distribution {
    /// The configured seed, if any.
    pub fn seed(&self) -> Option<u64> {
        match self {
            Distribution::Uniform => None,
            Distribution::Zipf { seed } => *seed,
        }
    }
}

impl FromStr for Distribution {
    type Err = Error;

    /// Accepts `random`, `uniform`, `zipf` and `zipf-<seed>`.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "random" | "uniform" => Ok(Distribution::Uniform),
            "zipf" => Ok(Distribution::Zipf { seed: None }),
            _ => match lower.strip_prefix("zipf-") {
                Some(seed) => seed
                    .parse()
                    .map(|seed| Distribution::Zipf { seed: Some(seed) })
                    .map_err(|e| {
                        Error::new(ErrorKind::Parse, "invalid zipf seed")
                            .with_context("method", s)
                            .with_source(e)
                    }),
                None => Err(Error::config("unrecognized keys distribution method").with_context("method", s)),
            },
        }
    }
}

/// Selects the key of every request.
///
/// Built fully before any worker starts and never mutated afterwards. Randomness comes from the caller, so every worker
/// drives its own generator.
#[derive(Debug)]
pub enum KeySelector {
    /// Uniform selection.
    Uniform(UniformSelector),
    /// Zipf-skewed selection over a freshly shuffled rank order.
    Zipf(ZipfSelector),
    /// Zipf-skewed selection restored from a replay file.
    Replay(ZipfSelector),
}

impl KeySelector {
    /// Build the selector for `distribution`.
    ///
    /// With `replay` set, a Zipf distribution restores its state from that file instead of generating it. `skew` only
    /// applies to Zipf and replay selection.
    pub fn build(
        distribution: Distribution,
        objects: Vec<CacheObject>,
        replay: Option<&Path>,
        skew: Option<ServerSkew>,
    ) -> Result<Self> {
        let selector = match (distribution, replay) {
            (Distribution::Uniform, None) => return UniformSelector::new(objects).map(KeySelector::Uniform),
            (Distribution::Uniform, Some(_)) => {
                return Err(Error::config("a keys distribution file needs zipf selection"));
            }
            (Distribution::Zipf { seed }, None) => KeySelector::Zipf(ZipfSelector::new(objects, seed)?),
            (Distribution::Zipf { .. }, Some(path)) => KeySelector::Replay(ZipfSelector::load_replay(objects, path)?),
        };
        match (selector, skew) {
            (KeySelector::Zipf(zipf), Some(skew)) => Ok(KeySelector::Zipf(zipf.with_server_skew(skew)?)),
            (KeySelector::Replay(zipf), Some(skew)) => Ok(KeySelector::Replay(zipf.with_server_skew(skew)?)),
            (selector, _) => Ok(selector),
        }
    }

    /// Pick the key of the next request.
    pub fn pick_key<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&CacheObject> {
        match self {
            KeySelector::Uniform(uniform) => Ok(uniform.pick_key(rng)),
            KeySelector::Zipf(zipf) | KeySelector::Replay(zipf) => zipf.pick_key(rng),
        }
    }

    /// The objects in selection order.
    pub fn objects(&self) -> &[CacheObject] {
        match self {
            KeySelector::Uniform(uniform) => uniform.objects(),
            KeySelector::Zipf(zipf) | KeySelector::Replay(zipf) => zipf.objects(),
        }
    }

    /// The Zipf selector behind this selector, if any.
    pub fn as_zipf(&self) -> Option<&ZipfSelector> {
        match self {
            KeySelector::Uniform(_) => None,
            KeySelector::Zipf(zipf) | KeySelector::Replay(zipf) => Some(zipf),
        }
    }

    /// Report header lines describing the selector.
    ///
    /// Zipf selectors describe themselves with their serialized state, which makes their reports replayable.
    pub fn describe(&self) -> Vec<String> {
        match self {
            KeySelector::Uniform(uniform) => vec![format!("uniform selection over {} objects", uniform.objects().len())],
            KeySelector::Zipf(zipf) | KeySelector::Replay(zipf) => zipf.state_lines().to_vec(),
        }
    }
}
