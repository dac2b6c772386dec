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

use itertools::Itertools;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use skewload_common::{
    error::{Error, ErrorKind, Result},
    hasher::server_index,
};

use crate::object::CacheObject;

/// Integer scale of the cumulative thresholds.
pub const ZIPF_SCALE: f64 = 990000.0;

/// Cumulative Zipf (`s = 1`) thresholds for `n` ranks.
///
/// Rank `i` (1-indexed) gets weight `i^-1`, normalized to sum to 1 and scaled to [`ZIPF_SCALE`] with truncation.
/// Entry `i` is the sum of the scaled weights of ranks `i..n`, so the array is non-increasing.
pub fn zipf_thresholds(n: usize) -> Vec<u32> {
    let harmonic = (1..=n).map(|i| 1.0 / i as f64).sum::<f64>();
    let mut thresholds = (1..=n)
        .map(|i| (1.0 / i as f64 / harmonic * ZIPF_SCALE) as u32)
        .collect_vec();
    for i in (0..n.saturating_sub(1)).rev() {
        thresholds[i] += thresholds[i + 1];
    }
    thresholds
}

/// Additionally steers load between the first two servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSkew {
    percent: u8,
    servers: usize,
}

impl ServerSkew {
    /// Target server `0` with `percent`% probability and server `1` otherwise.
    pub fn new(percent: u8, servers: usize) -> Result<Self> {
        if percent > 100 {
            return Err(Error::config("server skew must be within [0, 100]").with_context("skew", percent));
        }
        if servers < 2 {
            return Err(Error::config("server skew needs at least two servers").with_context("servers", servers));
        }
        Ok(Self { percent, servers })
    }

    /// Probability of targeting server `0`, in percent.
    pub fn percent(&self) -> u8 {
        self.percent
    }

    fn target<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        if rng.random_range(0..100) < self.percent {
            0
        } else {
            1
        }
    }
}

/// Picks objects by rank with Zipf-distributed probability.
///
/// The rank order is a shuffle of the input order, so the heaviest key is not simply the first one generated. Once
/// built the selector is immutable and may be read by any number of workers, each bringing its own generator.
#[derive(Debug)]
pub struct ZipfSelector {
    objects: Vec<CacheObject>,
    thresholds: Vec<u32>,
    skew: Option<ServerSkew>,
}

impl ZipfSelector {
    /// Weight `objects` by rank and shuffle their order.
    ///
    /// The shuffle is reproducible when `seed` is given.
    pub fn new(mut objects: Vec<CacheObject>, seed: Option<u64>) -> Result<Self> {
        if objects.is_empty() {
            return Err(Error::config("zipf selection needs at least one object"));
        }
        let thresholds = zipf_thresholds(objects.len());

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        objects.shuffle(&mut rng);

        Ok(Self {
            objects,
            thresholds,
            skew: None,
        })
    }

    /// Rebuild a selector from a known rank order and thresholds.
    pub(crate) fn from_parts(objects: Vec<CacheObject>, thresholds: Vec<u32>) -> Result<Self> {
        if objects.is_empty() {
            return Err(Error::config("zipf selection needs at least one object"));
        }
        if objects.len() != thresholds.len() {
            return Err(Error::config("threshold count does not match key count")
                .with_context("thresholds", thresholds.len())
                .with_context("keys", objects.len()));
        }
        Ok(Self {
            objects,
            thresholds,
            skew: None,
        })
    }

    /// Only return keys hashing to a server drawn by `skew`, rejection-sampling the Zipf distribution.
    ///
    /// The sampling loop has no iteration cap. Construction only checks that every server `skew` can target owns at
    /// least one selectable key, otherwise picking could never finish.
    pub fn with_server_skew(mut self, skew: ServerSkew) -> Result<Self> {
        let weights = self.server_weights(skew.servers);
        let targets = [(0, skew.percent > 0), (1, skew.percent < 100)];
        for (server, reachable) in targets {
            if reachable && weights[server] <= 0.0 {
                return Err(Error::config("no selectable key hashes to the skewed server")
                    .with_context("server", server)
                    .with_context("skew", skew.percent));
            }
        }
        self.skew = Some(skew);
        Ok(self)
    }

    /// Pick the next object.
    pub fn pick_key<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&CacheObject> {
        let Some(skew) = self.skew else {
            return self.pick_rank(rng);
        };
        let target = skew.target(rng);
        loop {
            let object = self.pick_rank(rng)?;
            if server_index(object.key(), skew.servers) == target {
                return Ok(object);
            }
        }
    }

    fn pick_rank<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&CacheObject> {
        if self.objects.len() == 1 {
            return Ok(&self.objects[0]);
        }

        let max = self.thresholds[0];
        let min = self.thresholds[self.thresholds.len() - 1];
        if min >= max {
            return Err(self.out_of_range(None, min, max));
        }

        let value = rng.random_range(min..max);
        for i in 1..self.thresholds.len() {
            if value >= self.thresholds[i] {
                return Ok(&self.objects[i - 1]);
            }
        }
        Err(self.out_of_range(Some(value), min, max))
    }

    fn out_of_range(&self, value: Option<u32>, min: u32, max: u32) -> Error {
        let thresholds = self.thresholds.iter().join(",");
        tracing::error!("[zipf selector]: draw {value:?} outside [{min}, {max}), thresholds: {thresholds}");
        Error::new(ErrorKind::Internal, "random value not in threshold range")
            .with_context("value", value.map(|v| v as i64).unwrap_or(-1))
            .with_context("min", min)
            .with_context("max", max)
            .with_context("thresholds", thresholds)
    }

    /// The objects in rank order.
    pub fn objects(&self) -> &[CacheObject] {
        &self.objects
    }

    /// The cumulative thresholds, one per rank.
    pub fn thresholds(&self) -> &[u32] {
        &self.thresholds
    }

    /// The server skew, if any.
    pub fn server_skew(&self) -> Option<ServerSkew> {
        self.skew
    }

    /// Serialized state: the threshold list and the key order, comma separated.
    ///
    /// Written with a `;` prefix each, these two lines form a replay file.
    pub fn state_lines(&self) -> [String; 2] {
        [
            self.thresholds.iter().join(","),
            self.objects.iter().map(|o| o.key()).join(","),
        ]
    }

    /// Probability of each rank being drawn, ignoring server skew.
    pub fn rank_probabilities(&self) -> Vec<f64> {
        let n = self.thresholds.len();
        if n == 1 {
            return vec![1.0];
        }
        let span = self.thresholds[0].saturating_sub(self.thresholds[n - 1]) as f64;
        (0..n)
            .map(|i| match self.thresholds.get(i + 1) {
                Some(next) if span > 0.0 => self.thresholds[i].saturating_sub(*next) as f64 / span,
                _ => 0.0,
            })
            .collect()
    }

    /// Share of the Zipf weight landing on each of `servers` servers, ignoring server skew.
    pub fn server_weights(&self, servers: usize) -> Vec<f64> {
        let mut weights = vec![0.0; servers];
        for (object, p) in self.objects.iter().zip_eq(self.rank_probabilities()) {
            weights[server_index(object.key(), servers)] += p;
        }
        weights
    }

    /// Draw `requests` keys and count how many land on each of `servers` servers.
    pub fn simulate<R: Rng + ?Sized>(&self, requests: u64, servers: usize, rng: &mut R) -> Result<Vec<u64>> {
        let mut counts = vec![0; servers];
        for _ in 0..requests {
            let object = self.pick_key(rng)?;
            counts[server_index(object.key(), servers)] += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::object::generate_objects;

    #[test]
    fn test_zipf_thresholds() {
        assert_eq!(zipf_thresholds(1), vec![990000]);
        assert_eq!(zipf_thresholds(3), vec![990000, 450000, 180000]);
        assert_eq!(
            zipf_thresholds(10),
            vec![989994, 651992, 482991, 370324, 285824, 218224, 161891, 113605, 71355, 33800]
        );
    }

    #[test]
    fn test_zipf_thresholds_non_increasing() {
        for n in [1, 2, 5, 17, 100, 1000, 10_000] {
            let thresholds = zipf_thresholds(n);
            assert_eq!(thresholds.len(), n);
            assert!(thresholds.windows(2).all(|w| w[0] >= w[1]), "n = {n}");
            assert_eq!(thresholds[0], *thresholds.iter().max().unwrap());
            assert!(thresholds[0] <= ZIPF_SCALE as u32);
        }
    }

    #[test]
    fn test_shuffle_reproducible() {
        let a = ZipfSelector::new(generate_objects(100, 8), Some(11)).unwrap();
        let b = ZipfSelector::new(generate_objects(100, 8), Some(11)).unwrap();
        let c = ZipfSelector::new(generate_objects(100, 8), Some(12)).unwrap();
        assert_eq!(a.objects(), b.objects());
        assert_ne!(a.objects(), c.objects());
        assert_ne!(a.objects(), generate_objects(100, 8).as_slice());
    }

    #[test]
    fn test_zipf_skewed_picks() {
        let selector = ZipfSelector::new(generate_objects(100, 8), Some(1)).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        let mut hits: HashMap<&str, usize> = HashMap::new();
        for _ in 0..100_000 {
            *hits.entry(selector.pick_key(&mut rng).unwrap().key()).or_default() += 1;
        }

        let top = selector.objects()[0].key();
        let tenth = selector.objects()[9].key();
        let last = selector.objects()[99].key();
        // Rank 1 draws about 19% of the load, rank 10 about 2%.
        assert!(hits[top] > 15_000, "{}", hits[top]);
        assert!(hits[top] > 5 * hits[tenth]);
        // The last rank sits below the draw range.
        assert!(!hits.contains_key(last));
    }

    #[test]
    fn test_single_object() {
        let selector = ZipfSelector::new(generate_objects(1, 8), None).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..10 {
            assert_eq!(selector.pick_key(&mut rng).unwrap().key(), "mem-key-0");
        }
        assert_eq!(selector.rank_probabilities(), vec![1.0]);
    }

    #[test]
    fn test_empty_draw_range_is_internal_error() {
        let selector = ZipfSelector::from_parts(generate_objects(2, 8), vec![5, 5]).unwrap();
        let err = selector.pick_key(&mut StdRng::seed_from_u64(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_server_skew_full() {
        let skew = ServerSkew::new(100, 2).unwrap();
        let selector = ZipfSelector::new(generate_objects(50, 8), Some(5))
            .unwrap()
            .with_server_skew(skew)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..1000 {
            let object = selector.pick_key(&mut rng).unwrap();
            assert_eq!(server_index(object.key(), 2), 0);
        }

        let skew = ServerSkew::new(0, 2).unwrap();
        let selector = ZipfSelector::new(generate_objects(50, 8), Some(5))
            .unwrap()
            .with_server_skew(skew)
            .unwrap();
        for _ in 0..1000 {
            let object = selector.pick_key(&mut rng).unwrap();
            assert_eq!(server_index(object.key(), 2), 1);
        }
    }

    #[test]
    fn test_server_skew_split() {
        let skew = ServerSkew::new(80, 2).unwrap();
        let selector = ZipfSelector::new(generate_objects(200, 8), Some(9))
            .unwrap()
            .with_server_skew(skew)
            .unwrap();
        let counts = selector.simulate(20_000, 2, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(counts.iter().sum::<u64>(), 20_000);
        assert!((15_000..17_000).contains(&counts[0]), "{counts:?}");
    }

    #[test]
    fn test_server_skew_unreachable() {
        // A lone key is never on both servers.
        let objects = vec![CacheObject::new("mem-key-0", "v"), CacheObject::new("mem-key-2", "v")];
        let selector = ZipfSelector::from_parts(objects, vec![990000, 330000]).unwrap();
        assert!(selector.with_server_skew(ServerSkew::new(50, 2).unwrap()).is_err());

        assert!(ServerSkew::new(101, 2).is_err());
        assert!(ServerSkew::new(50, 1).is_err());
    }

    #[test]
    fn test_server_weights() {
        let selector = ZipfSelector::new(generate_objects(100, 8), Some(3)).unwrap();
        let probabilities = selector.rank_probabilities();
        assert!((probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(probabilities.windows(2).all(|w| w[0] >= w[1]));

        let weights = selector.server_weights(2);
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}
