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

//! Zipf weight analysis printed instead of running an experiment.

use rand::Rng;
use skewload::ZipfSelector;

use crate::error::Result;

const W: usize = 100;
const TOP_RANKS: usize = 10;

fn bar(ratio: f64, max: f64) -> String {
    let shares = if max > 0.0 { (ratio / max * W as f64) as usize } else { 0 };
    if shares != 0 {
        "=".repeat(shares)
    } else {
        ".".to_string()
    }
}

/// Render the share of selections per group as a bar diagram.
fn diagram(ratios: &[f64], counts: Option<&[u64]>) -> Vec<String> {
    let max = ratios.iter().copied().fold(0.0, f64::max);
    ratios
        .iter()
        .enumerate()
        .map(|(i, ratio)| match counts {
            Some(counts) => format!("{:3} : {:8} : {:7.3}% : {}", i, counts[i], ratio * 100.0, bar(*ratio, max)),
            None => format!("{:3} : {:7.3}% : {}", i, ratio * 100.0, bar(*ratio, max)),
        })
        .collect()
}

/// Print the heaviest ranks, the weight share of every server and a simulated split of `requests` picks.
pub fn display_zipf_weights<R: Rng + ?Sized>(
    zipf: &ZipfSelector,
    servers: usize,
    requests: u64,
    rng: &mut R,
) -> Result<()> {
    let probabilities = zipf.rank_probabilities();
    println!(
        "zipf's heaviest ranks [N = {}][skew = {:?}]",
        zipf.objects().len(),
        zipf.server_skew().map(|skew| skew.percent())
    );
    for (rank, (object, p)) in zipf.objects().iter().zip(probabilities.iter()).take(TOP_RANKS).enumerate() {
        println!("{:3} : {:>16} : {:7.3}%", rank + 1, object.key(), p * 100.0);
    }

    println!("zipf weight per server [servers = {servers}]");
    for line in diagram(&zipf.server_weights(servers), None) {
        println!("{line}");
    }

    if requests > 0 {
        let counts = zipf.simulate(requests, servers, rng)?;
        let ratios = counts.iter().map(|c| *c as f64 / requests as f64).collect::<Vec<_>>();
        println!("simulated requests per server [samples = {requests}]");
        for line in diagram(&ratios, Some(&counts)) {
            println!("{line}");
        }
    }
    Ok(())
}
