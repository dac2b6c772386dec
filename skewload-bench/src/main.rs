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

//! `skewload-bench` drives a skewed GET workload against a UDP-framed cache cluster and records per-request latency.

mod analyze;
mod error;
mod load;

use std::{net::IpAddr, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};
use skewload::{
    generate_objects, ClientOptions, Distribution, Driver, ExperimentConfig, KeySelector, ServerEndpoint, ServerSkew,
    Termination, UdpClient,
};

use crate::error::{Error, Result};

#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Command line arguments.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Comma separated cache servers, `host[:port]`.
    #[arg(long, default_value = "127.0.0.1:11211")]
    servers: String,

    /// Sleep between two requests of a worker (ms).
    #[arg(long, default_value_t = 1000)]
    sleep: u64,

    /// Populate the servers with the generated objects before the experiment.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    write_objects: bool,

    /// Number of generated objects.
    #[arg(long, default_value_t = 1000)]
    objects_count: usize,

    /// Value size of every generated object (bytes).
    #[arg(long, default_value_t = 1000)]
    object_size: usize,

    /// Concurrent workers.
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Local address for the client sockets.
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Experiment duration (s).
    #[arg(long, conflicts_with = "max_requests")]
    duration: Option<u64>,

    /// Stop after this many outcomes are written.
    #[arg(long)]
    max_requests: Option<u64>,

    /// Report file.
    #[arg(long, default_value = "latency.txt")]
    latency_output_file: PathBuf,

    /// `random` (or `uniform`), `zipf` or `zipf-<seed>`.
    #[arg(long, default_value = "random")]
    keys_distribution_method: String,

    /// Restore the zipf key order from a previous report.
    #[arg(long)]
    keys_distribution_file: Option<PathBuf>,

    /// Cap the requests issued at exactly `--max-requests`.
    #[arg(long, default_value_t = false)]
    exact_requests_count: bool,

    /// Skip the set/get sanity check.
    #[arg(long, default_value_t = false)]
    skip_sanity: bool,

    /// Print the zipf weights and a simulated request split, then exit.
    #[arg(long, default_value_t = false)]
    print_zipf_weights: bool,

    /// Percentage of zipf picks targeted at server 0, the rest go to server 1.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    zipf_picker_factor: Option<u8>,

    /// Receive timeout for every response datagram (ms).
    #[arg(long, default_value_t = 1000)]
    recv_timeout: u64,
}

/// Samples of the zipf simulation when `--max-requests` is not set.
const DEFAULT_SIMULATED_REQUESTS: u64 = 100_000;

#[cfg(feature = "tokio-console")]
fn init_logger() {
    console_subscriber::init();
}

#[cfg(not(feature = "tokio-console"))]
fn init_logger() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_line_number(true))
        .with(EnvFilter::from_default_env())
        .init();
}

/// Store a probe value through the UDP client and read it back.
async fn sanity_check(servers: &[ServerEndpoint], options: ClientOptions) -> Result<()> {
    const KEY: &str = "key";
    const VALUE: &str = "value";

    let mut client = UdpClient::new(Arc::from(servers), options)?;
    client.set(KEY, VALUE).await?;
    let value = client.get(KEY).await?.value()?;
    client.close();

    match value {
        Some(value) if value == VALUE.as_bytes() => {
            tracing::info!("[sanity]: set and get through {} passed", servers[client.pick_server(KEY)]);
            Ok(())
        }
        actual => Err(Error::SanityCheck {
            expected: VALUE.to_string(),
            actual: actual.map(|v| String::from_utf8_lossy(&v).to_string()),
        }),
    }
}

async fn run(args: Args) -> Result<()> {
    let servers = ServerEndpoint::resolve_list(&args.servers)?;
    let distribution = args.keys_distribution_method.parse::<Distribution>()?;
    let termination = Termination::from_options(args.duration.map(Duration::from_secs), args.max_requests)?;
    let skew = args
        .zipf_picker_factor
        .map(|percent| ServerSkew::new(percent, servers.len()))
        .transpose()?;

    let config = ExperimentConfig {
        threads: args.threads,
        interval: Duration::from_millis(args.sleep),
        termination,
        exact_count: args.exact_requests_count,
        bind: args.bind,
        recv_timeout: Duration::from_millis(args.recv_timeout),
        seed: distribution.seed(),
        report: args.latency_output_file.clone(),
        metadata: vec![format!(
            "objects: {} x {}B, distribution: {}, threads: {}, sleep: {}",
            args.objects_count,
            args.object_size,
            args.keys_distribution_method,
            args.threads,
            humantime::format_duration(Duration::from_millis(args.sleep)),
        )],
        ..ExperimentConfig::new(servers.clone())
    };
    config.validate()?;

    let objects = generate_objects(args.objects_count, args.object_size);
    let selector = KeySelector::build(
        distribution,
        objects.clone(),
        args.keys_distribution_file.as_deref(),
        skew,
    )?;

    if args.print_zipf_weights {
        let zipf = selector
            .as_zipf()
            .ok_or_else(|| skewload::Error::config("printing zipf weights needs zipf selection"))?;
        let mut rng = match distribution.seed() {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let requests = args.max_requests.unwrap_or(DEFAULT_SIMULATED_REQUESTS);
        return analyze::display_zipf_weights(zipf, servers.len(), requests, &mut rng);
    }

    if !args.skip_sanity {
        sanity_check(&servers, config.client_options()).await?;
    }
    if args.write_objects {
        load::populate(&servers, objects).await?;
    }

    let driver = Driver::new(config, selector)?;
    let handle = driver.handle();
    let handle_signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("skewload-bench is cancelled with CTRL-C");
            handle.stop();
        }
    });

    let report = driver.run().await;
    handle_signal.abort();
    let report = report?;

    println!("\nreport written to {}", args.latency_output_file.display());
    println!("\nTotal:\n{report}");
    Ok(())
}

#[tokio::main]
async fn main() {
    init_logger();

    #[cfg(feature = "deadlock")]
    {
        std::thread::spawn(move || loop {
            std::thread::sleep(Duration::from_secs(1));
            let deadlocks = parking_lot::deadlock::check_deadlock();
            if deadlocks.is_empty() {
                continue;
            }

            println!("{} deadlocks detected", deadlocks.len());
            for (i, threads) in deadlocks.iter().enumerate() {
                println!("Deadlock #{}", i);
                for t in threads {
                    println!("Thread Id {:#?}", t.thread_id());
                    println!("{:#?}", t.backtrace());
                }
            }
            panic!()
        });
    }

    let args = Args::parse();
    println!("{:#?}", args);

    if let Err(e) = run(args).await {
        tracing::error!("skewload-bench failed: {e}");
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}
