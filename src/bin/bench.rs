//! kvserver Benchmark Binary
//!
//! Runs a synthetic workload against a running server and prints a latency
//! summary. Raw samples can be exported for external plotting.

use std::fs::File;
use std::io::BufWriter;

use clap::Parser;
use kvserver::bench::{BenchConfig, BenchmarkDriver, WorkloadKind};
use kvserver::metrics::write_samples;
use tracing_subscriber::{fmt, EnvFilter};

/// kvserver Benchmark
#[derive(Parser, Debug)]
#[command(name = "kv-bench")]
#[command(about = "Benchmark driver for the kvserver key-value store")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = kvserver::config::DEFAULT_LISTEN_ADDR)]
    server: String,

    /// Parallel client sessions
    #[arg(short, long, default_value = "8")]
    clients: usize,

    /// Operations per client
    #[arg(short = 'n', long, default_value = "1000")]
    operations: usize,

    /// Number of pre-populated keys
    #[arg(short, long, default_value = "100")]
    keys: usize,

    /// Workload: sequential, uniform or hotspot
    #[arg(short, long, default_value = "uniform")]
    workload: WorkloadKind,

    /// Seed for the key generators
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Skip pre-populating the keyspace
    #[arg(long)]
    no_populate: bool,

    /// Write raw samples (bincode) to this file
    #[arg(short, long)]
    export: Option<String>,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kvserver=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let config = BenchConfig {
        addr: args.server,
        clients: args.clients,
        operations: args.operations,
        key_space: args.keys,
        workload: args.workload,
        seed: args.seed,
        populate: !args.no_populate,
        ..BenchConfig::default()
    };

    let driver = match BenchmarkDriver::new(config) {
        Ok(driver) => driver,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(2);
        }
    };

    let report = match driver.run() {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Benchmark failed: {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", report);

    if let Some(path) = args.export {
        let result = File::create(&path)
            .map_err(kvserver::KvError::from)
            .and_then(|file| write_samples(BufWriter::new(file), &report.samples));
        match result {
            Ok(()) => tracing::info!("Wrote {} sample(s) to {}", report.samples.len(), path),
            Err(e) => {
                tracing::error!("Could not export samples to {}: {}", path, e);
                std::process::exit(1);
            }
        }
    }

    if report.mismatches > 0 || report.failed_clients > 0 {
        std::process::exit(1);
    }
}
