//! kvserver Server Binary
//!
//! Starts the TCP server. Takes either no positional parameters (defaults)
//! or exactly three: `<max-clients> <shards> <queue-depth>`.

use std::fs::File;
use std::io::BufWriter;

use clap::Parser;
use kvserver::metrics::{write_samples, MetricsSummary};
use kvserver::network::Server;
use kvserver::Config;
use tracing_subscriber::{fmt, EnvFilter};

/// kvserver Server
#[derive(Parser, Debug)]
#[command(name = "kv-server")]
#[command(about = "Concurrent sharded in-memory key-value server")]
#[command(version)]
struct Args {
    /// Bootstrap parameters: <max-clients> <shards> <queue-depth>
    #[arg(num_args = 0..=3, value_name = "PARAMS")]
    params: Vec<usize>,

    /// Listen address (host:port)
    #[arg(short, long, default_value = kvserver::config::DEFAULT_LISTEN_ADDR)]
    listen: String,

    /// Idle session timeout in milliseconds (0 disables)
    #[arg(long, default_value = "300000")]
    idle_timeout_ms: u64,

    /// How long shutdown waits for busy workers, in milliseconds
    #[arg(long, default_value = "5000")]
    grace_ms: u64,

    /// Upper bound on a single GETWHEN wait, in milliseconds
    #[arg(long, default_value = "30000")]
    get_when_timeout_ms: u64,

    /// Write server-side metric samples here on shutdown
    #[arg(long)]
    export: Option<String>,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kvserver=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("kvserver v{}", kvserver::VERSION);

    if args.params.is_empty() {
        tracing::warn!(
            "No arguments passed! Using defaults: {:?}",
            kvserver::config::DEFAULT_BOOTSTRAP
        );
    }

    let base = match Config::from_bootstrap(&args.params) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("usage: kv-server [<max-clients> <shards> <queue-depth>]");
            std::process::exit(2);
        }
    };

    let config = Config::builder()
        .listen_addr(&args.listen)
        .max_clients(base.max_clients)
        .shards(base.shards)
        .queue_depth(base.queue_depth)
        .read_timeout_ms(args.idle_timeout_ms)
        .shutdown_grace_ms(args.grace_ms)
        .get_when_timeout_ms(args.get_when_timeout_ms)
        .build();

    let server = match Server::with_config(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    // Set up Ctrl+C handler
    let handle = server.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, initiating shutdown...");
        handle.shutdown();
    }) {
        tracing::warn!("Could not install Ctrl+C handler: {}", e);
    }

    let metrics = server.metrics();

    match server.run() {
        Ok(stats) => tracing::info!(
            "Served {} operation(s) over {} session(s), rejected {}",
            stats.operations,
            stats.accepted,
            stats.rejected
        ),
        Err(e) => {
            tracing::error!("Server error: {}", e);
            std::process::exit(1);
        }
    }

    let samples = metrics.drain();
    if !samples.is_empty() {
        tracing::info!(
            "Latency summary ({} dropped):\n{}",
            metrics.dropped(),
            MetricsSummary::from_samples(&samples)
        );
    }

    if let Some(path) = args.export {
        let result = File::create(&path)
            .map_err(kvserver::KvError::from)
            .and_then(|file| write_samples(BufWriter::new(file), &samples));
        match result {
            Ok(()) => tracing::info!("Wrote {} sample(s) to {}", samples.len(), path),
            Err(e) => tracing::error!("Could not export samples to {}: {}", path, e),
        }
    }

    tracing::info!("Server stopped");
}
