//! Benchmark Driver
//!
//! Generates synthetic workloads, drives several clients in parallel and
//! aggregates their timing samples.
//!
//! ## Workloads
//! - `sequential`: PUT then GET on keys private to each client
//! - `uniform`: GETs spread uniformly over the pre-populated keyspace
//! - `hotspot`: every GET hits the same key
//!
//! The keyspace is pre-populated with `key{i}` -> `value{i}` before the
//! clients start; every value returned is checked against what the client
//! expects to see.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::thread;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::client::{Client, ClientOptions, OperationSource, RunEvent};
use crate::error::{KvError, Result};
use crate::metrics::{MetricSample, MetricSink, MetricsSummary};
use crate::protocol::{Operation, Reply};

/// Shape of the generated operation stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Sequential,
    Uniform,
    Hotspot,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Sequential => "sequential",
            WorkloadKind::Uniform => "uniform",
            WorkloadKind::Hotspot => "hotspot",
        }
    }
}

impl FromStr for WorkloadKind {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(WorkloadKind::Sequential),
            "uniform" => Ok(WorkloadKind::Uniform),
            "hotspot" | "hot" => Ok(WorkloadKind::Hotspot),
            other => Err(KvError::Config(format!("unknown workload: {}", other))),
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of the `index`-th pre-populated entry
pub fn populated_key(index: usize) -> String {
    format!("key{}", index)
}

/// Value stored under `populated_key(index)`
pub fn populated_value(index: usize) -> String {
    format!("value{}", index)
}

/// Operation stream for one benchmark client
pub struct Workload {
    kind: WorkloadKind,
    client: usize,
    key_space: usize,
    remaining: usize,
    issued: u64,
    rng: StdRng,
    pending_get: Option<Bytes>,
}

impl Workload {
    /// `operations` items for client number `client`; the seed is mixed
    /// with the client number so clients do not replay each other
    pub fn new(
        kind: WorkloadKind,
        client: usize,
        operations: usize,
        key_space: usize,
        seed: u64,
    ) -> Self {
        Self {
            kind,
            client,
            key_space: key_space.max(1),
            remaining: operations,
            issued: 0,
            rng: StdRng::seed_from_u64(seed.wrapping_add(client as u64)),
            pending_get: None,
        }
    }

    fn sequential(&mut self) -> Operation {
        if let Some(key) = self.pending_get.take() {
            return Operation::Get { key };
        }

        let slot = (self.issued / 2) as usize % self.key_space;
        let key = Bytes::from(format!("c{}-key{}", self.client, slot));
        let value = Bytes::from(format!("c{}-value{}", self.client, self.issued));
        self.pending_get = Some(key.clone());
        Operation::Put {
            key,
            value,
            expected: None,
        }
    }
}

impl OperationSource for Workload {
    fn next_operation(&mut self) -> Option<Result<Operation>> {
        if self.remaining == 0 {
            return None;
        }

        let operation = match self.kind {
            WorkloadKind::Sequential => self.sequential(),
            WorkloadKind::Uniform => {
                let index = self.rng.gen_range(0..self.key_space);
                Operation::get(populated_key(index))
            }
            WorkloadKind::Hotspot => Operation::get(populated_key(0)),
        };

        self.remaining -= 1;
        self.issued += 1;
        Some(Ok(operation))
    }
}

/// Checks returned values against what this client wrote or what was
/// pre-populated
#[derive(Debug, Default)]
pub struct Verifier {
    key_space: usize,
    written: HashMap<Bytes, Bytes>,
    mismatches: u64,
}

impl Verifier {
    pub fn new(key_space: usize) -> Self {
        Self {
            key_space,
            ..Self::default()
        }
    }

    /// Value this client should read back for `key`, if it knows one
    pub fn expected(&self, key: &[u8]) -> Option<Bytes> {
        if let Some(value) = self.written.get(key) {
            return Some(value.clone());
        }

        let index: usize = std::str::from_utf8(key)
            .ok()?
            .strip_prefix("key")?
            .parse()
            .ok()?;
        (index < self.key_space).then(|| Bytes::from(populated_value(index)))
    }

    /// Feed one completed exchange
    pub fn observe(&mut self, operation: &Operation, reply: &Reply) {
        match (operation, reply) {
            (Operation::Put { key, value, .. }, Reply::Written { .. }) => {
                self.written.insert(key.clone(), value.clone());
            }
            (Operation::Get { key }, Reply::Value { value, .. }) => {
                if let Some(expected) = self.expected(key) {
                    if &expected != value {
                        tracing::warn!(
                            "Value mismatch for {}: expected {:?}, got {:?}",
                            String::from_utf8_lossy(key),
                            expected,
                            value
                        );
                        self.mismatches += 1;
                    }
                }
            }
            (Operation::Get { key }, Reply::NotFound) => {
                if self.expected(key).is_some() {
                    tracing::warn!("Expected key {} is missing", String::from_utf8_lossy(key));
                    self.mismatches += 1;
                }
            }
            _ => {}
        }
    }

    pub fn mismatches(&self) -> u64 {
        self.mismatches
    }
}

/// Benchmark parameters
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Server address (host:port)
    pub addr: String,

    /// Parallel client sessions
    pub clients: usize,

    /// Operations per client
    pub operations: usize,

    /// Number of pre-populated keys
    pub key_space: usize,

    pub workload: WorkloadKind,

    /// Base seed for the key generators
    pub seed: u64,

    /// Write `key{i}` -> `value{i}` before starting the clients
    pub populate: bool,

    /// Sample buffer size; older samples are dropped beyond it
    pub metrics_capacity: usize,

    pub options: ClientOptions,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            addr: crate::config::DEFAULT_LISTEN_ADDR.to_string(),
            clients: 8,
            operations: 1000,
            key_space: 100,
            workload: WorkloadKind::Uniform,
            seed: 42,
            populate: true,
            metrics_capacity: 1 << 20,
            options: ClientOptions::default(),
        }
    }
}

/// Results of one benchmark run
#[derive(Debug, Clone)]
pub struct BenchReport {
    pub summary: MetricsSummary,

    /// Raw samples, for export
    pub samples: Vec<MetricSample>,

    /// Returned values that did not match the expected ones
    pub mismatches: u64,

    /// Operations whose outcome is unknown
    pub unknown: u64,

    /// Clients that could not connect or lost their session for good
    pub failed_clients: usize,

    /// Samples lost to the bounded buffer
    pub dropped: u64,
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary)?;
        write!(
            f,
            "mismatches: {}, unknown: {}, failed clients: {}, dropped samples: {}",
            self.mismatches, self.unknown, self.failed_clients, self.dropped
        )
    }
}

/// What one client thread hands back
#[derive(Debug, Default)]
struct ClientOutcome {
    mismatches: u64,
    unknown: u64,
    failed: bool,
}

/// Drives `clients` parallel sessions against a running server
pub struct BenchmarkDriver {
    config: BenchConfig,
}

impl BenchmarkDriver {
    pub fn new(config: BenchConfig) -> Result<Self> {
        if config.clients == 0 {
            return Err(KvError::Config("clients must be at least 1".into()));
        }
        if config.key_space == 0 {
            return Err(KvError::Config("key space must be at least 1".into()));
        }
        if config.metrics_capacity == 0 {
            return Err(KvError::Config("metrics capacity must be at least 1".into()));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Check the server is alive, then populate the keyspace if configured
    ///
    /// Uses one setup session, separate from the measured clients.
    pub fn prepare(&self) -> Result<()> {
        let mut client = Client::connect(self.config.addr.as_str(), self.config.options.clone())?;
        client.ping()?;

        if self.config.populate {
            populate(&mut client, self.config.key_space)?;
            tracing::info!("Populated {} keys", self.config.key_space);
        }

        client.close();
        Ok(())
    }

    /// Prepare, run every client to completion and aggregate their samples
    pub fn run(&self) -> Result<BenchReport> {
        self.prepare()?;

        let sink = MetricSink::new(self.config.metrics_capacity);

        tracing::info!(
            "Starting {} client(s), {} {} operation(s) each",
            self.config.clients,
            self.config.operations,
            self.config.workload
        );

        let handles: Vec<_> = (0..self.config.clients)
            .map(|client| {
                let config = self.config.clone();
                let sink = sink.clone();
                thread::Builder::new()
                    .name(format!("kv-bench-{}", client))
                    .spawn(move || run_client(client, &config, &sink))
            })
            .collect::<std::io::Result<_>>()?;

        let mut report = BenchReport {
            summary: MetricsSummary::default(),
            samples: Vec::new(),
            mismatches: 0,
            unknown: 0,
            failed_clients: 0,
            dropped: 0,
        };

        for handle in handles {
            match handle.join() {
                Ok(outcome) => {
                    report.mismatches += outcome.mismatches;
                    report.unknown += outcome.unknown;
                    if outcome.failed {
                        report.failed_clients += 1;
                    }
                }
                Err(_) => {
                    tracing::error!("Benchmark client panicked");
                    report.failed_clients += 1;
                }
            }
        }

        report.samples = sink.drain();
        report.dropped = sink.dropped();
        report.summary = MetricsSummary::from_samples(&report.samples);

        tracing::info!(
            "Benchmark finished: {} samples, {} mismatches, {} failed client(s)",
            report.samples.len(),
            report.mismatches,
            report.failed_clients
        );
        Ok(report)
    }
}

/// Write `key{i}` -> `value{i}` for `0..key_space`
pub fn populate(client: &mut Client, key_space: usize) -> Result<()> {
    for index in 0..key_space {
        client.put(populated_key(index), populated_value(index))?;
    }
    Ok(())
}

fn run_client(client: usize, config: &BenchConfig, sink: &MetricSink) -> ClientOutcome {
    let mut outcome = ClientOutcome::default();

    let mut session = match Client::connect(config.addr.as_str(), config.options.clone()) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("Client {} could not connect: {}", client, e);
            outcome.failed = true;
            return outcome;
        }
    };

    let mut workload = Workload::new(
        config.workload,
        client,
        config.operations,
        config.key_space,
        config.seed,
    );
    let mut verifier = Verifier::new(config.key_space);

    // Counted here rather than from the run summary, which is lost when
    // the run stops early
    let mut unknown = 0;
    let result = session.run(&mut workload, Some(sink), |event| match event {
        RunEvent::Completed {
            operation,
            result: Ok(reply),
        } => verifier.observe(operation, reply),
        RunEvent::Completed {
            result: Err(KvError::OutcomeUnknown(_)),
            ..
        } => unknown += 1,
        _ => {}
    });

    if let Err(e) = result {
        tracing::warn!("Client {} stopped early: {}", client, e);
        outcome.failed = true;
    }

    outcome.unknown = unknown;

    outcome.mismatches = verifier.mismatches();
    session.close();
    outcome
}
