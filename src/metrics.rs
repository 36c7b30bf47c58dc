//! Metrics Module
//!
//! Per-operation timing samples for benchmarking and plotting.
//!
//! ## Responsibilities
//! - Collect one `MetricSample` per completed operation
//! - Never block the caller: the sink is a bounded ring that drops the
//!   oldest sample on overflow and counts the drop
//! - Summarize latencies and export samples for external plotting
//!
//! ## Export Format
//! `write_samples` emits a bincode-encoded `Vec<MetricSample>`; start and
//! end are microseconds since the sink was created.

use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::{OpKind, Reply};

/// Coarse outcome of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleOutcome {
    /// Value returned, write applied, delete applied or pong
    Ok,
    NotFound,
    Conflict,
    TimedOut,
    /// Server reported an error
    Error,
    /// Transport failed; the operation may or may not have been applied
    Unknown,
}

impl From<&Reply> for SampleOutcome {
    fn from(reply: &Reply) -> Self {
        match reply {
            Reply::Value { .. } | Reply::Written { .. } | Reply::Deleted | Reply::Pong => {
                SampleOutcome::Ok
            }
            Reply::NotFound => SampleOutcome::NotFound,
            Reply::VersionConflict { .. } => SampleOutcome::Conflict,
            Reply::TimedOut => SampleOutcome::TimedOut,
            Reply::Error(_) => SampleOutcome::Error,
        }
    }
}

/// Timing record for one completed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSample {
    pub kind: OpKind,

    /// Microseconds since the sink's epoch
    pub start_us: u64,

    /// Microseconds since the sink's epoch
    pub end_us: u64,

    pub outcome: SampleOutcome,
}

impl MetricSample {
    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.end_us.saturating_sub(self.start_us))
    }
}

struct SinkInner {
    samples: ArrayQueue<MetricSample>,
    dropped: AtomicU64,
    epoch: Instant,
}

/// Bounded, lock-free collector of metric samples
///
/// Cloning shares the same buffer.
#[derive(Clone)]
pub struct MetricSink {
    inner: Arc<SinkInner>,
}

impl MetricSink {
    /// Create a sink holding at most `capacity` samples (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                samples: ArrayQueue::new(capacity.max(1)),
                dropped: AtomicU64::new(0),
                epoch: Instant::now(),
            }),
        }
    }

    /// Record an operation that ran from `started` to `finished`
    pub fn record(&self, kind: OpKind, started: Instant, finished: Instant, outcome: SampleOutcome) {
        let sample = MetricSample {
            kind,
            start_us: self.offset_us(started),
            end_us: self.offset_us(finished),
            outcome,
        };
        self.push(sample);
    }

    /// Push a sample, evicting the oldest one if the buffer is full
    pub fn push(&self, sample: MetricSample) {
        if self.inner.samples.force_push(sample).is_some() {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take every buffered sample, oldest first
    pub fn drain(&self) -> Vec<MetricSample> {
        let mut samples = Vec::with_capacity(self.inner.samples.len());
        while let Some(sample) = self.inner.samples.pop() {
            samples.push(sample);
        }
        samples
    }

    /// Samples evicted because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.samples.capacity()
    }

    fn offset_us(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.inner.epoch).as_micros() as u64
    }
}

/// Aggregated latency statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSummary {
    pub count: usize,
    pub ok: usize,
    pub not_found: usize,
    pub conflicts: usize,
    pub timed_out: usize,
    pub errors: usize,
    pub unknown: usize,
    pub mean: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
    /// Wall time from the first start to the last end
    pub elapsed: Duration,
}

impl MetricsSummary {
    pub fn from_samples(samples: &[MetricSample]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut summary = Self {
            count: samples.len(),
            ..Self::default()
        };

        for sample in samples {
            match sample.outcome {
                SampleOutcome::Ok => summary.ok += 1,
                SampleOutcome::NotFound => summary.not_found += 1,
                SampleOutcome::Conflict => summary.conflicts += 1,
                SampleOutcome::TimedOut => summary.timed_out += 1,
                SampleOutcome::Error => summary.errors += 1,
                SampleOutcome::Unknown => summary.unknown += 1,
            }
        }

        let mut latencies: Vec<Duration> = samples.iter().map(MetricSample::latency).collect();
        latencies.sort_unstable();

        let total: Duration = latencies.iter().sum();
        summary.mean = total / latencies.len() as u32;
        summary.p50 = percentile(&latencies, 50.0);
        summary.p95 = percentile(&latencies, 95.0);
        summary.p99 = percentile(&latencies, 99.0);
        summary.max = latencies[latencies.len() - 1];

        let first = samples.iter().map(|s| s.start_us).min().unwrap_or(0);
        let last = samples.iter().map(|s| s.end_us).max().unwrap_or(0);
        summary.elapsed = Duration::from_micros(last.saturating_sub(first));

        summary
    }

    /// Completed operations per second over the elapsed window
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.count as f64 / secs
        } else {
            0.0
        }
    }
}

/// Nearest-rank percentile over sorted latencies
fn percentile(sorted: &[Duration], pct: f64) -> Duration {
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "operations: {} (ok {}, not found {}, conflicts {}, timed out {}, errors {}, unknown {})",
            self.count,
            self.ok,
            self.not_found,
            self.conflicts,
            self.timed_out,
            self.errors,
            self.unknown
        )?;
        writeln!(
            f,
            "latency: mean {:?}, p50 {:?}, p95 {:?}, p99 {:?}, max {:?}",
            self.mean, self.p50, self.p95, self.p99, self.max
        )?;
        write!(
            f,
            "elapsed: {:?} ({:.1} ops/s)",
            self.elapsed,
            self.throughput()
        )
    }
}

/// Write samples for an external plotter
pub fn write_samples<W: Write>(writer: W, samples: &[MetricSample]) -> Result<()> {
    bincode::serialize_into(writer, samples)?;
    Ok(())
}

/// Read samples written by `write_samples`
pub fn read_samples<R: Read>(reader: R) -> Result<Vec<MetricSample>> {
    Ok(bincode::deserialize_from(reader)?)
}
