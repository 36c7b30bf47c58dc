//! Metrics Tests
//!
//! Tests for the bounded sample sink, summaries and sample export.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::thread;
use std::time::{Duration, Instant};

use kvserver::metrics::{
    read_samples, write_samples, MetricSample, MetricSink, MetricsSummary, SampleOutcome,
};
use kvserver::protocol::{OpKind, Reply};
use tempfile::tempdir;

fn sample(start_us: u64, latency_us: u64, outcome: SampleOutcome) -> MetricSample {
    MetricSample {
        kind: OpKind::Get,
        start_us,
        end_us: start_us + latency_us,
        outcome,
    }
}

// =============================================================================
// Sink Tests
// =============================================================================

#[test]
fn test_record_offsets_from_epoch() {
    let sink = MetricSink::new(8);
    let started = Instant::now();
    let finished = started + Duration::from_millis(3);
    sink.record(OpKind::Put, started, finished, SampleOutcome::Ok);

    let samples = sink.drain();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].kind, OpKind::Put);
    assert_eq!(samples[0].latency(), Duration::from_millis(3));
    assert!(sink.is_empty());
}

#[test]
fn test_overflow_drops_oldest() {
    let sink = MetricSink::new(3);
    for i in 0..5 {
        sink.push(sample(i, 1, SampleOutcome::Ok));
    }

    assert_eq!(sink.len(), 3);
    assert_eq!(sink.dropped(), 2);

    let starts: Vec<u64> = sink.drain().iter().map(|s| s.start_us).collect();
    assert_eq!(starts, vec![2, 3, 4]);
}

#[test]
fn test_clones_share_buffer() {
    let sink = MetricSink::new(1024);
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let sink = sink.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    sink.push(sample(t * 1000 + i, 1, SampleOutcome::Ok));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(sink.len(), 400);
    assert_eq!(sink.dropped(), 0);
}

#[test]
fn test_push_never_blocks_when_full() {
    let sink = MetricSink::new(1);
    let started = Instant::now();
    for i in 0..10_000 {
        sink.push(sample(i, 1, SampleOutcome::Ok));
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.dropped(), 9_999);
}

#[test]
fn test_outcome_from_reply() {
    assert_eq!(
        SampleOutcome::from(&Reply::Written { version: 1 }),
        SampleOutcome::Ok
    );
    assert_eq!(SampleOutcome::from(&Reply::NotFound), SampleOutcome::NotFound);
    assert_eq!(
        SampleOutcome::from(&Reply::VersionConflict { actual: 2 }),
        SampleOutcome::Conflict
    );
    assert_eq!(SampleOutcome::from(&Reply::TimedOut), SampleOutcome::TimedOut);
    assert_eq!(
        SampleOutcome::from(&Reply::Error("x".into())),
        SampleOutcome::Error
    );
}

// =============================================================================
// Summary Tests
// =============================================================================

#[test]
fn test_summary_of_nothing() {
    let summary = MetricsSummary::from_samples(&[]);
    assert_eq!(summary.count, 0);
    assert_eq!(summary.throughput(), 0.0);
}

#[test]
fn test_summary_percentiles() {
    // Latencies 1..=100 microseconds, back to back
    let samples: Vec<_> = (1..=100)
        .map(|i| sample(i * 100, i, SampleOutcome::Ok))
        .collect();
    let summary = MetricsSummary::from_samples(&samples);

    assert_eq!(summary.count, 100);
    assert_eq!(summary.ok, 100);
    assert_eq!(summary.p50, Duration::from_micros(50));
    assert_eq!(summary.p95, Duration::from_micros(95));
    assert_eq!(summary.p99, Duration::from_micros(99));
    assert_eq!(summary.max, Duration::from_micros(100));
    assert_eq!(summary.mean, Duration::from_nanos(50_500));
    assert_eq!(summary.elapsed, Duration::from_micros(10_100 - 100));
}

#[test]
fn test_summary_counts_outcomes() {
    let samples = vec![
        sample(0, 5, SampleOutcome::Ok),
        sample(0, 5, SampleOutcome::NotFound),
        sample(0, 5, SampleOutcome::Conflict),
        sample(0, 5, SampleOutcome::TimedOut),
        sample(0, 5, SampleOutcome::Error),
        sample(0, 5, SampleOutcome::Unknown),
    ];
    let summary = MetricsSummary::from_samples(&samples);

    assert_eq!(summary.count, 6);
    assert_eq!(
        (
            summary.ok,
            summary.not_found,
            summary.conflicts,
            summary.timed_out,
            summary.errors,
            summary.unknown
        ),
        (1, 1, 1, 1, 1, 1)
    );

    let text = summary.to_string();
    assert!(text.contains("operations: 6"), "{}", text);
}

// =============================================================================
// Export Tests
// =============================================================================

#[test]
fn test_export_and_read_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("samples.bin");

    let samples = vec![
        sample(0, 10, SampleOutcome::Ok),
        MetricSample {
            kind: OpKind::Delete,
            start_us: 20,
            end_us: 45,
            outcome: SampleOutcome::NotFound,
        },
    ];

    write_samples(BufWriter::new(File::create(&path).unwrap()), &samples).unwrap();
    let read = read_samples(BufReader::new(File::open(&path).unwrap())).unwrap();

    assert_eq!(read, samples);
}

#[test]
fn test_read_garbage_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("garbage.bin");
    std::fs::write(&path, [0xFFu8; 3]).unwrap();

    let result = read_samples(File::open(&path).unwrap());
    assert!(result.is_err());
}
