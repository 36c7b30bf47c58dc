//! # kvserver
//!
//! A concurrent, in-memory key-value server with:
//! - Sharded store with per-key versions and compare-and-set
//! - Bounded worker pool with explicit backpressure
//! - Length-prefixed binary protocol over TCP
//! - Blocking client and a parallel benchmark driver
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────┐     ┌───────────────────────┐
//! │   Interactive CLI     │     │   Benchmark Driver    │
//! │   (LineSource)        │     │   (Workload)          │
//! └──────────┬────────────┘     └──────────┬────────────┘
//!            └──────────────┬──────────────┘
//!                           ▼
//!                    ┌─────────────┐
//!                    │   Client    │
//!                    └──────┬──────┘
//!                           │ TCP
//! ┌─────────────────────────▼───────────────────────────────────┐
//! │                      TCP Server                              │
//! │          (acceptor + bounded worker pool)                    │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │ one Connection per session
//!                    ┌──────▼──────┐
//!                    │ Dispatcher  │──────▶ MetricSink
//!                    └──────┬──────┘
//!                           ▼
//!   ┌─────────┬─────────┬─────────┬─────────┐
//!   │ Shard 0 │ Shard 1 │   ...   │ Shard N │   Store
//!   │(RwLock) │(RwLock) │         │(RwLock) │
//!   └─────────┴─────────┴─────────┴─────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod store;
pub mod protocol;
pub mod dispatcher;
pub mod network;
pub mod client;
pub mod metrics;
pub mod bench;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KvError, Result};
pub use config::Config;
pub use store::{Entry, Store};
pub use dispatcher::Dispatcher;
pub use client::{Client, ClientOptions};
pub use network::{Server, ShutdownHandle};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of kvserver
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
