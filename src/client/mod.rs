//! Client Module
//!
//! Blocking client for the key-value server, plus the operation sources it
//! can be driven from.
//!
//! ## Outcomes
//! - `Ok(Reply)`: the server answered (the reply may itself be NOT FOUND,
//!   a version conflict, ...)
//! - `Err(OutcomeUnknown)`: the request was started but the connection
//!   failed before the reply arrived
//! - `Err(Unreachable)` / `Err(PoolSaturated)`: no session could be opened

mod client;
mod source;

pub use client::{Client, ClientOptions, RunEvent, RunSummary};
pub use source::{IterSource, LineSource, OperationSource};
