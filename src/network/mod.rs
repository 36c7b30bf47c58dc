//! Network Module
//!
//! TCP server and session handling.
//!
//! ## Architecture
//! - Single acceptor thread (non-blocking accept loop)
//! - Fixed worker pool with a bounded queue of pending sessions
//! - One `Connection` per session, operations routed through the `Dispatcher`

mod connection;
mod pool;
mod server;

pub use connection::{CloseReason, Connection, Session, SessionState};
pub use pool::WorkerPool;
pub use server::{Server, ServerStats, ShutdownHandle};
