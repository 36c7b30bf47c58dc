//! TCP Server
//!
//! Accepts connections and dispatches them to the worker pool.
//!
//! ## Lifecycle
//! 1. `bind`: validate config, bind the listener, spawn the worker pool
//!    (any failure here is fatal)
//! 2. `run`: non-blocking accept loop until the shutdown handle fires
//! 3. shutdown: stop accepting, wake GETWHEN waiters, cut the read half of
//!    every live session, wait up to the grace period for workers

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::metrics::MetricSink;
use crate::protocol::{write_response, Response};
use crate::store::Store;

use super::connection::Connection;
use super::pool::WorkerPool;

/// How long the accept loop sleeps when no connection is pending
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Cloneable trigger for graceful shutdown
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the server to stop; returns immediately
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Counters reported when the server stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Connections handed to the worker pool
    pub accepted: u64,

    /// Connections turned away with POOL_SATURATED
    pub rejected: u64,

    /// Operations answered across all sessions
    pub operations: u64,

    /// Workers still busy when the grace period ended
    pub stragglers: usize,
}

#[derive(Default)]
struct Counters {
    active: AtomicUsize,
    operations: AtomicU64,
}

/// Live sessions, so shutdown can interrupt their blocked reads
#[derive(Default)]
struct SessionRegistry {
    streams: Mutex<HashMap<u64, TcpStream>>,
}

impl SessionRegistry {
    fn register(&self, id: u64, stream: &TcpStream) -> Result<()> {
        let handle = stream.try_clone()?;
        self.streams.lock().insert(id, handle);
        Ok(())
    }

    fn deregister(&self, id: u64) {
        self.streams.lock().remove(&id);
    }

    /// Shut down the read half of every live session
    ///
    /// In-flight operations still finish and write their reply; the next
    /// read sees end-of-stream.
    fn interrupt_all(&self) -> usize {
        let streams = self.streams.lock();
        for stream in streams.values() {
            let _ = stream.shutdown(Shutdown::Read);
        }
        streams.len()
    }
}

/// A connection waiting for a worker
struct PendingSession {
    id: u64,
    stream: TcpStream,
    accepted_at: Instant,
}

/// Everything a worker needs to serve a session
#[derive(Clone)]
struct SessionContext {
    dispatcher: Dispatcher,
    metrics: MetricSink,
    shutdown: ShutdownHandle,
    sessions: Arc<SessionRegistry>,
    counters: Arc<Counters>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl SessionContext {
    fn serve(&self, pending: PendingSession) {
        let PendingSession {
            id,
            stream,
            accepted_at,
        } = pending;

        if let Err(e) = self.sessions.register(id, &stream) {
            tracing::warn!("Could not register session {}: {}", id, e);
            return;
        }

        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            "Client connected (session {}, queued {:?}). Active clients: {}",
            id,
            accepted_at.elapsed(),
            active
        );

        let result = Connection::new(
            stream,
            id,
            self.dispatcher.clone(),
            self.metrics.clone(),
            self.shutdown.clone(),
        )
        .and_then(|mut connection| {
            connection.set_timeouts(self.read_timeout, self.write_timeout)?;
            let outcome = connection.handle();
            let completed = connection.session().completed;
            self.counters.operations.fetch_add(completed, Ordering::Relaxed);
            outcome
        });

        match result {
            Ok(reason) => tracing::debug!("Session {} ended: {:?}", id, reason),
            Err(e) => tracing::warn!("Session {} failed: {}", id, e),
        }

        self.sessions.deregister(id);
        let active = self.counters.active.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::info!("Client disconnected (session {}). Active clients: {}", id, active);
    }
}

/// TCP server for the key-value store
pub struct Server {
    config: Config,
    listener: TcpListener,
    pool: WorkerPool<PendingSession>,
    store: Arc<Store>,
    metrics: MetricSink,
    shutdown: ShutdownHandle,
    sessions: Arc<SessionRegistry>,
    counters: Arc<Counters>,
}

impl Server {
    /// Bind the listener and start the worker pool over an existing store
    pub fn bind(config: Config, store: Arc<Store>) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;

        let metrics = MetricSink::new(config.metrics_capacity);
        let shutdown = ShutdownHandle::new();
        let sessions = Arc::new(SessionRegistry::default());
        let counters = Arc::new(Counters::default());

        let context = SessionContext {
            dispatcher: Dispatcher::new(Arc::clone(&store), config.get_when_timeout()),
            metrics: metrics.clone(),
            shutdown: shutdown.clone(),
            sessions: Arc::clone(&sessions),
            counters: Arc::clone(&counters),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        };
        let pool = WorkerPool::new(config.max_clients, config.queue_depth, move |pending| {
            context.serve(pending)
        })?;

        tracing::info!(
            "Server bound to {} (max clients: {}, queue depth: {}, shards: {})",
            listener.local_addr()?,
            config.max_clients,
            config.queue_depth,
            store.shard_count()
        );

        Ok(Self {
            config,
            listener,
            pool,
            store,
            metrics,
            shutdown,
            sessions,
            counters,
        })
    }

    /// Bind with a fresh store sized by `config.shards`
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(Store::new(config.shards)?);
        Self::bind(config, store)
    }

    /// Accept connections until shutdown is requested (blocking)
    pub fn run(self) -> Result<ServerStats> {
        let mut next_session_id: u64 = 1;
        let mut accepted: u64 = 0;
        let mut rejected: u64 = 0;

        while !self.shutdown.is_shutdown() {
            let (stream, peer) = match self.listener.accept() {
                Ok(conn) => conn,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                    continue;
                }
            };

            // Accepted sockets inherit non-blocking mode on some platforms
            if let Err(e) = stream.set_nonblocking(false) {
                tracing::warn!("Dropping connection from {}: {}", peer, e);
                continue;
            }

            let pending = PendingSession {
                id: next_session_id,
                stream,
                accepted_at: Instant::now(),
            };
            next_session_id += 1;

            match self.pool.try_submit(pending) {
                Ok(()) => {
                    accepted += 1;
                    tracing::debug!(
                        "Accepted {} (busy workers: {}, queued: {})",
                        peer,
                        self.pool.busy(),
                        self.pool.queued()
                    );
                }
                Err(pending) => {
                    rejected += 1;
                    tracing::warn!(
                        "Worker pool saturated ({} busy, {} queued), rejecting {}",
                        self.pool.busy(),
                        self.pool.queued(),
                        peer
                    );
                    self.reject(pending.stream);
                }
            }
        }

        self.stop(accepted, rejected)
    }

    /// Tell the client there is no room, then hang up
    fn reject(&self, mut stream: TcpStream) {
        let _ = stream.set_write_timeout(self.config.write_timeout());
        if let Err(e) = write_response(&mut stream, &Response::pool_saturated()) {
            tracing::debug!("Could not deliver POOL_SATURATED: {}", e);
        }
        let _ = stream.shutdown(Shutdown::Both);
    }

    fn stop(self, accepted: u64, rejected: u64) -> Result<ServerStats> {
        let Server {
            config,
            listener,
            pool,
            store,
            sessions,
            counters,
            ..
        } = self;

        // Refuse new connections before draining
        drop(listener);

        store.close();
        let interrupted = sessions.interrupt_all();
        tracing::info!(
            "Shutting down: interrupted {} session(s), waiting up to {:?}",
            interrupted,
            config.shutdown_grace()
        );

        let stragglers = pool.shutdown(config.shutdown_grace());

        let stats = ServerStats {
            accepted,
            rejected,
            operations: counters.operations.load(Ordering::Relaxed),
            stragglers,
        };
        tracing::info!("Server stopped: {:?}", stats);
        Ok(stats)
    }

    /// Address the listener is bound to (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle that stops `run` from another thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Server-side metric samples (one per answered operation)
    pub fn metrics(&self) -> MetricSink {
        self.metrics.clone()
    }

    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
