//! Connection Handler
//!
//! Handles individual client sessions.
//!
//! ## Session Lifecycle
//! ```text
//! Connected ──greeting──► Active ──EOF / error / shutdown──► Closing ──► Closed
//!                          │  ▲
//!                          └──┘ read op → apply → write reply
//! ```

use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};

use crate::dispatcher::Dispatcher;
use crate::error::{KvError, Result};
use crate::metrics::{MetricSink, SampleOutcome};
use crate::protocol::{read_operation, write_response, OpKind, Response};

use super::ShutdownHandle;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, greeting not yet sent
    Connected,
    /// Serving operations
    Active,
    /// Tearing down; no new operations are read
    Closing,
    /// Terminal
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnected,
    IdleTimeout,
    ProtocolError,
    ServerShutdown,
}

/// Per-connection state, owned by its handler
#[derive(Debug, Clone)]
pub struct Session {
    pub id: u64,
    pub peer_addr: String,
    pub state: SessionState,

    /// Operation currently being applied
    pub in_flight: Option<OpKind>,

    /// Operations applied and answered
    pub completed: u64,
}

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    dispatcher: Dispatcher,
    metrics: MetricSink,
    shutdown: ShutdownHandle,
    session: Session,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(
        stream: TcpStream,
        session_id: u64,
        dispatcher: Dispatcher,
        metrics: MetricSink,
        shutdown: ShutdownHandle,
    ) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            dispatcher,
            metrics,
            shutdown,
            session: Session {
                id: session_id,
                peer_addr,
                state: SessionState::Connected,
                in_flight: None,
                completed: 0,
            },
        })
    }

    /// Configure the idle read timeout and the write timeout
    pub fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) -> Result<()> {
        self.reader.get_ref().set_read_timeout(read)?;
        self.writer.get_ref().set_write_timeout(write)?;
        Ok(())
    }

    /// Serve the session until it closes
    ///
    /// Operations are applied strictly in the order they are read. Returns
    /// why the session ended; I/O failures other than a vanished peer are
    /// returned as errors after the session is closed.
    pub fn handle(&mut self) -> Result<CloseReason> {
        let id = self.session.id;
        tracing::debug!("Session {} established from {}", id, self.session.peer_addr);

        if self.shutdown.is_shutdown() {
            self.close();
            return Ok(CloseReason::ServerShutdown);
        }

        if let Err(e) = self.send_response(&Response::ready(id)) {
            self.close();
            return if e.is_disconnect() {
                Ok(CloseReason::ClientDisconnected)
            } else {
                Err(e)
            };
        }
        self.session.state = SessionState::Active;

        let reason = loop {
            let operation = match read_operation(&mut self.reader) {
                Ok(operation) => operation,
                Err(e) if e.is_disconnect() => {
                    if self.shutdown.is_shutdown() {
                        tracing::debug!("Session {} interrupted by shutdown", id);
                        break CloseReason::ServerShutdown;
                    }
                    tracing::debug!("Client {} disconnected", self.session.peer_addr);
                    break CloseReason::ClientDisconnected;
                }
                Err(e) if e.is_timeout() => {
                    tracing::debug!("Idle timeout for session {}", id);
                    break CloseReason::IdleTimeout;
                }
                Err(KvError::Protocol(message)) => {
                    tracing::warn!(
                        "Protocol error from {} (session {}): {}",
                        self.session.peer_addr,
                        id,
                        message
                    );
                    let _ = self.send_response(&Response::error(&message));
                    break CloseReason::ProtocolError;
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.session.peer_addr, e);
                    self.close();
                    return Err(e);
                }
            };

            tracing::trace!("Session {} received {:?}", id, operation);

            let kind = operation.kind();
            self.session.in_flight = Some(kind);
            let started = Instant::now();
            let reply = self.dispatcher.apply(operation);
            let finished = Instant::now();
            self.session.in_flight = None;
            self.session.completed += 1;

            self.metrics
                .record(kind, started, finished, SampleOutcome::from(&reply));

            if let Err(e) = self.send_response(&reply.into()) {
                if e.is_disconnect() {
                    tracing::debug!(
                        "Client {} disconnected before response could be sent: {}",
                        self.session.peer_addr,
                        e
                    );
                    break CloseReason::ClientDisconnected;
                }
                tracing::warn!("Error writing to {}: {}", self.session.peer_addr, e);
                self.close();
                return Err(e);
            }
        };

        self.close();
        Ok(reason)
    }

    /// Flush what is buffered and release the socket
    fn close(&mut self) {
        if self.session.state == SessionState::Closed {
            return;
        }

        self.session.state = SessionState::Closing;
        let _ = self.writer.flush();
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
        self.session.state = SessionState::Closed;

        tracing::debug!(
            "Session {} closed after {} operation(s)",
            self.session.id,
            self.session.completed
        );
    }

    /// Send a response to the client
    fn send_response(&mut self, response: &Response) -> Result<()> {
        write_response(&mut self.writer, response)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}
