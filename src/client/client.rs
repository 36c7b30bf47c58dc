//! Blocking TCP client
//!
//! One `Client` owns one server session at a time.
//!
//! ## Failure Handling
//! - Per-operation outcomes (absent key, version conflict, ...) are `Reply`
//!   values, never transport errors.
//! - If the connection fails after a request was started, the request's
//!   fate is unknown: the call returns `OutcomeUnknown` and the connection
//!   is dropped.
//! - The next call makes one reconnect attempt after a backoff; if that
//!   fails the call returns `Unreachable`.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::{KvError, Result};
use crate::metrics::{MetricSink, SampleOutcome};
use crate::protocol::{read_response, write_operation, Operation, Reply, Status};
use crate::store::Entry;

use super::OperationSource;

/// Client connection settings
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// TCP connect timeout per resolved address
    pub connect_timeout: Duration,

    /// How long to wait in the server's queue for the session to start
    pub greeting_timeout: Duration,

    /// Read/write timeout per operation (`None` blocks indefinitely)
    pub io_timeout: Option<Duration>,

    /// Pause before the single reconnect attempt
    pub reconnect_backoff: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            greeting_timeout: Duration::from_secs(10),
            io_timeout: Some(Duration::from_secs(60)),
            reconnect_backoff: Duration::from_millis(200),
        }
    }
}

/// Totals for one `Client::run`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Operations the server answered
    pub completed: u64,

    /// Source items that were not valid operations
    pub invalid: u64,

    /// Operations whose outcome is unknown
    pub unknown: u64,
}

/// What `Client::run` reports for each source item
#[derive(Debug)]
pub enum RunEvent<'a> {
    /// The source produced something that is not an operation
    Invalid(&'a KvError),

    /// An operation was sent; `result` is the reply or the transport error
    Completed {
        operation: &'a Operation,
        result: &'a Result<Reply>,
    },
}

/// An open session: buffered halves of one socket
struct Transport {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    session_id: u64,
}

impl Transport {
    fn open(addrs: &[SocketAddr], options: &ClientOptions) -> Result<Self> {
        let mut last_error = None;

        for addr in addrs {
            match TcpStream::connect_timeout(addr, options.connect_timeout) {
                Ok(stream) => return Self::handshake(stream, options),
                Err(e) => last_error = Some(format!("{}: {}", addr, e)),
            }
        }

        Err(KvError::Unreachable(
            last_error.unwrap_or_else(|| "no address to connect to".to_string()),
        ))
    }

    /// Wait for the READY greeting, which arrives once a worker is free
    fn handshake(stream: TcpStream, options: &ClientOptions) -> Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(options.greeting_timeout))?;

        let mut reader = BufReader::new(stream.try_clone()?);
        let greeting = match read_response(&mut reader) {
            Ok(greeting) => greeting,
            Err(e) if e.is_timeout() => {
                // Still queued behind busy workers
                return Err(KvError::PoolSaturated);
            }
            Err(e) if e.is_disconnect() => {
                return Err(KvError::Unreachable(
                    "server closed the connection before the session started".to_string(),
                ))
            }
            Err(e) => return Err(e),
        };

        match greeting.status {
            Status::Ready => {}
            Status::PoolSaturated => return Err(KvError::PoolSaturated),
            other => {
                return Err(KvError::Protocol(format!(
                    "expected READY greeting, got {:?}",
                    other
                )))
            }
        }

        stream.set_read_timeout(options.io_timeout)?;
        stream.set_write_timeout(options.io_timeout)?;

        tracing::debug!("Session {} started", greeting.version);

        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
            session_id: greeting.version,
        })
    }

    fn exchange(&mut self, operation: &Operation) -> Result<Reply> {
        write_operation(&mut self.writer, operation)?;
        let response = read_response(&mut self.reader)?;
        Reply::try_from(response)
    }
}

/// Client for the key-value server
pub struct Client {
    addrs: Vec<SocketAddr>,
    options: ClientOptions,
    transport: Option<Transport>,
    reconnects: u64,
}

impl Client {
    /// Connect and wait for the session to start
    ///
    /// Fails with `PoolSaturated` if the server turns the connection away
    /// (or keeps it queued past `greeting_timeout`), `Unreachable` if no
    /// address accepts the connection.
    pub fn connect<A: ToSocketAddrs>(addr: A, options: ClientOptions) -> Result<Self> {
        let addrs: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| KvError::Unreachable(e.to_string()))?
            .collect();

        let transport = Transport::open(&addrs, &options)?;

        Ok(Self {
            addrs,
            options,
            transport: Some(transport),
            reconnects: 0,
        })
    }

    /// Send one operation and wait for its reply
    pub fn execute(&mut self, operation: &Operation) -> Result<Reply> {
        if self.transport.is_none() {
            self.reconnect()?;
        }
        let transport = match self.transport.as_mut() {
            Some(transport) => transport,
            None => return Err(KvError::Unreachable("not connected".to_string())),
        };

        match transport.exchange(operation) {
            Ok(reply) => Ok(reply),
            Err(e) => {
                tracing::debug!("Session lost during {}: {}", operation.kind(), e);
                self.transport = None;
                Err(KvError::OutcomeUnknown(format!(
                    "{} was sent but not acknowledged: {}",
                    operation.kind(),
                    e
                )))
            }
        }
    }

    /// One reconnect attempt after the configured backoff
    fn reconnect(&mut self) -> Result<()> {
        thread::sleep(self.options.reconnect_backoff);
        tracing::debug!("Reconnecting to {:?}", self.addrs);

        let transport = match Transport::open(&self.addrs, &self.options) {
            Ok(transport) => transport,
            Err(KvError::PoolSaturated) => return Err(KvError::PoolSaturated),
            Err(KvError::Unreachable(reason)) => return Err(KvError::Unreachable(reason)),
            Err(e) => return Err(KvError::Unreachable(e.to_string())),
        };

        self.reconnects += 1;
        self.transport = Some(transport);
        Ok(())
    }

    /// Drive a source to exhaustion, reporting every item to `on_event`
    ///
    /// Stops early with `Unreachable` or `PoolSaturated` when the session
    /// cannot be re-established. Outcome-unknown operations are reported
    /// and the run continues.
    pub fn run<S, F>(
        &mut self,
        source: &mut S,
        metrics: Option<&MetricSink>,
        mut on_event: F,
    ) -> Result<RunSummary>
    where
        S: OperationSource + ?Sized,
        F: FnMut(RunEvent<'_>),
    {
        let mut summary = RunSummary::default();

        while let Some(next) = source.next_operation() {
            let operation = match next {
                Ok(operation) => operation,
                Err(e) => {
                    summary.invalid += 1;
                    on_event(RunEvent::Invalid(&e));
                    continue;
                }
            };

            let started = Instant::now();
            let result = self.execute(&operation);
            let finished = Instant::now();

            if let Err(e @ (KvError::Unreachable(_) | KvError::PoolSaturated)) = result {
                return Err(e);
            }

            let outcome = match &result {
                Ok(reply) => {
                    summary.completed += 1;
                    SampleOutcome::from(reply)
                }
                Err(KvError::OutcomeUnknown(_)) => {
                    summary.unknown += 1;
                    SampleOutcome::Unknown
                }
                Err(_) => SampleOutcome::Error,
            };

            if let Some(metrics) = metrics {
                metrics.record(operation.kind(), started, finished, outcome);
            }

            on_event(RunEvent::Completed {
                operation: &operation,
                result: &result,
            });
        }

        Ok(summary)
    }

    // =========================================================================
    // Typed helpers
    // =========================================================================

    /// Get a key's entry, `None` if absent
    pub fn get(&mut self, key: impl Into<Bytes>) -> Result<Option<Entry>> {
        match self.execute(&Operation::Get { key: key.into() })? {
            Reply::Value { value, version } => Ok(Some(Entry { value, version })),
            Reply::NotFound => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    /// Put unconditionally, returning the new version
    pub fn put(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<u64> {
        self.put_with(key.into(), value.into(), None)
    }

    /// Put only if the key is at `expected` (0 = absent)
    pub fn put_if(
        &mut self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        expected: u64,
    ) -> Result<u64> {
        self.put_with(key.into(), value.into(), Some(expected))
    }

    fn put_with(&mut self, key: Bytes, value: Bytes, expected: Option<u64>) -> Result<u64> {
        match self.execute(&Operation::Put {
            key,
            value,
            expected,
        })? {
            Reply::Written { version } => Ok(version),
            Reply::VersionConflict { actual } => Err(KvError::VersionConflict {
                expected: expected.unwrap_or_default(),
                actual,
            }),
            other => Err(unexpected(other)),
        }
    }

    /// Delete unconditionally
    pub fn delete(&mut self, key: impl Into<Bytes>) -> Result<()> {
        self.delete_with(key.into(), None)
    }

    /// Delete only if the key is at `expected`
    pub fn delete_if(&mut self, key: impl Into<Bytes>, expected: u64) -> Result<()> {
        self.delete_with(key.into(), Some(expected))
    }

    fn delete_with(&mut self, key: Bytes, expected: Option<u64>) -> Result<()> {
        match self.execute(&Operation::Delete { key, expected })? {
            Reply::Deleted => Ok(()),
            Reply::NotFound => Err(KvError::NotFound),
            Reply::VersionConflict { actual } => Err(KvError::VersionConflict {
                expected: expected.unwrap_or_default(),
                actual,
            }),
            other => Err(unexpected(other)),
        }
    }

    /// Read `key` once `cond_key` holds `cond_value`
    pub fn get_when(
        &mut self,
        key: impl Into<Bytes>,
        cond_key: impl Into<Bytes>,
        cond_value: impl Into<Bytes>,
    ) -> Result<Option<Entry>> {
        let operation = Operation::GetWhen {
            key: key.into(),
            cond_key: cond_key.into(),
            cond_value: cond_value.into(),
        };

        match self.execute(&operation)? {
            Reply::Value { value, version } => Ok(Some(Entry { value, version })),
            Reply::NotFound => Ok(None),
            Reply::TimedOut => Err(KvError::WaitTimeout),
            other => Err(unexpected(other)),
        }
    }

    pub fn ping(&mut self) -> Result<()> {
        match self.execute(&Operation::Ping)? {
            Reply::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Server-assigned id of the current session
    pub fn session_id(&self) -> Option<u64> {
        self.transport.as_ref().map(|t| t.session_id)
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Successful reconnects so far
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Close the session
    pub fn close(mut self) {
        if let Some(transport) = self.transport.take() {
            let _ = transport.reader.get_ref().shutdown(std::net::Shutdown::Both);
        }
    }
}

fn unexpected(reply: Reply) -> KvError {
    match reply {
        Reply::Error(message) => KvError::Remote(message),
        other => KvError::Protocol(format!("unexpected reply: {:?}", other)),
    }
}
