//! Server Tests
//!
//! End-to-end tests over real TCP: concurrent sessions, backpressure,
//! protocol errors and graceful shutdown.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use kvserver::client::{Client, ClientOptions};
use kvserver::metrics::MetricSink;
use kvserver::network::{Server, ServerStats, ShutdownHandle};
use kvserver::protocol::{read_response, Operation, Reply, Status};
use kvserver::{Config, KvError, Result, Store};

struct Running {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    store: Arc<Store>,
    metrics: MetricSink,
    thread: JoinHandle<Result<ServerStats>>,
}

impl Running {
    fn stop(self) -> ServerStats {
        self.shutdown.shutdown();
        self.thread.join().unwrap().unwrap()
    }
}

fn start(config: Config) -> Running {
    let server = Server::with_config(config).unwrap();
    let running_addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let store = server.store();
    let metrics = server.metrics();
    let thread = thread::spawn(move || server.run());

    Running {
        addr: running_addr,
        shutdown,
        store,
        metrics,
        thread,
    }
}

fn config(max_clients: usize, shards: usize, queue_depth: usize) -> Config {
    Config::builder()
        .listen_addr("127.0.0.1:0")
        .max_clients(max_clients)
        .shards(shards)
        .queue_depth(queue_depth)
        .shutdown_grace_ms(2000)
        .build()
}

fn options() -> ClientOptions {
    ClientOptions {
        greeting_timeout: Duration::from_secs(5),
        io_timeout: Some(Duration::from_secs(5)),
        reconnect_backoff: Duration::from_millis(10),
        ..ClientOptions::default()
    }
}

// =============================================================================
// Concurrent Session Tests
// =============================================================================

#[test]
fn test_concurrent_clients_default_bootstrap() {
    const CLIENTS: usize = 10;
    const PAIRS: usize = 4;

    let running = start(config(10, 40, 1));
    let addr = running.addr;

    let handles: Vec<_> = (0..CLIENTS)
        .map(|c| {
            thread::spawn(move || {
                let mut client = Client::connect(addr, options()).unwrap();
                let key = format!("key{}", c);
                for i in 0..PAIRS {
                    let value = format!("c{}-v{}", c, i);
                    let version = client.put(key.clone(), value.clone()).unwrap();
                    assert_eq!(version, (i + 1) as u64);

                    let entry = client.get(key.clone()).unwrap().unwrap();
                    assert_eq!(entry.value, Bytes::from(value));
                    assert_eq!(entry.version, version);
                }
                client.close();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // Final sweep from a fresh session
    let mut client = Client::connect(addr, options()).unwrap();
    for c in 0..CLIENTS {
        let entry = client.get(format!("key{}", c)).unwrap().unwrap();
        assert_eq!(entry.value, Bytes::from(format!("c{}-v{}", c, PAIRS - 1)));
        assert_eq!(entry.version, PAIRS as u64);
    }
    client.close();

    assert_eq!(running.store.len(), CLIENTS);

    let stats = running.stop();
    assert_eq!(stats.rejected, 0);
    assert_eq!(stats.accepted, (CLIENTS + 1) as u64);
    assert_eq!(stats.operations, (CLIENTS * PAIRS * 2 + CLIENTS) as u64);
    assert_eq!(stats.stragglers, 0);
}

#[test]
fn test_single_client_sequential_pairs() {
    const KEYS: usize = 10;
    const PAIRS: usize = 40;

    let running = start(config(10, 40, 1));
    let mut client = Client::connect(running.addr, options()).unwrap();

    for i in 0..PAIRS {
        let key = format!("key{}", i % KEYS);
        let value = format!("value{}", i);
        client.put(key.clone(), value.clone()).unwrap();
        let entry = client.get(key).unwrap().unwrap();
        assert_eq!(entry.value, Bytes::from(value));
    }

    // Each key's last write was on the final lap
    for k in 0..KEYS {
        let entry = client.get(format!("key{}", k)).unwrap().unwrap();
        assert_eq!(entry.value, Bytes::from(format!("value{}", PAIRS - KEYS + k)));
        assert_eq!(entry.version, (PAIRS / KEYS) as u64);
    }
    client.close();

    let stats = running.stop();
    assert_eq!(stats.operations, (PAIRS * 2 + KEYS) as u64);
}

#[test]
fn test_shared_key_from_many_sessions() {
    const CLIENTS: usize = 6;
    const PUTS: usize = 20;

    let running = start(config(CLIENTS, 4, 0));
    let addr = running.addr;

    let handles: Vec<_> = (0..CLIENTS)
        .map(|c| {
            thread::spawn(move || {
                let mut client = Client::connect(addr, options()).unwrap();
                for i in 0..PUTS {
                    client.put("shared", format!("{}-{}", c, i)).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let entry = running.store.get(b"shared").unwrap();
    assert_eq!(entry.version, (CLIENTS * PUTS) as u64);
    running.stop();
}

#[test]
fn test_session_id_and_operation_count() {
    let running = start(config(2, 4, 1));

    let mut client = Client::connect(running.addr, options()).unwrap();
    assert!(client.session_id().unwrap() >= 1);
    client.ping().unwrap();
    client.put("k", "v").unwrap();
    assert!(client.get("missing").unwrap().is_none());
    client.close();

    let stats = running.stop();
    assert_eq!(stats.operations, 3);
}

#[test]
fn test_server_records_one_sample_per_operation() {
    let running = start(config(2, 4, 1));
    let metrics = running.metrics.clone();

    let mut client = Client::connect(running.addr, options()).unwrap();
    client.put("a", "1").unwrap();
    client.get("a").unwrap();
    client.delete("a").unwrap();
    client.close();
    running.stop();

    let samples = metrics.drain();
    assert_eq!(samples.len(), 3);
    assert!(samples.iter().all(|s| s.end_us >= s.start_us));
}

// =============================================================================
// Backpressure Tests
// =============================================================================

#[test]
fn test_saturated_pool_rejects_without_queue() {
    let running = start(config(1, 4, 0));

    let mut first = Client::connect(running.addr, options()).unwrap();
    first.ping().unwrap();

    let second = Client::connect(running.addr, options());
    assert!(matches!(second, Err(KvError::PoolSaturated)));

    // The first session is unaffected
    first.put("k", "v").unwrap();
    first.close();

    let stats = running.stop();
    assert_eq!(stats.rejected, 1);
}

#[test]
fn test_queued_client_waits_for_free_worker() {
    let running = start(config(1, 4, 1));
    let addr = running.addr;

    let mut first = Client::connect(addr, options()).unwrap();
    first.put("k", "v").unwrap();

    // Second connection waits in the queue for the only worker
    let queued = thread::spawn(move || {
        let started = Instant::now();
        let mut client = Client::connect(addr, options()).unwrap();
        let waited = started.elapsed();
        let entry = client.get("k").unwrap().unwrap();
        client.close();
        (waited, entry.value)
    });
    thread::sleep(Duration::from_millis(300));

    // Worker busy, queue full: the third is turned away
    let third = Client::connect(addr, options());
    assert!(matches!(third, Err(KvError::PoolSaturated)));

    first.close();
    let (waited, value) = queued.join().unwrap();
    assert!(waited >= Duration::from_millis(250), "waited {:?}", waited);
    assert_eq!(value, Bytes::from("v"));

    let stats = running.stop();
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.rejected, 1);
}

#[test]
fn test_queued_client_gives_up_after_greeting_timeout() {
    let running = start(config(1, 4, 1));

    let mut first = Client::connect(running.addr, options()).unwrap();
    first.ping().unwrap();

    let impatient = ClientOptions {
        greeting_timeout: Duration::from_millis(200),
        ..options()
    };
    let result = Client::connect(running.addr, impatient);
    assert!(matches!(result, Err(KvError::PoolSaturated)));

    first.close();
    running.stop();
}

// =============================================================================
// Protocol Error Tests
// =============================================================================

#[test]
fn test_malformed_frame_closes_session() {
    let running = start(config(2, 4, 1));

    let mut stream = TcpStream::connect(running.addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let greeting = read_response(&mut stream).unwrap();
    assert_eq!(greeting.status, Status::Ready);

    // Unknown command byte
    stream.write_all(&[0x7F, 0, 0, 0, 0]).unwrap();

    let response = read_response(&mut stream).unwrap();
    assert_eq!(response.status, Status::Error);

    let mut rest = Vec::new();
    let n = stream.read_to_end(&mut rest).unwrap_or(0);
    assert_eq!(n, 0, "session should be closed after a protocol error");

    // Other sessions are unaffected
    let mut client = Client::connect(running.addr, options()).unwrap();
    client.ping().unwrap();
    client.close();

    running.stop();
}

// =============================================================================
// GETWHEN Tests
// =============================================================================

#[test]
fn test_get_when_across_sessions() {
    let running = start(config(4, 8, 1));
    let addr = running.addr;

    let mut setup = Client::connect(addr, options()).unwrap();
    setup.put("data", "payload").unwrap();

    let waiter = thread::spawn(move || {
        let mut client = Client::connect(addr, options()).unwrap();
        client.get_when("data", "flag", "go")
    });

    thread::sleep(Duration::from_millis(100));
    setup.put("flag", "go").unwrap();

    let entry = waiter.join().unwrap().unwrap().unwrap();
    assert_eq!(entry.value, Bytes::from("payload"));

    setup.close();
    running.stop();
}

#[test]
fn test_get_when_times_out_in_band() {
    let config = Config::builder()
        .listen_addr("127.0.0.1:0")
        .max_clients(2)
        .get_when_timeout_ms(100)
        .build();
    let running = start(config);

    let mut client = Client::connect(running.addr, options()).unwrap();
    let reply = client
        .execute(&Operation::GetWhen {
            key: Bytes::from("data"),
            cond_key: Bytes::from("flag"),
            cond_value: Bytes::from("never"),
        })
        .unwrap();
    assert_eq!(reply, Reply::TimedOut);

    // The session survives a timed-out wait
    client.ping().unwrap();
    client.close();
    running.stop();
}

// =============================================================================
// Shutdown Tests
// =============================================================================

#[test]
fn test_shutdown_interrupts_idle_sessions() {
    let running = start(config(2, 4, 1));

    let mut idle = Client::connect(running.addr, options()).unwrap();
    idle.put("k", "v").unwrap();

    let started = Instant::now();
    let stats = running.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(stats.stragglers, 0);

    // The session was closed under the client
    let result = idle.ping();
    assert!(matches!(result, Err(KvError::OutcomeUnknown(_))));

    // And the listener is gone
    let result = idle.ping();
    assert!(matches!(result, Err(KvError::Unreachable(_))));
}

#[test]
fn test_shutdown_wakes_get_when_waiter() {
    let config = Config::builder()
        .listen_addr("127.0.0.1:0")
        .max_clients(2)
        .get_when_timeout_ms(60_000)
        .shutdown_grace_ms(2000)
        .build();
    let running = start(config);
    let addr = running.addr;

    let waiter = thread::spawn(move || {
        let mut client = Client::connect(addr, options()).unwrap();
        client.execute(&Operation::GetWhen {
            key: Bytes::from("data"),
            cond_key: Bytes::from("flag"),
            cond_value: Bytes::from("never"),
        })
    });
    thread::sleep(Duration::from_millis(200));

    let started = Instant::now();
    let stats = running.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(stats.stragglers, 0);

    let reply = waiter.join().unwrap().unwrap();
    assert!(reply.is_error(), "{:?}", reply);
}

#[test]
fn test_bind_rejects_invalid_config() {
    let config = Config::builder()
        .listen_addr("127.0.0.1:0")
        .max_clients(0)
        .build();
    assert!(matches!(
        Server::with_config(config),
        Err(KvError::Config(_))
    ));
}
