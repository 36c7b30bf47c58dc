//! kvserver CLI Client
//!
//! One-shot commands (`get`, `put`, `del`, `ping`) or, with no subcommand,
//! an interactive session reading one operation per line from stdin.

use std::io::{self, BufRead, Write};

use clap::{Parser, Subcommand};
use kvserver::client::{Client, ClientOptions, LineSource, RunEvent};
use kvserver::protocol::Operation;
use kvserver::KvError;
use tracing_subscriber::{fmt, EnvFilter};

/// kvserver CLI
#[derive(Parser, Debug)]
#[command(name = "kv-client")]
#[command(about = "CLI for the kvserver key-value store")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = kvserver::config::DEFAULT_LISTEN_ADDR)]
    server: String,

    /// Seconds to wait in the server's queue for a session
    #[arg(long, default_value = "10")]
    wait_secs: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// Only write if the key is at this version (0 = absent)
        #[arg(long)]
        expected: Option<u64>,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,

        /// Only delete if the key is at this version
        #[arg(long)]
        expected: Option<u64>,
    },

    /// Ping the server
    Ping,
}

impl Commands {
    fn into_operation(self) -> Operation {
        match self {
            Commands::Get { key } => Operation::get(key),
            Commands::Put {
                key,
                value,
                expected,
            } => Operation::Put {
                key: key.into(),
                value: value.into(),
                expected,
            },
            Commands::Del { key, expected } => Operation::Delete {
                key: key.into(),
                expected,
            },
            Commands::Ping => Operation::Ping,
        }
    }
}

/// Stdin reader that prints a prompt before every line
struct Prompted<R> {
    inner: R,
}

impl<R: BufRead> io::Read for Prompted<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: BufRead> BufRead for Prompted<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }

    fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        print!("|> ");
        io::stdout().flush()?;
        self.inner.read_line(buf)
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();

    let options = ClientOptions {
        greeting_timeout: std::time::Duration::from_secs(args.wait_secs),
        ..ClientOptions::default()
    };

    let mut client = match Client::connect(args.server.as_str(), options) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Could not connect to {}: {}", args.server, e);
            std::process::exit(1);
        }
    };

    let code = match args.command {
        Some(command) => one_shot(&mut client, command.into_operation()),
        None => interactive(&mut client),
    };

    client.close();
    std::process::exit(code);
}

fn one_shot(client: &mut Client, operation: Operation) -> i32 {
    match client.execute(&operation) {
        Ok(reply) => {
            println!("{}", reply);
            if reply.is_error() {
                1
            } else {
                0
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    }
}

fn interactive(client: &mut Client) -> i32 {
    println!(
        "Connected (session {}). Commands: GET, PUT, DEL, GETWHEN, PING. Ctrl+D to quit.",
        client.session_id().unwrap_or_default()
    );

    let stdin = io::stdin();
    let mut source = LineSource::new(Prompted {
        inner: stdin.lock(),
    });

    let result = client.run(&mut source, None, |event| match event {
        RunEvent::Invalid(e) => eprintln!("{}", e),
        RunEvent::Completed { result, .. } => match result {
            Ok(reply) => println!("{}", reply),
            Err(KvError::OutcomeUnknown(reason)) => {
                eprintln!("Connection lost, outcome unknown: {}", reason)
            }
            Err(e) => eprintln!("{}", e),
        },
    });

    match result {
        Ok(summary) => {
            println!();
            tracing::info!("{} operation(s) completed", summary.completed);
            0
        }
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    }
}
