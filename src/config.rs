//! Server sizing and operational configuration.
//!
//! Hardcoded values that are not negotiated on the wire. Invocation defaults
//! (port, workers, docroot) live here too so the CLI, the binary, and the
//! tests agree on them.

use std::time::Duration;

/// Invocation defaults for the positional CLI arguments.
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_DOCROOT: &str = "./www";

/// Bounded job-queue capacity shared by both scheduling policies.
pub const QUEUE_CAPACITY: usize = 1024;

/// Listen backlog handed to the kernel.
pub const LISTEN_BACKLOG: i32 = 128;

/// Per-request read buffer size (bytes). One read per request; requests
/// larger than this are not reassembled.
pub const REQ_BUF_SIZE: usize = 8192;

/// Acceptor-side peek window for cost estimation. Must stay below
/// `REQ_BUF_SIZE` so the estimator never sees more than the handler will.
pub const PEEK_BUF_SIZE: usize = 4095;

/// How long the acceptor waits for the first request bytes before giving up
/// on an estimate. A slow sender just gets `est = 0`.
pub const PEEK_TIMEOUT: Duration = Duration::from_millis(250);

/// Requests served per connection before the server closes it.
pub const MAX_KEEPALIVE_REQUESTS: usize = 8;

/// Receive timeout on client sockets; an idle connection is closed quietly.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between metrics reporter lines.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(5);

// Compile-time sanity checks
const _: () = assert!(QUEUE_CAPACITY > 0, "job queue capacity must be nonzero");
const _: () = assert!(
    PEEK_BUF_SIZE < REQ_BUF_SIZE,
    "estimator peek must not exceed the request buffer"
);
const _: () = assert!(
    MAX_KEEPALIVE_REQUESTS >= 1,
    "a connection must be allowed at least one request"
);
