//! Library crate for shortstack: job model, scheduling policies, worker
//! pool, HTTP handler, cost estimator, and metrics.
//!
//! The **binary** (`main.rs`) only wires the process together: CLI, tracing,
//! signal handling, the listener, and the shutdown order. Everything here is
//! driven directly by the integration tests over plain loopback sockets, so
//! no test needs a spawned server process.

pub mod acceptor;
pub mod config;
pub mod estimate;
pub mod http;
pub mod job;
pub mod metrics;
pub mod net;
pub mod pool;
pub mod scheduler;
