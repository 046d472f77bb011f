//! The unit of queued work and the monotonic clock it is stamped with.

use std::net::TcpStream;
use std::sync::OnceLock;
use std::time::Instant;

/// One accepted client connection plus the metadata the scheduling policies
/// key on.
#[derive(Debug)]
pub struct Job {
    /// Owned client socket. Exactly one worker consumes the job; dropping it
    /// is the socket's single close on every exit path.
    pub stream: TcpStream,
    /// Estimated response-body bytes. 0 means unknown, which SJF treats as
    /// most urgent.
    pub est_cost: u64,
    /// Reserved tie-break. Carried through the queue, unused by both
    /// current policies.
    pub priority: i32,
    /// Monotonic milliseconds at submission. SJF tie-break among equal
    /// costs.
    pub arrival_ms: u64,
}

impl Job {
    /// Stamp a freshly accepted connection with the current clock.
    pub fn new(stream: TcpStream, est_cost: u64) -> Self {
        Self {
            stream,
            est_cost,
            priority: 0,
            arrival_ms: now_ms(),
        }
    }
}

static CLOCK_ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Monotonic milliseconds since the first call in this process.
pub fn now_ms() -> u64 {
    CLOCK_ANCHOR.get_or_init(Instant::now).elapsed().as_millis() as u64
}
