//! The accept loop: admit connections, estimate response cost, submit jobs.
//!
//! Extracted from the binary so integration tests can run a full server over
//! a loopback listener.

use std::io;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info};

use crate::config::{PEEK_BUF_SIZE, PEEK_TIMEOUT};
use crate::estimate;
use crate::job::Job;
use crate::pool::WorkerPool;

/// Run the accept loop until `stop` is set or `accept` fails terminally.
///
/// Per connection: a best-effort non-consuming peek of the request, a cost
/// estimate against the pool's document root, and a submit. A refused
/// submission drops (closes) the socket. `Interrupted` retries the accept;
/// other accept errors end the loop.
pub fn accept_loop(listener: &TcpListener, pool: &WorkerPool, stop: &AtomicBool) {
    let mut peek_buf = [0u8; PEEK_BUF_SIZE];
    while !stop.load(Ordering::Relaxed) {
        let stream = match listener.accept() {
            Ok((stream, _addr)) => stream,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !stop.load(Ordering::Relaxed) {
                    error!("accept: {e}");
                }
                break;
            }
        };

        // A sender that produces nothing within the peek window just goes in
        // unestimated; the handler applies the real idle timeout later.
        let _ = stream.set_read_timeout(Some(PEEK_TIMEOUT));
        let est = match stream.peek(&mut peek_buf) {
            Ok(n) if n > 0 => estimate::estimate_cost(&peek_buf[..n], pool.docroot()),
            _ => 0,
        };

        info!("submit: fd={} est={}", fd_of(&stream), est);
        if let Err(e) = pool.submit_job(Job::new(stream, est)) {
            info!("submit refused: {e}");
        }
    }
}

fn fd_of(stream: &std::net::TcpStream) -> i32 {
    use std::os::unix::io::AsRawFd;
    stream.as_raw_fd()
}
