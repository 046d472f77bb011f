//! Process-wide request counters and the periodic reporter thread.
//!
//! Counters are monotonic, updated with relaxed atomic adds; the reporter
//! wakes every report interval and prints one line to the diagnostic
//! stream. Explicit `init`/`shutdown` bracket the reporter's lifetime.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::REPORT_INTERVAL;
use crate::job::now_ms;

static SUBMITS_TOTAL: AtomicU64 = AtomicU64::new(0);
static SUBMITS_EST0: AtomicU64 = AtomicU64::new(0);
static POPS_TOTAL: AtomicU64 = AtomicU64::new(0);
static REQUESTS_TOTAL: AtomicU64 = AtomicU64::new(0);
static BYTES_TOTAL: AtomicU64 = AtomicU64::new(0);
static ERRORS_TOTAL: AtomicU64 = AtomicU64::new(0);
static SUM_LATENCY_MS: AtomicU64 = AtomicU64::new(0);

static RUNNING: AtomicBool = AtomicBool::new(false);
static REPORTER: Mutex<Option<JoinHandle<()>>> = Mutex::new(None);

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub submits_total: u64,
    pub submits_est0: u64,
    pub pops_total: u64,
    pub requests_total: u64,
    pub bytes_total: u64,
    pub errors_total: u64,
    pub sum_latency_ms: u64,
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        submits_total: SUBMITS_TOTAL.load(Ordering::Relaxed),
        submits_est0: SUBMITS_EST0.load(Ordering::Relaxed),
        pops_total: POPS_TOTAL.load(Ordering::Relaxed),
        requests_total: REQUESTS_TOTAL.load(Ordering::Relaxed),
        bytes_total: BYTES_TOTAL.load(Ordering::Relaxed),
        errors_total: ERRORS_TOTAL.load(Ordering::Relaxed),
        sum_latency_ms: SUM_LATENCY_MS.load(Ordering::Relaxed),
    }
}

/// Record a completed request: handling latency, response-body bytes
/// actually sent, and the HTTP status. Non-2xx/3xx statuses count as
/// errors.
pub fn record_request(latency_ms: u64, bytes: u64, status: u16) {
    REQUESTS_TOTAL.fetch_add(1, Ordering::Relaxed);
    BYTES_TOTAL.fetch_add(bytes, Ordering::Relaxed);
    SUM_LATENCY_MS.fetch_add(latency_ms, Ordering::Relaxed);
    if status < 200 || status >= 400 {
        ERRORS_TOTAL.fetch_add(1, Ordering::Relaxed);
    }
}

/// Called once per admitted job. `est == 0` means the acceptor had no
/// estimate for it.
pub fn inc_submit(est: u64) {
    SUBMITS_TOTAL.fetch_add(1, Ordering::Relaxed);
    if est == 0 {
        SUBMITS_EST0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Called once per job handed to a worker.
pub fn inc_pop(_est: u64) {
    POPS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

/// Start the reporter thread. Best-effort: on spawn failure the server keeps
/// running without periodic reporting.
pub fn init() {
    RUNNING.store(true, Ordering::Relaxed);
    let spawned = thread::Builder::new()
        .name("metrics-reporter".into())
        .spawn(reporter_main);
    match spawned {
        Ok(handle) => {
            *REPORTER.lock().expect("metrics lock poisoned") = Some(handle);
        }
        Err(e) => {
            RUNNING.store(false, Ordering::Relaxed);
            warn!("metrics reporter failed to start: {e}");
        }
    }
}

/// Clear the running flag and join the reporter.
pub fn shutdown() {
    RUNNING.store(false, Ordering::Relaxed);
    if let Some(handle) = REPORTER.lock().expect("metrics lock poisoned").take() {
        let _ = handle.join();
    }
}

fn reporter_main() {
    // Sleep in short ticks so shutdown joins promptly instead of waiting out
    // a full interval.
    const TICK: Duration = Duration::from_millis(200);
    let mut prev = snapshot();
    let mut slept = Duration::ZERO;
    while RUNNING.load(Ordering::Relaxed) {
        thread::sleep(TICK);
        slept += TICK;
        if slept < REPORT_INTERVAL {
            continue;
        }
        slept = Duration::ZERO;
        let snap = snapshot();
        report(&prev, &snap);
        prev = snap;
    }
}

fn report(prev: &MetricsSnapshot, snap: &MetricsSnapshot) {
    let interval_s = REPORT_INTERVAL.as_secs_f64();
    let delta_reqs = snap.requests_total.saturating_sub(prev.requests_total);
    let delta_bytes = snap.bytes_total.saturating_sub(prev.bytes_total);
    let reqs_per_s = delta_reqs as f64 / interval_s;
    let mb_per_s = (delta_bytes as f64 / (1024.0 * 1024.0)) / interval_s;
    let avg_latency = if snap.requests_total > 0 {
        snap.sum_latency_ms as f64 / snap.requests_total as f64
    } else {
        0.0
    };
    let est0_pct = if snap.submits_total > 0 {
        snap.submits_est0 as f64 / snap.submits_total as f64 * 100.0
    } else {
        0.0
    };
    info!(
        "[metrics] ts={} reqs_total={} req/s={:.2} MB/s={:.2} avgLat={:.2}ms errors={} submits={} est0%={:.1} pops={}",
        now_ms(),
        snap.requests_total,
        reqs_per_s,
        mb_per_s,
        avg_latency,
        snap.errors_total,
        snap.submits_total,
        est0_pct,
        snap.pops_total,
    );
}
