use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shortstack::acceptor;
use shortstack::config::{
    DEFAULT_DOCROOT, DEFAULT_PORT, DEFAULT_WORKERS, LISTEN_BACKLOG, QUEUE_CAPACITY,
};
use shortstack::metrics;
use shortstack::net;
use shortstack::pool::WorkerPool;
use shortstack::scheduler::{Policy, Scheduler};

#[derive(Parser)]
#[command(about = "Multi-threaded static file server with a pluggable job scheduler")]
struct Args {
    /// Listen port
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Number of worker threads
    #[arg(default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Document root directory
    #[arg(default_value = DEFAULT_DOCROOT)]
    docroot: PathBuf,

    /// Scheduling policy, `fifo` or `sjf`. The flag overrides the SCHEDULER
    /// environment variable.
    #[arg(long, env = "SCHEDULER", default_value = "sjf")]
    scheduler: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let policy = match Policy::parse(&args.scheduler) {
        Some(policy) => policy,
        None => {
            warn!("unknown scheduler {:?}, falling back to sjf", args.scheduler);
            Policy::Sjf
        }
    };

    let listener = match net::bind_listener(args.port, LISTEN_BACKLOG) {
        Ok(listener) => listener,
        Err(e) => {
            error!("bind port {}: {e}", args.port);
            return ExitCode::from(1);
        }
    };

    info!(
        "listening on port {} with {} workers, docroot={}",
        args.port,
        args.workers,
        args.docroot.display()
    );

    metrics::init();

    let pool = WorkerPool::new(args.workers, QUEUE_CAPACITY, Some(args.docroot));
    match policy {
        Policy::Sjf => match pool.set_scheduler(Scheduler::sjf(QUEUE_CAPACITY)) {
            Ok(()) => info!("using sjf scheduler"),
            Err(e) => warn!("scheduler swap failed, staying on fifo: {e}"),
        },
        Policy::Fifo => info!("using fifo scheduler"),
    }

    let stop = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(&stop, &listener);

    acceptor::accept_loop(&listener, &pool, &stop);

    // Shutdown order: drain the pool, close the listener, stop the reporter.
    pool.shutdown();
    drop(listener);
    metrics::shutdown();
    info!("clean shutdown");
    ExitCode::SUCCESS
}

/// A dedicated thread turns SIGINT/SIGTERM into the stop flag and unblocks
/// the accept loop. Best-effort: without it the server still runs, it just
/// cannot be stopped by signal.
fn spawn_signal_listener(stop: &Arc<AtomicBool>, listener: &std::net::TcpListener) {
    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(e) => {
            warn!("signal registration failed: {e}");
            return;
        }
    };
    let listener = match listener.try_clone() {
        Ok(listener) => listener,
        Err(e) => {
            warn!("listener clone for signal thread failed: {e}");
            return;
        }
    };
    let stop = Arc::clone(stop);
    let spawned = thread::Builder::new()
        .name("signal-listener".into())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!("signal {signal}, shutting down");
                stop.store(true, Ordering::Relaxed);
                net::shutdown_listener(&listener);
            }
        });
    if let Err(e) = spawned {
        warn!("signal listener failed to start: {e}");
    }
}
