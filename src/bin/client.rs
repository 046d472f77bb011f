//! Verification and load client for the shortstack server.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand};

use shortstack::config::MAX_KEEPALIVE_REQUESTS;

#[derive(Parser)]
#[command(about = "Test client for the shortstack file server")]
struct Args {
    /// Server port
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a path once and print the status and body size (default)
    Smoke {
        /// Request path
        #[arg(default_value = "/")]
        path: String,
    },
    /// Hammer the server with keep-alive GETs over concurrent connections
    Bench {
        /// Number of concurrent connections
        #[arg(short, long, default_value_t = 4)]
        connections: usize,
        /// Requests per connection
        #[arg(short, long, default_value_t = 1000)]
        requests: usize,
        /// Request path
        #[arg(default_value = "/")]
        path: String,
    },
}

fn main() {
    let args = Args::parse();
    let addr = format!("127.0.0.1:{}", args.port);

    match args.command.unwrap_or(Command::Smoke { path: "/".into() }) {
        Command::Smoke { path } => smoke(&addr, &path),
        Command::Bench {
            connections,
            requests,
            path,
        } => bench(&addr, connections, requests, &path),
    }
}

fn smoke(addr: &str, path: &str) {
    let mut stream = TcpStream::connect(addr).expect("connect failed");
    send_get(&mut stream, path, false);
    let (status, body_len) = read_response(&mut stream).expect("no response");
    println!("{path}: status={status} body={body_len}B");
}

fn bench(addr: &str, connections: usize, requests: usize, path: &str) {
    let started = Instant::now();
    let mut handles = Vec::with_capacity(connections);
    for _ in 0..connections {
        let addr = addr.to_string();
        let path = path.to_string();
        handles.push(thread::spawn(move || run_connection(&addr, requests, &path)));
    }

    let mut completed = 0usize;
    let mut bytes = 0u64;
    for handle in handles {
        let (reqs, body_bytes) = handle.join().expect("bench worker panicked");
        completed += reqs;
        bytes += body_bytes;
    }

    let elapsed = started.elapsed();
    let reqs_per_s = completed as f64 / elapsed.as_secs_f64();
    let mb_per_s = bytes as f64 / (1024.0 * 1024.0) / elapsed.as_secs_f64();
    println!(
        "{completed} requests over {connections} connections in {:.2}s: {reqs_per_s:.0} req/s, {mb_per_s:.2} MB/s",
        elapsed.as_secs_f64()
    );
}

/// Issue `requests` GETs, reconnecting whenever the server's keep-alive cap
/// closes the connection. Returns (completed requests, body bytes read).
fn run_connection(addr: &str, requests: usize, path: &str) -> (usize, u64) {
    let mut completed = 0usize;
    let mut bytes = 0u64;
    while completed < requests {
        let mut stream = TcpStream::connect(addr).expect("connect failed");
        for _ in 0..MAX_KEEPALIVE_REQUESTS.min(requests - completed) {
            send_get(&mut stream, path, true);
            match read_response(&mut stream) {
                Some((200, body_len)) => {
                    completed += 1;
                    bytes += body_len as u64;
                }
                Some((status, _)) => panic!("unexpected status {status} for {path}"),
                None => panic!("server closed mid-session after {completed} requests"),
            }
        }
    }
    (completed, bytes)
}

fn send_get(stream: &mut TcpStream, path: &str, keep_alive: bool) {
    let connection = if keep_alive { "keep-alive" } else { "close" };
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: {connection}\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .expect("request write failed");
}

/// Read one response: headers up to the blank line, then Content-Length
/// body bytes. `None` on EOF before a complete response.
fn read_response(stream: &mut TcpStream) -> Option<(u16, usize)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find_blank_line(&buf) {
            break pos;
        }
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = std::str::from_utf8(&buf[..header_end]).ok()?;
    let status: u16 = head.split_whitespace().nth(1)?.parse().ok()?;
    let content_length: usize = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    let mut body = buf.len() - (header_end + 4);
    while body < content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        body += n;
    }
    Some((status, body))
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
