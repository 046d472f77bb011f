//! End-to-end tests: a full server (listener, acceptor, estimator, pool,
//! handler) on a loopback ephemeral port, exercised by raw HTTP clients.

mod common;

use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tempfile::TempDir;

use shortstack::acceptor;
use shortstack::net;
use shortstack::pool::WorkerPool;

struct Server {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    listener: TcpListener,
    pool: Arc<WorkerPool>,
    acceptor: Option<JoinHandle<()>>,
    _root: TempDir,
}

fn start_server() -> Server {
    let root = common::docroot_fixture();
    let listener = net::bind_listener(0, 16).expect("bind");
    let addr = listener.local_addr().expect("addr");
    let pool = Arc::new(WorkerPool::new(2, 16, Some(root.path().to_path_buf())));
    let stop = Arc::new(AtomicBool::new(false));

    let acceptor = {
        let listener = listener.try_clone().expect("clone listener");
        let pool = Arc::clone(&pool);
        let stop = Arc::clone(&stop);
        thread::spawn(move || acceptor::accept_loop(&listener, &pool, &stop))
    };

    Server {
        addr,
        stop,
        listener,
        pool,
        acceptor: Some(acceptor),
        _root: root,
    }
}

impl Server {
    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");
        stream
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        net::shutdown_listener(&self.listener);
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
        self.pool.shutdown();
    }
}

#[test]
fn serves_a_small_file_with_keep_alive_headers() {
    let server = start_server();
    let mut client = server.connect();
    common::send_raw(&mut client, "GET /small.txt HTTP/1.1\r\nHost: t\r\n\r\n");

    let resp = common::read_response(&mut client).expect("response");
    assert!(resp.head.starts_with("HTTP/1.1 200 OK"), "head: {}", resp.head);
    assert!(resp.head.contains("Content-Length: 5"), "head: {}", resp.head);
    assert!(resp.head.contains("Connection: keep-alive"), "head: {}", resp.head);
    assert_eq!(resp.body, b"hello");
}

#[test]
fn root_serves_the_index_page() {
    let server = start_server();
    let mut client = server.connect();
    common::send_get(&mut client, "/", false);

    let resp = common::read_response(&mut client).expect("response");
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, b"<html>index</html>");
}

#[test]
fn rejects_traversal_with_403() {
    let server = start_server();
    let mut client = server.connect();
    common::send_raw(&mut client, "GET /../etc/passwd HTTP/1.1\r\n\r\n");

    let resp = common::read_response(&mut client).expect("response");
    assert!(
        resp.head.starts_with("HTTP/1.1 403 Forbidden"),
        "head: {}",
        resp.head
    );
    assert!(resp.body.is_empty());
}

#[test]
fn missing_file_is_404() {
    let server = start_server();
    let mut client = server.connect();
    common::send_get(&mut client, "/nope.txt", false);

    let resp = common::read_response(&mut client).expect("response");
    assert_eq!(resp.status, 404);
}

#[test]
fn directory_resolves_its_index() {
    let server = start_server();
    let mut client = server.connect();
    common::send_get(&mut client, "/sub", false);

    let resp = common::read_response(&mut client).expect("response");
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, b"subindex");
}

#[test]
fn directory_without_index_is_403() {
    let server = start_server();
    let mut client = server.connect();
    common::send_get(&mut client, "/bare", false);

    let resp = common::read_response(&mut client).expect("response");
    assert_eq!(resp.status, 403);
}

#[test]
fn disallowed_method_is_405_and_terminates_the_connection() {
    let server = start_server();
    let mut client = server.connect();
    common::send_raw(&mut client, "POST /small.txt HTTP/1.1\r\nHost: t\r\n\r\n");

    let resp = common::read_response(&mut client).expect("response");
    assert_eq!(resp.status, 405);

    // The connection is gone: a follow-up request sees EOF, not a response.
    let _ = std::io::Write::write_all(
        &mut client,
        b"GET /small.txt HTTP/1.1\r\nHost: t\r\n\r\n",
    );
    assert!(common::read_response(&mut client).is_none());
}

#[test]
fn malformed_request_line_is_400() {
    let server = start_server();
    let mut client = server.connect();
    common::send_raw(&mut client, "GARBAGE\r\n\r\n");

    let resp = common::read_response(&mut client).expect("response");
    assert_eq!(resp.status, 400);
    assert!(common::read_response(&mut client).is_none());
}

#[test]
fn keep_alive_caps_at_eight_requests() {
    let server = start_server();
    let mut client = server.connect();

    let mut responses = 0;
    for _ in 0..9 {
        // Past the cap the server has closed; the write may fail and the
        // read must see EOF.
        let _ = std::io::Write::write_all(
            &mut client,
            b"GET /small.txt HTTP/1.1\r\nHost: t\r\nConnection: keep-alive\r\n\r\n",
        );
        match common::read_response(&mut client) {
            Some(resp) => {
                assert_eq!(resp.status, 200);
                assert_eq!(resp.body, b"hello");
                responses += 1;
            }
            None => break,
        }
    }
    assert_eq!(responses, 8);
}

#[test]
fn http_1_0_defaults_to_close() {
    let server = start_server();
    let mut client = server.connect();
    common::send_raw(&mut client, "GET /small.txt HTTP/1.0\r\n\r\n");

    let resp = common::read_response(&mut client).expect("response");
    assert_eq!(resp.status, 200);
    assert!(resp.head.contains("Connection: close"), "head: {}", resp.head);
    assert!(common::read_response(&mut client).is_none());
}

#[test]
fn negotiated_close_is_honored_on_http_1_1() {
    let server = start_server();
    let mut client = server.connect();
    common::send_get(&mut client, "/small.txt", false);

    let resp = common::read_response(&mut client).expect("response");
    assert_eq!(resp.status, 200);
    assert!(resp.head.contains("Connection: close"), "head: {}", resp.head);
    assert!(common::read_response(&mut client).is_none());
}

#[test]
fn head_returns_headers_without_a_body() {
    let server = start_server();
    let mut client = server.connect();
    common::send_raw(
        &mut client,
        "HEAD /small.txt HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n",
    );

    let mut raw = Vec::new();
    client.read_to_end(&mut raw).expect("read");
    let text = String::from_utf8_lossy(&raw);
    assert!(text.starts_with("HTTP/1.1 200 OK"), "raw: {text}");
    assert!(text.contains("Content-Length: 5"), "raw: {text}");
    // The header block is the whole response.
    assert!(text.ends_with("\r\n\r\n"), "unexpected body bytes: {text}");
}
