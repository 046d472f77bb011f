#![allow(dead_code)]

use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

use tempfile::TempDir;

/// Build a throwaway document root: an index page, a 5-byte file, a
/// directory with its own index, and a directory without one.
pub fn docroot_fixture() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("index.html"), "<html>index</html>").expect("write index");
    fs::write(dir.path().join("small.txt"), "hello").expect("write small");
    fs::create_dir(dir.path().join("sub")).expect("mkdir sub");
    fs::write(dir.path().join("sub").join("index.html"), "subindex").expect("write subindex");
    fs::create_dir(dir.path().join("bare")).expect("mkdir bare");
    dir
}

/// A connected loopback pair: (client end, server end). The server end is
/// what a job would carry; the client end drives it.
pub fn stream_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let client = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
    let (server, _) = listener.accept().expect("accept");
    (client, server)
}

pub fn send_get(stream: &mut TcpStream, path: &str, keep_alive: bool) {
    let connection = if keep_alive { "keep-alive" } else { "close" };
    let request =
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: {connection}\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .expect("request write failed");
}

pub fn send_raw(stream: &mut TcpStream, request: &str) {
    stream
        .write_all(request.as_bytes())
        .expect("request write failed");
}

pub struct Response {
    pub status: u16,
    pub head: String,
    pub body: Vec<u8>,
}

/// Read one response: headers up to the blank line, then `Content-Length`
/// body bytes. `None` on EOF (or a read timeout) before a complete header
/// block.
pub fn read_response(stream: &mut TcpStream) -> Option<Response> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
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

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Some(Response { status, head, body })
}
