//! Per-connection HTTP handling: a restricted HTTP/1.x static file server
//! with keep-alive.
//!
//! Extracted behind a plain `TcpStream` so integration tests can drive a
//! handler over any connected socket without the pool or the accept loop.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::debug;

use crate::config::{IDLE_TIMEOUT, MAX_KEEPALIVE_REQUESTS, REQ_BUF_SIZE};
use crate::metrics;

/// Start-line token bounds, matching the widths the request parser has
/// always enforced.
const METHOD_MAX: usize = 15;
const PATH_MAX: usize = 1023;
const VERSION_MAX: usize = 15;

/// Serve up to [`MAX_KEEPALIVE_REQUESTS`] requests on one connection.
///
/// `Ok(())` covers the orderly outcomes: client close, idle timeout, a
/// negotiated close, and a served-out keep-alive session. `Err` is a
/// terminal connection error (read failure, header write failure, malformed
/// or disallowed request). The caller closes the socket by dropping it
/// either way.
pub fn handle_connection(stream: &mut TcpStream, docroot: &Path) -> io::Result<()> {
    stream.set_read_timeout(Some(IDLE_TIMEOUT))?;
    let mut buf = [0u8; REQ_BUF_SIZE];

    for _served in 0..MAX_KEEPALIVE_REQUESTS {
        let n = loop {
            match stream.read(&mut buf) {
                Ok(0) => return Ok(()), // orderly close
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(()); // idle close
                }
                Err(e) => return Err(e),
            }
        };
        let started = Instant::now();
        let request = &buf[..n];

        let Some((method, path, version)) = parse_request_line(request) else {
            write_error(stream, 400, "Bad Request")?;
            metrics::record_request(elapsed_ms(started), 0, 400);
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "malformed request line",
            ));
        };

        // HTTP/1.0 defaults to close, everything else to keep-alive; an
        // explicit Connection header overrides either way.
        let mut keep_alive = version != "HTTP/1.0";
        match connection_directive(request) {
            ConnectionDirective::Close => keep_alive = false,
            ConnectionDirective::KeepAlive => keep_alive = true,
            ConnectionDirective::Default => {}
        }

        if method != "GET" && method != "HEAD" {
            write_error(stream, 405, "Method Not Allowed")?;
            metrics::record_request(elapsed_ms(started), 0, 405);
            return Err(io::Error::new(io::ErrorKind::InvalidData, "method not allowed"));
        }

        if path.contains("..") {
            write_error(stream, 403, "Forbidden")?;
            metrics::record_request(elapsed_ms(started), 0, 403);
            if keep_alive {
                continue;
            }
            return Ok(());
        }

        let mut file_path = resolve_path(docroot, &path);
        let mut meta = match fs::metadata(&file_path) {
            Ok(meta) => meta,
            Err(_) => {
                write_error(stream, 404, "Not Found")?;
                metrics::record_request(elapsed_ms(started), 0, 404);
                if keep_alive {
                    continue;
                }
                return Ok(());
            }
        };

        if meta.is_dir() {
            file_path.push("index.html");
            meta = match fs::metadata(&file_path) {
                Ok(meta) => meta,
                Err(_) => {
                    write_error(stream, 403, "Forbidden")?;
                    metrics::record_request(elapsed_ms(started), 0, 403);
                    if keep_alive {
                        continue;
                    }
                    return Ok(());
                }
            };
        }

        let file = match File::open(&file_path) {
            Ok(file) => file,
            Err(e) => {
                debug!("open {}: {e}", file_path.display());
                write_error(stream, 500, "Internal Server Error")?;
                metrics::record_request(elapsed_ms(started), 0, 500);
                if keep_alive {
                    continue;
                }
                return Ok(());
            }
        };

        let len = meta.len();
        let connection = if keep_alive { "keep-alive" } else { "close" };
        let header =
            format!("HTTP/1.1 200 OK\r\nContent-Length: {len}\r\nConnection: {connection}\r\n\r\n");
        stream.write_all(header.as_bytes())?;

        // HEAD gets the headers only; Content-Length still names the file
        // size. A transmit failure after the committed headers cuts the body
        // short without counting as a connection error.
        let mut body_bytes = 0;
        if method == "GET" {
            body_bytes = send_file(stream, &file, len);
        }
        metrics::record_request(elapsed_ms(started), body_bytes, 200);

        if !keep_alive {
            return Ok(());
        }
    }
    Ok(())
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// First three whitespace-delimited tokens of the request buffer, truncated
/// to the historical bounds. `None` when method or path is missing; a
/// missing version comes back as an empty string.
pub(crate) fn parse_request_line(request: &[u8]) -> Option<(String, String, String)> {
    let text = String::from_utf8_lossy(request);
    let mut tokens = text.split_ascii_whitespace();
    let method = tokens.next()?;
    let path = tokens.next()?;
    let version = tokens.next().unwrap_or("");
    Some((
        bounded(method, METHOD_MAX).to_string(),
        bounded(path, PATH_MAX).to_string(),
        bounded(version, VERSION_MAX).to_string(),
    ))
}

fn bounded(token: &str, max: usize) -> &str {
    if token.len() <= max {
        return token;
    }
    let mut end = max;
    while !token.is_char_boundary(end) {
        end -= 1;
    }
    &token[..end]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionDirective {
    Default,
    Close,
    KeepAlive,
}

/// Line-oriented scan of the header block for a `Connection:` header.
/// Case-insensitive, accepts both CRLF and bare-LF endings, stops at the
/// blank line so body bytes cannot spoof the directive. Values other than
/// `close`/`keep-alive` leave the default in place.
fn connection_directive(request: &[u8]) -> ConnectionDirective {
    let text = String::from_utf8_lossy(request);
    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break; // end of headers
        }
        let Some((name, value)) = line.split_once(':') else {
            continue; // request line, or not a header
        };
        if !name.trim().eq_ignore_ascii_case("connection") {
            continue;
        }
        let value = value.trim();
        if value.eq_ignore_ascii_case("close") {
            return ConnectionDirective::Close;
        }
        if value.eq_ignore_ascii_case("keep-alive") {
            return ConnectionDirective::KeepAlive;
        }
    }
    ConnectionDirective::Default
}

/// Map a request path under the document root. The empty path and `/`
/// resolve to `index.html`; leading slashes are stripped so the join can
/// never escape to an absolute path.
pub(crate) fn resolve_path(docroot: &Path, request_path: &str) -> PathBuf {
    if request_path.is_empty() || request_path == "/" {
        return docroot.join("index.html");
    }
    docroot.join(request_path.trim_start_matches('/'))
}

fn write_error(stream: &mut TcpStream, status: u16, reason: &str) -> io::Result<()> {
    let header = format!("HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\n\r\n");
    stream.write_all(header.as_bytes())
}

/// Zero-copy file-to-socket transmit. Returns the body bytes actually sent;
/// errors mid-body end the transfer early (the headers are already on the
/// wire, so there is nothing better to do).
#[cfg(target_os = "linux")]
fn send_file(stream: &mut TcpStream, file: &File, len: u64) -> u64 {
    use std::os::unix::io::AsRawFd;
    let mut offset: libc::off_t = 0;
    while (offset as u64) < len {
        let remaining = (len - offset as u64) as usize;
        let sent =
            unsafe { libc::sendfile(stream.as_raw_fd(), file.as_raw_fd(), &mut offset, remaining) };
        if sent < 0 {
            if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            break;
        }
        if sent == 0 {
            break;
        }
    }
    offset as u64
}

/// Read-then-write fallback with an 8 KiB scratch buffer.
#[cfg(not(target_os = "linux"))]
fn send_file(stream: &mut TcpStream, file: &File, _len: u64) -> u64 {
    let mut reader = file;
    let mut scratch = [0u8; REQ_BUF_SIZE];
    let mut sent = 0u64;
    loop {
        let n = match reader.read(&mut scratch) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        if stream.write_all(&scratch[..n]).is_err() {
            break;
        }
        sent += n as u64;
    }
    sent
}
