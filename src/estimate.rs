//! Acceptor-side response-size estimation: a non-consuming peek of the
//! inbound request plus a stat of the would-be file.
//!
//! Extracted from the accept loop so tests can drive it over plain byte
//! buffers.

use std::fs;
use std::path::Path;

use crate::http;

/// Best-effort estimate of the response-body size for a peeked request.
///
/// Any failing step (short or malformed start line, a traversal attempt,
/// a missing file) yields 0, which the SJF policy treats as most urgent.
/// The path is mapped exactly as the handler maps it (`/` → `index.html`),
/// but the stat is taken as-is: no directory-index follow-up happens here.
pub fn estimate_cost(peeked: &[u8], docroot: &Path) -> u64 {
    let Some((_method, path, _version)) = http::parse_request_line(peeked) else {
        return 0;
    };
    if path.contains("..") {
        return 0;
    }
    match fs::metadata(http::resolve_path(docroot, &path)) {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    }
}
