//! Parses the opening bytes of a pending connection into either a client or
//! source request.
//!
//! The match is deliberately loose: it looks for the literal `GET` or
//! `SOURCE` anywhere in the buffered bytes rather than anchoring to offset
//! zero, and it keeps waiting for more bytes until the headers it needs are
//! present. This mirrors how the wire format is actually produced by real
//! NTRIP clients and sources, which sometimes prefix the request line with
//! stray whitespace.

pub const RESP_OK: &[u8] = b"ICY 200 OK\r\n";
pub const RESP_FORBIDDEN: &[u8] = b"HTTP/1.0 403 Forbidden\r\n";
pub const RESP_BAD_MOUNTPOINT: &[u8] = b"ERROR - Bad Mountpoint\r\n";

/// Reserved for a future credential-enforcement hook; not emitted by the
/// current pass-through handshake path. See `DESIGN.md`.
#[allow(dead_code)]
pub const RESP_UNAUTHORIZED: &[u8] = b"HTTP/1.0 401 Unauthorized\r\n";
#[allow(dead_code)]
pub const RESP_BAD_PASSWORD: &[u8] = b"ERROR - Bad Password\r\n";

pub const MAX_FIELD: usize = 63;

pub enum Classified {
    Client { mountpoint: String, user_agent: String },
    Source { mountpoint: String, user_agent: String },
}

pub enum Outcome {
    /// Headers needed to decide are not all present yet; keep reading.
    NeedMore,
    Accept(Classified),
    /// Close the connection with this response body, if any.
    Reject(Option<&'static [u8]>),
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn truncate(s: &str) -> String {
    s.chars().take(MAX_FIELD).collect()
}

/// Returns the byte range of the line starting at `from`, not including the
/// trailing `\r\n`, or `None` if the buffer does not yet contain a
/// terminated line starting there.
fn line_at(buf: &[u8], from: usize) -> Option<&[u8]> {
    let rest = &buf[from..];
    find(rest, b"\r\n").map(|end| &rest[..end])
}

fn header_value<'a>(buf: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    let start = find(buf, name)? + name.len();
    line_at(buf, start).map(|line| {
        let mut v = line;
        while v.first() == Some(&b' ') {
            v = &v[1..];
        }
        v
    })
}

/// Attempts to classify the bytes accumulated so far for a pending agent.
pub fn classify(buf: &[u8]) -> Outcome {
    let get_pos = find(buf, b"GET");
    let source_pos = find(buf, b"SOURCE");

    match (get_pos, source_pos) {
        (None, None) => Outcome::NeedMore,
        (Some(g), Some(s)) if s < g => classify_source(&buf[s..]),
        (Some(g), _) => classify_client(&buf[g..]),
        (None, Some(s)) => classify_source(&buf[s..]),
    }
}

fn classify_client(from: &[u8]) -> Outcome {
    let Some(request_line) = line_at(from, 0) else {
        return Outcome::NeedMore;
    };
    let Some(ua) = header_value(from, b"User-Agent:") else {
        return Outcome::NeedMore;
    };

    let text = String::from_utf8_lossy(request_line);
    let mut parts = text.split_whitespace();
    let (Some(_verb), Some(url), Some(proto)) = (parts.next(), parts.next(), parts.next()) else {
        return Outcome::Reject(None);
    };
    if !proto.starts_with("HTTP/1") {
        return Outcome::Reject(None);
    }

    let mountpoint = url.strip_prefix('/').unwrap_or(url);
    if mountpoint.is_empty() {
        // Source-table discovery request: stubbed, reference behavior.
        return Outcome::Reject(None);
    }

    Outcome::Accept(Classified::Client {
        mountpoint: truncate(mountpoint),
        user_agent: truncate(&String::from_utf8_lossy(ua)),
    })
}

fn classify_source(from: &[u8]) -> Outcome {
    let Some(request_line) = line_at(from, 0) else {
        return Outcome::NeedMore;
    };
    let Some(ua) = header_value(from, b"Source-Agent:") else {
        return Outcome::NeedMore;
    };

    let text = String::from_utf8_lossy(request_line);
    let mut parts = text.split_whitespace();
    let (Some(_verb), Some(_password), Some(mountpoint)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Outcome::Reject(Some(RESP_BAD_MOUNTPOINT));
    };

    if mountpoint.is_empty() || mountpoint == "/" {
        return Outcome::Reject(Some(RESP_BAD_MOUNTPOINT));
    }

    Outcome::Accept(Classified::Source {
        mountpoint: truncate(mountpoint),
        user_agent: truncate(&String::from_utf8_lossy(ua)),
    })
}
