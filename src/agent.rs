use std::time::Instant;

use mio::net::TcpStream;

/// Size of the inline buffer used to accumulate a pending agent's opening
/// request. Large enough for any real NTRIP handshake with a comfortable
/// margin; a request that doesn't resolve within this many bytes is
/// considered malformed.
pub const PARSE_BUF_CAP: usize = 1024;

/// Size of the transient read buffer used once an agent has been classified.
pub const READ_BUF_CAP: usize = 512;

pub const IDLE_TIMEOUT_SECS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Pending,
    Client,
    Source,
}

/// One accepted TCP connection and everything the reactor needs to drive it.
///
/// `mountpoint` and `user_agent` stay empty while [`Role::Pending`] and are
/// fixed for the rest of the agent's life once classified; there is no path
/// that mutates them after the pending -> client/source transition.
pub struct Agent {
    pub socket: TcpStream,
    pub role: Role,
    pub mountpoint: String,
    pub user_agent: String,
    pub peer_addr: String,
    pub login_time: Instant,
    pub last_activity: Instant,
    pub bytes_in: u64,
    pub bytes_out: u64,

    /// Only meaningful while `role == Role::Pending`.
    pub parse_buf: Box<[u8; PARSE_BUF_CAP]>,
    pub write_idx: usize,
}

impl Agent {
    pub fn new(socket: TcpStream, peer_addr: String) -> Self {
        let now = Instant::now();
        Self {
            socket,
            role: Role::Pending,
            mountpoint: String::new(),
            user_agent: String::new(),
            peer_addr,
            login_time: now,
            last_activity: now,
            bytes_in: 0,
            bytes_out: 0,
            parse_buf: Box::new([0u8; PARSE_BUF_CAP]),
            write_idx: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> f64 {
        self.last_activity.elapsed().as_secs_f64()
    }

    pub fn is_idle(&self) -> bool {
        self.idle_for() >= IDLE_TIMEOUT_SECS
    }

    /// Appends `data` to the parse buffer, returning `false` if it doesn't
    /// fit (the caller should then treat the request as too large to parse).
    ///
    /// This is true accumulation (`write_idx += n`), not an overwrite: a
    /// prior revision of this caster used the overwrite form and silently
    /// discarded everything but the most recent read, which broke any
    /// handshake split across more than one TCP segment.
    pub fn push_parse_bytes(&mut self, data: &[u8]) -> bool {
        let remaining = self.parse_buf.len().saturating_sub(self.write_idx + 1);
        if data.len() > remaining {
            return false;
        }

        let end = self.write_idx + data.len();
        self.parse_buf[self.write_idx..end].copy_from_slice(data);
        self.write_idx = end;
        true
    }

    pub fn parse_window(&self) -> &[u8] {
        &self.parse_buf[..self.write_idx]
    }

    pub fn promote(&mut self, role: Role, mountpoint: String, user_agent: String) {
        self.role = role;
        self.mountpoint = mountpoint;
        self.user_agent = user_agent;
        self.write_idx = 0;
    }
}

/// Case-insensitive mountpoint equality, matching the rest of the routing
/// contract.
pub fn mountpoints_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
