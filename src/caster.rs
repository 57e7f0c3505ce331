use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::agent::{Agent, READ_BUF_CAP, Role, mountpoints_match};
use crate::config::{Caps, Config, Credential};
use crate::handshake::{self, Classified, Outcome, RESP_BAD_MOUNTPOINT, RESP_FORBIDDEN, RESP_OK};
use crate::stats::StatsSnapshot;
use crate::table::Table;

const LISTENER_TOKEN: Token = Token(0);
const SWEEP_INITIAL_DELAY: Duration = Duration::from_secs(5);
const SWEEP_INTERVAL: Duration = Duration::from_secs(3);
const POLL_TICK: Duration = Duration::from_millis(250);

/// The single-threaded reactor: one `Poll`, one listener, three agent
/// tables, one thread. Nothing here is shared across threads, so nothing
/// here needs a lock.
pub struct Caster {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    next_token: usize,

    pending: Table<Token, Agent>,
    clients: Table<Token, Agent>,
    sources: Table<Token, Agent>,

    caps: Caps,
    #[allow(dead_code)]
    credentials: Vec<Credential>,

    next_sweep: Instant,
}

fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .context("failed to create listening socket")?;
    socket
        .set_reuse_address(true)
        .context("failed to set SO_REUSEADDR")?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("failed to bind {addr}"))?;
    socket.listen(1024).context("failed to listen")?;

    Ok(TcpListener::from_std(socket.into()))
}

impl Caster {
    pub fn bind(config: &Config) -> Result<Self> {
        let mut listener = bind_listener(config.bind)?;
        let poll = Poll::new().context("failed to create poll instance")?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .context("failed to register listener")?;

        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            listener,
            next_token: 1,
            pending: Table::with_capacity(config.caps.pending.max(16)),
            clients: Table::with_capacity(config.caps.client.max(16)),
            sources: Table::with_capacity(config.caps.source.max(16)),
            caps: config.caps,
            credentials: config.credentials.clone(),
            next_sweep: Instant::now() + SWEEP_INITIAL_DELAY,
        })
    }

    /// Runs the reactor loop forever. Only returns on a fatal poll error.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.poll
                .poll(&mut self.events, Some(POLL_TICK))
                .context("poll failed")?;

            // mio::Events borrows self.events immutably while we need to
            // mutate self elsewhere, so collect the tokens first.
            let tokens: Vec<(Token, bool)> = self
                .events
                .iter()
                .map(|e| (e.token(), e.is_readable()))
                .collect();

            for (token, readable) in tokens {
                if !readable {
                    continue;
                }
                if token == LISTENER_TOKEN {
                    self.accept_all();
                } else {
                    self.dispatch(token);
                }
            }

            if Instant::now() >= self.next_sweep {
                self.sweep();
                self.next_sweep = Instant::now() + SWEEP_INTERVAL;
            }
        }
    }

    fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token = self.next_token.wrapping_add(1).max(1);
        token
    }

    fn accept_all(&mut self) {
        loop {
            let (mut stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    return;
                }
            };

            let pending_cap = self.caps.pending;
            if pending_cap != 0 && self.pending.len() >= pending_cap {
                log::warn!("pending cap reached, dropping new connection from {addr}");
                drop(stream);
                continue;
            }

            let token = self.next_token();
            if let Err(e) = self
                .poll
                .registry()
                .register(&mut stream, token, Interest::READABLE)
            {
                log::warn!("failed to register new connection: {e}");
                continue;
            }

            log::info!("accepted pending connection from {addr} ({token:?})");
            let agent = Agent::new(stream, addr.to_string());
            self.pending.insert(token, agent);
        }
    }

    fn dispatch(&mut self, token: Token) {
        if self.pending.contains_key(&token) {
            self.on_pending_readable(token);
        } else if self.clients.contains_key(&token) {
            self.on_client_readable(token);
        } else if self.sources.contains_key(&token) {
            self.on_source_readable(token);
        }
    }

    fn deregister(&mut self, agent: &mut Agent) {
        let _ = self.poll.registry().deregister(&mut agent.socket);
    }

    fn close_pending(&mut self, token: Token) {
        if let Some(mut agent) = self.pending.remove(&token) {
            self.deregister(&mut agent);
            log::info!("closed pending connection from {} ({token:?})", agent.peer_addr);
        }
    }

    fn close_client(&mut self, token: Token) {
        if let Some(mut agent) = self.clients.remove(&token) {
            self.deregister(&mut agent);
            log::info!(
                "closed client {} on {} ({token:?})",
                agent.peer_addr,
                agent.mountpoint
            );
        }
    }

    fn close_source(&mut self, token: Token) {
        if let Some(mut agent) = self.sources.remove(&token) {
            self.deregister(&mut agent);
            log::info!(
                "closed source {} on {} ({token:?})",
                agent.peer_addr,
                agent.mountpoint
            );
        }
    }

    fn on_pending_readable(&mut self, token: Token) {
        let mut buf = [0u8; READ_BUF_CAP];
        loop {
            let Some(agent) = self.pending.get_mut(&token) else {
                return;
            };

            match agent.socket.read(&mut buf) {
                Ok(0) => {
                    self.close_pending(token);
                    return;
                }
                Ok(n) => {
                    agent.bytes_in += n as u64;
                    agent.touch();
                    if !agent.push_parse_bytes(&buf[..n]) {
                        log::warn!("pending request too large from {}", agent.peer_addr);
                        self.close_pending(token);
                        return;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.close_pending(token);
                    return;
                }
            }
        }

        let Some(agent) = self.pending.get_mut(&token) else {
            return;
        };

        match handshake::classify(agent.parse_window()) {
            Outcome::NeedMore => {}
            Outcome::Reject(resp) => {
                if let Some(resp) = resp {
                    let _ = agent.socket.write_all(resp);
                }
                self.close_pending(token);
            }
            Outcome::Accept(Classified::Client {
                mountpoint,
                user_agent,
            }) => self.admit_client(token, mountpoint, user_agent),
            Outcome::Accept(Classified::Source {
                mountpoint,
                user_agent,
            }) => self.admit_source(token, mountpoint, user_agent),
        }
    }

    fn admit_client(&mut self, token: Token, mountpoint: String, user_agent: String) {
        let client_cap = self.caps.client;
        if client_cap != 0 && self.clients.len() >= client_cap {
            if let Some(agent) = self.pending.get_mut(&token) {
                let _ = agent.socket.write_all(RESP_FORBIDDEN);
            }
            log::warn!("client cap reached, rejecting {mountpoint}");
            self.close_pending(token);
            return;
        }

        let Some(mut agent) = self.pending.remove(&token) else {
            return;
        };
        if agent.socket.write_all(RESP_OK).is_err() {
            self.deregister(&mut agent);
            return;
        }

        log::info!(
            "client {} subscribed to {mountpoint} ({})",
            agent.peer_addr,
            agent.user_agent
        );
        agent.promote(Role::Client, mountpoint, user_agent);
        self.clients.insert(token, agent);
    }

    fn admit_source(&mut self, token: Token, mountpoint: String, user_agent: String) {
        let duplicate = self
            .sources
            .values()
            .any(|a| mountpoints_match(&a.mountpoint, &mountpoint));
        let source_cap = self.caps.source;
        let over_cap = source_cap != 0 && self.sources.len() >= source_cap;

        if duplicate || over_cap {
            if let Some(agent) = self.pending.get_mut(&token) {
                let _ = agent.socket.write_all(RESP_BAD_MOUNTPOINT);
            }
            log::warn!("rejecting source on {mountpoint} (duplicate={duplicate} over_cap={over_cap})");
            self.close_pending(token);
            return;
        }

        let Some(mut agent) = self.pending.remove(&token) else {
            return;
        };
        if agent.socket.write_all(RESP_OK).is_err() {
            self.deregister(&mut agent);
            return;
        }

        log::info!(
            "source {} publishing {mountpoint} ({})",
            agent.peer_addr,
            agent.user_agent
        );
        agent.promote(Role::Source, mountpoint, user_agent);
        self.sources.insert(token, agent);
    }

    fn on_client_readable(&mut self, token: Token) {
        let mut buf = [0u8; READ_BUF_CAP];
        loop {
            let Some(agent) = self.clients.get_mut(&token) else {
                return;
            };

            match agent.socket.read(&mut buf) {
                Ok(0) => {
                    self.close_client(token);
                    return;
                }
                // Client -> caster bytes (typically GGA sentences) are
                // drained and discarded; this caster has no use for them.
                Ok(n) => {
                    agent.bytes_in += n as u64;
                    agent.touch();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.close_client(token);
                    return;
                }
            }
        }
    }

    fn on_source_readable(&mut self, token: Token) {
        let mut buf = [0u8; READ_BUF_CAP];
        loop {
            let Some(agent) = self.sources.get_mut(&token) else {
                return;
            };

            match agent.socket.read(&mut buf) {
                Ok(0) => {
                    self.close_source(token);
                    return;
                }
                Ok(n) => {
                    agent.bytes_in += n as u64;
                    agent.touch();
                    let mountpoint = agent.mountpoint.clone();
                    self.fan_out(&mountpoint, &buf[..n]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.close_source(token);
                    return;
                }
            }
        }
    }

    /// Best-effort fan-out: a failed write to one client does not close it
    /// here and does not stop delivery to the others. The idle sweeper or
    /// that client's own read path will collect it eventually.
    fn fan_out(&mut self, mountpoint: &str, data: &[u8]) {
        for agent in self.clients.values_mut() {
            if !mountpoints_match(&agent.mountpoint, mountpoint) {
                continue;
            }
            match agent.socket.write(data) {
                Ok(n) => {
                    agent.bytes_out += n as u64;
                    agent.touch();
                }
                Err(_) => continue,
            }
        }
    }

    fn sweep(&mut self) {
        let pending: Vec<Token> = self
            .pending
            .iter()
            .filter(|(_, a)| a.is_idle())
            .map(|(t, _)| *t)
            .collect();
        let clients: Vec<Token> = self
            .clients
            .iter()
            .filter(|(_, a)| a.is_idle())
            .map(|(t, _)| *t)
            .collect();
        let sources: Vec<Token> = self
            .sources
            .iter()
            .filter(|(_, a)| a.is_idle())
            .map(|(t, _)| *t)
            .collect();

        for token in pending {
            log::debug!("reaping idle pending connection {token:?}");
            self.close_pending(token);
        }
        for token in clients {
            log::debug!("reaping idle client {token:?}");
            self.close_client(token);
        }
        for token in sources {
            log::debug!("reaping idle source {token:?}");
            self.close_source(token);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }

    /// Folds the three tables into a single point-in-time rollup. Cheap
    /// enough to call from a periodic logging hook or an external status
    /// endpoint; nothing here is kept running between calls.
    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot {
            pending: self.pending.len(),
            clients: self.clients.len(),
            sources: self.sources.len(),
            bytes_in: 0,
            bytes_out: 0,
        };

        for agent in self
            .pending
            .values()
            .chain(self.clients.values())
            .chain(self.sources.values())
        {
            snapshot.bytes_in += agent.bytes_in;
            snapshot.bytes_out += agent.bytes_out;
        }

        snapshot
    }
}
