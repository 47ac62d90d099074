//! Active connectors, establishing outbound stream connections.
//!
//! A [`Connector`] attempts a non-blocking connect on every tick of its timers: once
//! after the first delay, then periodically. Attempts that report the connection
//! in progress are simply repeated on the next tick. Every hard failure counts as an
//! error, and once more errors occur than the connector tolerates, it gives up for
//! good.
use std::io;
use std::net;
use std::sync::Arc;

use log::*;
use mockwire_net::{Event, Key, Scheduler, TimerId};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, StreamOwned};
use socket2::{Domain, Socket, Type};

use crate::callback::Ignore;
use crate::config::ConnectTimes;
use crate::stream::Stream;
use crate::tls::{self, TlsStream};

/// Connector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for the transport connection.
    Connecting,
    /// Connected, waiting for the TLS handshake to complete.
    Handshaking,
    /// Connected, and ready to be turned into a stream.
    Established,
    /// Gave up after too many errors.
    Abandoned,
}

/// Errors encountered so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Errors {
    /// Failed connection attempts.
    pub connect: usize,
    /// Failed TLS handshakes.
    pub handshake: usize,
}

impl Errors {
    /// Total number of errors.
    pub fn total(&self) -> usize {
        self.connect + self.handshake
    }

    /// Whether more than `max` errors occurred.
    pub fn exceeds(&self, max: usize) -> bool {
        self.total() > max
    }
}

/// Receives the outcome of connection attempts.
pub trait Handler {
    /// The connection was established. Return `true` to claim it, eg. with
    /// [`Connector::into_stream`]; otherwise the connector is shut down.
    fn on_connect(&mut self, _connector: &mut Connector) -> bool {
        false
    }

    /// The connector gave up. Called at most once.
    fn on_error(&mut self, _connector: &mut Connector) {}
}

impl Handler for Ignore {}

#[derive(Debug)]
struct Tls {
    config: Arc<ClientConfig>,
    name: ServerName<'static>,
    conn: Option<ClientConnection>,
}

/// An outbound connection in the making.
#[derive(Debug)]
pub struct Connector {
    key: Key,
    peer_name: String,
    peer_addr: net::SocketAddr,
    socket: Option<Socket>,
    tls: Option<Tls>,
    timers: Vec<TimerId>,
    max_error_retries: usize,
    errors: Errors,
    state: State,
}

impl Connector {
    /// Create a socket, optionally bound to `bind_addr`, and schedule connection
    /// attempts to `peer_addr`.
    pub fn new(
        scheduler: &mut dyn Scheduler,
        key: Key,
        peer_name: impl Into<String>,
        peer_addr: net::SocketAddr,
        times: ConnectTimes,
        bind_addr: Option<net::SocketAddr>,
        max_error_retries: usize,
    ) -> io::Result<Self> {
        let domain = if peer_addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let sock = Socket::new(domain, Type::STREAM, None)?;

        sock.set_reuse_address(true)?;
        sock.set_nonblocking(true)?;

        if let Some(addr) = bind_addr {
            sock.bind(&addr.into())?;
        }
        let timers = vec![
            scheduler.add_timeout(times.first_delay, key),
            scheduler.add_repeating_timeout(times.retry_period, key),
        ];

        Ok(Self {
            key,
            peer_name: peer_name.into(),
            peer_addr,
            socket: Some(sock),
            tls: None,
            timers,
            max_error_retries,
            errors: Errors::default(),
            state: State::Connecting,
        })
    }

    /// Secure the connection with TLS, verifying the server as `name`.
    pub fn use_tls(&mut self, config: Arc<ClientConfig>, name: ServerName<'static>) {
        self.tls = Some(Tls {
            config,
            name,
            conn: None,
        });
    }

    /// Whether the connection is secured with TLS.
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Registration key.
    pub fn key(&self) -> Key {
        self.key
    }

    /// Name of the peer.
    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    /// Address connected to.
    pub fn peer_addr(&self) -> net::SocketAddr {
        self.peer_addr
    }

    /// Connector state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Errors encountered so far.
    pub fn errors(&self) -> Errors {
        self.errors
    }

    /// Handle a scheduler event destined to this connector.
    pub fn handle(
        &mut self,
        scheduler: &mut dyn Scheduler,
        event: Event,
        handler: &mut dyn Handler,
    ) {
        if let Event::Timer(..) = event {
            self.on_timer(scheduler, handler);
        }
    }

    /// Make progress towards an established connection.
    pub fn on_timer(&mut self, scheduler: &mut dyn Scheduler, handler: &mut dyn Handler) {
        if self.state == State::Connecting {
            self.try_connect();
        }
        if self.state == State::Handshaking {
            self.try_handshake();
        }

        match self.state {
            State::Connecting | State::Handshaking => {
                if self.errors.exceeds(self.max_error_retries) {
                    self.abandon(scheduler, handler);
                }
            }
            State::Established => {
                if self.timers.is_empty() {
                    return;
                }
                self.cancel_timers(scheduler);

                debug!("{}: Connected to {}", self.peer_name, self.peer_addr);

                if !handler.on_connect(self) {
                    self.shut_down(scheduler);
                }
            }
            State::Abandoned => {}
        }
    }

    /// Take the established stream. Returns `None` unless the connection is
    /// established.
    pub fn into_stream(mut self) -> Option<Box<dyn Stream>> {
        if self.state != State::Established {
            return None;
        }
        let sock = net::TcpStream::from(self.socket.take()?);

        match self.tls.and_then(|tls| tls.conn) {
            Some(conn) => Some(Box::new(TlsStream::Client(Box::new(StreamOwned::new(
                conn, sock,
            ))))),
            None => Some(Box::new(sock)),
        }
    }

    /// Stop trying, and release the socket.
    pub fn shut_down(&mut self, scheduler: &mut dyn Scheduler) {
        self.cancel_timers(scheduler);
        self.socket = None;
    }

    fn try_connect(&mut self) {
        let Some(socket) = &self.socket else {
            return;
        };

        match socket.connect(&self.peer_addr.into()) {
            Ok(()) => self.connected(),
            Err(err) if err.raw_os_error() == Some(libc::EISCONN) => self.connected(),
            Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(err) if err.raw_os_error() == Some(libc::EALREADY) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => {
                self.errors.connect += 1;

                warn!(
                    "{}: Failed to connect to {}: {} ({} error(s), {} tolerated)",
                    self.peer_name,
                    self.peer_addr,
                    err,
                    self.errors.total(),
                    self.max_error_retries
                );
            }
        }
    }

    fn connected(&mut self) {
        self.state = if self.tls.is_some() {
            State::Handshaking
        } else {
            State::Established
        };
    }

    fn try_handshake(&mut self) {
        let (Some(socket), Some(tls)) = (&self.socket, &mut self.tls) else {
            return;
        };

        match handshake(socket, tls) {
            Ok(()) => self.state = State::Established,
            Err(err) => {
                self.errors.handshake += 1;

                warn!(
                    "{}: TLS handshake with {} failed: {} ({} error(s), {} tolerated)",
                    self.peer_name,
                    self.peer_addr,
                    err,
                    self.errors.total(),
                    self.max_error_retries
                );
            }
        }
    }

    fn abandon(&mut self, scheduler: &mut dyn Scheduler, handler: &mut dyn Handler) {
        error!(
            "{}: {} error(s) occurred connecting to {}, abandoning",
            self.peer_name,
            self.errors.total(),
            self.peer_addr
        );
        self.cancel_timers(scheduler);
        self.state = State::Abandoned;

        handler.on_error(self);
        self.shut_down(scheduler);
    }

    fn cancel_timers(&mut self, scheduler: &mut dyn Scheduler) {
        for id in self.timers.drain(..) {
            scheduler.remove_timeout(id);
        }
    }
}

/// Perform the client handshake on a connected socket, in blocking mode.
fn handshake(socket: &Socket, tls: &mut Tls) -> io::Result<()> {
    let conn = match tls.conn.take() {
        Some(conn) => conn,
        None => ClientConnection::new(tls.config.clone(), tls.name.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
    };
    tls::handshake_blocking(tls.conn.insert(conn), socket)
}
