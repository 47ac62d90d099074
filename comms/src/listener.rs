//! Passive listeners, accepting inbound stream connections.
use std::io;
use std::net;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use log::*;
use mockwire_net::{Event, Key, Scheduler};
use rustls::ServerConfig;
use socket2::{Domain, SockRef, Socket, Type};

use crate::callback::Ignore;
use crate::stream::Stream;
use crate::tls;

/// Pending connections the kernel queues for us.
pub const BACKLOG: i32 = 1;

/// What became of an accepted stream.
#[derive(Debug)]
pub enum Claim {
    /// The handler took ownership of the stream.
    Accepted,
    /// Nobody wanted the stream. It will be shut down.
    Rejected(Box<dyn Stream>),
}

/// Receives accepted streams.
pub trait Handler {
    /// A stream was accepted on `listener`, from `addr`.
    fn on_connect(
        &mut self,
        _scheduler: &mut dyn Scheduler,
        stream: Box<dyn Stream>,
        _addr: net::SocketAddr,
        _listener: &Listener,
    ) -> Claim {
        Claim::Rejected(stream)
    }
}

impl Handler for Ignore {}

/// A listening TCP socket bound to a local address.
#[derive(Debug)]
pub struct Listener {
    key: Key,
    peer_name: String,
    bind_addr: net::SocketAddr,
    socket: Option<net::TcpListener>,
    tls: Option<Arc<ServerConfig>>,
}

impl Listener {
    /// Bind, listen and register for input.
    pub fn bind(
        scheduler: &mut dyn Scheduler,
        key: Key,
        peer_name: impl Into<String>,
        bind_addr: net::SocketAddr,
    ) -> io::Result<Self> {
        let domain = if bind_addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let sock = Socket::new(domain, Type::STREAM, None)?;

        sock.set_reuse_address(true)?;
        sock.bind(&bind_addr.into())?;
        sock.listen(BACKLOG)?;
        sock.set_nonblocking(true)?;

        let socket: net::TcpListener = sock.into();
        scheduler.add_input_callback(socket.as_raw_fd(), key)?;

        Ok(Self {
            key,
            peer_name: peer_name.into(),
            bind_addr,
            socket: Some(socket),
            tls: None,
        })
    }

    /// Secure every accepted stream with TLS.
    pub fn use_tls(&mut self, config: Arc<ServerConfig>) {
        self.tls = Some(config);
    }

    /// Whether accepted streams are secured with TLS.
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Registration key.
    pub fn key(&self) -> Key {
        self.key
    }

    /// Name given to peers connecting here.
    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    /// Address the listener was asked to bind to.
    pub fn bind_addr(&self) -> net::SocketAddr {
        self.bind_addr
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> io::Result<net::SocketAddr> {
        match &self.socket {
            Some(socket) => socket.local_addr(),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Handle a scheduler event destined to this listener.
    pub fn handle(
        &mut self,
        scheduler: &mut dyn Scheduler,
        event: Event,
        handler: &mut dyn Handler,
    ) {
        if let Event::Readable(_) = event {
            self.on_readable(scheduler, handler);
        }
    }

    /// Accept a single pending connection, and hand it over.
    pub fn on_readable(&mut self, scheduler: &mut dyn Scheduler, handler: &mut dyn Handler) {
        let Some(socket) = &self.socket else {
            return;
        };
        let (conn, addr) = match socket.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
            Err(err) => {
                error!("{}: Accept failed: {}", self.peer_name, err);
                return;
            }
        };
        debug!("{}: Accepted connection from {}", self.peer_name, addr);

        let stream: Box<dyn Stream> = match &self.tls {
            Some(config) => match tls::accept(config.clone(), conn) {
                Ok(stream) => Box::new(stream),
                Err(err) => {
                    warn!("{}: TLS handshake with {} failed: {}", self.peer_name, addr, err);
                    return;
                }
            },
            None => Box::new(conn),
        };

        match handler.on_connect(scheduler, stream, addr, self) {
            Claim::Accepted => {}
            Claim::Rejected(mut stream) => {
                debug!("{}: No consumer for connection from {}", self.peer_name, addr);
                stream.shutdown(net::Shutdown::Both).ok();
            }
        }
    }

    /// Stop listening. Errors are swallowed.
    pub fn shut_down(&mut self, scheduler: &mut dyn Scheduler) {
        scheduler.remove_input_callback(self.key);

        if let Some(socket) = self.socket.take() {
            SockRef::from(&socket).shutdown(net::Shutdown::Both).ok();
        }
    }
}
