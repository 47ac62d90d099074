//! Datagram endpoints.
use std::io;
use std::net;
use std::os::unix::io::AsRawFd;

use log::*;
use mockwire_net::{Event, Key, Scheduler};
use socket2::{Domain, Socket, Type};

use crate::callback::{Callbacks, Conn};
use crate::config::Config;

/// A UDP socket, optionally bound to a local address and aimed at a peer.
///
/// Only bound endpoints receive; only endpoints with a peer address send.
#[derive(Debug)]
pub struct Dgram {
    key: Key,
    peer_name: String,
    socket: Option<net::UdpSocket>,
    bind_addr: Option<net::SocketAddr>,
    peer_addr: Option<net::SocketAddr>,
    last_addr: Option<net::SocketAddr>,
    max_size: usize,
}

impl Dgram {
    /// Create a datagram endpoint. If a bind address is given, the socket is bound
    /// to it and registered for input.
    pub fn bind(
        scheduler: &mut dyn Scheduler,
        key: Key,
        peer_name: impl Into<String>,
        bind_addr: Option<net::SocketAddr>,
        peer_addr: Option<net::SocketAddr>,
        config: &Config,
    ) -> io::Result<Self> {
        let domain = match bind_addr.or(peer_addr) {
            Some(addr) if addr.is_ipv6() => Domain::IPV6,
            _ => Domain::IPV4,
        };
        let sock = Socket::new(domain, Type::DGRAM, None)?;

        sock.set_reuse_address(true)?;
        sock.set_nonblocking(true)?;

        if let Some(addr) = bind_addr {
            sock.bind(&addr.into())?;
        }
        let socket: net::UdpSocket = sock.into();

        if bind_addr.is_some() {
            scheduler.add_input_callback(socket.as_raw_fd(), key)?;
        }

        Ok(Self {
            key,
            peer_name: peer_name.into(),
            socket: Some(socket),
            bind_addr,
            peer_addr,
            last_addr: None,
            max_size: config.max_datagram_size,
        })
    }

    /// Registration key.
    pub fn key(&self) -> Key {
        self.key
    }

    /// Name of the peer.
    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    /// Address the socket is actually bound to.
    pub fn local_addr(&self) -> io::Result<net::SocketAddr> {
        match &self.socket {
            Some(socket) => socket.local_addr(),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Address datagrams are sent to.
    pub fn peer_addr(&self) -> Option<net::SocketAddr> {
        self.peer_addr
    }

    /// Source address of the last datagram received.
    pub fn last_addr(&self) -> Option<net::SocketAddr> {
        self.last_addr
    }

    /// Receive a single datagram. Returns `None` if nothing is available, or if the
    /// read failed.
    pub fn read(&mut self) -> Option<Vec<u8>> {
        let socket = self.socket.as_ref()?;
        let mut buf = vec![0; self.max_size];

        match socket.recv_from(&mut buf) {
            Ok((n, addr)) => {
                trace!("{}: Received {} byte(s) from {}", self.peer_name, n, addr);

                buf.truncate(n);
                self.last_addr = Some(addr);

                Some(buf)
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
            Err(err) => {
                warn!("{}: Failed to receive datagram: {}", self.peer_name, err);
                None
            }
        }
    }

    /// Send the first `count` bytes of `bytes` to the peer address, or all of them
    /// if `count` is `None` or zero.
    pub fn send(&mut self, bytes: &[u8], count: Option<usize>) -> io::Result<()> {
        let Some(socket) = &self.socket else {
            return Ok(());
        };
        let Some(peer) = self.peer_addr else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        let count = count.filter(|c| *c > 0).map_or(bytes.len(), |c| c.min(bytes.len()));

        socket.send_to(&bytes[..count], peer)?;

        Ok(())
    }

    /// Handle a scheduler event destined to this endpoint. Readiness is reported to
    /// the receive callback, which is expected to call [`Dgram::read`].
    pub fn handle(
        &mut self,
        _scheduler: &mut dyn Scheduler,
        event: Event,
        callbacks: &mut dyn Callbacks<Self>,
    ) {
        if let Event::Readable(_) = event {
            callbacks.on_receive(self);
        }
    }

    /// Stop receiving, and release the socket.
    pub fn shut_down(&mut self, scheduler: &mut dyn Scheduler) {
        if self.bind_addr.is_some() {
            scheduler.remove_input_callback(self.key);
        }
        self.socket = None;
    }
}

/// Every datagram is a message of its own, so nothing is ever buffered.
impl Conn for Dgram {
    fn peer_name(&self) -> &str {
        &self.peer_name
    }

    fn read(&mut self) -> Vec<u8> {
        Dgram::read(self).unwrap_or_default()
    }

    fn peek(&self) -> &[u8] {
        &[]
    }

    fn read_msg(&mut self) -> Option<Vec<u8>> {
        Dgram::read(self)
    }

    fn is_closed(&self) -> bool {
        self.socket.is_none()
    }
}
