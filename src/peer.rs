//! A ready-made peer that logs, and optionally echoes, framed messages.
use std::str::FromStr;
use std::{io, net};

use crossbeam_channel as chan;
use log::*;
use thiserror::Error;

use mockwire_comms::{
    ByteOrder, Component, Config, ConnectOpts, Conn, Framing, Hooks, Outbox, PeerCounter,
};
use mockwire_net_polling::Reactor;

/// An error running a peer.
#[derive(Error, Debug)]
pub enum Error {
    /// Setting up a listener or connector failed.
    #[error(transparent)]
    Comms(#[from] mockwire_comms::Error),

    /// The reactor failed.
    #[error(transparent)]
    Reactor(#[from] mockwire_net::error::Error),

    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// A peer name and address, given as `name=address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    /// Peer name.
    pub name: String,
    /// Address to listen on or connect to.
    pub addr: net::SocketAddr,
}

impl FromStr for PeerSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, addr) = s
            .split_once('=')
            .ok_or_else(|| format!("expected `name=address`, got `{}`", s))?;

        if name.is_empty() {
            return Err(format!("missing peer name in `{}`", s));
        }
        let addr = addr
            .parse()
            .map_err(|e| format!("invalid address `{}`: {}", addr, e))?;

        Ok(Self {
            name: name.to_owned(),
            addr,
        })
    }
}

/// Hooks that log everything, and send every message back if asked to.
#[derive(Debug, Default)]
pub struct Echo {
    /// Send received messages back.
    pub echo: bool,
    /// Messages received so far.
    pub received: usize,
}

impl Hooks for Echo {
    fn on_incoming_connect(
        &mut self,
        _outbox: &mut Outbox,
        peer_name: &str,
        peer_addr: &net::SocketAddr,
    ) -> bool {
        info!(target: "peer", "{}: Connected from {}", peer_name, peer_addr);
        true
    }

    fn on_outgoing_connect(&mut self, _outbox: &mut Outbox, peer_name: &str) {
        info!(target: "peer", "{}: Connected", peer_name);
    }

    fn on_receive(&mut self, outbox: &mut Outbox, conn: &mut dyn Conn) {
        while let Some(msg) = conn.read_msg() {
            self.received += 1;
            info!(target: "peer", "{}: Received {} byte(s)", conn.peer_name(), msg.len());

            if !self.echo {
                continue;
            }
            match Framing::Stream.encode(&msg, ByteOrder::Network) {
                Ok(frame) => outbox.send_to(conn.peer_name(), frame),
                Err(err) => warn!(target: "peer", "{}: Not echoing: {}", conn.peer_name(), err),
            }
        }
    }

    fn on_close(&mut self, _outbox: &mut Outbox, conn: &mut dyn Conn) {
        info!(target: "peer", "{}: Disconnected", conn.peer_name());
    }

    fn on_error(&mut self, _outbox: &mut Outbox, conn: &mut dyn Conn, error: &io::Error) {
        warn!(target: "peer", "{}: {}", conn.peer_name(), error);
    }
}

/// Listen and connect as instructed, and run until a shutdown is received.
pub fn run<H: Hooks>(
    listen: &[PeerSpec],
    connect: &[PeerSpec],
    hooks: H,
    shutdown: chan::Receiver<()>,
) -> Result<(), Error> {
    let mut reactor = Reactor::new()?;
    let mut component = Component::new(hooks, Config::default(), PeerCounter::new());

    for spec in listen {
        component.listen_for(&mut reactor, &spec.name, spec.addr)?;
    }
    for spec in connect {
        component.connect_to(&mut reactor, &spec.name, spec.addr, ConnectOpts::default())?;
    }
    let result = reactor.run(&mut component, shutdown);
    component.shut_down(&mut reactor);

    result.map_err(Error::from)
}
