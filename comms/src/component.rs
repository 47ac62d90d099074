//! Peer-oriented orchestration of listeners, connectors and connections.
//!
//! A [`Component`] owns every I/O object it creates, keyed by peer name, and routes
//! scheduler events to them by [`Key`]. Protocol behavior lives in a [`Hooks`]
//! implementation, which is told about connections coming and going, and about
//! data arriving. Hooks never touch the component directly: whatever they want
//! sent or closed goes through an [`Outbox`], which the component flushes once the
//! event that triggered the hook has been handled.
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::{fmt, io, net};

use log::*;
use mockwire_net::{Event, Key, Scheduler, Service};

use crate::callback::{Callbacks, Conn};
use crate::config::{Config, ConnectTimes};
use crate::connector::{self, Connector};
use crate::dgram::Dgram;
use crate::error::Error;
use crate::listener::{self, Claim, Listener};
use crate::pipe::{Direction, PipeConn};
use crate::stream::{Stream, StreamConn};

/// Placeholders replaced with a number in the names of accepted peers.
const PLACEHOLDERS: [&str; 2] = ["%d", "{}"];

/// Numbers accepted peers. Clones share the same count, so components that
/// should never hand out the same number share a counter.
#[derive(Debug, Clone, Default)]
pub struct PeerCounter(Arc<AtomicUsize>);

impl PeerCounter {
    /// Create a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current count, and increment it.
    pub fn next(&self) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Replace a trailing `%d` or `{}` in `name` with the next count. Other names
    /// are returned as-is, without using up a number.
    pub fn substitute(&self, name: String) -> String {
        for placeholder in PLACEHOLDERS {
            if let Some(prefix) = name.strip_suffix(placeholder) {
                return format!("{}{}", prefix, self.next());
            }
        }
        name
    }
}

/// Protocol behavior of a component. Every method has a default.
pub trait Hooks {
    /// Name an inbound peer, given the name of the listener that accepted it.
    fn get_conn_name(&mut self, listen_name: &str, _peer_addr: &net::SocketAddr) -> String {
        listen_name.to_owned()
    }

    /// A peer connected. Return `false` to reject it.
    fn on_incoming_connect(
        &mut self,
        _outbox: &mut Outbox,
        _peer_name: &str,
        _peer_addr: &net::SocketAddr,
    ) -> bool {
        true
    }

    /// A connection to a peer was established.
    fn on_outgoing_connect(&mut self, _outbox: &mut Outbox, _peer_name: &str) {}

    /// Data arrived. Whatever is not read stays buffered.
    fn on_receive(&mut self, _outbox: &mut Outbox, _conn: &mut dyn Conn) {}

    /// A connection closed. It is forgotten right after.
    fn on_close(&mut self, _outbox: &mut Outbox, _conn: &mut dyn Conn) {}

    /// A connection failed. A close always follows.
    fn on_error(&mut self, _outbox: &mut Outbox, _conn: &mut dyn Conn, _error: &io::Error) {}
}

/// Does nothing. Received data accumulates.
impl Hooks for () {}

/// An output requested by hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Send bytes to a peer.
    Send {
        /// Peer name.
        peer: String,
        /// Bytes to send.
        bytes: Vec<u8>,
    },
    /// Close the connection to a peer.
    Close(String),
}

/// Outputs requested by hooks, performed after the current event is handled.
#[derive(Debug, Default)]
pub struct Outbox {
    outputs: VecDeque<Output>,
}

impl Outbox {
    /// Send bytes to a peer. Ignored if the peer is not connected.
    pub fn send_to(&mut self, peer: &str, bytes: impl Into<Vec<u8>>) {
        self.outputs.push_back(Output::Send {
            peer: peer.to_owned(),
            bytes: bytes.into(),
        });
    }

    /// Close the connection to a peer, without callbacks.
    pub fn close(&mut self, peer: &str) {
        self.outputs.push_back(Output::Close(peer.to_owned()));
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    fn pop(&mut self) -> Option<Output> {
        self.outputs.pop_front()
    }
}

/// A connection to a peer.
#[derive(Debug)]
pub enum Connection {
    /// A stream, accepted or connected.
    Stream(StreamConn),
    /// One end of a named pipe.
    Pipe(PipeConn),
    /// A datagram endpoint.
    Dgram(Dgram),
}

impl Connection {
    /// Registration key.
    pub fn key(&self) -> Key {
        match self {
            Self::Stream(c) => c.key(),
            Self::Pipe(c) => c.key(),
            Self::Dgram(c) => c.key(),
        }
    }

    /// Send the first `count` bytes of `bytes`, or all of them.
    pub fn send(
        &mut self,
        scheduler: &mut dyn Scheduler,
        bytes: &[u8],
        count: Option<usize>,
    ) -> io::Result<()> {
        match self {
            Self::Stream(c) => c.send(scheduler, bytes, count),
            Self::Pipe(c) => c.send(scheduler, bytes, count),
            Self::Dgram(c) => return c.send(bytes, count),
        }
        Ok(())
    }

    /// Shut down without callbacks.
    pub fn shut_down(&mut self, scheduler: &mut dyn Scheduler) {
        match self {
            Self::Stream(c) => c.shut_down(scheduler, net::Shutdown::Both),
            Self::Pipe(c) => c.shut_down(scheduler),
            Self::Dgram(c) => c.shut_down(scheduler),
        }
    }

    /// The connection, as seen by hooks.
    pub fn as_conn(&mut self) -> &mut dyn Conn {
        match self {
            Self::Stream(c) => c,
            Self::Pipe(c) => c,
            Self::Dgram(c) => c,
        }
    }

    /// Whether the connection is closed for good.
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Stream(c) => Conn::is_closed(c),
            Self::Pipe(c) => Conn::is_closed(c),
            Self::Dgram(c) => Conn::is_closed(c),
        }
    }

    fn handle<R>(&mut self, scheduler: &mut dyn Scheduler, event: Event, relay: &mut R)
    where
        R: Callbacks<StreamConn> + Callbacks<PipeConn> + Callbacks<Dgram>,
    {
        match self {
            Self::Stream(c) => c.handle(scheduler, event, relay),
            Self::Pipe(c) => c.handle(scheduler, event, relay),
            Self::Dgram(c) => c.handle(scheduler, event, relay),
        }
    }
}

/// Options for [`Component::connect_to`].
#[derive(Default)]
pub struct ConnectOpts {
    /// When to attempt connecting. Defaults to the component's configuration.
    pub times: Option<ConnectTimes>,
    /// Local address to bind to.
    pub bind_addr: Option<net::SocketAddr>,
    /// Called with the peer name if the connector gives up.
    pub on_error: Option<Box<dyn FnMut(&str) + Send>>,
}

impl fmt::Debug for ConnectOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOpts")
            .field("times", &self.times)
            .field("bind_addr", &self.bind_addr)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A connector and what to do if it gives up.
struct Pending {
    connector: Connector,
    on_error: Option<Box<dyn FnMut(&str) + Send>>,
}

/// What a registration key belongs to.
#[derive(Debug, Clone)]
enum Source {
    Listener(String),
    Connector(String),
    Connection(String),
}

/// Everything keyed by peer name, except listeners.
struct Peers {
    config: Config,
    counter: PeerCounter,
    connections: HashMap<String, Connection>,
    pending: HashMap<String, Pending>,
    sources: HashMap<Key, Source>,
    next_key: u64,
}

impl Peers {
    fn key(&mut self, source: Source) -> Key {
        let key = Key(self.next_key);

        self.next_key += 1;
        self.sources.insert(key, source);

        key
    }

    /// Store a connection. Any pending connector for the same peer is cancelled,
    /// and any previous connection shut down.
    fn insert(
        &mut self,
        scheduler: &mut dyn Scheduler,
        peer_name: String,
        conn: Connection,
    ) -> &mut Connection {
        self.cancel(scheduler, &peer_name);

        match self.connections.entry(peer_name) {
            Entry::Occupied(mut e) => {
                warn!("{}: Replacing existing connection", e.key());

                let mut old = e.insert(conn);
                old.shut_down(scheduler);
                self.sources.remove(&old.key());

                e.into_mut()
            }
            Entry::Vacant(e) => e.insert(conn),
        }
    }

    /// Wrap a connected stream and store it.
    fn attach(
        &mut self,
        scheduler: &mut dyn Scheduler,
        peer_name: String,
        stream: Box<dyn Stream>,
        addr: Option<net::SocketAddr>,
    ) -> io::Result<()> {
        let key = self.key(Source::Connection(peer_name.clone()));
        let conn = StreamConn::new(
            scheduler,
            key,
            peer_name.clone(),
            stream,
            addr,
            self.config.byte_order,
            &self.config,
        );

        match conn {
            Ok(conn) => {
                self.insert(scheduler, peer_name, Connection::Stream(conn));
                Ok(())
            }
            Err(err) => {
                self.sources.remove(&key);
                Err(err)
            }
        }
    }

    /// Shut down and forget the connection to a peer.
    fn disconnect(&mut self, scheduler: &mut dyn Scheduler, peer_name: &str) -> bool {
        let Some(mut conn) = self.connections.remove(peer_name) else {
            return false;
        };
        conn.shut_down(scheduler);
        self.sources.remove(&conn.key());

        true
    }

    /// Shut down and forget the pending connector for a peer.
    fn cancel(&mut self, scheduler: &mut dyn Scheduler, peer_name: &str) -> bool {
        let Some(mut pending) = self.pending.remove(peer_name) else {
            return false;
        };
        debug!("{}: Cancelling pending connection", peer_name);

        pending.connector.shut_down(scheduler);
        self.sources.remove(&pending.connector.key());

        true
    }
}

/// Forwards connection callbacks to hooks.
struct Relay<'a, H> {
    hooks: &'a mut H,
    outbox: &'a mut Outbox,
}

impl<H: Hooks, C: Conn> Callbacks<C> for Relay<'_, H> {
    fn on_receive(&mut self, conn: &mut C) -> bool {
        self.hooks.on_receive(self.outbox, conn);
        true
    }

    fn on_close(&mut self, conn: &mut C) {
        self.hooks.on_close(self.outbox, conn);
    }

    fn on_error(&mut self, conn: &mut C, error: &io::Error) {
        self.hooks.on_error(self.outbox, conn, error);
    }
}

/// Turns accepted streams into connections.
struct Incoming<'a, H> {
    hooks: &'a mut H,
    outbox: &'a mut Outbox,
    peers: &'a mut Peers,
}

impl<H: Hooks> listener::Handler for Incoming<'_, H> {
    fn on_connect(
        &mut self,
        scheduler: &mut dyn Scheduler,
        stream: Box<dyn Stream>,
        addr: net::SocketAddr,
        listener: &Listener,
    ) -> Claim {
        let name = self.hooks.get_conn_name(listener.peer_name(), &addr);
        let name = self.peers.counter.substitute(name);

        if !self.hooks.on_incoming_connect(self.outbox, &name, &addr) {
            info!("{}: Rejected connection from {}", name, addr);
            return Claim::Rejected(stream);
        }
        info!("{}: Connected from {}", name, addr);

        if let Err(err) = self.peers.attach(scheduler, name.clone(), stream, Some(addr)) {
            // The stream was dropped, and with it the socket.
            error!("{}: Failed to set up connection from {}: {}", name, addr, err);
        }
        Claim::Accepted
    }
}

/// Records what a connector reported.
#[derive(Debug, Default)]
struct Outcome {
    established: bool,
    abandoned: bool,
}

impl connector::Handler for Outcome {
    fn on_connect(&mut self, _connector: &mut Connector) -> bool {
        self.established = true;
        true
    }

    fn on_error(&mut self, _connector: &mut Connector) {
        self.abandoned = true;
    }
}

/// Owns the listeners, connectors and connections of one mock peer.
pub struct Component<H> {
    hooks: H,
    outbox: Outbox,
    listeners: HashMap<String, Listener>,
    peers: Peers,
}

impl<H: Hooks> Component<H> {
    /// Create a component with no I/O objects.
    pub fn new(hooks: H, config: Config, counter: PeerCounter) -> Self {
        Self {
            hooks,
            outbox: Outbox::default(),
            listeners: HashMap::new(),
            peers: Peers {
                config,
                counter,
                connections: HashMap::new(),
                pending: HashMap::new(),
                sources: HashMap::new(),
                next_key: 0,
            },
        }
    }

    /// Protocol hooks.
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Protocol hooks, mutably.
    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Configuration.
    pub fn config(&self) -> &Config {
        &self.peers.config
    }

    /// Listen for peers on `bind_addr`. Peers accepted here are named after
    /// `listen_name`, through [`Hooks::get_conn_name`]. A previous listener with
    /// the same name is shut down.
    pub fn listen_for(
        &mut self,
        scheduler: &mut dyn Scheduler,
        listen_name: &str,
        bind_addr: net::SocketAddr,
    ) -> Result<&mut Listener, Error> {
        if let Some(mut old) = self.listeners.remove(listen_name) {
            warn!("{}: Replacing existing listener", listen_name);

            old.shut_down(scheduler);
            self.peers.sources.remove(&old.key());
        }
        let key = self.peers.key(Source::Listener(listen_name.to_owned()));
        let listener = match Listener::bind(scheduler, key, listen_name, bind_addr) {
            Ok(listener) => listener,
            Err(err) => {
                self.peers.sources.remove(&key);
                return Err(err.into());
            }
        };
        info!("{}: Listening on {}", listen_name, bind_addr);

        Ok(self
            .listeners
            .entry(listen_name.to_owned())
            .or_insert(listener))
    }

    /// Open a datagram endpoint for `peer_name`, and return the stored connection.
    pub fn open_dgram_socket(
        &mut self,
        scheduler: &mut dyn Scheduler,
        peer_name: &str,
        bind_addr: Option<net::SocketAddr>,
        peer_addr: Option<net::SocketAddr>,
    ) -> Result<&mut Connection, Error> {
        let key = self.peers.key(Source::Connection(peer_name.to_owned()));
        let dgram = match Dgram::bind(
            scheduler,
            key,
            peer_name,
            bind_addr,
            peer_addr,
            &self.peers.config,
        ) {
            Ok(dgram) => dgram,
            Err(err) => {
                self.peers.sources.remove(&key);
                return Err(err.into());
            }
        };

        Ok(self
            .peers
            .insert(scheduler, peer_name.to_owned(), Connection::Dgram(dgram)))
    }

    /// Open the reading end of the named pipe at `path`.
    pub fn open_input_pipe(
        &mut self,
        scheduler: &mut dyn Scheduler,
        peer_name: &str,
        path: impl AsRef<Path>,
    ) -> &mut Connection {
        self.open_pipe(scheduler, peer_name, path.as_ref(), Direction::Input, false)
    }

    /// Open the writing end of the named pipe at `path`. If `length_prefix` is
    /// set, every send is preceded by a header counting the whole message.
    pub fn open_output_pipe(
        &mut self,
        scheduler: &mut dyn Scheduler,
        peer_name: &str,
        path: impl AsRef<Path>,
        length_prefix: bool,
    ) -> &mut Connection {
        self.open_pipe(scheduler, peer_name, path.as_ref(), Direction::Output, length_prefix)
    }

    /// Start connecting to `peer_addr`. An existing connection to the same peer
    /// is shut down, and any pending connector cancelled.
    pub fn connect_to(
        &mut self,
        scheduler: &mut dyn Scheduler,
        peer_name: &str,
        peer_addr: net::SocketAddr,
        opts: ConnectOpts,
    ) -> Result<&mut Connector, Error> {
        if self.peers.disconnect(scheduler, peer_name) {
            warn!("{}: Already connected, shutting down existing connection", peer_name);
        }
        self.peers.cancel(scheduler, peer_name);

        let key = self.peers.key(Source::Connector(peer_name.to_owned()));
        let times = opts.times.unwrap_or(self.peers.config.connect_times);
        let connector = match Connector::new(
            scheduler,
            key,
            peer_name,
            peer_addr,
            times,
            opts.bind_addr,
            self.peers.config.max_error_retries,
        ) {
            Ok(connector) => connector,
            Err(err) => {
                self.peers.sources.remove(&key);
                return Err(err.into());
            }
        };
        debug!("{}: Connecting to {}..", peer_name, peer_addr);

        let pending = self
            .peers
            .pending
            .entry(peer_name.to_owned())
            .or_insert(Pending {
                connector,
                on_error: opts.on_error,
            });
        Ok(&mut pending.connector)
    }

    /// Send the first `count` bytes of `bytes` to a peer, or all of them. Does
    /// nothing if the peer is not connected.
    pub fn send_to(
        &mut self,
        scheduler: &mut dyn Scheduler,
        peer_name: &str,
        bytes: &[u8],
        count: Option<usize>,
    ) {
        let Some(conn) = self.peers.connections.get_mut(peer_name) else {
            debug!("{}: Not connected, dropping {} byte(s)", peer_name, bytes.len());
            return;
        };
        if let Err(err) = conn.send(scheduler, bytes, count) {
            warn!("{}: Failed to send: {}", peer_name, err);
        }
    }

    /// Shut down the connection to a peer, or stop connecting to it, without
    /// callbacks. Returns whether there was anything to close.
    pub fn close(&mut self, scheduler: &mut dyn Scheduler, peer_name: &str) -> bool {
        let closed = self.peers.disconnect(scheduler, peer_name);
        let cancelled = self.peers.cancel(scheduler, peer_name);

        closed || cancelled
    }

    /// Shut down every listener, connector and connection, without callbacks.
    pub fn shut_down(&mut self, scheduler: &mut dyn Scheduler) {
        info!(
            "Shutting down {} listener(s), {} connector(s) and {} connection(s)..",
            self.listeners.len(),
            self.peers.pending.len(),
            self.peers.connections.len()
        );

        for (_, mut listener) in self.listeners.drain() {
            listener.shut_down(scheduler);
        }
        for (_, mut pending) in self.peers.pending.drain() {
            pending.connector.shut_down(scheduler);
        }
        for (_, mut conn) in self.peers.connections.drain() {
            conn.shut_down(scheduler);
        }
        self.peers.sources.clear();
    }

    /// The connection to a peer.
    pub fn connection(&self, peer_name: &str) -> Option<&Connection> {
        self.peers.connections.get(peer_name)
    }

    /// The connection to a peer, mutably.
    pub fn connection_mut(&mut self, peer_name: &str) -> Option<&mut Connection> {
        self.peers.connections.get_mut(peer_name)
    }

    /// A listener, by name.
    pub fn listener(&self, listen_name: &str) -> Option<&Listener> {
        self.listeners.get(listen_name)
    }

    /// The pending connector for a peer.
    pub fn connector(&self, peer_name: &str) -> Option<&Connector> {
        self.peers.pending.get(peer_name).map(|p| &p.connector)
    }

    /// Whether a connection to the peer exists.
    pub fn is_connected(&self, peer_name: &str) -> bool {
        self.peers.connections.contains_key(peer_name)
    }

    /// Whether a connector for the peer is still trying.
    pub fn is_pending(&self, peer_name: &str) -> bool {
        self.peers.pending.contains_key(peer_name)
    }

    /// Names of connected peers.
    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.peers.connections.keys().map(|k| k.as_str())
    }

    fn open_pipe(
        &mut self,
        scheduler: &mut dyn Scheduler,
        peer_name: &str,
        path: &Path,
        direction: Direction,
        length_prefix: bool,
    ) -> &mut Connection {
        let key = self.peers.key(Source::Connection(peer_name.to_owned()));
        let pipe = PipeConn::open(
            scheduler,
            key,
            peer_name,
            path,
            direction,
            self.peers.config.byte_order,
            length_prefix,
            &self.peers.config,
        );

        self.peers
            .insert(scheduler, peer_name.to_owned(), Connection::Pipe(pipe))
    }

    fn on_listener(&mut self, scheduler: &mut dyn Scheduler, name: &str, event: Event) {
        let Some(listener) = self.listeners.get_mut(name) else {
            return;
        };
        let mut incoming = Incoming {
            hooks: &mut self.hooks,
            outbox: &mut self.outbox,
            peers: &mut self.peers,
        };
        listener.handle(scheduler, event, &mut incoming);
    }

    fn on_connector(&mut self, scheduler: &mut dyn Scheduler, name: &str, event: Event) {
        let Some(pending) = self.peers.pending.get_mut(name) else {
            return;
        };
        let mut outcome = Outcome::default();
        pending.connector.handle(scheduler, event, &mut outcome);

        if !outcome.established && !outcome.abandoned {
            return;
        }
        let Some(mut pending) = self.peers.pending.remove(name) else {
            return;
        };
        self.peers.sources.remove(&pending.connector.key());

        if outcome.abandoned {
            if let Some(on_error) = pending.on_error.as_mut() {
                on_error(name);
            }
            return;
        }
        let addr = pending.connector.peer_addr();
        let Some(stream) = pending.connector.into_stream() else {
            return;
        };

        match self.peers.attach(scheduler, name.to_owned(), stream, Some(addr)) {
            Ok(()) => {
                info!("{}: Connected to {}", name, addr);
                self.hooks.on_outgoing_connect(&mut self.outbox, name);
            }
            Err(err) => error!("{}: Failed to set up connection to {}: {}", name, addr, err),
        }
    }

    fn on_connection(&mut self, scheduler: &mut dyn Scheduler, name: &str, key: Key, event: Event) {
        let Some(conn) = self.peers.connections.get_mut(name) else {
            return;
        };
        let mut relay = Relay {
            hooks: &mut self.hooks,
            outbox: &mut self.outbox,
        };
        conn.handle(scheduler, event, &mut relay);

        if conn.is_closed() {
            debug!("{}: Forgetting closed connection", name);

            self.peers.connections.remove(name);
            self.peers.sources.remove(&key);
        }
    }

    fn flush(&mut self, scheduler: &mut dyn Scheduler) {
        while let Some(output) = self.outbox.pop() {
            match output {
                Output::Send { peer, bytes } => self.send_to(scheduler, &peer, &bytes, None),
                Output::Close(peer) => {
                    self.close(scheduler, &peer);
                }
            }
        }
    }
}

impl<H: Hooks> Service for Component<H> {
    fn handle(&mut self, scheduler: &mut dyn Scheduler, event: Event) {
        let key = event.key();
        let Some(source) = self.peers.sources.get(&key).cloned() else {
            trace!("Ignoring {:?} for unknown key {}", event, key);
            return;
        };

        match source {
            Source::Listener(name) => self.on_listener(scheduler, &name, event),
            Source::Connector(name) => self.on_connector(scheduler, &name, event),
            Source::Connection(name) => self.on_connection(scheduler, &name, key, event),
        }
        self.flush(scheduler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockwire_net::simulator::{self, Simulator};
    use mockwire_net::LocalTime;
    use quickcheck_macros::quickcheck;

    #[derive(Default)]
    struct Inbox {
        messages: Vec<(String, Vec<u8>)>,
    }

    impl Hooks for Inbox {
        fn on_receive(&mut self, _outbox: &mut Outbox, conn: &mut dyn Conn) {
            while let Some(msg) = conn.read_msg() {
                self.messages.push((conn.peer_name().to_owned(), msg));
            }
        }
    }

    #[test]
    fn test_peer_counter() {
        let counter = PeerCounter::new();
        let shared = counter.clone();

        assert_eq!(counter.substitute("client-%d".to_owned()), "client-0");
        assert_eq!(shared.substitute("client-{}".to_owned()), "client-1");
        assert_eq!(counter.substitute("client".to_owned()), "client");
        assert_eq!(counter.substitute("%d-client".to_owned()), "%d-client");
        assert_eq!(shared.next(), 2);
    }

    #[test]
    fn test_outbox() {
        let mut outbox = Outbox::default();
        assert!(outbox.is_empty());

        outbox.send_to("a", b"x".to_vec());
        outbox.close("b");

        assert_eq!(
            outbox.pop(),
            Some(Output::Send {
                peer: "a".to_owned(),
                bytes: b"x".to_vec()
            })
        );
        assert_eq!(outbox.pop(), Some(Output::Close("b".to_owned())));
        assert_eq!(outbox.pop(), None);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let mut sim = Simulator::new(LocalTime::from_secs(1), simulator::Options::default());
        let mut component = Component::new((), Config::default(), PeerCounter::new());

        sim.deliver(&mut component, Event::Readable(Key(99)));
        component.send_to(&mut sim, "nobody", b"hello", None);

        assert!(!component.is_connected("nobody"));
        assert!(!component.close(&mut sim, "nobody"));
    }

    #[test]
    fn test_replacing_connections() {
        let mut sim = Simulator::new(LocalTime::from_secs(1), simulator::Options::default());
        let mut component = Component::new((), Config::default(), PeerCounter::new());
        let local = Some(mockwire_test::localhost());

        let first = component
            .open_dgram_socket(&mut sim, "peer", local, None)
            .unwrap()
            .key();
        let second = component
            .open_dgram_socket(&mut sim, "peer", local, None)
            .unwrap()
            .key();

        assert_ne!(first, second);
        assert!(!sim.is_reading(first));
        assert!(sim.is_reading(second));
        assert_eq!(component.peers().collect::<Vec<_>>(), vec!["peer"]);

        component.shut_down(&mut sim);
        assert!(!sim.is_reading(second));
        assert!(!component.is_connected("peer"));
    }

    #[test]
    fn test_connection_cancels_pending_connector() {
        let mut sim = Simulator::new(LocalTime::from_secs(1), simulator::Options::default());
        let mut component = Component::new((), Config::default(), PeerCounter::new());
        let addr = mockwire_test::localhost();

        let key = component
            .connect_to(&mut sim, "peer", addr, ConnectOpts::default())
            .unwrap()
            .key();
        assert!(component.is_pending("peer"));
        assert_eq!(sim.timers(key), 2);

        component
            .open_dgram_socket(&mut sim, "peer", None, Some(addr))
            .unwrap();

        assert!(!component.is_pending("peer"));
        assert!(component.is_connected("peer"));
        assert_eq!(sim.timers(key), 0);
    }

    #[quickcheck]
    fn prop_readiness_in_any_order(opts: simulator::Options) -> bool {
        let mut sim = Simulator::new(LocalTime::from_secs(1), opts);
        let mut component = Component::new(Inbox::default(), Config::default(), PeerCounter::new());
        let sender = std::net::UdpSocket::bind(mockwire_test::localhost()).unwrap();
        let names = ["a", "b", "c", "d"];

        for name in names {
            let Connection::Dgram(dgram) = component
                .open_dgram_socket(&mut sim, name, Some(mockwire_test::localhost()), None)
                .unwrap()
            else {
                panic!("expected a datagram endpoint");
            };
            let addr = dgram.local_addr().unwrap();
            sender.send_to(name.as_bytes(), addr).unwrap();
        }
        let mut events = Vec::new();
        sim.ready(&mut events);

        for event in events {
            sim.deliver(&mut component, event);
        }
        let mut received = component.hooks().messages.clone();
        received.sort();

        received
            == names
                .iter()
                .map(|n| (n.to_string(), n.as_bytes().to_vec()))
                .collect::<Vec<_>>()
    }
}
