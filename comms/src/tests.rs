//! Components talking to each other over real sockets and pipes.
use std::sync::{Arc, Mutex};

use mockwire_net::LocalDuration;
use mockwire_net_polling::Reactor;
use mockwire_test::Fifos;

use super::*;

const STEP: LocalDuration = LocalDuration::from_millis(5);
const MAX_STEPS: usize = 2000;

#[derive(Debug, Default)]
struct Recorder {
    reject: bool,
    echo: bool,
    incoming: Vec<String>,
    outgoing: Vec<String>,
    messages: Vec<(String, Vec<u8>)>,
    closed: Vec<String>,
    errors: Vec<String>,
}

impl Hooks for Recorder {
    fn on_incoming_connect(
        &mut self,
        _outbox: &mut Outbox,
        peer_name: &str,
        _peer_addr: &std::net::SocketAddr,
    ) -> bool {
        self.incoming.push(peer_name.to_owned());
        !self.reject
    }

    fn on_outgoing_connect(&mut self, _outbox: &mut Outbox, peer_name: &str) {
        self.outgoing.push(peer_name.to_owned());
    }

    fn on_receive(&mut self, outbox: &mut Outbox, conn: &mut dyn Conn) {
        while let Some(msg) = conn.read_msg() {
            if self.echo {
                outbox.send_to(conn.peer_name(), frame(&msg));
            }
            self.messages.push((conn.peer_name().to_owned(), msg));
        }
    }

    fn on_close(&mut self, _outbox: &mut Outbox, conn: &mut dyn Conn) {
        self.closed.push(conn.peer_name().to_owned());
    }

    fn on_error(&mut self, _outbox: &mut Outbox, conn: &mut dyn Conn, _error: &std::io::Error) {
        self.errors.push(conn.peer_name().to_owned());
    }
}

/// A component with a reactor of its own.
struct Peer {
    reactor: Reactor,
    component: Component<Recorder>,
}

impl Peer {
    fn new(hooks: Recorder) -> Self {
        Self::with_counter(hooks, PeerCounter::new())
    }

    fn with_counter(hooks: Recorder, counter: PeerCounter) -> Self {
        let config = Config {
            connect_times: ConnectTimes::new(LocalDuration::ZERO, LocalDuration::from_millis(10)),
            ..Config::default()
        };

        Self {
            reactor: Reactor::new().unwrap(),
            component: Component::new(hooks, config, counter),
        }
    }

    fn hooks(&self) -> &Recorder {
        self.component.hooks()
    }

    fn step(&mut self) {
        self.reactor.step(&mut self.component, STEP).unwrap();
    }

    fn listen(&mut self, name: &str) -> std::net::SocketAddr {
        self.component
            .listen_for(&mut self.reactor, name, mockwire_test::localhost())
            .unwrap()
            .local_addr()
            .unwrap()
    }

    fn connect(&mut self, name: &str, addr: std::net::SocketAddr) {
        self.component
            .connect_to(&mut self.reactor, name, addr, ConnectOpts::default())
            .unwrap();
    }

    fn send(&mut self, name: &str, bytes: &[u8]) {
        self.component.send_to(&mut self.reactor, name, bytes, None);
    }
}

fn frame(payload: &[u8]) -> Vec<u8> {
    Framing::Stream.encode(payload, ByteOrder::Network).unwrap()
}

/// Step both peers until `done`.
fn drive(a: &mut Peer, b: &mut Peer, done: impl Fn(&Peer, &Peer) -> bool) {
    for _ in 0..MAX_STEPS {
        if done(a, b) {
            return;
        }
        a.step();
        b.step();
    }
    panic!("peers did not reach the expected state");
}

/// Step all peers until `done`.
fn drive_all(peers: &mut [Peer], done: impl Fn(&[Peer]) -> bool) {
    for _ in 0..MAX_STEPS {
        if done(peers) {
            return;
        }
        for peer in peers.iter_mut() {
            peer.step();
        }
    }
    panic!("peers did not reach the expected state");
}

/// Connect `a` to `b`, naming them after each other.
fn connected(a: Recorder, b: Recorder) -> (Peer, Peer) {
    let mut a = Peer::new(a);
    let mut b = Peer::new(b);

    let addr = b.listen("A");
    a.connect("B", addr);

    drive(&mut a, &mut b, |a, b| {
        a.component.is_connected("B") && b.component.is_connected("A")
    });
    (a, b)
}

#[test]
fn test_message_exchange() {
    mockwire_test::logger::init(log::Level::Debug);

    let (mut a, mut b) = connected(Recorder::default(), Recorder::default());

    assert_eq!(a.hooks().outgoing, vec!["B"]);
    assert_eq!(b.hooks().incoming, vec!["A"]);
    assert!(!a.component.is_pending("B"));

    a.send("B", &frame(b"hello"));
    drive(&mut a, &mut b, |_, b| !b.hooks().messages.is_empty());

    assert_eq!(b.hooks().messages, vec![("A".to_owned(), b"hello".to_vec())]);
    assert!(b.hooks().errors.is_empty());
}

#[test]
fn test_echo_through_outbox() {
    let (mut a, mut b) = connected(
        Recorder::default(),
        Recorder {
            echo: true,
            ..Recorder::default()
        },
    );

    let mut bytes = frame(b"one");
    bytes.extend(frame(b"two"));
    a.send("B", &bytes);

    drive(&mut a, &mut b, |a, _| a.hooks().messages.len() == 2);
    assert_eq!(
        a.hooks().messages,
        vec![
            ("B".to_owned(), b"one".to_vec()),
            ("B".to_owned(), b"two".to_vec())
        ]
    );
}

#[test]
fn test_rejected_accept() {
    let mut a = Peer::new(Recorder::default());
    let mut b = Peer::new(Recorder {
        reject: true,
        ..Recorder::default()
    });
    let addr = b.listen("A");
    a.connect("B", addr);

    drive(&mut a, &mut b, |a, b| {
        !b.hooks().incoming.is_empty() && !a.hooks().closed.is_empty()
    });

    assert!(!b.component.is_connected("A"));
    assert!(!a.component.is_connected("B"));
    assert_eq!(a.hooks().closed, vec!["B"]);
    assert!(b.hooks().closed.is_empty());
}

#[test]
fn test_close_is_seen_by_peer() {
    let (mut a, mut b) = connected(Recorder::default(), Recorder::default());

    assert!(a.component.close(&mut a.reactor, "B"));
    drive(&mut a, &mut b, |_, b| !b.hooks().closed.is_empty());

    assert_eq!(b.hooks().closed, vec!["A"]);
    assert!(!b.component.is_connected("A"));
    assert!(a.hooks().closed.is_empty(), "closing locally is silent");
}

#[test]
fn test_numbered_peers() {
    let counter = PeerCounter::new();
    let mut peers = vec![
        Peer::with_counter(Recorder::default(), counter.clone()),
        Peer::new(Recorder::default()),
        Peer::new(Recorder::default()),
    ];
    let addr = peers[0].listen("client-%d");

    for peer in &mut peers[1..] {
        peer.connect("server", addr);
    }
    drive_all(&mut peers, |peers| peers[0].component.peers().count() == 2);

    let mut names = peers[0].component.peers().collect::<Vec<_>>();
    names.sort_unstable();
    assert_eq!(names, vec!["client-0", "client-1"]);
    assert_eq!(counter.next(), 2);
}

#[test]
fn test_abandoned_connect() {
    let addr = std::net::TcpListener::bind(mockwire_test::localhost())
        .unwrap()
        .local_addr()
        .unwrap();
    let failed = Arc::new(Mutex::new(Vec::new()));
    let mut a = Peer::new(Recorder::default());
    let opts = ConnectOpts {
        times: Some(ConnectTimes::new(LocalDuration::ZERO, LocalDuration::from_millis(5))),
        on_error: Some(Box::new({
            let failed = failed.clone();
            move |name: &str| failed.lock().unwrap().push(name.to_owned())
        })),
        ..ConnectOpts::default()
    };
    a.component
        .connect_to(&mut a.reactor, "B", addr, opts)
        .unwrap();

    for _ in 0..MAX_STEPS {
        if !a.component.is_pending("B") {
            break;
        }
        a.step();
    }
    assert!(!a.component.is_pending("B"));
    assert!(!a.component.is_connected("B"));
    assert_eq!(*failed.lock().unwrap(), vec!["B"]);
    assert!(a.hooks().outgoing.is_empty());
}

#[test]
fn test_pipes() {
    let fifos = Fifos::new().unwrap();
    let path = fifos.create("a-to-b").unwrap();
    let mut a = Peer::new(Recorder::default());
    let mut b = Peer::new(Recorder::default());

    b.component.open_input_pipe(&mut b.reactor, "A", &path);
    a.component.open_output_pipe(&mut a.reactor, "B", &path, true);
    a.send("B", b"hi");

    drive(&mut a, &mut b, |_, b| !b.hooks().messages.is_empty());
    assert_eq!(b.hooks().messages, vec![("A".to_owned(), b"\0\0\0\x06hi".to_vec())]);

    a.component.shut_down(&mut a.reactor);
    drive(&mut a, &mut b, |_, b| !b.hooks().closed.is_empty());
    assert!(!b.component.is_connected("A"));
}

#[test]
fn test_datagrams() {
    let mut a = Peer::new(Recorder::default());
    let mut b = Peer::new(Recorder::default());

    let Connection::Dgram(dgram) = b
        .component
        .open_dgram_socket(&mut b.reactor, "A", Some(mockwire_test::localhost()), None)
        .unwrap()
    else {
        panic!("expected a datagram endpoint");
    };
    let addr = dgram.local_addr().unwrap();
    a.component
        .open_dgram_socket(&mut a.reactor, "B", None, Some(addr))
        .unwrap();
    a.send("B", b"ping");

    drive(&mut a, &mut b, |_, b| !b.hooks().messages.is_empty());
    assert_eq!(b.hooks().messages, vec![("A".to_owned(), b"ping".to_vec())]);

    let Some(Connection::Dgram(dgram)) = b.component.connection("A") else {
        panic!("expected a datagram endpoint");
    };
    assert!(dgram.last_addr().is_some());
}
