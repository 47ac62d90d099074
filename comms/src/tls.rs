//! TLS streams.
//!
//! Handshakes are performed in blocking mode, bounded by [`HANDSHAKE_TIMEOUT`]. Once
//! established, a [`TlsStream`] is switched to non-blocking mode like any other stream.
use std::io::{self, Read, Write};
use std::net::{self, TcpStream};
use std::ops::DerefMut;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::{fmt, time};

use rustls::{ClientConnection, ConnectionCommon, ServerConfig, ServerConnection, StreamOwned};
use socket2::{SockRef, Socket};

use crate::error::Error;
use crate::stream::Stream;

/// Longest a handshake may stall on a single read or write.
pub const HANDSHAKE_TIMEOUT: time::Duration = time::Duration::from_secs(6);

/// An encrypted TCP stream.
pub enum TlsStream {
    /// Accepted by a listener.
    Server(Box<StreamOwned<ServerConnection, TcpStream>>),
    /// Established by a connector.
    Client(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl TlsStream {
    fn sock(&self) -> &TcpStream {
        match self {
            Self::Server(s) => &s.sock,
            Self::Client(s) => &s.sock,
        }
    }
}

impl fmt::Debug for TlsStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self {
            Self::Server(_) => "server",
            Self::Client(_) => "client",
        };
        f.debug_struct("TlsStream")
            .field("side", &side)
            .field("sock", self.sock())
            .finish()
    }
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Server(s) => s.read(buf),
            Self::Client(s) => s.read(buf),
        }
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Server(s) => s.write(buf),
            Self::Client(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Server(s) => s.flush(),
            Self::Client(s) => s.flush(),
        }
    }
}

impl AsRawFd for TlsStream {
    fn as_raw_fd(&self) -> RawFd {
        self.sock().as_raw_fd()
    }
}

impl Stream for TlsStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.sock().set_nonblocking(nonblocking)
    }

    fn shutdown(&mut self, how: net::Shutdown) -> io::Result<()> {
        match self {
            Self::Server(s) => close_notify(&mut s.conn, &mut s.sock),
            Self::Client(s) => close_notify(&mut s.conn, &mut s.sock),
        }
        self.sock().shutdown(how)
    }

    fn is_tls(&self) -> bool {
        true
    }

    fn wants_write(&self) -> bool {
        match self {
            Self::Server(s) => s.conn.wants_write(),
            Self::Client(s) => s.conn.wants_write(),
        }
    }
}

/// Perform the server side of a handshake on an accepted stream.
pub fn accept(config: Arc<ServerConfig>, sock: TcpStream) -> Result<TlsStream, Error> {
    let mut conn = ServerConnection::new(config)?;
    handshake_blocking(&mut conn, &SockRef::from(&sock))?;

    Ok(TlsStream::Server(Box::new(StreamOwned::new(conn, sock))))
}

/// Drive a handshake to completion on a non-blocking socket. The socket is
/// blocking, with [`HANDSHAKE_TIMEOUT`], for the duration of the handshake.
pub fn handshake_blocking<C, D>(conn: &mut C, sock: &Socket) -> io::Result<()>
where
    C: DerefMut<Target = ConnectionCommon<D>>,
{
    sock.set_nonblocking(false)?;
    sock.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    sock.set_write_timeout(Some(HANDSHAKE_TIMEOUT))?;

    let mut io = sock;
    let result = handshake(conn, &mut io);

    sock.set_read_timeout(None)?;
    sock.set_write_timeout(None)?;
    sock.set_nonblocking(true)?;

    result
}

/// Drive a handshake to completion over a blocking transport.
pub fn handshake<C, D, T>(conn: &mut C, io: &mut T) -> io::Result<()>
where
    C: DerefMut<Target = ConnectionCommon<D>>,
    T: Read + Write,
{
    while conn.is_handshaking() {
        conn.complete_io(io)?;
    }
    // Flush whatever the final handshake flight left behind.
    while conn.wants_write() {
        conn.write_tls(io)?;
    }
    Ok(())
}

fn close_notify<C, D, T>(conn: &mut C, sock: &mut T)
where
    C: DerefMut<Target = ConnectionCommon<D>>,
    T: Write,
{
    conn.send_close_notify();

    while conn.wants_write() {
        match conn.write_tls(sock) {
            Ok(n) if n > 0 => {}
            _ => break,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::thread;

    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
    use rustls::{ClientConfig, ClientConnection, RootCertStore};

    /// Server and client configurations trusting one self-signed certificate,
    /// issued for `localhost`.
    pub(crate) fn configs() -> (Arc<ServerConfig>, Arc<ClientConfig>) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
        let cert = certified.cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        ));
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let server = ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert.clone()], key)
            .unwrap();

        let mut roots = RootCertStore::empty();
        roots.add(cert).unwrap();

        let client = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();

        (Arc::new(server), Arc::new(client))
    }

    pub(crate) fn server_name() -> ServerName<'static> {
        ServerName::try_from("localhost").unwrap()
    }

    /// Connect a blocking TLS client to `addr`.
    pub(crate) fn client(
        config: Arc<ClientConfig>,
        addr: net::SocketAddr,
    ) -> StreamOwned<ClientConnection, TcpStream> {
        let sock = TcpStream::connect(addr).unwrap();
        let conn = ClientConnection::new(config, server_name()).unwrap();

        StreamOwned::new(conn, sock)
    }

    #[test]
    fn test_accept_and_close_notify() {
        let (server, client_config) = configs();
        let listener = net::TcpListener::bind(mockwire_test::localhost()).unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = thread::spawn(move || {
            let mut client = client(client_config, addr);
            client.write_all(b"hello").unwrap();

            // Returns once the server's close notification arrives.
            let mut rest = Vec::new();
            client.read_to_end(&mut rest).unwrap();
            rest
        });

        let (sock, _) = listener.accept().unwrap();
        let mut stream = accept(server, sock).unwrap();
        assert!(stream.is_tls());

        stream.set_nonblocking(false).unwrap();
        let mut buf = [0; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        stream.write_all(b"bye").unwrap();
        stream.flush().unwrap();
        assert!(!stream.wants_write());
        stream.shutdown(net::Shutdown::Both).unwrap();

        assert_eq!(peer.join().unwrap(), b"bye");
    }

    #[test]
    fn test_handshake_with_plain_peer() {
        let (server, _) = configs();
        let listener = net::TcpListener::bind(mockwire_test::localhost()).unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = thread::spawn(move || {
            let mut sock = TcpStream::connect(addr).unwrap();
            sock.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").unwrap();
        });
        let (sock, _) = listener.accept().unwrap();

        assert!(accept(server, sock).is_err());
        peer.join().unwrap();
    }
}
