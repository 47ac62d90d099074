//! Buffered, non-blocking stream connections.
//!
//! A [`StreamConn`] owns a connected stream socket, accumulates whatever arrives on it
//! into an input buffer, and drains an output buffer whenever the socket accepts
//! more. Faults are never returned to callers of [`StreamConn::send`]; they surface
//! as error and close callbacks, delivered on the next scheduler iteration.
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::{fmt, net};

use log::*;
use mockwire_net::{Deferred, Event, Key, Scheduler};

use crate::callback::{Callbacks, Conn};
use crate::config::Config;
use crate::framing::{ByteOrder, Framing};

/// A connected, bidirectional byte stream.
pub trait Stream: Read + Write + AsRawFd + fmt::Debug {
    /// Switch the stream in or out of non-blocking mode.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;
    /// Shut down one or both halves of the stream.
    fn shutdown(&mut self, how: net::Shutdown) -> io::Result<()>;
    /// Whether the stream is encrypted.
    fn is_tls(&self) -> bool {
        false
    }
    /// Whether encrypted output is waiting to reach the socket.
    fn wants_write(&self) -> bool {
        false
    }
}

impl Stream for net::TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        net::TcpStream::set_nonblocking(self, nonblocking)
    }

    fn shutdown(&mut self, how: net::Shutdown) -> io::Result<()> {
        net::TcpStream::shutdown(self, how)
    }
}

impl Stream for UnixStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        UnixStream::set_nonblocking(self, nonblocking)
    }

    fn shutdown(&mut self, how: net::Shutdown) -> io::Result<()> {
        UnixStream::shutdown(self, how)
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Reading and writing.
    Open,
    /// Closed at the transport level, waiting for the close callback.
    Closing,
    /// Closed, and the close callback was delivered.
    Closed,
}

/// Outcome of draining the socket.
#[derive(Debug, Default)]
struct Input {
    eof: bool,
    error: Option<io::Error>,
}

/// A buffered stream connection to a named peer.
#[derive(Debug)]
pub struct StreamConn {
    key: Key,
    peer_name: String,
    addr: Option<net::SocketAddr>,
    stream: Option<Box<dyn Stream>>,
    fd: RawFd,
    tls: bool,
    order: ByteOrder,
    in_buf: Vec<u8>,
    out_buf: Vec<u8>,
    /// Whether output notifications are registered.
    writing: bool,
    state: State,
    read_block_size: usize,
    write_block_size: usize,
}

impl StreamConn {
    /// Take ownership of a connected stream, and start reading from it.
    ///
    /// An initial read is scheduled, in case data arrived before the stream was
    /// registered.
    pub fn new(
        scheduler: &mut dyn Scheduler,
        key: Key,
        peer_name: impl Into<String>,
        stream: Box<dyn Stream>,
        addr: Option<net::SocketAddr>,
        order: ByteOrder,
        config: &Config,
    ) -> io::Result<Self> {
        let fd = stream.as_raw_fd();

        stream.set_nonblocking(true)?;
        scheduler.add_input_callback(fd, key)?;
        scheduler.add_callback(key, Deferred::InitialRead);

        Ok(Self {
            key,
            peer_name: peer_name.into(),
            addr,
            tls: stream.is_tls(),
            stream: Some(stream),
            fd,
            order,
            in_buf: Vec::new(),
            out_buf: Vec::new(),
            writing: false,
            state: State::Open,
            read_block_size: config.read_block_size.max(1),
            write_block_size: config.write_block_size.max(1),
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

    /// Remote address, if known.
    pub fn addr(&self) -> Option<net::SocketAddr> {
        self.addr
    }

    /// Connection state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether the underlying stream is encrypted.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Whether output is buffered, waiting for the socket.
    pub fn is_writing(&self) -> bool {
        self.writing
    }

    /// Take everything received so far.
    pub fn read(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.in_buf)
    }

    /// Look at everything received so far.
    pub fn peek(&self) -> &[u8] {
        &self.in_buf
    }

    /// Take the next complete message. The header counts the payload only, and
    /// only the payload is returned.
    pub fn read_msg(&mut self) -> Option<Vec<u8>> {
        Framing::Stream.decode(&mut self.in_buf, self.order)
    }

    /// Queue the first `count` bytes of `bytes` for sending, or all of them if
    /// `count` is `None` or zero. Sending on a closed connection does nothing.
    pub fn send(&mut self, scheduler: &mut dyn Scheduler, bytes: &[u8], count: Option<usize>) {
        if self.stream.is_none() {
            debug!("{}: Dropping {} byte(s) sent on closed connection", self.peer_name, bytes.len());
            return;
        }
        let count = count.filter(|c| *c > 0).map_or(bytes.len(), |c| c.min(bytes.len()));
        self.out_buf.extend_from_slice(&bytes[..count]);

        if !self.writing {
            if let Err(err) = scheduler.add_output_callback(self.fd, self.key) {
                // Most likely the peer already closed the connection.
                debug!("{}: Failed to send: {}", self.peer_name, err);
                self.fail(scheduler, None);

                return;
            }
            self.writing = true;
        }
        self.on_writable(scheduler);
    }

    /// Handle a scheduler event destined to this connection.
    pub fn handle(
        &mut self,
        scheduler: &mut dyn Scheduler,
        event: Event,
        callbacks: &mut dyn Callbacks<Self>,
    ) {
        match event {
            Event::Readable(_) | Event::Deferred(_, Deferred::InitialRead) => {
                self.on_readable(scheduler, callbacks)
            }
            Event::Writable(_) => self.on_writable(scheduler),
            Event::Deferred(_, Deferred::Close) => {
                if self.state != State::Closed {
                    self.close_now(scheduler, callbacks);
                }
            }
            Event::Deferred(_, Deferred::Error(err)) => callbacks.on_error(self, &err),
            Event::Timer(..) => {}
        }
    }

    /// Shut down the connection without delivering callbacks.
    ///
    /// Shutting down both halves releases the stream for good. Errors are
    /// swallowed, since the peer may well be gone already.
    pub fn shut_down(&mut self, scheduler: &mut dyn Scheduler, how: net::Shutdown) {
        self.deregister(scheduler);

        if let Some(stream) = self.stream.as_mut() {
            if let Err(err) = stream.shutdown(how) {
                trace!("{}: Shutdown failed: {}", self.peer_name, err);
            }
        }
        if how == net::Shutdown::Both {
            self.stream = None;
            self.out_buf.clear();
            self.state = State::Closed;
        }
    }

    /// Release the stream without shutting it down first.
    pub fn close(&mut self, scheduler: &mut dyn Scheduler) {
        self.deregister(scheduler);
        self.stream = None;
        self.out_buf.clear();
        self.state = State::Closed;
    }

    fn on_readable(&mut self, scheduler: &mut dyn Scheduler, callbacks: &mut dyn Callbacks<Self>) {
        if self.state != State::Open {
            return;
        }
        let Input { eof, error } = self.read_available();

        if !self.in_buf.is_empty() && !callbacks.on_receive(self) {
            self.in_buf.clear();
        }
        if let Some(err) = error {
            warn!("{}: Failed to read, closing connection: {}", self.peer_name, err);

            callbacks.on_error(self, &err);
            self.close_now(scheduler, callbacks);
        } else if eof {
            if self.in_buf.is_empty() {
                self.close_now(scheduler, callbacks);
            } else {
                // Let the consumer see unclaimed input once more before closing.
                debug!(
                    "{}: Peer closed with {} byte(s) unclaimed",
                    self.peer_name,
                    self.in_buf.len()
                );
                scheduler.remove_input_callback(self.key);
                scheduler.add_callback(self.key, Deferred::Close);

                self.state = State::Closing;
            }
        }
    }

    fn read_available(&mut self) -> Input {
        let mut input = Input::default();
        let Some(stream) = self.stream.as_mut() else {
            return input;
        };
        let mut buf = vec![0; self.read_block_size];

        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    input.eof = true;
                    break;
                }
                Ok(n) => {
                    trace!("{}: Read {} byte(s)", self.peer_name, n);
                    self.in_buf.extend_from_slice(&buf[..n]);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::ConnectionReset => {
                    input.eof = true;
                    break;
                }
                Err(err) => {
                    input.error = Some(err);
                    break;
                }
            }
        }
        input
    }

    fn on_writable(&mut self, scheduler: &mut dyn Scheduler) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let mut failure = None;

        while !self.out_buf.is_empty() {
            let n = self.out_buf.len().min(self.write_block_size);

            match stream.write(&self.out_buf[..n]) {
                Ok(0) => break,
                Ok(sent) => {
                    trace!("{}: Wrote {} byte(s)", self.peer_name, sent);
                    self.out_buf.drain(..sent);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if failure.is_none() && stream.wants_write() {
            match stream.flush() {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => failure = Some(err),
            }
        }

        match failure {
            Some(err) if err.kind() == io::ErrorKind::ConnectionReset => {
                debug!("{}: Connection reset by peer", self.peer_name);
                self.fail(scheduler, None);
            }
            Some(err) => {
                warn!("{}: Failed to write, closing connection: {}", self.peer_name, err);
                self.fail(scheduler, Some(err));
            }
            None => {
                let idle = self.out_buf.is_empty() && !stream.wants_write();

                if idle && self.writing {
                    scheduler.remove_output_callback(self.key);
                    self.writing = false;
                }
            }
        }
    }

    /// Close the transport, and schedule the callbacks for the next iteration.
    fn fail(&mut self, scheduler: &mut dyn Scheduler, error: Option<io::Error>) {
        if let Some(err) = error {
            scheduler.add_callback(self.key, Deferred::Error(Arc::new(err)));
        }
        scheduler.add_callback(self.key, Deferred::Close);

        self.teardown(scheduler);
        self.state = State::Closing;
    }

    fn close_now(&mut self, scheduler: &mut dyn Scheduler, callbacks: &mut dyn Callbacks<Self>) {
        self.teardown(scheduler);
        self.state = State::Closed;

        debug!("{}: Connection closed", self.peer_name);
        callbacks.on_close(self);
    }

    fn teardown(&mut self, scheduler: &mut dyn Scheduler) {
        self.deregister(scheduler);
        self.out_buf.clear();

        if let Some(mut stream) = self.stream.take() {
            stream.shutdown(net::Shutdown::Both).ok();
        }
    }

    fn deregister(&mut self, scheduler: &mut dyn Scheduler) {
        scheduler.remove_input_callback(self.key);

        if self.writing {
            scheduler.remove_output_callback(self.key);
            self.writing = false;
        }
    }
}

impl Conn for StreamConn {
    fn peer_name(&self) -> &str {
        &self.peer_name
    }

    fn read(&mut self) -> Vec<u8> {
        StreamConn::read(self)
    }

    fn peek(&self) -> &[u8] {
        &self.in_buf
    }

    fn read_msg(&mut self) -> Option<Vec<u8>> {
        StreamConn::read_msg(self)
    }

    fn is_closed(&self) -> bool {
        self.state == State::Closed
    }
}
