//! Named pipe connections.
//!
//! A pipe carries data one way only. Pipes are opened in non-blocking mode, and an
//! output pipe can only be opened once somebody holds the reading end; until then,
//! sent data stays buffered, and opening is retried on every send.
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::*;
use mockwire_net::{Deferred, Event, Key, Scheduler};

use crate::callback::{Callbacks, Conn};
use crate::config::Config;
use crate::framing::{ByteOrder, Framing};

/// Which end of the pipe is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The reading end.
    Input,
    /// The writing end.
    Output,
}

/// Pipe state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not opened yet.
    Unopened,
    /// Open.
    Open,
    /// Closed at the file level, waiting for the close callback.
    Closing,
    /// Closed, and the close callback was delivered.
    Closed,
}

/// A connection over a named pipe.
#[derive(Debug)]
pub struct PipeConn {
    key: Key,
    peer_name: String,
    path: PathBuf,
    direction: Direction,
    file: Option<File>,
    opened: bool,
    order: ByteOrder,
    length_prefix: bool,
    in_buf: Vec<u8>,
    out_buf: Vec<u8>,
    writing: bool,
    state: State,
    read_block_size: usize,
    write_chunk: usize,
}

impl PipeConn {
    /// Create a pipe connection and try to open it right away. Failing to open is
    /// not an error: input pipes stay silent, output pipes retry on send.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        scheduler: &mut dyn Scheduler,
        key: Key,
        peer_name: impl Into<String>,
        path: impl AsRef<Path>,
        direction: Direction,
        order: ByteOrder,
        length_prefix: bool,
        config: &Config,
    ) -> Self {
        let mut pipe = Self {
            key,
            peer_name: peer_name.into(),
            path: path.as_ref().to_path_buf(),
            direction,
            file: None,
            opened: false,
            order,
            length_prefix,
            in_buf: Vec::new(),
            out_buf: Vec::new(),
            writing: false,
            state: State::Unopened,
            read_block_size: config.read_block_size.max(1),
            write_chunk: config.pipe_write_chunk.max(1),
        };
        pipe.try_open(scheduler);
        pipe
    }

    /// Open the pipe unless it is already open. Returns whether it is open.
    pub fn try_open(&mut self, scheduler: &mut dyn Scheduler) -> bool {
        if self.file.is_some() {
            return true;
        }
        let mut opts = OpenOptions::new();
        match self.direction {
            Direction::Input => opts.read(true),
            Direction::Output => opts.write(true),
        };
        opts.custom_flags(libc::O_NONBLOCK);

        let file = match opts.open(&self.path) {
            Ok(file) => file,
            Err(err) => {
                debug!("{}: Failed to open pipe {:?}: {}", self.peer_name, self.path, err);
                return false;
            }
        };
        if self.direction == Direction::Input {
            if let Err(err) = scheduler.add_input_callback(file.as_raw_fd(), self.key) {
                error!("{}: Failed to watch pipe {:?}: {}", self.peer_name, self.path, err);
                return false;
            }
        }
        debug!("{}: Opened pipe {:?}", self.peer_name, self.path);

        self.file = Some(file);
        self.opened = true;
        self.state = State::Open;

        true
    }

    /// Registration key.
    pub fn key(&self) -> Key {
        self.key
    }

    /// Name of the peer.
    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    /// Path of the pipe.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Which end of the pipe is held.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Pipe state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether the pipe is currently open.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Take everything received so far.
    pub fn read(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.in_buf)
    }

    /// Look at everything received so far.
    pub fn peek(&self) -> &[u8] {
        &self.in_buf
    }

    /// Take the next complete message, header included. The header counts the
    /// whole message.
    pub fn read_msg(&mut self) -> Option<Vec<u8>> {
        Framing::Pipe.decode(&mut self.in_buf, self.order)
    }

    /// Queue the first `count` bytes of `bytes`, or all of them if `count` is
    /// `None` or zero, preceded by a length header if the pipe was opened with
    /// one. The pipe is opened first if needed; if that fails, the data stays
    /// buffered until the next send.
    pub fn send(&mut self, scheduler: &mut dyn Scheduler, bytes: &[u8], count: Option<usize>) {
        let count = count.filter(|c| *c > 0).map_or(bytes.len(), |c| c.min(bytes.len()));

        if self.length_prefix {
            match Framing::Pipe.header(count, self.order) {
                Ok(header) => self.out_buf.extend_from_slice(&header),
                Err(err) => {
                    error!("{}: Dropping message: {}", self.peer_name, err);
                    return;
                }
            }
        }
        self.out_buf.extend_from_slice(&bytes[..count]);

        if !self.try_open(scheduler) {
            return;
        }
        let Some(file) = &self.file else {
            return;
        };

        if !self.writing {
            if let Err(err) = scheduler.add_output_callback(file.as_raw_fd(), self.key) {
                debug!("{}: Failed to send, pipe assumed closed: {}", self.peer_name, err);
                self.file = None;

                return;
            }
            self.writing = true;
        }
        self.on_writable(scheduler);
    }

    /// Handle a scheduler event destined to this pipe.
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
                if self.state == State::Closing {
                    self.state = State::Closed;
                    callbacks.on_close(self);
                }
            }
            Event::Deferred(_, Deferred::Error(err)) => callbacks.on_error(self, &err),
            Event::Timer(..) => {}
        }
    }

    /// Close the pipe without delivering callbacks.
    pub fn shut_down(&mut self, scheduler: &mut dyn Scheduler) {
        if self.opened {
            self.deregister(scheduler);
        } else {
            warn!("{}: Pipe {:?} was never successfully opened", self.peer_name, self.path);
        }
        self.file = None;
        self.state = State::Closed;
    }

    /// Stop watching the pipe and release the file, without callbacks. The pipe
    /// can be opened again with [`PipeConn::try_open`] or by sending.
    pub fn close(&mut self, scheduler: &mut dyn Scheduler) {
        if self.file.is_some() {
            self.deregister(scheduler);
        }
        self.file = None;
        self.state = State::Unopened;
    }

    /// Read a single block.
    fn on_readable(&mut self, scheduler: &mut dyn Scheduler, callbacks: &mut dyn Callbacks<Self>) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let mut buf = vec![0; self.read_block_size];

        let error = match file.read(&mut buf) {
            Ok(0) => None,
            Ok(n) => {
                trace!("{}: Read {} byte(s) from pipe", self.peer_name, n);
                self.in_buf.extend_from_slice(&buf[..n]);

                if !callbacks.on_receive(self) {
                    self.in_buf.clear();
                }
                return;
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return,
            Err(err) if err.kind() == io::ErrorKind::ConnectionReset => None,
            Err(err) => {
                warn!("{}: Failed to read from pipe, closing: {}", self.peer_name, err);
                Some(err)
            }
        };
        if let Some(err) = error {
            callbacks.on_error(self, &err);
        }
        debug!("{}: Pipe {:?} closed", self.peer_name, self.path);

        self.deregister(scheduler);
        self.file = None;
        self.state = State::Closed;

        callbacks.on_close(self);
    }

    /// Write a single chunk.
    fn on_writable(&mut self, scheduler: &mut dyn Scheduler) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if !self.out_buf.is_empty() {
            let n = self.out_buf.len().min(self.write_chunk);

            match file.write(&self.out_buf[..n]) {
                Ok(sent) => {
                    trace!("{}: Wrote {} byte(s) to pipe", self.peer_name, sent);
                    self.out_buf.drain(..sent);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("{}: Reader of pipe {:?} went away", self.peer_name, self.path);
                    self.fail(scheduler, None);

                    return;
                }
                Err(err) => {
                    warn!("{}: Failed to write to pipe, closing: {}", self.peer_name, err);
                    self.fail(scheduler, Some(err));

                    return;
                }
            }
        }
        if self.out_buf.is_empty() && self.writing {
            scheduler.remove_output_callback(self.key);
            self.writing = false;
        }
    }

    fn fail(&mut self, scheduler: &mut dyn Scheduler, error: Option<io::Error>) {
        if let Some(err) = error {
            scheduler.add_callback(self.key, Deferred::Error(Arc::new(err)));
        }
        scheduler.add_callback(self.key, Deferred::Close);

        self.deregister(scheduler);
        self.out_buf.clear();
        self.file = None;
        self.state = State::Closing;
    }

    fn deregister(&mut self, scheduler: &mut dyn Scheduler) {
        if self.direction == Direction::Input {
            scheduler.remove_input_callback(self.key);
        }
        if self.writing {
            scheduler.remove_output_callback(self.key);
            self.writing = false;
        }
    }
}

impl Conn for PipeConn {
    fn peer_name(&self) -> &str {
        &self.peer_name
    }

    fn read(&mut self) -> Vec<u8> {
        PipeConn::read(self)
    }

    fn peek(&self) -> &[u8] {
        &self.in_buf
    }

    fn read_msg(&mut self) -> Option<Vec<u8>> {
        PipeConn::read_msg(self)
    }

    fn is_closed(&self) -> bool {
        self.state == State::Closed
    }
}
