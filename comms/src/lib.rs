//! Non-blocking communication components for mock peers.
//!
//! Everything here is driven by a [`mockwire_net::Scheduler`]: components register
//! interest in readiness, timers and deferred work under a [`mockwire_net::Key`], and
//! act when the matching [`mockwire_net::Event`] is handed back to them. Nothing
//! blocks, except TLS handshakes.
//!
//! The leaf components are:
//!
//! * [`Dgram`]: a UDP endpoint.
//! * [`Listener`]: a listening socket, handing accepted streams over.
//! * [`Connector`]: an outbound connection attempt, retried on a timer.
//! * [`StreamConn`]: a buffered stream connection.
//! * [`PipeConn`]: one end of a named pipe.
//!
//! A [`Component`] ties them together by peer name, and reports everything that
//! happens to its [`Hooks`].
#![allow(clippy::new_without_default)]
#![allow(clippy::type_complexity)]
#![deny(unsafe_code)]
#![warn(missing_docs)]
pub mod callback;
pub mod component;
pub mod config;
pub mod connector;
pub mod dgram;
pub mod error;
pub mod framing;
pub mod listener;
pub mod pipe;
pub mod stream;
pub mod tls;

pub use callback::{Callbacks, Conn, Ignore};
pub use component::{Component, ConnectOpts, Connection, Hooks, Outbox, PeerCounter};
pub use config::{Config, ConnectTimes};
pub use connector::Connector;
pub use dgram::Dgram;
pub use error::Error;
pub use framing::{ByteOrder, Framing};
pub use listener::Listener;
pub use pipe::{Direction, PipeConn};
pub use stream::{Stream, StreamConn};
pub use tls::TlsStream;

#[cfg(test)]
mod tests;
