//! Errors returned when setting up components.
//!
//! Faults happening on established connections are never returned; they are
//! reported through callbacks instead.
use std::io;

use thiserror::Error;

/// An error occuring while creating a component.
#[derive(Error, Debug)]
pub enum Error {
    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A TLS configuration or protocol error.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// A frame was too large for its length header.
    #[error("frame of {0} byte(s) does not fit a 4-byte length header")]
    FrameTooLarge(usize),
}
