//! Scheduler errors.
use std::io;

use crossbeam_channel as chan;
use thiserror::Error;

/// An error occuring while driving a scheduler.
#[derive(Error, Debug)]
pub enum Error {
    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A channel send or receive error.
    #[error("channel error: {0}")]
    Channel(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl From<chan::RecvError> for Error {
    fn from(err: chan::RecvError) -> Self {
        Self::Channel(Box::new(err))
    }
}

impl From<chan::TryRecvError> for Error {
    fn from(err: chan::TryRecvError) -> Self {
        Self::Channel(Box::new(err))
    }
}
