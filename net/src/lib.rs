//! Scheduler contract and core types for mock-peer networking.
//!
//! Every I/O component in `mockwire` runs inside callbacks driven by a single-threaded,
//! cooperative scheduler. This crate defines what such a scheduler must provide: input
//! and output readiness registrations, one-shot and repeating timers, and deferred
//! callbacks that run on the next iteration.
//!
//! Registrations carry a [`Key`] rather than a closure. The owner of a component hands it
//! a key, and routes the [`Event`]s carrying that key back to it. This keeps ownership
//! a tree: components never hold references to whoever drives them.
#![allow(clippy::new_without_default)]
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::{fmt, io};

pub mod error;
pub mod simulator;
pub mod time;

pub use simulator::Simulator;
pub use time::{LocalDuration, LocalTime, TimeoutManager};

/// Identifies the component a registration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(pub u64);

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

/// Work scheduled to run once, on the next scheduler iteration.
#[derive(Debug, Clone)]
pub enum Deferred {
    /// Attempt a read even though no readiness was reported.
    InitialRead,
    /// Finish closing the connection and deliver its close callback.
    Close,
    /// Deliver an error callback.
    Error(Arc<io::Error>),
}

/// An event delivered by a scheduler to the owner of a [`Key`].
#[derive(Debug, Clone)]
pub enum Event {
    /// The handle registered under this key has input available.
    Readable(Key),
    /// The handle registered under this key can accept output.
    Writable(Key),
    /// A timer registered under this key rang.
    Timer(Key, TimerId),
    /// Deferred work scheduled under this key.
    Deferred(Key, Deferred),
}

impl Event {
    /// The key this event is destined to.
    pub fn key(&self) -> Key {
        match self {
            Self::Readable(key)
            | Self::Writable(key)
            | Self::Timer(key, _)
            | Self::Deferred(key, _) => *key,
        }
    }
}

/// A readiness and timer scheduler.
///
/// Implemented by the poll-based reactor, and by the deterministic [`Simulator`].
pub trait Scheduler {
    /// Get notified with [`Event::Readable`] when `fd` has input available.
    fn add_input_callback(&mut self, fd: RawFd, key: Key) -> io::Result<()>;
    /// Stop input notifications for `key`. Does nothing if none are registered.
    fn remove_input_callback(&mut self, key: Key);
    /// Get notified with [`Event::Writable`] when `fd` can accept output.
    ///
    /// Fails if the handle is already unusable, eg. because the peer closed it.
    fn add_output_callback(&mut self, fd: RawFd, key: Key) -> io::Result<()>;
    /// Stop output notifications for `key`. Does nothing if none are registered.
    fn remove_output_callback(&mut self, key: Key);
    /// Ring once, after `delay`.
    fn add_timeout(&mut self, delay: LocalDuration, key: Key) -> TimerId;
    /// Ring every `period`, starting one `period` from now.
    fn add_repeating_timeout(&mut self, period: LocalDuration, key: Key) -> TimerId;
    /// Cancel a timer. Does nothing if the timer already expired.
    fn remove_timeout(&mut self, id: TimerId);
    /// Schedule work to run once, on the next scheduler iteration.
    fn add_callback(&mut self, key: Key, action: Deferred);
    /// Current scheduler time.
    fn local_time(&self) -> LocalTime;
}

/// Anything that can be driven by a scheduler.
pub trait Service {
    /// Handle an event produced by the scheduler.
    fn handle(&mut self, scheduler: &mut dyn Scheduler, event: Event);
}

impl<S: Service + ?Sized> Service for &mut S {
    fn handle(&mut self, scheduler: &mut dyn Scheduler, event: Event) {
        (**self).handle(scheduler, event)
    }
}
