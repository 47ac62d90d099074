//! I/O reactor that drives mock-peer components.
//!
//! The reactor translates operating system readiness notifications and timer expiries
//! into [`mockwire_net::Event`]s, and hands them to a [`mockwire_net::Service`]. It is
//! the production implementation of the [`mockwire_net::Scheduler`] contract.
//!
//! To illustrate, lets trace what happens when a framed message arrives on a
//! connection owned by a `Component`:
//!
//! 1. The connection registered its socket for input under its key, when it was created.
//! 2. `polling::Poller::wait` reports the socket as readable, and the `Reactor` turns
//!    this into `Event::Readable(key)`.
//! 3. The `Reactor` calls `Service::handle(scheduler, event)` on the component, which
//!    looks up the connection owning `key` and lets it read everything available.
//! 4. The connection invokes its receive callback, which lets the component's hooks
//!    decode the message with `read_msg`.
//!
//! Nothing here blocks except `Poller::wait` itself.
#![allow(clippy::new_without_default)]

#[cfg(unix)]
pub mod reactor;

pub use mockwire_net::time;
pub use reactor::{Reactor, Waker};
