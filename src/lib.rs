//! Mockwire builds mock network peers for testing systems that talk to the outside
//! world over sockets and pipes.
//!
//! The project is broken down into the following crates:
//!
//! * [`net`]: the scheduler contract, time primitives and a deterministic simulator
//! * [`reactor`]: the poll-based reactor that drives components in production
//! * [`comms`]: sockets, pipes and the peer-oriented [`comms::Component`]
//!
//! The [`peer`] module puts them together into a ready-made peer that logs, and
//! optionally echoes, whatever it receives. It is what the `mockwire` binary runs.
pub use mockwire_comms as comms;
pub use mockwire_net as net;
pub use mockwire_net_polling as reactor;

pub mod logger;
pub mod peer;
