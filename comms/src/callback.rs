//! Callback interfaces shared by connections.
use std::io;

/// Callbacks invoked by a connection of type `C`.
///
/// Every method has a default, so implementors only override what they care about.
pub trait Callbacks<C: ?Sized> {
    /// Input was appended to the connection's buffer. Return `false` to have the
    /// connection discard the whole buffer.
    fn on_receive(&mut self, _conn: &mut C) -> bool {
        false
    }

    /// The connection closed. Called exactly once.
    fn on_close(&mut self, _conn: &mut C) {}

    /// The connection failed. Always followed by [`Callbacks::on_close`].
    fn on_error(&mut self, _conn: &mut C, _error: &io::Error) {}
}

/// Callbacks that do nothing. Received data is discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ignore;

impl<C: ?Sized> Callbacks<C> for Ignore {}

/// What every connection offers to whoever consumes its input.
pub trait Conn {
    /// Name of the peer on the other end.
    fn peer_name(&self) -> &str;
    /// Take everything received so far.
    fn read(&mut self) -> Vec<u8>;
    /// Look at everything received so far.
    fn peek(&self) -> &[u8];
    /// Take the next complete length-prefixed message, if any.
    fn read_msg(&mut self) -> Option<Vec<u8>>;
    /// Whether the connection is closed for good.
    fn is_closed(&self) -> bool;
}
