//! Component configuration.
use mockwire_net::LocalDuration;

use crate::framing::ByteOrder;

/// Size of a single socket read.
pub const READ_BLOCK_SIZE: usize = 4096 * 8;
/// Size of a single socket write.
pub const WRITE_BLOCK_SIZE: usize = 4096 * 8;
/// Size of a single pipe write.
pub const PIPE_WRITE_CHUNK: usize = 1024;
/// Largest datagram read at once.
pub const MAX_DATAGRAM_SIZE: usize = 65536;
/// Connection and handshake errors tolerated before a connector gives up.
pub const MAX_ERROR_RETRIES: usize = 5;

/// When an outbound connection is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectTimes {
    /// Delay before the first attempt.
    pub first_delay: LocalDuration,
    /// Period of subsequent attempts.
    pub retry_period: LocalDuration,
}

impl ConnectTimes {
    /// Create connect times from a first delay and a retry period.
    pub const fn new(first_delay: LocalDuration, retry_period: LocalDuration) -> Self {
        Self {
            first_delay,
            retry_period,
        }
    }
}

impl Default for ConnectTimes {
    fn default() -> Self {
        Self::new(LocalDuration::ZERO, LocalDuration::from_millis(500))
    }
}

/// Configuration shared by the components of a [`crate::Component`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of a single socket or pipe read.
    pub read_block_size: usize,
    /// Size of a single socket write.
    pub write_block_size: usize,
    /// Size of a single pipe write.
    pub pipe_write_chunk: usize,
    /// Largest datagram read at once.
    pub max_datagram_size: usize,
    /// Connection and handshake errors tolerated before a connector gives up.
    pub max_error_retries: usize,
    /// Default timing of outbound connection attempts.
    pub connect_times: ConnectTimes,
    /// Byte order of length headers.
    pub byte_order: ByteOrder,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_block_size: READ_BLOCK_SIZE,
            write_block_size: WRITE_BLOCK_SIZE,
            pipe_write_chunk: PIPE_WRITE_CHUNK,
            max_datagram_size: MAX_DATAGRAM_SIZE,
            max_error_retries: MAX_ERROR_RETRIES,
            connect_times: ConnectTimes::default(),
            byte_order: ByteOrder::default(),
        }
    }
}
