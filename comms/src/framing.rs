//! Length-prefixed message framing.
//!
//! Every frame starts with a 4-byte unsigned length header. How that length is
//! interpreted depends on the transport:
//!
//! * On stream connections, the header holds the payload length, and decoding
//!   yields the payload alone.
//! * On pipes, the header holds the length of the whole frame, header included,
//!   and decoding yields the header together with the payload.
use crate::error::Error;

/// Size of a length header.
pub const HEADER_LEN: usize = 4;

/// Byte order of length headers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Big-endian.
    #[default]
    Network,
    /// The byte order of the host.
    Native,
}

impl ByteOrder {
    /// Encode a length header.
    pub fn encode(self, len: u32) -> [u8; HEADER_LEN] {
        match self {
            Self::Network => len.to_be_bytes(),
            Self::Native => len.to_ne_bytes(),
        }
    }

    /// Decode a length header.
    pub fn decode(self, header: [u8; HEADER_LEN]) -> u32 {
        match self {
            Self::Network => u32::from_be_bytes(header),
            Self::Native => u32::from_ne_bytes(header),
        }
    }
}

/// How a length header relates to the frame it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// The header counts the payload only.
    Stream,
    /// The header counts the whole frame, itself included.
    Pipe,
}

impl Framing {
    /// Length header for a payload of `len` bytes.
    pub fn header(self, len: usize, order: ByteOrder) -> Result<[u8; HEADER_LEN], Error> {
        let declared = match self {
            Self::Stream => len,
            Self::Pipe => len + HEADER_LEN,
        };
        let declared = u32::try_from(declared).map_err(|_| Error::FrameTooLarge(len))?;

        Ok(order.encode(declared))
    }

    /// Build a complete frame around `payload`.
    pub fn encode(self, payload: &[u8], order: ByteOrder) -> Result<Vec<u8>, Error> {
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());

        frame.extend_from_slice(&self.header(payload.len(), order)?);
        frame.extend_from_slice(payload);

        Ok(frame)
    }

    /// Remove and return the first complete frame in `buf`, if any. Nothing is
    /// consumed if the frame is incomplete.
    pub fn decode(self, buf: &mut Vec<u8>, order: ByteOrder) -> Option<Vec<u8>> {
        let header: [u8; HEADER_LEN] = buf.get(..HEADER_LEN)?.try_into().ok()?;
        let declared = order.decode(header) as usize;

        let (start, end) = match self {
            Self::Stream => (HEADER_LEN, HEADER_LEN + declared),
            // A declared length shorter than the header is taken as an empty frame.
            Self::Pipe => (0, declared.max(HEADER_LEN)),
        };
        if buf.len() < end {
            return None;
        }
        let rest = buf.split_off(end);
        let mut frame = std::mem::replace(buf, rest);
        frame.drain(..start);

        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_stream_header() {
        let mut buf = Framing::Stream.encode(b"hello", ByteOrder::Network).unwrap();
        assert_eq!(&buf[..HEADER_LEN], &[0, 0, 0, 5]);

        buf.extend_from_slice(b"\0\0");
        assert_eq!(Framing::Stream.decode(&mut buf, ByteOrder::Network), Some(b"hello".to_vec()));
        assert_eq!(buf, vec![0, 0]);
        assert_eq!(Framing::Stream.decode(&mut buf, ByteOrder::Network), None);
        assert_eq!(buf, vec![0, 0], "incomplete headers are left alone");
    }

    #[test]
    fn test_pipe_header_counts_itself() {
        let frame = Framing::Pipe.encode(b"hello", ByteOrder::Network).unwrap();
        assert_eq!(&frame[..HEADER_LEN], &[0, 0, 0, 9]);

        let mut buf = frame.clone();
        assert_eq!(Framing::Pipe.decode(&mut buf, ByteOrder::Network), Some(frame));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_pipe_short_declared_length() {
        let mut buf = vec![0, 0, 0, 1, 0xff];

        assert_eq!(
            Framing::Pipe.decode(&mut buf, ByteOrder::Network),
            Some(vec![0, 0, 0, 1])
        );
        assert_eq!(buf, vec![0xff]);
    }

    #[test]
    fn test_incomplete_payload() {
        let mut buf = vec![0, 0, 0, 3, b'a', b'b'];

        assert_eq!(Framing::Stream.decode(&mut buf, ByteOrder::Network), None);
        assert_eq!(buf.len(), 6);

        buf.push(b'c');
        assert_eq!(Framing::Stream.decode(&mut buf, ByteOrder::Network), Some(b"abc".to_vec()));
    }

    #[test]
    fn test_native_order() {
        let header = Framing::Stream.header(258, ByteOrder::Native).unwrap();
        assert_eq!(header, 258u32.to_ne_bytes());
        assert_eq!(ByteOrder::Native.decode(header), 258);
    }

    #[quickcheck]
    fn prop_decode_chunked(msgs: Vec<Vec<u8>>, chunk: u8, native: bool) -> bool {
        let order = if native { ByteOrder::Native } else { ByteOrder::Network };
        let chunk = chunk as usize + 1;
        let stream = msgs
            .iter()
            .flat_map(|m| Framing::Stream.encode(m, order).unwrap())
            .collect::<Vec<_>>();

        let mut buf = Vec::new();
        let mut decoded = Vec::new();

        for bytes in stream.chunks(chunk) {
            buf.extend_from_slice(bytes);

            while let Some(msg) = Framing::Stream.decode(&mut buf, order) {
                decoded.push(msg);
            }
        }
        buf.is_empty() && decoded == msgs
    }

    #[quickcheck]
    fn prop_pipe_round_trip(payload: Vec<u8>, trailing: Vec<u8>, native: bool) -> bool {
        let order = if native { ByteOrder::Native } else { ByteOrder::Network };
        let frame = Framing::Pipe.encode(&payload, order).unwrap();

        let mut buf = frame.clone();
        buf.extend_from_slice(&trailing);

        Framing::Pipe.decode(&mut buf, order) == Some(frame) && buf == trailing
    }

    #[quickcheck]
    fn prop_pipe_partial_frame(payload: Vec<u8>, cut: usize, native: bool) -> bool {
        let order = if native { ByteOrder::Native } else { ByteOrder::Network };
        let frame = Framing::Pipe.encode(&payload, order).unwrap();
        let partial = frame[..cut % frame.len()].to_vec();

        let mut buf = partial.clone();
        Framing::Pipe.decode(&mut buf, order).is_none() && buf == partial
    }
}
