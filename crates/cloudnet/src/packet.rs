//! # Packet Framing
//!
//! ```text
//! channel: varint
//! has_correlation: u8 (0 | 1)
//! [correlation: 16 bytes]
//! payload_length: varint
//! payload: bytes
//! ```
//!
//! Varints are unsigned LEB128. A frame that fails to decode leaves the stream
//! misaligned, so the channel that produced it is closed.

use std::fmt;

use uuid::Uuid;

/// Replies to queries. Matched by correlation id, never dispatched to listeners
/// unless nobody is waiting.
pub const RESPONSE_CHANNEL: u32 = 0;
pub const RPC_CHANNEL: u32 = 1;
pub const CHANNEL_MESSAGE_CHANNEL: u32 = 2;

/// Upper bound on a single payload.
pub const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Truncated,
    VarintOverflow,
    InvalidFlag(u8),
    TooLarge(usize),
    TrailingBytes(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "frame ended early"),
            Self::VarintOverflow => write!(f, "varint does not fit in 64 bits"),
            Self::InvalidFlag(b) => write!(f, "invalid correlation flag {:#04x}", b),
            Self::TooLarge(n) => write!(f, "payload of {} bytes exceeds limit", n),
            Self::TrailingBytes(n) => write!(f, "{} bytes after payload", n),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    pub channel: u32,
    pub correlation: Option<Uuid>,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(channel: u32, payload: Vec<u8>) -> Self {
        Self { channel, correlation: None, payload }
    }

    pub fn with_correlation(mut self, id: Uuid) -> Self {
        self.correlation = Some(id);
        self
    }

    /// The reply to this packet, on the response channel under the same id.
    pub fn response(&self, payload: Vec<u8>) -> Packet {
        Packet {
            channel: RESPONSE_CHANNEL,
            correlation: self.correlation,
            payload,
        }
    }

    pub fn is_query(&self) -> bool {
        self.correlation.is_some()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 24);
        write_varint(&mut out, self.channel as u64);
        match self.correlation {
            Some(id) => {
                out.push(1);
                out.extend_from_slice(id.as_bytes());
            }
            None => out.push(0),
        }
        write_varint(&mut out, self.payload.len() as u64);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decodes exactly one frame.
    pub fn decode(frame: &[u8]) -> Result<Packet> {
        let mut cursor = frame;

        let channel = u32::try_from(read_varint(&mut cursor)?).map_err(|_| Error::VarintOverflow)?;
        let correlation = match take(&mut cursor, 1)?[0] {
            0 => None,
            1 => {
                let bytes: [u8; 16] = take(&mut cursor, 16)?.try_into().map_err(|_| Error::Truncated)?;
                Some(Uuid::from_bytes(bytes))
            }
            other => return Err(Error::InvalidFlag(other)),
        };

        let len = read_varint(&mut cursor)? as usize;
        if len > MAX_PAYLOAD {
            return Err(Error::TooLarge(len));
        }
        let payload = take(&mut cursor, len)?.to_vec();
        if !cursor.is_empty() {
            return Err(Error::TrailingBytes(cursor.len()));
        }

        Ok(Packet { channel, correlation, payload })
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("channel", &self.channel)
            .field("correlation", &self.correlation)
            .field("payload", &format_args!("{} bytes", self.payload.len()))
            .finish()
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(cursor: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let byte = take(cursor, 1)?[0];
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::VarintOverflow)
}

fn take<'a>(cursor: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if cursor.len() < n {
        return Err(Error::Truncated);
    }
    let (head, tail) = cursor.split_at(n);
    *cursor = tail;
    Ok(head)
}
