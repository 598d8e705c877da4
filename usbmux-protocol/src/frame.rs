//! Frame codec for usbmuxd framing
//!
//! Every unit on the wire is a 16-byte little-endian header followed by the
//! payload:
//!
//! ```text
//! u32 total_length | u32 version | u32 message_type | u32 tag | payload
//! ```
//!
//! `total_length` always counts the header, so it is derived from the payload
//! on encode and checked against the buffered bytes on decode.

use std::io::Read;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the fixed frame header in bytes
pub const HEADER_SIZE: usize = 16;

/// Maximum frame size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Header version used for property-list frames
pub const PLIST_VERSION: u32 = 1;

/// Frame codec error
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid frame length {length}: shorter than the 16-byte header")]
    LengthInvalid { length: u32 },

    #[error("Frame truncated: expected {expected} bytes, only {available} available")]
    Truncated { expected: usize, available: usize },

    #[error("Frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}

/// Message type carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Result,
    Connect,
    Listen,
    DeviceAdd,
    DeviceRemove,
    DevicePaired,
    PropertyListMessage,
    /// A value this client does not know about
    Other(u32),
}

impl MessageType {
    /// Numeric value written on the wire
    pub fn as_u32(self) -> u32 {
        match self {
            MessageType::Result => 1,
            MessageType::Connect => 2,
            MessageType::Listen => 3,
            MessageType::DeviceAdd => 4,
            MessageType::DeviceRemove => 5,
            MessageType::DevicePaired => 6,
            MessageType::PropertyListMessage => 8,
            MessageType::Other(value) => value,
        }
    }
}

impl From<u32> for MessageType {
    fn from(value: u32) -> Self {
        match value {
            1 => MessageType::Result,
            2 => MessageType::Connect,
            3 => MessageType::Listen,
            4 => MessageType::DeviceAdd,
            5 => MessageType::DeviceRemove,
            6 => MessageType::DevicePaired,
            8 => MessageType::PropertyListMessage,
            other => MessageType::Other(other),
        }
    }
}

/// One protocol unit exchanged with the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u32,
    pub message_type: MessageType,
    pub tag: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(version: u32, message_type: MessageType, tag: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            version,
            message_type,
            tag,
            payload: payload.into(),
        }
    }

    /// Create a property-list frame (version 1)
    pub fn plist(tag: u32, payload: impl Into<Bytes>) -> Self {
        Self::new(PLIST_VERSION, MessageType::PropertyListMessage, tag, payload)
    }

    /// Length written in the header: header plus payload
    pub fn total_length(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode into a standalone buffer
    pub fn to_bytes(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::new();
        FrameCodec::new().encode(self.clone(), &mut buf)?;
        Ok(buf.freeze())
    }

    /// Read exactly one frame from a blocking reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FrameError> {
        let mut header = [0u8; HEADER_SIZE];
        let got = read_full(reader, &mut header)?;
        if got < HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: HEADER_SIZE,
                available: got,
            });
        }

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let total = check_length(length)?;

        let mut payload = vec![0u8; total - HEADER_SIZE];
        let got = read_full(reader, &mut payload)?;
        if got < payload.len() {
            return Err(FrameError::Truncated {
                expected: total,
                available: HEADER_SIZE + got,
            });
        }

        let mut fields = &header[4..];
        Ok(Self {
            version: fields.get_u32_le(),
            message_type: MessageType::from(fields.get_u32_le()),
            tag: fields.get_u32_le(),
            payload: Bytes::from(payload),
        })
    }
}

/// Codec for usbmuxd frames, usable in both directions
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need the length field before anything can be validated
        if src.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        let total = check_length(length)?;

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut data = src.split_to(total);
        data.advance(4);
        let version = data.get_u32_le();
        let message_type = MessageType::from(data.get_u32_le());
        let tag = data.get_u32_le();

        Ok(Some(Frame {
            version,
            message_type,
            tag,
            payload: data.freeze(),
        }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        let expected = if buf.len() >= 4 {
            u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize
        } else {
            HEADER_SIZE
        };
        Err(FrameError::Truncated {
            expected,
            available: buf.len(),
        })
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total = item.total_length();
        if total > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size: total,
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(total);
        dst.put_u32_le(total as u32);
        dst.put_u32_le(item.version);
        dst.put_u32_le(item.message_type.as_u32());
        dst.put_u32_le(item.tag);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

fn check_length(length: u32) -> Result<usize, FrameError> {
    let total = length as usize;
    if total < HEADER_SIZE {
        return Err(FrameError::LengthInvalid { length });
    }
    if total > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: total,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(total)
}

/// Fill `buf` as far as the reader allows, returning the byte count
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
