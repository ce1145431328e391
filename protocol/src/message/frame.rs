//! # Binary Framing
//!
//! Stream transports (TCP and the gRPC-framed channel) cannot rely on the
//! peer receiving whole JSON documents, so each envelope is wrapped in a
//! length-prefixed frame:
//!
//! ```text
//! [type: 1 byte][length: 4 bytes, big-endian][payload: length bytes]
//! ```
//!
//! Type codes: request=1, response=2, notification=3, heartbeat=4,
//! handshake=5. The decoder consumes bytes incrementally and tolerates
//! partial reads at any boundary — header split across reads, payload
//! trickling in one byte at a time, several frames arriving back to back.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::{FRAME_HEADER_LEN, MAX_FRAME_PAYLOAD};
use crate::error::{A2aError, A2aResult};

use super::MessageType;

// ---------------------------------------------------------------------------
// Frame Type
// ---------------------------------------------------------------------------

/// The 1-byte frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// An id-bearing call.
    Request = 1,
    /// The paired answer.
    Response = 2,
    /// Fire-and-forget.
    Notification = 3,
    /// Liveness signal.
    Heartbeat = 4,
    /// Connection-level handshake.
    Handshake = 5,
}

impl FrameType {
    /// Parses a wire byte. Unknown codes are a malformed frame.
    pub fn from_wire(byte: u8) -> A2aResult<Self> {
        match byte {
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            3 => Ok(Self::Notification),
            4 => Ok(Self::Heartbeat),
            5 => Ok(Self::Handshake),
            other => Err(A2aError::MalformedFrame(format!(
                "unknown frame type code {}",
                other
            ))),
        }
    }

    /// The frame class a message type travels as.
    pub fn for_message(message_type: MessageType) -> Self {
        match message_type {
            MessageType::Response => Self::Response,
            MessageType::Notification => Self::Notification,
            MessageType::Heartbeat => Self::Heartbeat,
            MessageType::SecurityHandshake => Self::Handshake,
            _ => Self::Request,
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One decoded frame: discriminator plus raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame class.
    pub frame_type: FrameType,
    /// The JSON payload bytes.
    pub payload: Bytes,
}

/// Encodes a frame into its wire form.
pub fn encode_frame(frame_type: FrameType, payload: &[u8]) -> A2aResult<Bytes> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(A2aError::MalformedFrame(format!(
            "payload of {} bytes exceeds frame limit {}",
            payload.len(),
            MAX_FRAME_PAYLOAD
        )));
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u8(frame_type as u8);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

// ---------------------------------------------------------------------------
// Incremental Decoder
// ---------------------------------------------------------------------------

/// Accumulates bytes from a stream and yields complete frames.
///
/// Feed arbitrary chunks with [`FrameDecoder::extend`]; drain complete
/// frames with [`FrameDecoder::next_frame`]. Bytes belonging to an
/// incomplete frame stay buffered until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes to the internal buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed as frames.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pops the next complete frame, or `None` if more bytes are needed.
    ///
    /// The header is validated before the payload is awaited, so an
    /// impossible length fails fast instead of stalling the connection.
    pub fn next_frame(&mut self) -> A2aResult<Option<Frame>> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        // Peek the header without consuming.
        let frame_type = FrameType::from_wire(self.buf[0])?;
        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;

        if len > MAX_FRAME_PAYLOAD {
            return Err(A2aError::MalformedFrame(format!(
                "declared payload of {} bytes exceeds frame limit {}",
                len, MAX_FRAME_PAYLOAD
            )));
        }

        if self.buf.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }

        self.buf.advance(FRAME_HEADER_LEN);
        let payload = self.buf.split_to(len).freeze();

        Ok(Some(Frame {
            frame_type,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let payload = br#"{"jsonrpc":"2.0"}"#;
        let wire = encode_frame(FrameType::Request, payload).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.extend(&wire);

        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::Request);
        assert_eq!(&frame.payload[..], payload);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn decoder_tolerates_byte_at_a_time_delivery() {
        let payload = b"0123456789";
        let wire = encode_frame(FrameType::Notification, payload).unwrap();

        let mut decoder = FrameDecoder::new();
        for (i, byte) in wire.iter().enumerate() {
            decoder.extend(&[*byte]);
            let frame = decoder.next_frame().unwrap();
            if i + 1 < wire.len() {
                assert!(frame.is_none(), "frame completed early at byte {}", i);
            } else {
                assert_eq!(&frame.unwrap().payload[..], payload);
            }
        }
    }

    #[test]
    fn decoder_handles_back_to_back_frames() {
        let a = encode_frame(FrameType::Request, b"first").unwrap();
        let b = encode_frame(FrameType::Response, b"second").unwrap();

        let mut decoder = FrameDecoder::new();
        let mut combined = a.to_vec();
        combined.extend_from_slice(&b);
        decoder.extend(&combined);

        let first = decoder.next_frame().unwrap().unwrap();
        assert_eq!(first.frame_type, FrameType::Request);
        assert_eq!(&first.payload[..], b"first");

        let second = decoder.next_frame().unwrap().unwrap();
        assert_eq!(second.frame_type, FrameType::Response);
        assert_eq!(&second.payload[..], b"second");

        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn unknown_type_code_is_malformed() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[9, 0, 0, 0, 0]);
        assert!(matches!(
            decoder.next_frame(),
            Err(A2aError::MalformedFrame(_))
        ));
    }

    #[test]
    fn absurd_length_is_malformed_before_payload_arrives() {
        let mut decoder = FrameDecoder::new();
        // Type ok, length = u32::MAX.
        decoder.extend(&[1, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            decoder.next_frame(),
            Err(A2aError::MalformedFrame(_))
        ));
    }

    #[test]
    fn empty_payload_is_legal() {
        let wire = encode_frame(FrameType::Heartbeat, b"").unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&wire);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::Heartbeat);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn frame_type_for_message_classes() {
        assert_eq!(
            FrameType::for_message(MessageType::Request),
            FrameType::Request
        );
        assert_eq!(
            FrameType::for_message(MessageType::Discovery),
            FrameType::Request
        );
        assert_eq!(
            FrameType::for_message(MessageType::Heartbeat),
            FrameType::Heartbeat
        );
        assert_eq!(
            FrameType::for_message(MessageType::SecurityHandshake),
            FrameType::Handshake
        );
    }
}
