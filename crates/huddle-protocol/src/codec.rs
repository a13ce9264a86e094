//! Codec for encoding and decoding Huddle envelopes.
//!
//! Two encodings carry the same envelope:
//! - JSON text frames, for browser clients
//! - MessagePack with a 4-byte big-endian length prefix, for binary clients

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

/// Hard maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default maximum frame size for a codec instance (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {1}")]
    FrameTooLarge(usize, usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame arrived in an encoding the connection did not negotiate.
    #[error("Unexpected {0} frame")]
    UnexpectedEncoding(Encoding),

    /// Unknown encoding name.
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),
}

/// Wire encoding of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// JSON text frames.
    #[default]
    Json,
    /// Length-prefixed MessagePack binary frames.
    MessagePack,
}

impl Encoding {
    /// Name of the encoding as used in the `format` query parameter.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::MessagePack => "msgpack",
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "msgpack" | "messagepack" => Ok(Encoding::MessagePack),
            other => Err(ProtocolError::UnknownEncoding(other.to_string())),
        }
    }
}

/// An encoded frame, ready for a text or binary transport message.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    /// UTF-8 text payload.
    Text(String),
    /// Binary payload.
    Binary(Bytes),
}

impl WireFrame {
    /// Size of the payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            WireFrame::Text(text) => text.len(),
            WireFrame::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode a value as a length-prefixed MessagePack frame.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded value (named fields)
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a value into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into<T: Serialize>(value: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(value)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len(), MAX_FRAME_SIZE));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a single length-prefixed MessagePack frame.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length, MAX_FRAME_SIZE));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(value))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame exceeds `max_frame_size` or is invalid.
pub fn decode_from<T: DeserializeOwned>(
    buf: &mut BytesMut,
    max_frame_size: usize,
) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let limit = max_frame_size.min(MAX_FRAME_SIZE);

    if length > limit {
        return Err(ProtocolError::FrameTooLarge(length, limit));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);

    Ok(Some(rmp_serde::from_slice(&payload)?))
}

/// Per-connection codec bound to a negotiated encoding.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    encoding: Encoding,
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(Encoding::default())
    }
}

impl FrameCodec {
    /// Create a codec for the given encoding.
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Limit inbound frames to `max_frame_size` bytes (capped at [`MAX_FRAME_SIZE`]).
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.min(MAX_FRAME_SIZE);
        self
    }

    /// The negotiated encoding.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Encode a value in this codec's encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<WireFrame, ProtocolError> {
        match self.encoding {
            Encoding::Json => Ok(WireFrame::Text(serde_json::to_string(value)?)),
            Encoding::MessagePack => Ok(WireFrame::Binary(encode(value)?)),
        }
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection negotiated a binary encoding,
    /// the text is too large, or it is not a valid envelope.
    pub fn decode_text<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError> {
        if self.encoding != Encoding::Json {
            return Err(ProtocolError::UnexpectedEncoding(Encoding::Json));
        }
        if text.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge(text.len(), self.max_frame_size));
        }
        Ok(serde_json::from_str(text)?)
    }

    /// Append binary data to `buf` and decode every complete frame in it.
    ///
    /// Incomplete trailing data stays in `buf` for the next call.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection negotiated JSON or a frame is invalid.
    pub fn decode_binary<T: DeserializeOwned>(
        &self,
        buf: &mut BytesMut,
        data: &[u8],
    ) -> Result<Vec<T>, ProtocolError> {
        if self.encoding != Encoding::MessagePack {
            return Err(ProtocolError::UnexpectedEncoding(Encoding::MessagePack));
        }

        buf.extend_from_slice(data);
        let mut frames = Vec::new();
        while let Some(frame) = decode_from(buf, self.max_frame_size)? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientFrame, Event, OutboundMessage, UserProfile};

    #[test]
    fn test_msgpack_roundtrip() {
        let events = vec![
            Event::message(OutboundMessage {
                id: "m-1".to_string(),
                content: "hello".to_string(),
                sender: UserProfile::new("alice", "Alice"),
                chat_id: "c1".into(),
                created_at: "2024-01-01T00:00:00Z".to_string(),
            }),
            Event::message_alert("c1"),
            Event::presence(vec!["alice".into(), "bob".into()]),
            Event::chat_alert("c1", "Bob has left the group"),
            Event::alert("Welcome"),
            Event::NewRequest,
        ];

        for event in events {
            let encoded = encode(&event).unwrap();
            let decoded: Event = decode(&encoded).unwrap();
            assert_eq!(event, decoded);
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&Event::typing_start("c1")).unwrap();

        match decode::<Event>(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let frame = ClientFrame::new_message("c1", vec![], "x".repeat(128));
        let mut buf = BytesMut::new();
        encode_into(&frame, &mut buf).unwrap();

        match decode_from::<ClientFrame>(&mut buf, 64) {
            Err(ProtocolError::FrameTooLarge(_, 64)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode_across_chunks() {
        let codec = FrameCodec::new(Encoding::MessagePack);
        let first = ClientFrame::joined(vec!["a".into()]);
        let second = ClientFrame::leaved(vec!["b".into()]);

        let mut wire = BytesMut::new();
        encode_into(&first, &mut wire).unwrap();
        encode_into(&second, &mut wire).unwrap();
        let split = wire.len() - 3;

        let mut buf = BytesMut::new();
        let decoded: Vec<ClientFrame> = codec.decode_binary(&mut buf, &wire[..split]).unwrap();
        assert_eq!(decoded, vec![first]);
        assert!(!buf.is_empty());

        let decoded: Vec<ClientFrame> = codec.decode_binary(&mut buf, &wire[split..]).unwrap();
        assert_eq!(decoded, vec![second]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_json_codec() {
        let codec = FrameCodec::new(Encoding::Json);
        let frame = codec.encode(&Event::typing_stop("c7")).unwrap();
        assert_eq!(
            frame,
            WireFrame::Text(r#"{"event":"typing-stop","data":{"chatId":"c7"}}"#.to_string())
        );

        let decoded: ClientFrame = codec
            .decode_text(r#"{"event":"chat-leaved","data":{"members":["a"]}}"#)
            .unwrap();
        assert_eq!(decoded, ClientFrame::leaved(vec!["a".into()]));
    }

    #[test]
    fn test_encoding_mismatch() {
        let codec = FrameCodec::new(Encoding::MessagePack);
        assert!(matches!(
            codec.decode_text::<ClientFrame>("{}"),
            Err(ProtocolError::UnexpectedEncoding(Encoding::Json))
        ));
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("json".parse::<Encoding>().unwrap(), Encoding::Json);
        assert_eq!("MsgPack".parse::<Encoding>().unwrap(), Encoding::MessagePack);
        assert!("xml".parse::<Encoding>().is_err());
    }
}
