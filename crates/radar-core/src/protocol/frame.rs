//! Length-prefixed frame codec for the device wire protocol.
//!
//! Wire format:
//! ```text
//! [length:4][tag:1][payload:length-1]
//! ```
//! `length` is a big-endian `u32` that counts the tag byte plus the payload,
//! so the smallest legal frame is five bytes long (an empty payload).
//!
//! A declared length of zero, or one larger than the configured limit, cannot
//! be resynchronised: the codec reports [`FrameError::ProtocolCorruption`] and
//! the owning connection is expected to close.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the type tag in bytes.
pub const TAG_SIZE: usize = 1;

/// Default upper bound for `length` (tag + payload).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// The ways a frame stream can become unrecoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Corruption {
    /// The length prefix was zero, so there is no tag byte.
    #[error("zero-length frame")]
    EmptyFrame,

    /// The length prefix exceeds the configured limit.
    #[error("declared length {declared} exceeds limit {limit}")]
    Oversized { declared: usize, limit: usize },

    /// The stream ended part way through a frame.
    #[error("stream closed with {buffered} bytes of an incomplete frame")]
    Truncated { buffered: usize },
}

/// Errors produced while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The byte stream cannot be split into frames any more.
    #[error("protocol corruption: {0}")]
    ProtocolCorruption(Corruption),

    /// The underlying transport failed.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn corrupted(kind: Corruption) -> FrameError {
    debug!(%kind, "frame stream corrupted");
    FrameError::ProtocolCorruption(kind)
}

/// One protocol unit: a type tag and its still-encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(tag: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    /// A frame whose payload is zero bytes long.
    pub fn empty(tag: u8) -> Self {
        Self {
            tag,
            payload: Bytes::new(),
        }
    }

    /// Total bytes this frame occupies on the wire, prefix included.
    pub fn wire_len(&self) -> usize {
        LENGTH_PREFIX_SIZE + TAG_SIZE + self.payload.len()
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a tag and payload into a wire-ready byte vector.
///
/// # Examples
///
/// ```rust
/// use radar_core::protocol::frame::encode_frame;
///
/// let bytes = encode_frame(7, &[]);
/// assert_eq!(bytes, vec![0, 0, 0, 1, 7]);
/// ```
pub fn encode_frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + TAG_SIZE + payload.len());
    buf.extend_from_slice(&((TAG_SIZE + payload.len()) as u32).to_be_bytes());
    buf.push(tag);
    buf.extend_from_slice(payload);
    buf
}

/// Decodes one frame from the front of `src`.
///
/// Returns `Ok(None)` while `src` holds less than a whole frame; nothing is
/// consumed in that case.  On success exactly one frame's bytes are removed
/// from `src`.
///
/// # Errors
///
/// Returns [`FrameError::ProtocolCorruption`] when the length prefix is zero
/// or larger than `max_frame_len`.
///
/// # Examples
///
/// ```rust
/// use bytes::BytesMut;
/// use radar_core::protocol::frame::{decode_frame, encode_frame, DEFAULT_MAX_FRAME_LEN};
///
/// let mut buf = BytesMut::from(&encode_frame(8, &[0x08, 0x08])[..]);
/// let frame = decode_frame(&mut buf, DEFAULT_MAX_FRAME_LEN).unwrap().unwrap();
/// assert_eq!(frame.tag, 8);
/// assert_eq!(&frame.payload[..], &[0x08, 0x08]);
/// assert!(buf.is_empty());
/// ```
pub fn decode_frame(src: &mut BytesMut, max_frame_len: usize) -> Result<Option<Frame>, FrameError> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let declared = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if declared == 0 {
        return Err(corrupted(Corruption::EmptyFrame));
    }
    if declared > max_frame_len {
        return Err(corrupted(Corruption::Oversized {
            declared,
            limit: max_frame_len,
        }));
    }

    let total = LENGTH_PREFIX_SIZE + declared;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    let tag = src.get_u8();
    let payload = src.split_to(declared - TAG_SIZE).freeze();
    trace!(tag, len = payload.len(), "decoded frame");
    Ok(Some(Frame { tag, payload }))
}

// ── tokio-util codec ──────────────────────────────────────────────────────────

/// [`Decoder`]/[`Encoder`] pair used to wrap a socket in a `Framed`.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        decode_frame(src, self.max_frame_len)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(corrupted(Corruption::Truncated {
                buffered: src.len(),
            })),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let declared = TAG_SIZE + frame.payload.len();
        if declared > self.max_frame_len {
            return Err(FrameError::ProtocolCorruption(Corruption::Oversized {
                declared,
                limit: self.max_frame_len,
            }));
        }

        dst.reserve(LENGTH_PREFIX_SIZE + declared);
        dst.put_u32(declared as u32);
        dst.put_u8(frame.tag);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
