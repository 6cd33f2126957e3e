//! # radar-core
//!
//! Wire protocol shared by the radar gateway server and its test harnesses:
//! the length-prefixed frame codec, the message-type table, and the typed
//! protobuf payloads carried inside frames.
//!
//! The crate has no sockets and no tasks.  It turns bytes into frames, frames
//! into [`DeviceMessage`] values, and back again.
//!
//! # Layers
//!
//! - **`protocol::frame`** – splits a byte stream into `(tag, payload)` units
//!   and writes them back out.  Implements `tokio_util::codec::{Decoder,
//!   Encoder}` so a `TcpStream` can be wrapped in a `Framed`.
//!
//! - **`protocol::message_type`** – the one-byte type tag and its semantic
//!   name, plus the direction each tag travels in.
//!
//! - **`protocol::payloads`** – protobuf structures, one per payload shape.
//!
//! - **`protocol::messages`** – [`DeviceMessage`], the decoded form of a
//!   frame, with the tag → payload-shape table.

pub mod protocol;

pub use protocol::frame::{decode_frame, encode_frame, Corruption, Frame, FrameCodec, FrameError};
pub use protocol::message_type::{Direction, MessageType};
pub use protocol::messages::{DecodeError, DeviceMessage};
