//! Protocol module containing the frame codec, message types and payloads.

pub mod frame;
pub mod message_type;
pub mod messages;
pub mod payloads;

pub use frame::{decode_frame, encode_frame, Corruption, Frame, FrameCodec, FrameError};
pub use message_type::{Direction, MessageType};
pub use messages::{DecodeError, DeviceMessage};
pub use payloads::*;
