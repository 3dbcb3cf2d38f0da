// Envelope module — wire data model and framing for the chat protocol

pub mod codec;
pub mod types;

pub use codec::{decode_envelope, encode_envelope, CodecError, MAX_BODY_SIZE, MAX_FRAME_SIZE};
pub use types::{ChatLine, Envelope, Notification, Presence, PresenceParseError};
