//! Bit-exact encoders/decoders for the Thor and Odin wire packet families.
//!
//! All multi-byte fields are little-endian, written explicitly with
//! `byteorder` rather than assumed from host byte order.

pub mod odin;
pub mod thor;

pub use odin::{OdinRequest, OdinResponse};
pub use thor::{DataResponse, RequestPacket, ResponsePacket};
