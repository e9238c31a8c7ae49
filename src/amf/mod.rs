//! Action Message Format (AMF0)
//!
//! RTMP commands (type 20) and data messages (type 18) carry their arguments
//! as a sequence of AMF0 values.

pub mod amf0;
pub mod value;

pub use amf0::{decode, decode_all, encode, encode_all, Amf0Decoder, Amf0Encoder};
pub use value::{AmfObject, AmfValue};
