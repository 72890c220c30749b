//! Wire codec: value encoding, call messages and transport framing.
//!
//! All integers are fixed-width little-endian. Decoders treat their input as
//! untrusted and fail with `Malformed` rather than read past the buffer.

pub mod codec;
pub mod frame;
pub mod message;

pub use codec::{decode_value, encode_value, encoded_len};
pub use frame::{read_frame, write_frame};
pub use message::{CallRequest, CallResponse, Message};
