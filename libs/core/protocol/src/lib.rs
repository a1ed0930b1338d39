//! Envelope types and wire codec for the supervisor/worker channel.

mod codec;
mod envelope;

pub use codec::{decode, decode_line, encode, encode_line, ProtocolError};
pub use envelope::{Envelope, EnvelopeKind, IdGenerator, Priority};
