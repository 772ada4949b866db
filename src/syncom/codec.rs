//! The serializer collaborator `SynCom` consumes. Treated as fully opaque:
//! any codec producing zero-free, 7-bit-clean byte streams is acceptable,
//! so the transport is serializer-agnostic.

use alloc::vec::Vec;

use crate::error::SynComError;

/// Encodes/decodes the application-level value carried over a [`crate::syncom::SynCom`]
/// link. Bytes produced by `encode` must be 7-bit-clean (no byte ≥ 0x80
/// unless the link was built in 8-bit mode) and must not contain the
/// reserved sync byte (`0x00`) — `SynCom` relies on both properties to find
/// frame boundaries.
pub trait Codec<T> {
    /// Encodes `value`, or fails if it cannot be represented.
    fn encode(&self, value: &T) -> Result<Vec<u8>, SynComError>;

    /// Decodes a complete frame's bytes back into a value.
    fn decode(&self, bytes: &[u8]) -> Result<T, SynComError>;
}
