//! Protocol module - Defines the datagram wire format for Burrow
//!
//! Every message is a single UDP datagram. All integers are little-endian u64
//! unless noted otherwise.
//!
//! Request:
//! - 8 bytes correlation id
//! - 8 bytes operation tag
//! - 8 bytes path length, followed by the path bytes (at most 256)
//! - operation trailer (length-prefixed blob and/or version)
//!
//! Response:
//! - 8 bytes request id
//! - 8 bytes error tag
//! - 8 bytes response tag
//! - operation trailer, present only when the error tag is `NoError`

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// Default UDP port for the server
pub const DEFAULT_PORT: u16 = 12000;

/// Hard ceiling for any datagram, inbound or outbound
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// Maximum length of a node path in bytes
pub const MAX_PATH_LEN: usize = 256;

/// Prefix prepended to the payload of every ping reply
pub const PING_PREFIX: &[u8] = b"pingback: ";
