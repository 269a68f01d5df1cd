//! # mts-protocol
//!
//! Wire protocol for MTS, the length-prefixed JSON protocol spoken between
//! room-management integrators and the MTS server.
//!
//! This crate provides:
//! - Length-prefixed framing (`u32` little-endian length + JSON envelope)
//! - The envelope model with route, node and correlation fields
//! - Route, error-code and app-id enumerations
//! - Route-specific payload records (login, OPL, error)
//! - RPC-id allocation and request/response builders

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod payload;
pub mod rpc;
mod serde_b64;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{decode_length, encode, Frame, LENGTH_PREFIX_SIZE};
pub use message::{node, Envelope, EnvelopeHeader, NodeId, Route};
pub use payload::{
    AppId, ErrorId, ErrorPayload, LoginPayload, LoginResponsePayload, OplPayload, APP_KEY_LEN,
    PING_RESPONSE_DATA,
};
pub use rpc::{RpcIdAllocator, RpcIdScope};

/// Protocol version carried in every envelope.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default port of the MTS server.
pub const DEFAULT_PORT: u16 = 10001;

/// Maximum envelope size on the wire (4 MiB).
pub const MAX_MESSAGE_LENGTH: usize = 1 << 22;
