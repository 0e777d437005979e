#![forbid(unsafe_code)]
//! Length-prefixed binary RPC over reliable stream sockets.
//!
//! Wire format, little-endian throughout:
//!
//! ```text
//! connection open: [u32 service_name_len][service_name bytes]
//! request:         [u32 request_id][u32 body_len][body bytes]
//! response:        [u32 request_id][u32 body_len][body bytes]
//! ```
//!
//! The service name routes all subsequent requests of the connection to one
//! registered handler. Request ids are assigned by the client and echoed by
//! the server; a response with a mismatched id is stale and gets discarded.

pub mod client;
pub mod server;

pub use client::Client;
pub use server::Server;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Width of the on-wire size fields.
pub type MessageSize = u32;

/// Request id plus body length.
pub const HEADER_SIZE: usize = 8;

#[derive(Debug, Error)]
pub enum RpcError {
    /// The transport failed somewhere between send and receive. The socket
    /// has been dropped; the caller decides whether to retry.
    #[error("no response")]
    NoResponse,
    /// The encoded body does not fit the u32 length field.
    #[error("message of {0} bytes exceeds the maximum message size")]
    MessageTooLarge(usize),
    /// Local encoding failure before anything hit the wire.
    #[error("could not serialize message: {0}")]
    Serialization(String),
}

/// Message codec seam. The default is bincode; swapping in another format
/// only changes bytes inside the body, never the framing.
pub trait Codec: Default + Send + Sync {
    fn encode<M: Serialize>(&self, message: &M) -> Result<Vec<u8>, RpcError>;
    fn decode<M: DeserializeOwned>(&self, bytes: &[u8]) -> Result<M, RpcError>;
}

#[derive(Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<M: Serialize>(&self, message: &M) -> Result<Vec<u8>, RpcError> {
        bincode::serialize(message).map_err(|err| RpcError::Serialization(err.to_string()))
    }

    fn decode<M: DeserializeOwned>(&self, bytes: &[u8]) -> Result<M, RpcError> {
        // Decode failures count as transport corruption, not as a local
        // error: the caller sees "no response".
        bincode::deserialize(bytes).map_err(|_| RpcError::NoResponse)
    }
}
