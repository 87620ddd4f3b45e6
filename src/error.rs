use std::io;
use thiserror::Error;

/// Errors produced by the transport and correlation engine.
///
/// `Fault` and `Decode` are non-terminal: they surface to the call or
/// callback that triggered them and leave the connection otherwise healthy.
/// Every other variant is terminal for the connection that produced it.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket failure. Terminal for the connection.
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    /// Clean EOF while a frame or banner was only partially read.
    #[error("connection closed")]
    Closed,

    /// Handshake or caller-imposed deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// The connect banner did not equal `GBXRemote 2`.
    #[error("invalid protocol banner: {0:?}")]
    InvalidProtocol(String),

    /// A frame or banner exceeded its configured size ceiling.
    #[error("frame exceeds maximum size")]
    TooLarge,

    /// Payload XML could not be parsed. Affects only the one call or callback.
    #[error("failed to decode payload: {0}")]
    Decode(String),

    /// A well-formed XML-RPC fault response.
    #[error("server fault {code}: {message}")]
    Fault { code: i32, message: String },

    /// `call` was issued while the client was not `Connected`.
    #[error("not connected")]
    NotConnected,

    /// The caller dropped the future awaiting a pending call.
    #[error("call was cancelled")]
    Cancelled,
}

/// A specialized `Result` for transport operations.
pub type Result<T> = std::result::Result<T, Error>;
