//! Error types for the Ferry transfer system.
//!
//! This module defines the error types used throughout the transfer system.
//! Protocol-level failures carry a negative wire code that is echoed back to
//! the peer in the `err_num` field of the response frame.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// No error; the zero value of the `err_num` field.
pub const NO_ERROR: i32 = 0;
/// General, otherwise-unclassified failure.
pub const ERROR_GENERAL: i32 = -1;
/// Mismatched message type or wrong byte count during a handshake.
pub const ERROR_PROTOCOL: i32 = -2;
/// The frame's declared payload exceeds the receive buffer.
pub const BUFF_UNDERSIZED: i32 = -4;
/// The caller asked to receive more than the maximum datagram size.
pub const BUFF_OVERSIZED: i32 = -8;
/// Normal termination via the CLOSE/CLOSEACK exchange.
pub const CONNECTION_CLOSED: i32 = -16;
/// A datagram arrived with fewer bytes than the frame header requires.
pub const ERROR_BAD_DGRAM: i32 = -32;

/// Errors that can occur during file transfer operations.
///
/// This enum covers all error conditions that can arise during transfer,
/// from I/O operations to protocol violations. Each variant provides context
/// to help diagnose and recover from failures.
#[derive(Debug, Error)]
pub enum TransferError {
    /// An I/O error occurred during file or network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to serialize data to TOML format.
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// Failed to deserialize data from TOML format.
    #[error("TOML deserialization error: {0}")]
    TomlDeserialization(#[from] toml::de::Error),

    /// A protocol-level error occurred (invalid message, version mismatch, etc.).
    #[error("Transfer protocol error: {0}")]
    Protocol(String),

    /// A datagram shorter than the frame header was received.
    #[error("Received datagram shorter than the frame header")]
    BadDatagram,

    /// The frame declared more payload than the receive buffer can hold.
    #[error("Declared payload of {declared} bytes exceeds the {capacity}-byte buffer")]
    BufferUndersized { declared: i32, capacity: usize },

    /// The caller requested a receive larger than the maximum datagram size.
    #[error("Requested {requested} bytes, above the maximum datagram size")]
    BufferOversized { requested: usize },

    /// The peer closed the connection via the CLOSE/CLOSEACK exchange.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// A send or receive was attempted on a closed, drained channel.
    #[error("Channel closed")]
    ChannelClosed,

    /// A task was submitted to an executor that is shutting down.
    #[error("Executor is shut down")]
    ExecutorShutdown,

    /// A configuration error (invalid settings, missing required fields, etc.).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The requested file was not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// A network-level error occurred (bind failure, bad address, etc.).
    #[error("Network error: {0}")]
    NetworkError(String),
}

impl TransferError {
    /// The negative code carried in the `err_num` field of an ERROR response.
    pub fn wire_code(&self) -> i32 {
        match self {
            TransferError::Protocol(_) => ERROR_PROTOCOL,
            TransferError::BadDatagram => ERROR_BAD_DGRAM,
            TransferError::BufferUndersized { .. } => BUFF_UNDERSIZED,
            TransferError::BufferOversized { .. } => BUFF_OVERSIZED,
            TransferError::ConnectionClosed => CONNECTION_CLOSED,
            _ => ERROR_GENERAL,
        }
    }
}
