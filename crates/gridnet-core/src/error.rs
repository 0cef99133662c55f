//! Error types for the Gridnet network.

use thiserror::Error;

/// Result type alias using GridError
pub type Result<T> = std::result::Result<T, GridError>;

/// Unified error type for Gridnet operations
#[derive(Error, Debug)]
pub enum GridError {
    // ─────────────────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Message could not be parsed
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Message type not recognized
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// Message too large for the wire
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    // ─────────────────────────────────────────────────────────────────────────
    // Eligibility Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Peer does not meet the requirements of the role it requested
    #[error("Peer {peer_id} not eligible: {reason}")]
    NotEligible { peer_id: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Task Policy Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Task declaration does not match the fixed policy for its type
    #[error("Task rejected: {0}")]
    TaskPolicy(String),

    /// Task not found
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Invalid task state transition
    #[error("Invalid task state transition: {from} -> {to}")]
    InvalidTaskTransition { from: String, to: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Connection attempt failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Not connected to the network
    #[error("Not connected to the network")]
    NotConnected,

    /// Send to a peer failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────────────────
    // Timeout Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Request timed out waiting for a response
    #[error("Request timeout after {0} ms")]
    RequestTimeout(u64),

    /// Task expired waiting for acceptance
    #[error("Task timeout: {0}")]
    TaskTimeout(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Node Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// No backup validator available for failover
    #[error("No active global validator available for failover")]
    NoBackupAvailable,

    // ─────────────────────────────────────────────────────────────────────────
    // Generic Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error — fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GridError {
    /// Check if this error is a partial failure a broadcast/replication
    /// operation can tolerate (logged, excluded from results)
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            GridError::ConnectionFailed(_)
                | GridError::ConnectionClosed
                | GridError::SendFailed(_)
                | GridError::RequestTimeout(_)
                | GridError::Io(_)
        )
    }

    /// Check if this error should be answered with an `error` message
    /// rather than dropping the connection
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            GridError::MalformedMessage(_)
                | GridError::UnknownMessageType(_)
                | GridError::MessageTooLarge { .. }
        )
    }
}

impl From<serde_json::Error> for GridError {
    fn from(e: serde_json::Error) -> Self {
        GridError::MalformedMessage(e.to_string())
    }
}
