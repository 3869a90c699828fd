//! Error types for the bridge.
//!
//! Library code returns [`BridgeError`]; the binary wraps it in `anyhow` at
//! the application boundary.

use thiserror::Error;

use crate::publisher::NodeId;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while synchronizing readings into the address space.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A node handle does not resolve to a node
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// A sibling with the same browse name already exists
    #[error("node {parent} already has a child named {name:?}")]
    DuplicateName { parent: NodeId, name: String },

    /// Value written does not match the variable's declared type
    #[error("type mismatch on {node}: expected {expected}, got {actual}")]
    TypeMismatch {
        node: NodeId,
        expected: &'static str,
        actual: &'static str,
    },

    /// Children can only be added below object nodes
    #[error("node {0} is not an object")]
    NotAnObject(NodeId),

    /// Values can only be written to variable nodes
    #[error("node {0} is not a variable")]
    NotAVariable(NodeId),

    /// A raw reading could not be converted into the slot's type
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: f64 },

    /// A write was rejected by the publishing server
    #[error("write failed: {0}")]
    Write(String),

    /// The discovery feed failed
    #[error("feed error: {0}")]
    Feed(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// The queue between feed and synchronizer closed unexpectedly
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
