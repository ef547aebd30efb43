//! Error types for the RPC engine.

use crate::{ObjectId, RequestId};
use thiserror::Error;

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer greeted us with something other than the protocol tag.
    #[error("Protocol mismatch: expected {expected:?}, got {received:?}")]
    ProtocolMismatch { expected: [u8; 4], received: [u8; 4] },

    /// The peer closed the stream before a complete frame arrived.
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    /// A value cannot be represented within the wire format's length fields.
    #[error("Value too large for the wire format: {0} bytes")]
    ValueTooLarge(usize),

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Every object ID is in use.
    #[error("Object registry exhausted")]
    RegistryExhausted,

    #[error("Object #{0} not registered")]
    UnresolvedTarget(ObjectId),

    #[error("Method '{0}' not exists")]
    MethodNotFound(String),

    /// A RETURN arrived for a request nobody is waiting on.
    #[error("Unexpected return for request {received} (awaiting {awaiting:?})")]
    StaleResponse {
        received: RequestId,
        awaiting: Option<RequestId>,
    },

    /// The peer answered our call with an Exception value.
    #[error("Remote exception: {0}")]
    RemoteException(String),

    /// A remote reference was used with a session that did not produce it.
    #[error("Remote reference belongs to session {owner}, not {session}")]
    ForeignReference { owner: u64, session: u64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure raised by an exposed method implementation.
    #[error("{0}")]
    Application(String),
}

impl WireError {
    /// Convenience constructor for handler failures.
    pub fn application(msg: impl Into<String>) -> Self {
        WireError::Application(msg.into())
    }

    /// Whether the session can keep running after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WireError::Io(_)
                | WireError::ConnectionClosed
                | WireError::FrameTooLarge { .. }
                | WireError::ProtocolMismatch { .. }
        )
    }
}

/// Alias for wire-level results.
pub type WireResult<T> = Result<T, WireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WireError::MethodNotFound("boo".to_string());
        assert_eq!(err.to_string(), "Method 'boo' not exists");
        assert_eq!(
            WireError::UnresolvedTarget(12).to_string(),
            "Object #12 not registered"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(WireError::ConnectionClosed.is_fatal());
        assert!(WireError::FrameTooLarge { size: 10, max: 5 }.is_fatal());
        assert!(!WireError::application("boom").is_fatal());
        assert!(!WireError::StaleResponse {
            received: 4,
            awaiting: Some(5)
        }
        .is_fatal());
    }
}
