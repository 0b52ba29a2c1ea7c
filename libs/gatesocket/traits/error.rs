use thiserror::Error;

/// Transport-level failures
#[derive(Error, Debug)]
pub enum SocketError {
    /// The WebSocket handshake could not be completed
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// Read or write on an open socket failed
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The peer closed the connection, or the stream ended
    #[error("Connection closed (code: {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    /// An operation was attempted with no open socket
    #[error("Socket is not connected")]
    NotConnected,

    /// An outbound envelope could not be serialized
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// A binary message was not valid UTF-8
    #[error("Received undecodable payload: {0}")]
    Decode(String),
}

impl SocketError {
    /// Whether this error means the connection is gone and must be re-established
    ///
    /// Encoding and decoding errors leave the socket usable.
    pub fn is_connection_ended(&self) -> bool {
        matches!(
            self,
            SocketError::Connect { .. }
                | SocketError::WebSocket(_)
                | SocketError::Closed { .. }
                | SocketError::NotConnected
        )
    }

    /// Close code sent by the peer, if the connection ended with one
    pub fn close_code(&self) -> Option<u16> {
        match self {
            SocketError::Closed { code, .. } => *code,
            _ => None,
        }
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, SocketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ended_classification() {
        assert!(SocketError::NotConnected.is_connection_ended());
        assert!(SocketError::WebSocket("reset".into()).is_connection_ended());
        assert!(SocketError::Closed { code: Some(4000), reason: String::new() }.is_connection_ended());
        assert!(!SocketError::Decode("bad utf-8".into()).is_connection_ended());
    }

    #[test]
    fn test_close_code() {
        let err = SocketError::Closed { code: Some(4004), reason: "auth".into() };
        assert_eq!(err.close_code(), Some(4004));
        assert_eq!(SocketError::NotConnected.close_code(), None);
    }
}
