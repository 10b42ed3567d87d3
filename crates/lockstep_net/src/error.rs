//! # Net Error Types
//!
//! Everything below the session facade is handled locally (retry, drop or
//! reorder). Only the cases here ever reach a caller.

use thiserror::Error;

/// Errors surfaced by the reliability layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// The loopback ring has no room for another self-addressed packet.
    #[error("loopback ring is full")]
    LoopbackFull,

    /// No ack slot is left for a best-effort packet. Retry on a later tick.
    #[error("no free ack slot for best-effort packet")]
    AckPoolExhausted,

    /// No ack slot is left for a critical packet.
    ///
    /// There is no alternate backpressure path for critical traffic, so the
    /// simulation can no longer be kept in sync. This is the only fatal error.
    #[error("connection lost: ack pool exhausted by critical packet to node {node}")]
    ConnectionLost {
        /// Destination of the packet that could not be admitted.
        node: u8,
    },

    /// The sender is too far ahead of what the peer has acknowledged.
    #[error("send window to node {node} is full")]
    WindowFull {
        /// The peer whose window is full.
        node: u8,
    },

    /// The transport reported it cannot take more data right now.
    #[error("out of bandwidth")]
    OutOfBandwidth,

    /// The payload does not fit in the negotiated maximum packet length.
    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Largest payload allowed, header excluded.
        max: usize,
    },

    /// Node id outside of the node table.
    #[error("invalid node id {0}")]
    InvalidNode(u8),

    /// Packet type reserved for the session's own control packets.
    #[error("packet type {0} is reserved")]
    ReservedPacketType(u8),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket or file I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// Returns true if the local simulation cannot continue after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }
}

/// Result type for reliability layer operations.
pub type NetResult<T> = Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_lost_is_fatal() {
        assert!(NetError::ConnectionLost { node: 3 }.is_fatal());
        assert!(!NetError::AckPoolExhausted.is_fatal());
        assert!(!NetError::WindowFull { node: 3 }.is_fatal());
        assert!(!NetError::LoopbackFull.is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = NetError::PayloadTooLarge { len: 2000, max: 1442 };
        assert_eq!(err.to_string(), "payload of 2000 bytes exceeds maximum of 1442");
        assert_eq!(
            NetError::ConnectionLost { node: 4 }.to_string(),
            "connection lost: ack pool exhausted by critical packet to node 4"
        );
        assert_eq!(
            NetError::ReservedPacketType(255).to_string(),
            "packet type 255 is reserved"
        );
    }
}
