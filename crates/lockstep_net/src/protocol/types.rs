//! # Protocol Tags
//!
//! Node ids, packet types and delivery classes.

use std::fmt;

/// Logical peer endpoint. Node 0 is always the local process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u8);

impl NodeId {
    /// The local process (loopback).
    pub const SELF: Self = Self(0);

    /// Returns true for the loopback node.
    #[inline]
    #[must_use]
    pub const fn is_self(self) -> bool {
        self.0 == 0
    }

    /// Index into the node table.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

/// Wire packet type.
///
/// Opaque to the reliability layer apart from the two reserved values
/// below; the application owns the rest of the byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PacketType(pub u8);

impl PacketType {
    /// Pure acknowledgement / keep-alive. Consumed by the session.
    ///
    /// The payload lists the sequences the sender holds out of order.
    pub const NOTHING: Self = Self(0);

    /// Synthetic peer timeout, only ever produced through the loopback ring.
    ///
    /// The payload is the id of the node that timed out.
    pub const NODE_TIMEOUT: Self = Self(u8::MAX);

    /// Returns true for types the session generates itself.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        self.0 == Self::NOTHING.0 || self.0 == Self::NODE_TIMEOUT.0
    }
}

/// How bad it is when a reliable packet cannot get an ack slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketClass {
    /// Losing it desynchronizes the simulation. Pool exhaustion is fatal.
    Critical,
    /// May be refused and retried later. Never takes the urgent reserve.
    BestEffort,
}

impl PacketClass {
    /// Returns true for critical traffic.
    #[inline]
    #[must_use]
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::Critical)
    }
}

/// Delivery guarantee requested for a send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Fire and forget.
    Unreliable,
    /// Retransmitted until acknowledged.
    Reliable(PacketClass),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id() {
        assert!(NodeId::SELF.is_self());
        assert!(!NodeId(3).is_self());
        assert_eq!(NodeId(3).index(), 3);
        assert_eq!(NodeId(7).to_string(), "node 7");
    }

    #[test]
    fn test_control_types() {
        assert!(PacketType::NOTHING.is_control());
        assert!(PacketType::NODE_TIMEOUT.is_control());
        assert!(!PacketType(12).is_control());
    }
}
