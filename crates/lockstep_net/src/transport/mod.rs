//! # Transport Layer
//!
//! The datagram channel underneath a session. The session never touches
//! sockets or addresses; it talks to small integer node ids through the
//! [`Transport`] trait.
//!
//! ## Contract
//!
//! - `poll_receive` never blocks and reports the sender's node id
//! - `send` is fire and forget; a failed send is a lost packet
//! - `can_send` / `can_get` are optional readiness probes
//! - `free_node` lets the transport recycle an id after a close

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};

use tracing::debug;

use crate::protocol::NodeId;

/// IPv4 plus UDP header bytes.
pub const UDP_IPV4_OVERHEAD: usize = 28;

/// Datagram channel addressed by node id.
pub trait Transport {
    /// Copies the next datagram into `buf` and returns its source node and
    /// length, or None if nothing is waiting.
    fn poll_receive(&mut self, buf: &mut [u8]) -> Option<(NodeId, usize)>;

    /// Sends one datagram to `node`.
    ///
    /// # Errors
    ///
    /// Any error of the underlying channel. The session counts the packet
    /// as sent either way.
    fn send(&mut self, node: NodeId, frame: &[u8]) -> io::Result<()>;

    /// Returns false while the channel cannot take more data this tick.
    fn can_send(&self) -> bool {
        true
    }

    /// Returns false while nothing can be received.
    fn can_get(&self) -> bool {
        true
    }

    /// The node id is no longer in use.
    fn free_node(&mut self, node: NodeId);

    /// Bytes the channel adds to every datagram, for bandwidth accounting.
    fn header_overhead(&self) -> usize {
        0
    }
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportStats {
    /// Datagrams sent.
    pub packets_sent: u64,
    /// Datagrams received.
    pub packets_received: u64,
    /// Send errors.
    pub send_errors: u64,
    /// Receive errors.
    pub recv_errors: u64,
    /// Datagrams dropped because no node id was free.
    pub rejected: u64,
}

/// Non-blocking UDP socket with an address to node id table.
///
/// Peers are registered with [`add_peer`](Self::add_peer), or implicitly
/// when an unknown address sends something and an id is free.
pub struct UdpTransport {
    /// The underlying socket.
    socket: UdpSocket,
    /// Local address.
    local_addr: SocketAddr,
    /// Address of each node, index = node id. Slot 0 is the local process.
    peers: Box<[Option<SocketAddr>]>,
    /// Reverse lookup.
    nodes: HashMap<SocketAddr, NodeId>,
    /// Statistics.
    stats: TransportStats,
}

impl UdpTransport {
    /// Binds a socket serving node ids `1..max_nodes`.
    ///
    /// # Errors
    ///
    /// Returns the error of `bind` or of switching to non-blocking mode.
    pub fn bind(addr: SocketAddr, max_nodes: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            peers: vec![None; max_nodes.min(usize::from(u8::MAX))].into_boxed_slice(),
            nodes: HashMap::new(),
            stats: TransportStats::default(),
        })
    }

    /// Returns the local address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Returns the node id of `addr`, registering it if needed. None if the
    /// table is full.
    pub fn add_peer(&mut self, addr: SocketAddr) -> Option<NodeId> {
        if let Some(&node) = self.nodes.get(&addr) {
            return Some(node);
        }
        let index = self.peers.iter().skip(1).position(Option::is_none)? + 1;
        let node = NodeId(index as u8);
        self.peers[index] = Some(addr);
        self.nodes.insert(addr, node);
        Some(node)
    }

    /// Address of `node`, if registered.
    #[must_use]
    pub fn peer_addr(&self, node: NodeId) -> Option<SocketAddr> {
        self.peers.get(node.index()).copied().flatten()
    }
}

impl Transport for UdpTransport {
    fn poll_receive(&mut self, buf: &mut [u8]) -> Option<(NodeId, usize)> {
        loop {
            match self.socket.recv_from(buf) {
                Ok((len, addr)) => {
                    self.stats.packets_received += 1;
                    if let Some(node) = self.add_peer(addr) {
                        return Some((node, len));
                    }
                    self.stats.rejected += 1;
                    debug!(%addr, "no free node id, datagram dropped");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    // ICMP port unreachable surfaces here on some platforms.
                    self.stats.recv_errors += 1;
                    debug!(error = %e, "udp receive failed");
                    return None;
                }
            }
        }
    }

    fn send(&mut self, node: NodeId, frame: &[u8]) -> io::Result<()> {
        let addr = self.peer_addr(node).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{node} has no address"))
        })?;
        match self.socket.send_to(frame, addr) {
            Ok(_) => {
                self.stats.packets_sent += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.send_errors += 1;
                Err(e)
            }
        }
    }

    fn free_node(&mut self, node: NodeId) {
        if let Some(addr) = self.peers.get_mut(node.index()).and_then(Option::take) {
            self.nodes.remove(&addr);
        }
    }

    fn header_overhead(&self) -> usize {
        UDP_IPV4_OVERHEAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_peer_table() {
        let mut transport = UdpTransport::bind(localhost(), 3).unwrap();
        let a: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        let c: SocketAddr = "127.0.0.1:4002".parse().unwrap();

        assert_eq!(transport.add_peer(a), Some(NodeId(1)));
        assert_eq!(transport.add_peer(a), Some(NodeId(1)));
        assert_eq!(transport.add_peer(b), Some(NodeId(2)));
        assert_eq!(transport.add_peer(c), None);

        transport.free_node(NodeId(1));
        assert_eq!(transport.peer_addr(NodeId(1)), None);
        assert_eq!(transport.add_peer(c), Some(NodeId(1)));
        assert_eq!(transport.header_overhead(), UDP_IPV4_OVERHEAD);
    }

    #[test]
    fn test_send_to_unknown_node() {
        let mut transport = UdpTransport::bind(localhost(), 4).unwrap();
        let err = transport.send(NodeId(2), b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
