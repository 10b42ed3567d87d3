//! # Network Simulation
//!
//! In-memory datagram network for tests, the soak binary and benchmarks.
//!
//! ## Features
//!
//! - Any number of hosts, each with its own node id table
//! - Pluggable per-datagram filter: deliver, drop or hold
//! - Held datagrams are released in reverse order (reordering)
//! - Crafted datagrams can be injected (corruption, spoofed nodes)
//! - Per-host send readiness switch and a record of freed node ids
//!
//! [`PacketDropper`] is the in-session counterpart: it drops outgoing
//! packets before they reach any transport.

mod dropper;

pub use dropper::PacketDropper;

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::protocol::{NodeId, PacketHeader};
use crate::transport::Transport;

/// Index of a host on a [`SimNetwork`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HostId(pub usize);

/// A datagram in transit.
#[derive(Clone, Debug)]
pub struct Datagram {
    /// Sending host.
    pub from: HostId,
    /// Receiving host.
    pub to: HostId,
    /// Node id of the sender as the receiver knows it.
    pub source: NodeId,
    /// Raw bytes, header included.
    pub bytes: Vec<u8>,
}

impl Datagram {
    /// Header of the datagram, if it is long enough to have one.
    #[must_use]
    pub fn header(&self) -> Option<&PacketHeader> {
        PacketHeader::read(&self.bytes)
    }
}

/// What the network does with a datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Into the receiver's inbox.
    Deliver,
    /// Lost.
    Drop,
    /// Parked until [`SimNetwork::release_held`].
    Hold,
}

type Filter = Box<dyn FnMut(&Datagram) -> Verdict + Send>;

/// Network-wide counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Datagrams put into an inbox.
    pub delivered: u64,
    /// Datagrams lost by the filter.
    pub dropped: u64,
    /// Datagrams parked by the filter.
    pub held: u64,
}

#[derive(Default)]
struct Host {
    inbox: VecDeque<(NodeId, Vec<u8>)>,
    /// Local node id -> (remote host, our node id at the remote).
    routes: HashMap<NodeId, (HostId, NodeId)>,
    can_send: bool,
    freed: Vec<NodeId>,
}

#[derive(Default)]
struct Hub {
    hosts: Vec<Host>,
    filter: Option<Filter>,
    held: Vec<Datagram>,
    stats: SimStats,
}

impl Hub {
    fn route(&mut self, datagram: Datagram) {
        let verdict = self
            .filter
            .as_mut()
            .map_or(Verdict::Deliver, |filter| filter(&datagram));
        match verdict {
            Verdict::Deliver => self.deliver(datagram),
            Verdict::Drop => self.stats.dropped += 1,
            Verdict::Hold => {
                self.stats.held += 1;
                self.held.push(datagram);
            }
        }
    }

    fn deliver(&mut self, datagram: Datagram) {
        if let Some(host) = self.hosts.get_mut(datagram.to.0) {
            host.inbox.push_back((datagram.source, datagram.bytes));
            self.stats.delivered += 1;
        }
    }
}

/// Shared in-memory network. Clones are handles to the same network.
#[derive(Clone, Default)]
pub struct SimNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl SimNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a host and returns its transport.
    #[must_use]
    pub fn add_host(&self) -> SimTransport {
        let mut hub = self.hub.lock();
        hub.hosts.push(Host {
            can_send: true,
            ..Host::default()
        });
        SimTransport {
            network: self.clone(),
            host: HostId(hub.hosts.len() - 1),
        }
    }

    /// Connects two hosts: `a` reaches `b` as `node_at_a`, and `b` reaches
    /// `a` as `node_at_b`.
    pub fn connect(&self, a: HostId, node_at_a: NodeId, b: HostId, node_at_b: NodeId) {
        let mut hub = self.hub.lock();
        hub.hosts[a.0].routes.insert(node_at_a, (b, node_at_b));
        hub.hosts[b.0].routes.insert(node_at_b, (a, node_at_a));
    }

    /// Two connected hosts that see each other as node 1.
    #[must_use]
    pub fn pair(&self) -> (SimTransport, SimTransport) {
        let a = self.add_host();
        let b = self.add_host();
        self.connect(a.host, NodeId(1), b.host, NodeId(1));
        (a, b)
    }

    /// Installs the filter every datagram passes through.
    pub fn set_filter(&self, filter: impl FnMut(&Datagram) -> Verdict + Send + 'static) {
        self.hub.lock().filter = Some(Box::new(filter));
    }

    /// Drops a random `percent` of all datagrams.
    pub fn set_loss(&self, percent: u8, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        self.set_filter(move |_| {
            if rng.gen_range(0..100u8) < percent {
                Verdict::Drop
            } else {
                Verdict::Deliver
            }
        });
    }

    /// Removes the filter; everything is delivered.
    pub fn clear_filter(&self) {
        self.hub.lock().filter = None;
    }

    /// Delivers the held datagrams, newest first. Returns how many.
    pub fn release_held(&self) -> usize {
        let mut hub = self.hub.lock();
        let held = std::mem::take(&mut hub.held);
        let count = held.len();
        for datagram in held.into_iter().rev() {
            hub.deliver(datagram);
        }
        count
    }

    /// Puts raw bytes into `to`'s inbox as if `source` had sent them,
    /// bypassing the filter.
    pub fn inject(&self, to: HostId, source: NodeId, bytes: &[u8]) {
        let mut hub = self.hub.lock();
        if let Some(host) = hub.hosts.get_mut(to.0) {
            host.inbox.push_back((source, bytes.to_vec()));
        }
    }

    /// Switches the send readiness probe of `host`.
    pub fn set_can_send(&self, host: HostId, ready: bool) {
        if let Some(host) = self.hub.lock().hosts.get_mut(host.0) {
            host.can_send = ready;
        }
    }

    /// Node ids `host` was told to free, oldest first.
    #[must_use]
    pub fn freed_nodes(&self, host: HostId) -> Vec<NodeId> {
        self.hub
            .lock()
            .hosts
            .get(host.0)
            .map(|host| host.freed.clone())
            .unwrap_or_default()
    }

    /// Datagrams waiting in `host`'s inbox.
    #[must_use]
    pub fn pending(&self, host: HostId) -> usize {
        self.hub
            .lock()
            .hosts
            .get(host.0)
            .map_or(0, |host| host.inbox.len())
    }

    /// Network-wide counters.
    #[must_use]
    pub fn stats(&self) -> SimStats {
        self.hub.lock().stats
    }
}

/// One host's view of a [`SimNetwork`].
#[derive(Clone)]
pub struct SimTransport {
    network: SimNetwork,
    host: HostId,
}

impl SimTransport {
    /// This host's id.
    #[must_use]
    pub const fn host(&self) -> HostId {
        self.host
    }

    /// The network this host is on.
    #[must_use]
    pub const fn network(&self) -> &SimNetwork {
        &self.network
    }
}

impl Transport for SimTransport {
    fn poll_receive(&mut self, buf: &mut [u8]) -> Option<(NodeId, usize)> {
        let (source, bytes) = self.network.hub.lock().hosts[self.host.0].inbox.pop_front()?;
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        Some((source, len))
    }

    fn send(&mut self, node: NodeId, frame: &[u8]) -> io::Result<()> {
        let mut hub = self.network.hub.lock();
        let Some(&(to, source)) = hub.hosts[self.host.0].routes.get(&node) else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{node} is not connected"),
            ));
        };
        hub.route(Datagram {
            from: self.host,
            to,
            source,
            bytes: frame.to_vec(),
        });
        Ok(())
    }

    fn can_send(&self) -> bool {
        self.network.hub.lock().hosts[self.host.0].can_send
    }

    fn free_node(&mut self, node: NodeId) {
        self.network.hub.lock().hosts[self.host.0].freed.push(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketType;

    fn frame(tag: u8) -> Vec<u8> {
        let mut frame = vec![0u8; 8];
        *PacketHeader::view_mut(&mut frame) = PacketHeader::new(0, 0, PacketType(tag));
        frame
    }

    fn recv(transport: &mut SimTransport) -> Option<(NodeId, Vec<u8>)> {
        let mut buf = [0u8; 64];
        transport
            .poll_receive(&mut buf)
            .map(|(node, len)| (node, buf[..len].to_vec()))
    }

    #[test]
    fn test_pair_delivers_both_ways() {
        let network = SimNetwork::new();
        let (mut a, mut b) = network.pair();

        a.send(NodeId(1), &frame(1)).unwrap();
        b.send(NodeId(1), &frame(2)).unwrap();

        assert_eq!(recv(&mut b), Some((NodeId(1), frame(1))));
        assert_eq!(recv(&mut a), Some((NodeId(1), frame(2))));
        assert_eq!(recv(&mut a), None);
        assert_eq!(network.stats().delivered, 2);
    }

    #[test]
    fn test_node_ids_are_per_host() {
        let network = SimNetwork::new();
        let mut server = network.add_host();
        let mut client = network.add_host();
        network.connect(server.host(), NodeId(3), client.host(), NodeId(1));

        server.send(NodeId(3), &frame(5)).unwrap();
        assert_eq!(recv(&mut client).map(|(node, _)| node), Some(NodeId(1)));
        client.send(NodeId(1), &frame(6)).unwrap();
        assert_eq!(recv(&mut server).map(|(node, _)| node), Some(NodeId(3)));
        assert!(server.send(NodeId(4), &frame(7)).is_err());
    }

    #[test]
    fn test_hold_and_release_reorders() {
        let network = SimNetwork::new();
        let (mut a, mut b) = network.pair();
        network.set_filter(|_| Verdict::Hold);

        for tag in 1..=3 {
            a.send(NodeId(1), &frame(tag)).unwrap();
        }
        assert_eq!(recv(&mut b), None);
        assert_eq!(network.release_held(), 3);

        let order: Vec<u8> = std::iter::from_fn(|| recv(&mut b))
            .map(|(_, bytes)| bytes[6])
            .collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn test_filter_drop_and_inject() {
        let network = SimNetwork::new();
        let (mut a, mut b) = network.pair();
        network.set_filter(|datagram| match datagram.header() {
            Some(header) if header.packet_type == 9 => Verdict::Drop,
            _ => Verdict::Deliver,
        });

        a.send(NodeId(1), &frame(9)).unwrap();
        assert_eq!(recv(&mut b), None);
        assert_eq!(network.stats().dropped, 1);

        network.inject(b.host(), NodeId(7), b"junk");
        assert_eq!(recv(&mut b), Some((NodeId(7), b"junk".to_vec())));
    }

    #[test]
    fn test_readiness_and_freed_nodes() {
        let network = SimNetwork::new();
        let (mut a, _b) = network.pair();

        assert!(a.can_send());
        network.set_can_send(a.host(), false);
        assert!(!a.can_send());

        a.free_node(NodeId(1));
        assert_eq!(network.freed_nodes(a.host()), vec![NodeId(1)]);
    }
}
