//! # Network Session
//!
//! Owns everything one netgame needs: the node table, the ack pool, the
//! loopback ring, the statistics and the transport. Every operation goes
//! through [`Session`], there is no global state.
//!
//! ## Per-tick usage
//!
//! ```text
//! while let Some(packet) = session.receive() { handle(packet) }
//! session.send(...)?;   // as many as the game needs
//! session.tick();       // retransmit, keep-alive, timeouts
//! clock.sleep_until_next_tick();
//! ```

mod ack_table;
mod lifecycle;
mod loopback;
mod node;
mod scheduler;
mod stats;

pub use ack_table::{AbortFilter, AckTable};
pub use loopback::LoopbackRing;
pub use node::{ConnectionState, Node};
pub use stats::NetStats;

use tracing::{debug, error, info, trace, warn};

use crate::clock::{Clock, Tick};
use crate::config::NetConfig;
use crate::error::{NetError, NetResult};
use crate::protocol::{
    cmp_seq, seal, seq_newer, verify, Delivery, NodeId, PacketClass, PacketHeader, PacketType,
    HEADER_SIZE,
};
use crate::simulation::PacketDropper;
use crate::transport::Transport;

use self::node::WindowVerdict;
use self::stats::StatsCollector;

/// A packet handed to the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Incoming<'a> {
    /// Sender. For a `NODE_TIMEOUT` packet, the node that timed out.
    pub source: NodeId,
    /// Packet type.
    pub packet_type: PacketType,
    /// Payload, header stripped.
    pub payload: &'a [u8],
}

/// One network session.
pub struct Session<T: Transport, C: Clock> {
    config: NetConfig,
    transport: T,
    clock: C,
    /// Node table, index = node id.
    nodes: Box<[Node]>,
    acks: AckTable,
    loopback: LoopbackRing,
    /// Staging buffer for the packet being received.
    inbound: Vec<u8>,
    /// Scratch buffer for the packet being sent.
    outbound: Vec<u8>,
    stats: StatsCollector,
    dropper: Option<PacketDropper>,
    /// Nodes whose close completed since the last `drain_closed`.
    closed: Vec<NodeId>,
}

impl<T: Transport, C: Clock> Session<T, C> {
    /// Creates a session with every node closed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration fails validation.
    pub fn new(config: NetConfig, transport: T, clock: C) -> NetResult<Self> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            nodes: (0..config.max_nodes)
                .map(|_| Node::new(config.ack_queue_capacity))
                .collect(),
            acks: AckTable::new(
                config.ack_pool_size,
                config.urgent_reserve,
                config.max_packet_length,
            ),
            loopback: LoopbackRing::new(config.loopback_capacity),
            inbound: Vec::with_capacity(config.max_packet_length),
            outbound: Vec::with_capacity(config.max_packet_length),
            stats: StatsCollector::new(now),
            dropper: None,
            closed: Vec::new(),
            config,
            transport,
            clock,
        })
    }

    /// Configuration in use.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &NetConfig {
        &self.config
    }

    /// The transport.
    #[inline]
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably. For registering peers and the like.
    #[inline]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The clock.
    #[inline]
    #[must_use]
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    /// State of `node`, None if the id is out of range.
    #[must_use]
    pub fn node(&self, node: NodeId) -> Option<&Node> {
        self.nodes.get(node.index())
    }

    /// The ack pool.
    #[inline]
    #[must_use]
    pub const fn ack_table(&self) -> &AckTable {
        &self.acks
    }

    /// Reliable packets to `node` still waiting for their ack.
    #[must_use]
    pub fn in_flight(&self, node: NodeId) -> usize {
        self.acks.outstanding(node)
    }

    /// Free ack slots. Without `urgent` the critical reserve is excluded.
    #[must_use]
    pub fn free_ack_slots(&self, urgent: bool) -> usize {
        self.acks.free_slots(urgent)
    }

    /// Full-size packets the bandwidth budget allows per tick.
    #[must_use]
    pub fn packets_per_tick(&self) -> usize {
        self.config.packets_per_tick()
    }

    /// Counters and the rates of the last completed window.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &NetStats {
        self.stats.snapshot()
    }

    /// Recomputes the rates if a statistics window has passed. Returns true
    /// if it did.
    pub fn poll_stats(&mut self) -> bool {
        let now = self.clock.now();
        self.stats
            .poll(now, self.config.stats_window, self.config.tick_rate)
    }

    /// Records one simulation tic and how many tics it missed.
    pub fn record_tic(&mut self, missed: u32) {
        self.stats.record_tic(missed);
    }

    /// Installs or removes the outgoing packet drop injector.
    pub fn set_packet_dropper(&mut self, dropper: Option<PacketDropper>) {
        self.dropper = dropper;
    }

    /// The installed drop injector.
    pub fn packet_dropper_mut(&mut self) -> Option<&mut PacketDropper> {
        self.dropper.as_mut()
    }

    /// Nodes whose connection closed since the last call. Collaborators
    /// use this to abort per-node work.
    pub fn drain_closed(&mut self) -> std::vec::Drain<'_, NodeId> {
        self.closed.drain(..)
    }

    fn check_node(&self, node: NodeId) -> NetResult<usize> {
        let index = node.index();
        if index < self.nodes.len() {
            Ok(index)
        } else {
            Err(NetError::InvalidNode(node.0))
        }
    }

    /// Sends a packet.
    ///
    /// Packets to [`NodeId::SELF`] go through the loopback ring. Reliable
    /// packets are kept and resent by [`tick`](Self::tick) until the peer
    /// acknowledges them.
    ///
    /// # Errors
    ///
    /// - `PayloadTooLarge` / `InvalidNode` for bad arguments
    /// - `ReservedPacketType` for `NOTHING` and `NODE_TIMEOUT`
    /// - `LoopbackFull` if the loopback ring is full
    /// - `WindowFull` if the peer is too far behind on acks
    /// - `OutOfBandwidth` for best-effort packets while the transport is busy
    /// - `AckPoolExhausted` for best-effort packets when only the reserve is left
    /// - `ConnectionLost` for critical packets when the pool is empty; fatal
    pub fn send(
        &mut self,
        dest: NodeId,
        delivery: Delivery,
        packet_type: PacketType,
        payload: &[u8],
    ) -> NetResult<()> {
        let max = self.config.max_payload();
        if payload.len() > max {
            return Err(NetError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }
        if packet_type.is_control() {
            return Err(NetError::ReservedPacketType(packet_type.0));
        }
        let index = self.check_node(dest)?;

        if dest.is_self() {
            build_frame(&mut self.outbound, 0, packet_type, payload);
            return self.loopback.push(&self.outbound).map_err(|e| {
                warn!(packet_type = packet_type.0, "loopback ring full, local packet dropped");
                e
            });
        }

        let now = self.clock.now();
        let class = match delivery {
            Delivery::Unreliable => {
                build_frame(&mut self.outbound, 0, packet_type, payload);
                self.dispatch_outbound(index, now);
                return Ok(());
            }
            Delivery::Reliable(class) => class,
        };

        let node = &self.nodes[index];
        let window_end = node
            .remote_low_edge
            .wrapping_add(self.config.ack_queue_capacity as u8);
        if cmp_seq(window_end, node.next_seq).is_lt() {
            debug!(node = dest.0, remote = node.remote_low_edge, next = node.next_seq, "too fast");
            return Err(NetError::WindowFull { node: dest.0 });
        }

        let ready = self.transport.can_send();
        if !ready && class == PacketClass::BestEffort {
            return Err(NetError::OutOfBandwidth);
        }

        let slot = self.acks.claim(dest, class).map_err(|e| {
            if e.is_fatal() {
                error!(node = dest.0, pool = self.acks.capacity(), "ack pool exhausted by critical traffic");
            } else {
                debug!(node = dest.0, "no free ack slot for best-effort packet");
            }
            e
        })?;

        let node = &mut self.nodes[index];
        if node.open(now) {
            info!(node = dest.0, "connection opened");
        }
        let seq = node.take_sequence();
        build_frame(&mut self.outbound, seq, packet_type, payload);
        self.stats.on_reliable_sent();

        if ready {
            self.acks
                .fill(slot, dest, seq, packet_type, &self.outbound, now, 0);
            self.dispatch_outbound(index, now);
        } else {
            // The retransmitter sends it on the next tick.
            let sent_at = now.wrapping_sub(self.config.retry_interval);
            self.acks
                .fill(slot, dest, seq, packet_type, &self.outbound, sent_at, 1);
            debug!(node = dest.0, seq, "transport busy, send deferred");
        }
        Ok(())
    }

    /// Sends the scratch frame to the node at `index`.
    fn dispatch_outbound(&mut self, index: usize, now: Tick) {
        transmit(
            &mut self.transport,
            &mut self.stats,
            self.dropper.as_mut(),
            &mut self.nodes[index],
            NodeId(index as u8),
            &mut self.outbound,
            now,
        );
    }

    /// Sends the ids held out of order to the node at `index` in a pure-ack
    /// packet.
    pub(crate) fn send_acks(&mut self, index: usize, now: Tick) {
        let node = &self.nodes[index];
        self.outbound.clear();
        self.outbound.resize(HEADER_SIZE, 0);
        *PacketHeader::view_mut(&mut self.outbound) = PacketHeader::new(0, 0, PacketType::NOTHING);
        self.outbound.extend(node.out_of_order());
        self.dispatch_outbound(index, now);
    }

    /// Returns the next packet for the application, or None once nothing
    /// is waiting.
    ///
    /// Local packets come first. Pure acks, duplicates and damaged packets
    /// are handled here and never returned.
    pub fn receive(&mut self) -> Option<Incoming<'_>> {
        loop {
            if self.loopback.pop_into(&mut self.inbound) {
                let Some(header) = PacketHeader::read(&self.inbound) else {
                    continue;
                };
                let packet_type = header.packet_type();
                let mut source = NodeId::SELF;
                if packet_type == PacketType::NODE_TIMEOUT {
                    if let Some(&node) = self.inbound.get(HEADER_SIZE) {
                        source = NodeId(node);
                        self.close_node(source, false);
                    }
                }
                return Some(Incoming {
                    source,
                    packet_type,
                    payload: &self.inbound[HEADER_SIZE..],
                });
            }

            if !self.transport.can_get() {
                return None;
            }
            self.inbound.resize(self.config.max_packet_length, 0);
            let (source, len) = self.transport.poll_receive(&mut self.inbound)?;
            self.inbound.truncate(len);

            if let Some(packet_type) = self.accept(source) {
                return Some(Incoming {
                    source,
                    packet_type,
                    payload: &self.inbound[HEADER_SIZE..],
                });
            }
        }
    }

    /// Runs the received datagram in `inbound` through the ack machinery.
    /// Returns its type if the payload goes to the application.
    fn accept(&mut self, source: NodeId) -> Option<PacketType> {
        let index = source.index();
        if source.is_self() || index >= self.nodes.len() {
            debug!(node = source.0, "datagram from invalid node dropped");
            return None;
        }
        let now = self.clock.now();
        self.stats
            .on_received(self.inbound.len() + self.transport.header_overhead());

        if !verify(&self.inbound) {
            warn!(node = source.0, len = self.inbound.len(), "bad packet checksum, closing connection");
            self.close_node(source, false);
            return None;
        }
        let header = *PacketHeader::read(&self.inbound)?;
        trace!(
            node = source.0,
            ack = header.ack,
            ackret = header.ack_return,
            len = self.inbound.len(),
            packet_type = header.packet_type,
            "recv"
        );
        if header.packet_type() == PacketType::NODE_TIMEOUT {
            debug!(node = source.0, "timeout control packet from the wire dropped");
            return None;
        }

        let node = &mut self.nodes[index];
        node.last_packet_received_at = now;

        if header.ack_return != 0 && seq_newer(header.ack_return, node.remote_low_edge) {
            node.remote_low_edge = header.ack_return;
            if self.acks.acknowledge(source, header.ack_return) > 0
                && self.finish_pending_close(source)
            {
                return None;
            }
        }

        let node = &mut self.nodes[index];
        if header.ack != 0 {
            self.stats.on_ack_request();
            if node.open(now) {
                info!(node = source.0, "connection opened");
            }
            match node.on_receive_ack_request(header.ack) {
                WindowVerdict::Accepted => {}
                WindowVerdict::Duplicate => {
                    self.stats.on_duplicate();
                    debug!(node = source.0, ack = header.ack, "duplicate packet discarded");
                    return None;
                }
                WindowVerdict::QueueFull => {
                    debug!(node = source.0, ack = header.ack, "out-of-order queue full, packet discarded");
                    return None;
                }
            }
        }

        let packet_type = header.packet_type();
        if packet_type == PacketType::NOTHING {
            let freed = self
                .acks
                .process_ack_list(source, &self.inbound[HEADER_SIZE..]);
            if freed > 0 {
                self.finish_pending_close(source);
            }
            return None;
        }
        Some(packet_type)
    }
}

/// Writes a header and `payload` into `frame`.
fn build_frame(frame: &mut Vec<u8>, ack: u8, packet_type: PacketType, payload: &[u8]) {
    frame.clear();
    frame.resize(HEADER_SIZE, 0);
    *PacketHeader::view_mut(frame) = PacketHeader::new(ack, 0, packet_type);
    frame.extend_from_slice(payload);
}

/// Stamps the current cumulative ack of `node` into `frame`, seals it and
/// hands it to the transport.
fn transmit<T: Transport>(
    transport: &mut T,
    stats: &mut StatsCollector,
    dropper: Option<&mut PacketDropper>,
    node: &mut Node,
    dest: NodeId,
    frame: &mut [u8],
    now: Tick,
) {
    let header = PacketHeader::view_mut(frame);
    header.ack_return = node.next_ack_to_send(now);
    let header = *header;
    seal(frame);

    trace!(
        node = dest.0,
        ack = header.ack,
        ackret = header.ack_return,
        len = frame.len(),
        packet_type = header.packet_type,
        "send"
    );
    let packet_type = header.packet_type();
    stats.on_sent(frame.len() + transport.header_overhead());

    if dropper.is_some_and(|dropper| dropper.should_drop(packet_type)) {
        trace!(node = dest.0, packet_type = packet_type.0, "packet dropped by injector");
        return;
    }
    if let Err(e) = transport.send(dest, frame) {
        debug!(node = dest.0, error = %e, "send failed");
    }
}
