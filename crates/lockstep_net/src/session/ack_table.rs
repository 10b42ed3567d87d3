//! # Ack Table
//!
//! Fixed pool of reliable packets waiting for their ack. Each slot keeps
//! a frozen copy of the frame so it can be resent verbatim; only the
//! piggybacked ack fields and the checksum are refreshed on the way out.
//!
//! The pool keeps a reserve of free slots that only critical traffic may
//! take, so best-effort bulk (file fragments and the like) can never
//! starve the packets the simulation depends on.

use crate::clock::Tick;
use crate::error::{NetError, NetResult};
use crate::protocol::{seq_newer, NodeId, PacketClass, PacketType};

/// Which in-flight packets to cancel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortFilter {
    /// Every packet of this type.
    Type(PacketType),
    /// Everything.
    All,
}

impl AbortFilter {
    fn matches(self, packet_type: PacketType) -> bool {
        match self {
            Self::Type(wanted) => wanted == packet_type,
            Self::All => true,
        }
    }
}

/// One in-flight reliable packet.
#[derive(Clone, Debug)]
pub(crate) struct AckSlot {
    /// Sequence awaiting its ack. 0 = free.
    pub(crate) seq: u8,
    pub(crate) node: NodeId,
    pub(crate) sent_at: Tick,
    pub(crate) resend_count: u16,
    /// Outgoing sequence of the node at the last transmission. Acks for
    /// anything at or past it while this slot stays unacked mean it was
    /// probably lost.
    pub(crate) baseline: u8,
    pub(crate) packet_type: PacketType,
    /// Full frame, header included.
    pub(crate) frame: Vec<u8>,
}

impl AckSlot {
    fn new(max_packet_length: usize) -> Self {
        Self {
            seq: 0,
            node: NodeId::SELF,
            sent_at: 0,
            resend_count: 0,
            baseline: 0,
            packet_type: PacketType::NOTHING,
            frame: Vec::with_capacity(max_packet_length),
        }
    }

    #[inline]
    pub(crate) const fn is_free(&self) -> bool {
        self.seq == 0
    }

    #[inline]
    fn is_for(&self, node: NodeId) -> bool {
        !self.is_free() && self.node == node
    }

    /// Returns true once `retry_interval` tics have passed since the last send.
    #[inline]
    pub(crate) fn is_due(&self, now: Tick, retry_interval: Tick) -> bool {
        !self.is_free() && now.wrapping_sub(self.sent_at) >= retry_interval
    }
}

/// Pool of in-flight reliable packets.
#[derive(Debug)]
pub struct AckTable {
    slots: Box<[AckSlot]>,
    urgent_reserve: usize,
    in_use: usize,
}

impl AckTable {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(pool_size: usize, urgent_reserve: usize, max_packet_length: usize) -> Self {
        Self {
            slots: (0..pool_size)
                .map(|_| AckSlot::new(max_packet_length))
                .collect(),
            urgent_reserve,
            in_use: 0,
        }
    }

    /// Total number of slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of packets waiting for an ack.
    #[inline]
    #[must_use]
    pub const fn in_flight(&self) -> usize {
        self.in_use
    }

    /// Returns true if nothing is waiting for an ack.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.in_use == 0
    }

    /// Free slots usable by a sender. Non-urgent callers do not see the
    /// reserve.
    #[must_use]
    pub fn free_slots(&self, urgent: bool) -> usize {
        let free = self.capacity() - self.in_use;
        if urgent {
            free
        } else {
            free.saturating_sub(self.urgent_reserve)
        }
    }

    /// Number of packets to `node` waiting for an ack.
    #[must_use]
    pub fn outstanding(&self, node: NodeId) -> usize {
        self.slots.iter().filter(|slot| slot.is_for(node)).count()
    }

    /// Returns true if any slot belongs to `node`.
    #[must_use]
    pub fn references(&self, node: NodeId) -> bool {
        self.slots.iter().any(|slot| slot.is_for(node))
    }

    /// Finds a free slot for a packet of `class` to `node`.
    ///
    /// # Errors
    ///
    /// `AckPoolExhausted` when a best-effort packet would dip into the
    /// reserve, `ConnectionLost` when a critical packet finds no slot at all.
    pub(crate) fn claim(&self, node: NodeId, class: PacketClass) -> NetResult<usize> {
        if self.free_slots(class.is_critical()) == 0 {
            return Err(match class {
                PacketClass::Critical => NetError::ConnectionLost { node: node.0 },
                PacketClass::BestEffort => NetError::AckPoolExhausted,
            });
        }
        self.slots
            .iter()
            .position(AckSlot::is_free)
            .ok_or(NetError::AckPoolExhausted)
    }

    /// Stores a packet in a slot returned by [`claim`](Self::claim).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn fill(
        &mut self,
        index: usize,
        node: NodeId,
        seq: u8,
        packet_type: PacketType,
        frame: &[u8],
        sent_at: Tick,
        resend_count: u16,
    ) {
        debug_assert!(seq != 0, "sequence 0 marks a free slot");
        let slot = &mut self.slots[index];
        debug_assert!(slot.is_free());
        slot.seq = seq;
        slot.node = node;
        slot.sent_at = sent_at;
        slot.resend_count = resend_count;
        slot.baseline = seq;
        slot.packet_type = packet_type;
        slot.frame.clear();
        slot.frame.extend_from_slice(frame);
        self.in_use += 1;
    }

    fn free(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        if !slot.is_free() {
            slot.seq = 0;
            self.in_use -= 1;
        }
    }

    /// Frees every slot to `node` at or behind `ack_return`. Returns how
    /// many were freed; acking the same value twice frees nothing the
    /// second time.
    pub fn acknowledge(&mut self, node: NodeId, ack_return: u8) -> usize {
        if ack_return == 0 {
            return 0;
        }
        let mut freed = 0;
        for index in 0..self.slots.len() {
            let slot = &self.slots[index];
            if slot.is_for(node) && !seq_newer(slot.seq, ack_return) {
                self.free(index);
                freed += 1;
            }
        }
        freed
    }

    /// Handles the list of sequences `source` holds out of order.
    ///
    /// Exact hits are freed. Every listed sequence at or past a slot's
    /// baseline pulls that slot's resend one tic closer. Returns how many
    /// slots were freed.
    pub fn process_ack_list(&mut self, source: NodeId, seen: &[u8]) -> usize {
        let mut freed = 0;
        for &ack in seen.iter().filter(|&&ack| ack != 0) {
            for index in 0..self.slots.len() {
                let slot = &mut self.slots[index];
                if !slot.is_for(source) {
                    continue;
                }
                if slot.seq == ack {
                    self.free(index);
                    freed += 1;
                } else if !seq_newer(slot.baseline, ack) {
                    slot.sent_at = slot.sent_at.saturating_sub(1);
                }
            }
        }
        freed
    }

    /// Cancels in-flight packets matching `filter`. Returns the nodes that
    /// lost a slot, possibly with repeats.
    pub fn abort(&mut self, filter: AbortFilter) -> Vec<NodeId> {
        let mut touched = Vec::new();
        for index in 0..self.slots.len() {
            let slot = &self.slots[index];
            if !slot.is_free() && filter.matches(slot.packet_type) {
                touched.push(slot.node);
                self.free(index);
            }
        }
        touched
    }

    /// Frees every slot belonging to `node`.
    pub fn release_node(&mut self, node: NodeId) -> usize {
        let mut freed = 0;
        for index in 0..self.slots.len() {
            if self.slots[index].is_for(node) {
                self.free(index);
                freed += 1;
            }
        }
        freed
    }

    /// Frees everything.
    pub fn clear(&mut self) {
        for index in 0..self.slots.len() {
            self.free(index);
        }
    }

    #[inline]
    pub(crate) fn slot(&self, index: usize) -> &AckSlot {
        &self.slots[index]
    }

    #[inline]
    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut AckSlot {
        &mut self.slots[index]
    }

    /// Lowest sequence still waiting for an ack from `node`, if any.
    #[must_use]
    pub fn oldest_unacked(&self, node: NodeId) -> Option<u8> {
        self.slots
            .iter()
            .filter(|slot| slot.is_for(node))
            .map(|slot| slot.seq)
            .reduce(|oldest, seq| if seq_newer(oldest, seq) { seq } else { oldest })
    }
}
