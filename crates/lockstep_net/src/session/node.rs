//! # Node State
//!
//! Per-peer bookkeeping: the outgoing sequence counter, the receiver-side
//! sliding window (cumulative low edge plus a bounded out-of-order queue)
//! and the liveness timestamps the scheduler watches.

use std::collections::VecDeque;

use crate::clock::Tick;
use crate::protocol::{next_seq, prev_seq, seq_newer};

/// Connection state of a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Slot unused.
    #[default]
    Closed,
    /// At least one sequence sent to or received from the peer.
    Open,
    /// Close requested, waiting for outstanding acks.
    Closing,
}

impl ConnectionState {
    /// Returns true unless the slot is unused.
    #[inline]
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// Outcome of an incoming ack request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WindowVerdict {
    /// First time seen. The payload goes to the application.
    Accepted,
    /// Already received. Dropped.
    Duplicate,
    /// A gap that does not fit in the queue. Dropped, the sender retries.
    QueueFull,
}

/// The last accepted sequence and the low edge before it, kept so the
/// acceptance can be rolled back once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Accepted {
    seq: u8,
    previous_low_edge: u8,
}

/// One peer.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) state: ConnectionState,
    /// Timeout already reported for this connection.
    pub(crate) timed_out: bool,
    /// Sequence the next reliable packet will carry. Never 0.
    pub(crate) next_seq: u8,
    /// Highest contiguous sequence received. 0 until the first one.
    pub(crate) low_edge: u8,
    /// Sequences received ahead of the low edge.
    queue: VecDeque<u8>,
    capacity: usize,
    /// Latest cumulative ack the peer returned to us.
    pub(crate) remote_low_edge: u8,
    pub(crate) last_ack_sent_at: Tick,
    pub(crate) last_packet_received_at: Tick,
    last_accepted: Option<Accepted>,
}

impl Node {
    /// Creates a closed node with an out-of-order queue of `capacity`.
    #[must_use]
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: ConnectionState::Closed,
            timed_out: false,
            next_seq: 1,
            low_edge: 0,
            queue: VecDeque::with_capacity(capacity),
            capacity,
            remote_low_edge: 0,
            last_ack_sent_at: 0,
            last_packet_received_at: 0,
            last_accepted: None,
        }
    }

    /// Connection state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Highest contiguous sequence received from the peer.
    #[inline]
    #[must_use]
    pub const fn low_edge(&self) -> u8 {
        self.low_edge
    }

    /// Sequence the next reliable packet to the peer will carry.
    #[inline]
    #[must_use]
    pub const fn next_outgoing_sequence(&self) -> u8 {
        self.next_seq
    }

    /// Sequences held out of order, oldest first.
    pub fn out_of_order(&self) -> impl Iterator<Item = u8> + '_ {
        self.queue.iter().copied()
    }

    /// Returns true if the timeout for this connection was already raised.
    #[inline]
    #[must_use]
    pub const fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Marks a closed slot open and starts its liveness timers. Returns
    /// true if it was closed.
    pub(crate) fn open(&mut self, now: Tick) -> bool {
        if self.state != ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Open;
        self.last_packet_received_at = now;
        self.last_ack_sent_at = now;
        true
    }

    /// Takes the next outgoing sequence.
    pub(crate) fn take_sequence(&mut self) -> u8 {
        let seq = self.next_seq;
        self.next_seq = next_seq(seq);
        seq
    }

    /// Runs an incoming ack request through the window.
    pub(crate) fn on_receive_ack_request(&mut self, seq: u8) -> WindowVerdict {
        if !seq_newer(seq, self.low_edge) || self.queue.contains(&seq) {
            return WindowVerdict::Duplicate;
        }

        let previous_low_edge = self.low_edge;
        if seq == next_seq(self.low_edge) {
            self.low_edge = seq;
            while let Some(pos) = self.queue.iter().position(|&s| s == next_seq(self.low_edge)) {
                self.queue.remove(pos);
                self.low_edge = next_seq(self.low_edge);
            }
            let low_edge = self.low_edge;
            self.queue.retain(|&s| seq_newer(s, low_edge));
        } else if self.queue.len() < self.capacity {
            self.queue.push_back(seq);
        } else {
            return WindowVerdict::QueueFull;
        }

        self.last_accepted = Some(Accepted {
            seq,
            previous_low_edge,
        });
        WindowVerdict::Accepted
    }

    /// Returns the cumulative ack to piggyback and notes that it was sent.
    pub(crate) fn next_ack_to_send(&mut self, now: Tick) -> u8 {
        self.last_ack_sent_at = now;
        self.low_edge
    }

    /// Forgets the last accepted sequence so the peer has to send it again.
    ///
    /// Only one step back is supported. Returns false if there is nothing
    /// to roll back.
    pub(crate) fn unacknowledge_last(&mut self) -> bool {
        let Some(Accepted {
            seq,
            previous_low_edge,
        }) = self.last_accepted.take()
        else {
            return false;
        };

        if let Some(pos) = self.queue.iter().position(|&s| s == seq) {
            // Arrived out of order, only the queue entry goes.
            self.queue.remove(pos);
            return true;
        }
        if !seq_newer(self.low_edge, previous_low_edge) {
            return false;
        }

        // It advanced the low edge and may have drained the queue behind it;
        // those later sequences are still received.
        let mut restored = self.low_edge;
        while restored != seq {
            self.queue.push_front(restored);
            restored = prev_seq(restored);
        }
        self.low_edge = previous_low_edge;
        true
    }

    /// Back to the state of an unused slot.
    pub(crate) fn reset(&mut self) {
        self.state = ConnectionState::Closed;
        self.timed_out = false;
        self.next_seq = 1;
        self.low_edge = 0;
        self.queue.clear();
        self.remote_low_edge = 0;
        self.last_ack_sent_at = 0;
        self.last_packet_received_at = 0;
        self.last_accepted = None;
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    use super::*;

    fn node() -> Node {
        Node::new(8)
    }

    #[test]
    fn test_in_order() {
        let mut node = node();
        for seq in 1..=4 {
            assert_eq!(node.on_receive_ack_request(seq), WindowVerdict::Accepted);
        }
        assert_eq!(node.low_edge(), 4);
        assert_eq!(node.out_of_order().count(), 0);
    }

    #[test]
    fn test_out_of_order_convergence() {
        let mut node = node();
        for seq in [3, 1, 2, 5, 4] {
            assert_eq!(node.on_receive_ack_request(seq), WindowVerdict::Accepted);
        }
        assert_eq!(node.low_edge(), 5);
        assert_eq!(node.out_of_order().count(), 0);
    }

    #[test]
    fn test_any_arrival_order_converges() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut order: Vec<u8> = (1..=8).collect();

        for _ in 0..50 {
            order.shuffle(&mut rng);
            let mut node = node();
            for &seq in &order {
                assert_eq!(node.on_receive_ack_request(seq), WindowVerdict::Accepted);
            }
            assert_eq!(node.low_edge(), 8, "order {order:?}");
            assert_eq!(node.out_of_order().count(), 0);
        }
    }

    #[test]
    fn test_duplicates() {
        let mut node = node();
        node.on_receive_ack_request(1);
        node.on_receive_ack_request(3);

        assert_eq!(node.on_receive_ack_request(1), WindowVerdict::Duplicate);
        assert_eq!(node.on_receive_ack_request(3), WindowVerdict::Duplicate);
        assert_eq!(node.low_edge(), 1);
        assert_eq!(node.out_of_order().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_queue_full_drops() {
        let mut node = Node::new(2);
        assert_eq!(node.on_receive_ack_request(3), WindowVerdict::Accepted);
        assert_eq!(node.on_receive_ack_request(4), WindowVerdict::Accepted);
        assert_eq!(node.on_receive_ack_request(5), WindowVerdict::QueueFull);

        // In-order sequences never need a queue entry.
        assert_eq!(node.on_receive_ack_request(1), WindowVerdict::Accepted);
        assert_eq!(node.on_receive_ack_request(2), WindowVerdict::Accepted);
        assert_eq!(node.low_edge(), 4);
        assert_eq!(node.on_receive_ack_request(5), WindowVerdict::Accepted);
        assert_eq!(node.low_edge(), 5);
    }

    #[test]
    fn test_window_wraps() {
        let mut node = node();
        node.low_edge = 254;
        assert_eq!(node.on_receive_ack_request(1), WindowVerdict::Accepted);
        assert_eq!(node.on_receive_ack_request(3), WindowVerdict::Accepted);
        assert_eq!(node.out_of_order().collect::<Vec<_>>(), vec![1, 3]);

        // 255 is followed by 1.
        assert_eq!(node.on_receive_ack_request(255), WindowVerdict::Accepted);
        assert_eq!(node.low_edge(), 1);
        assert_eq!(node.on_receive_ack_request(2), WindowVerdict::Accepted);
        assert_eq!(node.low_edge(), 3);
        assert_eq!(node.out_of_order().count(), 0);
        assert_eq!(node.on_receive_ack_request(254), WindowVerdict::Duplicate);
    }

    #[test]
    fn test_unacknowledge_in_order() {
        let mut node = node();
        node.on_receive_ack_request(1);
        node.on_receive_ack_request(2);

        assert!(node.unacknowledge_last());
        assert_eq!(node.low_edge(), 1);
        assert_eq!(node.on_receive_ack_request(2), WindowVerdict::Accepted);
    }

    #[test]
    fn test_unacknowledge_first_packet() {
        let mut node = node();
        node.on_receive_ack_request(1);
        assert!(node.unacknowledge_last());
        assert_eq!(node.low_edge(), 0);
        assert!(!node.unacknowledge_last());
    }

    #[test]
    fn test_unacknowledge_queued() {
        let mut node = node();
        node.on_receive_ack_request(1);
        node.on_receive_ack_request(3);

        assert!(node.unacknowledge_last());
        assert_eq!(node.low_edge(), 1);
        assert_eq!(node.out_of_order().count(), 0);
    }

    #[test]
    fn test_unacknowledge_after_drain() {
        let mut node = node();
        for seq in [2, 3, 1] {
            node.on_receive_ack_request(seq);
        }
        assert_eq!(node.low_edge(), 3);

        assert!(node.unacknowledge_last());
        assert_eq!(node.low_edge(), 0);
        assert_eq!(node.out_of_order().collect::<Vec<_>>(), vec![2, 3]);

        // Only 1 has to come again.
        assert_eq!(node.on_receive_ack_request(2), WindowVerdict::Duplicate);
        assert_eq!(node.on_receive_ack_request(1), WindowVerdict::Accepted);
        assert_eq!(node.low_edge(), 3);
    }

    #[test]
    fn test_reset() {
        let mut node = node();
        node.open(10);
        node.take_sequence();
        node.on_receive_ack_request(4);
        node.timed_out = true;

        node.reset();
        assert_eq!(node.state(), ConnectionState::Closed);
        assert_eq!(node.next_outgoing_sequence(), 1);
        assert_eq!(node.low_edge(), 0);
        assert_eq!(node.out_of_order().count(), 0);
        assert!(!node.timed_out());
    }

    #[test]
    fn test_sequence_skips_zero() {
        let mut node = node();
        node.next_seq = 255;
        assert_eq!(node.take_sequence(), 255);
        assert_eq!(node.take_sequence(), 1);
    }
}
