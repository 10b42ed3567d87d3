//! # Tick Scheduler
//!
//! Once per simulation tic: resend overdue reliable packets within the
//! bandwidth budget, send keep-alive acks to peers that have not heard
//! from us in a while, and raise timeouts for silent peers.

use tracing::{debug, info, warn};

use crate::clock::{Clock, Tick};
use crate::protocol::{NodeId, PacketHeader, PacketType, HEADER_SIZE};
use crate::transport::Transport;

use super::node::ConnectionState;
use super::{transmit, Session};

impl<T: Transport, C: Clock> Session<T, C> {
    /// Runs the per-tic maintenance.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        self.retransmit(now);
        self.send_keep_alives(now);
        self.detect_timeouts(now);
    }

    fn retransmit(&mut self, now: Tick) {
        let overhead = self.transport.header_overhead();
        let mut budget = self.config.retransmit_budget();
        let mut sent_any = false;

        for index in 0..self.acks.capacity() {
            let slot = self.acks.slot(index);
            if slot.is_free() {
                continue;
            }
            let dest = slot.node;
            let node_index = dest.index();

            if slot.resend_count > self.config.max_resends
                && self.nodes[node_index].state == ConnectionState::Closing
            {
                warn!(
                    node = dest.0,
                    resends = slot.resend_count,
                    "no ack after close, connection lost"
                );
                self.close_node(dest, true);
                continue;
            }
            if !slot.is_due(now, self.config.retry_interval) {
                continue;
            }

            let cost = slot.frame.len() + overhead;
            if sent_any && cost > budget {
                // Out of budget this tic, the slot stays due.
                continue;
            }
            budget = budget.saturating_sub(cost);
            sent_any = true;

            let node = &mut self.nodes[node_index];
            let slot = self.acks.slot_mut(index);
            slot.sent_at = now;
            slot.resend_count = slot.resend_count.saturating_add(1);
            slot.baseline = node.next_seq;
            debug!(node = dest.0, seq = slot.seq, resends = slot.resend_count, "resend");
            self.stats.on_retransmit();
            transmit(
                &mut self.transport,
                &mut self.stats,
                self.dropper.as_mut(),
                node,
                dest,
                &mut slot.frame,
                now,
            );
        }
    }

    fn send_keep_alives(&mut self, now: Tick) {
        for index in 1..self.nodes.len() {
            let node = &self.nodes[index];
            if node.low_edge != 0
                && node.state.is_active()
                && now.wrapping_sub(node.last_ack_sent_at) > self.config.ack_idle_timeout
            {
                self.send_acks(index, now);
            }
        }
    }

    fn detect_timeouts(&mut self, now: Tick) {
        for index in 1..self.nodes.len() {
            let node = &self.nodes[index];
            if node.state != ConnectionState::Open
                || node.timed_out
                || now.wrapping_sub(node.last_packet_received_at) <= self.config.connection_timeout
            {
                continue;
            }

            let mut frame = [0u8; HEADER_SIZE + 1];
            *PacketHeader::view_mut(&mut frame) = PacketHeader::new(0, 0, PacketType::NODE_TIMEOUT);
            frame[HEADER_SIZE] = index as u8;
            if self.loopback.push(&frame).is_err() {
                warn!(node = index, "loopback ring full, timeout deferred");
                continue;
            }

            let node = &mut self.nodes[index];
            node.timed_out = true;
            // Not again before another full timeout.
            node.last_packet_received_at = now;
            warn!(node = index, "connection timed out");
        }
    }

    /// Blocks until every reliable packet is acknowledged or `timeout` tics
    /// have passed, receiving and ticking once per tic. Received payloads
    /// are discarded. Returns true if the ack table drained.
    pub fn wait_all_acks(&mut self, timeout: Tick) -> bool {
        let start = self.clock.now();
        while self.receive().is_some() {}

        while !self.acks.is_empty() && self.clock.now().wrapping_sub(start) < timeout {
            self.clock.sleep_until_next_tick();
            while self.receive().is_some() {}
            self.tick();
        }
        self.acks.is_empty()
    }

    /// Orderly teardown: waits up to `shutdown_timeout` for outstanding
    /// acks, then force-closes every connection and clears all tables.
    pub fn shutdown(&mut self) {
        let drained = self.wait_all_acks(self.config.shutdown_timeout);
        if !drained {
            warn!(pending = self.acks.in_flight(), "shutdown with unacknowledged packets");
        }

        for index in 1..self.nodes.len() {
            if self.nodes[index].state.is_active() {
                self.close_node(NodeId(index as u8), true);
            }
        }
        self.acks.clear();
        self.loopback.clear();
        info!("network session shut down");
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;
    use crate::config::NetConfig;
    use crate::protocol::{Delivery, NodeId, PacketClass, PacketType};
    use crate::simulation::{SimNetwork, Verdict};
    use crate::session::Session;

    #[test]
    fn test_resend_count_saturates() {
        let network = SimNetwork::new();
        let (ta, _tb) = network.pair();
        network.set_filter(|_| Verdict::Drop);
        let clock = ManualClock::new();
        let mut session = Session::new(NetConfig::default(), ta, clock.clone()).unwrap();

        session
            .send(
                NodeId(1),
                Delivery::Reliable(PacketClass::Critical),
                PacketType(8),
                b"forever",
            )
            .unwrap();
        session.acks.slot_mut(0).resend_count = u16::MAX;

        clock.advance(session.config().retry_interval);
        session.tick();

        assert_eq!(session.acks.slot(0).resend_count, u16::MAX);
        assert_eq!(session.stats().retransmits, 1);
        assert_eq!(session.in_flight(NodeId(1)), 1);
    }
}
