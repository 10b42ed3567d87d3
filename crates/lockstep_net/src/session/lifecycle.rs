//! # Connection Lifecycle
//!
//! ```text
//! Closed ──send/recv reliable──► Open ──close/timeout/bad checksum──► Closing
//!    ▲                                                                 │
//!    └──────────── last ack slot freed, or forced close ◄──────────────┘
//! ```
//!
//! Closing sends the pure-ack packet twice so a single lost datagram in
//! either direction cannot leave the peer waiting on an ack forever.

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::protocol::NodeId;
use crate::transport::Transport;

use super::node::ConnectionState;
use super::{AbortFilter, Session};

impl<T: Transport, C: Clock> Session<T, C> {
    /// Starts an orderly close of `node`. The connection stays Closing
    /// until every reliable packet to it is acknowledged.
    ///
    /// Node 0 and out-of-range ids are ignored.
    pub fn close(&mut self, node: NodeId) {
        self.close_node(node, false);
    }

    /// Closes `node` immediately, dropping its in-flight packets.
    pub fn force_close(&mut self, node: NodeId) {
        self.close_node(node, true);
    }

    /// Rolls back the last packet accepted from `node` so the peer sends it
    /// again. For when the application cannot take the payload right now.
    pub fn unacknowledge_last(&mut self, node: NodeId) {
        if node.is_self() {
            return;
        }
        let Some(state) = self.nodes.get_mut(node.index()) else {
            warn!(node = node.0, "unacknowledge on invalid node ignored");
            return;
        };
        if state.unacknowledge_last() {
            debug!(node = node.0, low_edge = state.low_edge(), "packet unacknowledged");
        }
    }

    /// Cancels in-flight reliable packets matching `filter`, such as
    /// pending file fragments. Closes waiting only on those packets
    /// complete.
    pub fn abort(&mut self, filter: AbortFilter) {
        let mut touched = self.acks.abort(filter);
        touched.sort_unstable();
        touched.dedup();
        for node in touched {
            self.finish_pending_close(node);
        }
    }

    pub(crate) fn close_node(&mut self, node: NodeId, force: bool) {
        if node.is_self() {
            return;
        }
        let index = node.index();
        if index >= self.nodes.len() {
            warn!(node = node.0, "close on invalid node ignored");
            return;
        }
        if self.nodes[index].state == ConnectionState::Closed && !self.acks.references(node) {
            // Never opened, but the transport may have bound the id anyway.
            self.transport.free_node(node);
            return;
        }

        self.nodes[index].state = ConnectionState::Closing;
        if self.nodes[index].low_edge != 0 {
            let now = self.clock.now();
            self.send_acks(index, now);
            self.send_acks(index, now);
        }

        if self.acks.references(node) {
            if !force {
                debug!(node = node.0, pending = self.acks.outstanding(node), "close waits for acks");
                return;
            }
            self.acks.release_node(node);
        }
        self.finish_close(node);
    }

    /// Completes the close of a Closing node once nothing references it.
    /// Returns true if the node was closed.
    pub(crate) fn finish_pending_close(&mut self, node: NodeId) -> bool {
        let closing = self
            .nodes
            .get(node.index())
            .is_some_and(|state| state.state == ConnectionState::Closing);
        if !closing || self.acks.references(node) {
            return false;
        }
        self.close_node(node, false);
        true
    }

    fn finish_close(&mut self, node: NodeId) {
        self.nodes[node.index()].reset();
        self.transport.free_node(node);
        self.closed.push(node);
        info!(node = node.0, "connection closed");
    }
}
