//! # Network Statistics
//!
//! Running totals plus rates recomputed once per statistics window, for a
//! UI or telemetry collaborator to read.

use crate::clock::Tick;

/// Snapshot of the session counters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NetStats {
    /// Bytes handed to the transport, per-datagram overhead included.
    pub bytes_sent: u64,
    /// Bytes received, per-datagram overhead included.
    pub bytes_received: u64,
    /// Reliable packets admitted to the ack table.
    pub reliable_sent: u64,
    /// Reliable packets sent again.
    pub retransmits: u64,
    /// Incoming packets that asked for an ack.
    pub acks_received: u64,
    /// Incoming reliable packets that were already received.
    pub duplicates: u64,
    /// Simulation tics run.
    pub tics_run: u64,
    /// Simulation tics missed.
    pub tics_missed: u64,

    /// Send rate over the last window, bytes per second.
    pub send_bps: u32,
    /// Receive rate over the last window, bytes per second.
    pub recv_bps: u32,
    /// Retransmissions per reliable packet sent over the last window, in percent.
    pub lost_percent: f32,
    /// Duplicates per ack request received over the last window, in percent.
    pub dup_percent: f32,
    /// Missed per run simulation tics over the last window, in percent.
    pub game_lost_percent: f32,
}

impl NetStats {
    /// Total datagrams resent and duplicates seen, for quick log lines.
    #[must_use]
    pub const fn anomalies(&self) -> u64 {
        self.retransmits + self.duplicates
    }
}

/// Accumulates counters and turns them into per-window rates.
#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    current: NetStats,
    /// Totals at the start of the running window.
    window_base: NetStats,
    window_start: Tick,
}

impl StatsCollector {
    pub(crate) fn new(now: Tick) -> Self {
        Self {
            window_start: now,
            ..Self::default()
        }
    }

    #[inline]
    pub(crate) const fn snapshot(&self) -> &NetStats {
        &self.current
    }

    #[inline]
    pub(crate) fn on_sent(&mut self, bytes: usize) {
        self.current.bytes_sent += bytes as u64;
    }

    #[inline]
    pub(crate) fn on_received(&mut self, bytes: usize) {
        self.current.bytes_received += bytes as u64;
    }

    #[inline]
    pub(crate) fn on_reliable_sent(&mut self) {
        self.current.reliable_sent += 1;
    }

    #[inline]
    pub(crate) fn on_retransmit(&mut self) {
        self.current.retransmits += 1;
    }

    #[inline]
    pub(crate) fn on_ack_request(&mut self) {
        self.current.acks_received += 1;
    }

    #[inline]
    pub(crate) fn on_duplicate(&mut self) {
        self.current.duplicates += 1;
    }

    pub(crate) fn record_tic(&mut self, missed: u32) {
        self.current.tics_run += 1;
        self.current.tics_missed += u64::from(missed);
    }

    /// Recomputes the rates once `window` tics have passed. Returns true if
    /// it did.
    pub(crate) fn poll(&mut self, now: Tick, window: Tick, tick_rate: u32) -> bool {
        let elapsed = now.wrapping_sub(self.window_start);
        if elapsed < window || elapsed == 0 {
            return false;
        }

        let base = self.window_base;
        let stats = &mut self.current;
        let per_second = |bytes: u64| (bytes * u64::from(tick_rate) / u64::from(elapsed)) as u32;
        stats.send_bps = per_second(stats.bytes_sent - base.bytes_sent);
        stats.recv_bps = per_second(stats.bytes_received - base.bytes_received);
        stats.lost_percent = percent(
            stats.retransmits - base.retransmits,
            stats.reliable_sent - base.reliable_sent,
        );
        stats.dup_percent = percent(
            stats.duplicates - base.duplicates,
            stats.acks_received - base.acks_received,
        );
        stats.game_lost_percent = percent(
            stats.tics_missed - base.tics_missed,
            stats.tics_run - base.tics_run,
        );

        self.window_base = *stats;
        self.window_start = now;
        true
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, whole: u64) -> f32 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f32 / whole as f32
    }
}
