//! # Session Configuration
//!
//! Tunables for one network session. The defaults reproduce a 35 Hz
//! netgame on a 30 KB/s link; every pool size and timer is configurable
//! because the right values depend on the game and the network.
//!
//! ```toml
//! tick_rate = 35
//! bytes_per_second = 60000
//! max_packet_length = 1024
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::clock::Tick;
use crate::error::{NetError, NetResult};
use crate::protocol::HEADER_SIZE;
use crate::{DEFAULT_TICK_RATE, MAX_PACKET_LENGTH, MIN_PACKET_LENGTH};

/// Lowest accepted bandwidth budget, in bytes per second.
pub const MIN_BYTES_PER_SECOND: u32 = 1000;

/// Configuration of a network session.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct NetConfig {
    /// Simulation tics per second.
    pub tick_rate: u32,
    /// Size of the node table. Node 0 is the local process.
    pub max_nodes: usize,
    /// Number of in-flight reliable packets across all nodes.
    pub ack_pool_size: usize,
    /// Free ack slots that only critical packets may take.
    pub urgent_reserve: usize,
    /// Capacity of each node's out-of-order queue. Also bounds how far a
    /// sender may run ahead of the peer's cumulative ack.
    pub ack_queue_capacity: usize,
    /// Capacity of the loopback ring.
    pub loopback_capacity: usize,
    /// Tics to wait for an ack before resending.
    pub retry_interval: Tick,
    /// Resends after which a closing connection is considered lost.
    pub max_resends: u16,
    /// Idle tics after which a pure-ack keep-alive is sent.
    pub ack_idle_timeout: Tick,
    /// Tics of silence after which a peer is reported as timed out.
    pub connection_timeout: Tick,
    /// Bandwidth budget.
    pub bytes_per_second: u32,
    /// Maximum datagram length, header included.
    pub max_packet_length: usize,
    /// Length of the statistics window, in tics.
    pub stats_window: Tick,
    /// How long an orderly shutdown waits for outstanding acks, in tics.
    pub shutdown_timeout: Tick,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_nodes: 32,
            ack_pool_size: 96,
            urgent_reserve: 10,
            ack_queue_capacity: 96,
            loopback_capacity: 8,
            retry_interval: 14,
            max_resends: 20,
            ack_idle_timeout: DEFAULT_TICK_RATE / 11,
            connection_timeout: 10 * DEFAULT_TICK_RATE,
            bytes_per_second: 30_000,
            max_packet_length: MAX_PACKET_LENGTH,
            stats_window: 2 * DEFAULT_TICK_RATE,
            shutdown_timeout: 5 * DEFAULT_TICK_RATE,
        }
    }
}

impl NetConfig {
    /// Parses a configuration from TOML text. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the text does not parse or fails validation.
    pub fn from_toml_str(text: &str) -> NetResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| NetError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `InvalidConfig` otherwise.
    pub fn load(path: impl AsRef<Path>) -> NetResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Clamps the bandwidth and packet length into their supported ranges.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.bytes_per_second = self.bytes_per_second.max(MIN_BYTES_PER_SECOND);
        self.max_packet_length = self
            .max_packet_length
            .clamp(MIN_PACKET_LENGTH, MAX_PACKET_LENGTH);
        self
    }

    /// Checks the invariants the session relies on.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first violated constraint.
    pub fn validate(&self) -> NetResult<()> {
        if self.tick_rate == 0 {
            return Err(invalid("tick_rate must be positive"));
        }
        if self.max_nodes < 2 || self.max_nodes > usize::from(u8::MAX) {
            return Err(invalid(format!(
                "max_nodes must be in 2..=255, got {}",
                self.max_nodes
            )));
        }
        if self.ack_pool_size == 0 {
            return Err(invalid("ack_pool_size must be positive"));
        }
        if self.urgent_reserve >= self.ack_pool_size {
            return Err(invalid(format!(
                "urgent_reserve ({}) must be smaller than ack_pool_size ({})",
                self.urgent_reserve, self.ack_pool_size
            )));
        }
        // The window must stay inside half of the sequence circle or the
        // comparator can no longer tell old from new.
        if self.ack_queue_capacity == 0 || self.ack_queue_capacity > 127 {
            return Err(invalid(format!(
                "ack_queue_capacity must be in 1..=127, got {}",
                self.ack_queue_capacity
            )));
        }
        if self.loopback_capacity == 0 {
            return Err(invalid("loopback_capacity must be positive"));
        }
        if self.retry_interval == 0 {
            return Err(invalid("retry_interval must be positive"));
        }
        if self.stats_window == 0 {
            return Err(invalid("stats_window must be positive"));
        }
        if self.bytes_per_second < MIN_BYTES_PER_SECOND {
            return Err(invalid(format!(
                "bytes_per_second must be at least {MIN_BYTES_PER_SECOND}"
            )));
        }
        if !(MIN_PACKET_LENGTH..=MAX_PACKET_LENGTH).contains(&self.max_packet_length) {
            return Err(invalid(format!(
                "max_packet_length must be in {MIN_PACKET_LENGTH}..={MAX_PACKET_LENGTH}"
            )));
        }
        // A keep-alive carries the whole out-of-order queue.
        if self.ack_queue_capacity > self.max_payload() {
            return Err(invalid(format!(
                "ack_queue_capacity ({}) does not fit in a {}-byte payload",
                self.ack_queue_capacity,
                self.max_payload()
            )));
        }
        Ok(())
    }

    /// Largest payload that fits in one packet.
    #[inline]
    #[must_use]
    pub const fn max_payload(&self) -> usize {
        self.max_packet_length - HEADER_SIZE
    }

    /// Bytes of retransmissions the scheduler may flush in one tick.
    ///
    /// Never less than one full packet, so a slow link still makes progress.
    #[must_use]
    pub fn retransmit_budget(&self) -> usize {
        let per_tick = (self.bytes_per_second / self.tick_rate) as usize;
        per_tick.max(self.max_packet_length)
    }

    /// Full-size packets the bandwidth budget allows per tick (at least one).
    #[must_use]
    pub fn packets_per_tick(&self) -> usize {
        let per_tick =
            self.bytes_per_second as usize / (self.tick_rate as usize * self.max_packet_length);
        per_tick.max(1)
    }
}

fn invalid(message: impl Into<String>) -> NetError {
    NetError::InvalidConfig(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = NetConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ack_idle_timeout, 3);
        assert_eq!(config.connection_timeout, 350);
        assert_eq!(config.max_payload(), MAX_PACKET_LENGTH - HEADER_SIZE);
    }

    #[test]
    fn test_from_toml_with_defaults() {
        let config = NetConfig::from_toml_str(
            r"
            tick_rate = 60
            ack_pool_size = 32
            urgent_reserve = 4
            ",
        )
        .unwrap();

        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.ack_pool_size, 32);
        assert_eq!(config.urgent_reserve, 4);
        assert_eq!(config.retry_interval, NetConfig::default().retry_interval);
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let result = NetConfig::from_toml_str("ack_pool = 3");
        assert!(matches!(result, Err(NetError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_reserve_larger_than_pool() {
        let config = NetConfig {
            ack_pool_size: 8,
            urgent_reserve: 8,
            ..NetConfig::default()
        };
        assert!(matches!(config.validate(), Err(NetError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_window_wider_than_half_circle() {
        let config = NetConfig {
            ack_queue_capacity: 128,
            ..NetConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clamped() {
        let config = NetConfig {
            bytes_per_second: 10,
            max_packet_length: 10,
            ..NetConfig::default()
        }
        .clamped();

        assert_eq!(config.bytes_per_second, MIN_BYTES_PER_SECOND);
        assert_eq!(config.max_packet_length, MIN_PACKET_LENGTH);
        // The default queue no longer fits in a keep-alive.
        assert!(config.validate().is_err());

        let config = NetConfig {
            ack_queue_capacity: 32,
            ..config
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_bandwidth_derating() {
        let config = NetConfig::default();
        // 30000 / 35 = 857 bytes, less than one full packet.
        assert_eq!(config.retransmit_budget(), MAX_PACKET_LENGTH);
        assert_eq!(config.packets_per_tick(), 1);

        let fast = NetConfig {
            bytes_per_second: 1_000_000,
            ..NetConfig::default()
        };
        assert_eq!(fast.retransmit_budget(), 1_000_000 / 35);
        assert_eq!(fast.packets_per_tick(), 1_000_000 / (35 * MAX_PACKET_LENGTH));
    }
}
