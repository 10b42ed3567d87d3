//! Outgoing packet drop injector.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::protocol::PacketType;

/// How many packets of one type to drop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Quantity {
    Next(u32),
    All,
}

/// Drops outgoing packets on purpose, to exercise the retransmitter.
///
/// Dropped packets still count as sent in the session statistics.
#[derive(Clone, Debug)]
pub struct PacketDropper {
    quantities: HashMap<u8, Quantity>,
    /// Percentage of all packets to drop, 0..=100.
    rate: u8,
    rng: StdRng,
}

impl PacketDropper {
    /// Creates an injector that drops nothing.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            quantities: HashMap::new(),
            rate: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Drops the next `count` packets of `packet_type`.
    pub fn drop_next(&mut self, packet_type: PacketType, count: u32) {
        if count == 0 {
            self.quantities.remove(&packet_type.0);
        } else {
            self.quantities.insert(packet_type.0, Quantity::Next(count));
        }
    }

    /// Drops every packet of `packet_type` until reset.
    pub fn drop_all(&mut self, packet_type: PacketType) {
        self.quantities.insert(packet_type.0, Quantity::All);
    }

    /// Drops a random `percent` of all packets. Values above 100 are clamped.
    pub fn set_rate(&mut self, percent: u8) {
        self.rate = percent.min(100);
    }

    /// Drop rate in percent.
    #[must_use]
    pub const fn rate(&self) -> u8 {
        self.rate
    }

    /// Stops dropping anything.
    pub fn reset(&mut self) {
        self.quantities.clear();
        self.rate = 0;
    }

    /// Decides the fate of one outgoing packet.
    pub fn should_drop(&mut self, packet_type: PacketType) -> bool {
        match self.quantities.get_mut(&packet_type.0) {
            Some(Quantity::All) => return true,
            Some(Quantity::Next(left)) => {
                *left -= 1;
                if *left == 0 {
                    self.quantities.remove(&packet_type.0);
                }
                return true;
            }
            None => {}
        }
        self.rate > 0 && self.rng.gen_range(0..100u8) < self.rate
    }
}

impl Default for PacketDropper {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIC: PacketType = PacketType(8);

    #[test]
    fn test_drop_next() {
        let mut dropper = PacketDropper::new(1);
        dropper.drop_next(TIC, 2);

        assert!(dropper.should_drop(TIC));
        assert!(!dropper.should_drop(PacketType(9)));
        assert!(dropper.should_drop(TIC));
        assert!(!dropper.should_drop(TIC));
    }

    #[test]
    fn test_drop_all_until_reset() {
        let mut dropper = PacketDropper::new(1);
        dropper.drop_all(TIC);
        assert!((0..10).all(|_| dropper.should_drop(TIC)));

        dropper.reset();
        assert!(!dropper.should_drop(TIC));
    }

    #[test]
    fn test_rate() {
        let mut dropper = PacketDropper::new(42);
        dropper.set_rate(200);
        assert_eq!(dropper.rate(), 100);
        assert!((0..50).all(|_| dropper.should_drop(TIC)));

        dropper.set_rate(25);
        let dropped = (0..4000).filter(|_| dropper.should_drop(TIC)).count();
        assert!((800..1200).contains(&dropped), "dropped {dropped}");
    }
}
