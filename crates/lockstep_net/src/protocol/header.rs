//! # Packet Header
//!
//! Zero-copy view of the 8-byte header and the positional checksum.
//!
//! All multi-byte fields are stored as little-endian byte arrays so the
//! header is `Pod` with an alignment of one and can be cast straight out of
//! a receive buffer.

use std::fmt;

use bytemuck::{Pod, Zeroable};

use super::types::PacketType;

/// Size of the header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Initial value of the checksum accumulator.
pub const CHECKSUM_SEED: u32 = 0x0123_4567;

/// Byte offset where checksummed data starts.
const CHECKSUM_START: usize = 4;

/// Packet header - present in every packet.
///
/// Total size: 8 bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PacketHeader {
    /// Checksum of bytes `4..`, little-endian.
    pub checksum: [u8; 4],
    /// Sequence to acknowledge, 0 if the packet is unreliable.
    pub ack: u8,
    /// Highest contiguous sequence received from the peer, 0 if none.
    pub ack_return: u8,
    /// Packet type.
    pub packet_type: u8,
    /// Padding, always 0.
    pub reserved: u8,
}

impl PacketHeader {
    /// Creates a header with a zero checksum.
    #[inline]
    #[must_use]
    pub const fn new(ack: u8, ack_return: u8, packet_type: PacketType) -> Self {
        Self {
            checksum: [0; 4],
            ack,
            ack_return,
            packet_type: packet_type.0,
            reserved: 0,
        }
    }

    /// Reads the header at the start of `frame`.
    ///
    /// Returns None if the frame is shorter than a header.
    #[inline]
    #[must_use]
    pub fn read(frame: &[u8]) -> Option<&Self> {
        frame.get(..HEADER_SIZE).map(bytemuck::from_bytes)
    }

    /// Mutable view of the header at the start of `frame`.
    ///
    /// # Panics
    ///
    /// Panics if the frame is shorter than a header. Outgoing frames are
    /// always built with room for one.
    #[inline]
    pub fn view_mut(frame: &mut [u8]) -> &mut Self {
        bytemuck::from_bytes_mut(&mut frame[..HEADER_SIZE])
    }

    /// Packet type.
    #[inline]
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        PacketType(self.packet_type)
    }

    /// Stored checksum.
    #[inline]
    #[must_use]
    pub const fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.checksum)
    }
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ack {} ackret {} type {}",
            self.ack, self.ack_return, self.packet_type
        )
    }
}

/// Computes the checksum of a full frame (header included).
///
/// `seed + sum(byte[i] * (i + 1))` over the bytes from offset 4, where `i`
/// counts from 0 at that offset. Wrapping 32-bit arithmetic.
#[must_use]
pub fn checksum(frame: &[u8]) -> u32 {
    frame
        .iter()
        .skip(CHECKSUM_START)
        .zip(1u32..)
        .fold(CHECKSUM_SEED, |acc, (&byte, weight)| {
            acc.wrapping_add(u32::from(byte).wrapping_mul(weight))
        })
}

/// Stamps the checksum of `frame` into its header.
#[inline]
pub(crate) fn seal(frame: &mut [u8]) {
    let sum = checksum(frame);
    PacketHeader::view_mut(frame).checksum = sum.to_le_bytes();
}

/// Returns true if the stored checksum matches the frame contents.
#[inline]
pub(crate) fn verify(frame: &[u8]) -> bool {
    PacketHeader::read(frame).is_some_and(|header| header.checksum() == checksum(frame))
}
