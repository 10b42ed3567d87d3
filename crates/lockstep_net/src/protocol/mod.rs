//! # Wire Protocol
//!
//! Every datagram starts with the same 8-byte header.
//!
//! ## Packet Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (8 bytes)                                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Checksum (4, LE) │ Ack (1) │ AckReturn (1) │ Type (1) │ Pad (1) │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload (variable, up to the negotiated maximum)             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - `ack`: sequence the sender wants acknowledged, 0 = unreliable
//! - `ack_return`: highest contiguous sequence received from the peer
//! - checksum covers every byte from offset 4 on

mod header;
mod sequence;
mod types;

pub use header::{checksum, PacketHeader, CHECKSUM_SEED, HEADER_SIZE};
pub(crate) use header::{seal, verify};
pub use sequence::{cmp_seq, next_seq, prev_seq, seq_newer};
pub use types::{Delivery, NodeId, PacketClass, PacketType};
