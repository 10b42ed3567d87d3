//! # LOCKSTEP Net - Reliable Datagrams for Tick-Driven Netgames
//!
//! Transport-layer reliability that keeps an authoritative simulation in
//! sync between a server and its clients over an unreliable datagram
//! channel that may drop, duplicate and reorder packets.
//!
//! ## Architecture
//!
//! - **Protocol**: 8-byte header with a positional checksum, 1-byte
//!   circular sequence numbers (0 is reserved)
//! - **AckTable**: fixed pool of in-flight reliable packets, with a reserve
//!   of slots only critical traffic may use
//! - **Node window**: cumulative low edge plus a bounded out-of-order queue
//!   (go-back-n mixed with selective repeat)
//! - **Loopback ring**: self-addressed packets never touch the transport
//! - **Scheduler**: once per tick, retransmit, keep alive, detect timeouts
//! - **Lifecycle**: close handshake that survives one lost final packet
//!
//! ```text
//!  application
//!      │ send()/receive() every tick, tick() once per tick
//!  ┌───▼──────────────────────────────────────────────┐
//!  │ Session                                          │
//!  │  LoopbackRing   AckTable   Node[0..max_nodes]    │
//!  └───┬──────────────────────────────────────────────┘
//!      │ Transport (UDP, in-memory simulation, ...)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use lockstep_net::{Delivery, ManualClock, NetConfig, NodeId, PacketClass, PacketType, Session};
//! use lockstep_net::simulation::SimNetwork;
//!
//! let network = SimNetwork::new();
//! let (server, client) = network.pair();
//! let clock = ManualClock::new();
//! let mut session = Session::new(NetConfig::default(), server, clock.clone())?;
//!
//! session.send(NodeId(1), Delivery::Reliable(PacketClass::Critical), PacketType(8), b"tic")?;
//! session.tick();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod simulation;
pub mod transport;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, Tick, TickClock};
pub use config::NetConfig;
pub use error::{NetError, NetResult};
pub use protocol::{Delivery, NodeId, PacketClass, PacketHeader, PacketType};
pub use session::{AbortFilter, ConnectionState, Incoming, NetStats, Session};
pub use transport::{Transport, UdpTransport};

/// Default simulation tick rate (tics per second).
pub const DEFAULT_TICK_RATE: u32 = 35;

/// Largest datagram the layer will ever build, header included.
///
/// Kept under the common 1500-byte Ethernet MTU with room for IP/UDP headers.
pub const MAX_PACKET_LENGTH: usize = 1450;

/// Smallest configurable packet length.
pub const MIN_PACKET_LENGTH: usize = 75;
