//! Mesh packet protocol: codec, routing, and relay scheduling
//!
//! Builds, signs, and seals packets; decides whether an inbound packet is
//! for this node, should be relayed, or dropped; and orders pending relays
//! by priority.

pub mod dispatch;
pub mod error;
pub mod packet;
pub mod router;

pub use dispatch::RelayDispatcher;
pub use error::{RelayError, RelayResult};
pub use packet::{MeshPacket, PacketType, BROADCAST_RECIPIENT, PROTOCOL_VERSION};
pub use router::{MeshRouter, RouteDecision};
