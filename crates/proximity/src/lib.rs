//! Proximity zones and peer management
//!
//! Classifies nearby devices into discrete trust/distance zones from their
//! signal strength, tracks peer and trust state, aggregates trusted-peer
//! zone membership into a single privacy-zone status with auto-lock
//! scheduling, and runs the serialized event loop that feeds both from
//! radio discovery callbacks and housekeeping timers.

pub mod error;
pub mod peer_store;
pub mod privacy_zone;
pub mod service;
pub mod transport;
pub mod zone;

pub use error::{ProximityError, Result};
pub use peer_store::{ConnectionRequest, Peer, PeerEvent, PeerId, PeerStore};
pub use privacy_zone::{LockHandler, PrivacyZoneStatus, ZoneAggregator};
pub use service::{MeshService, MeshServiceHandle, ServiceCommand};
pub use transport::{ConnectionHandle, MockTransport, RadioTransport, TransportEvent};
pub use zone::{can_relay, can_transact, classify, Zone};
