//! Best-effort packet fan-out over the radio transport

use crate::error::{RelayError, RelayResult};
use crate::packet::MeshPacket;
use proximity::{can_relay, Peer, RadioTransport};
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends serialized packets to nearby relay-capable peers
pub struct RelayDispatcher {
    transport: Arc<dyn RadioTransport>,
}

impl RelayDispatcher {
    pub fn new(transport: Arc<dyn RadioTransport>) -> Self {
        Self { transport }
    }

    /// Deliver a packet to one peer
    pub async fn send_to_peer(&self, peer: &Peer, packet: &MeshPacket) -> RelayResult<()> {
        let bytes = packet.to_bytes()?;

        let handle = self
            .transport
            .connect(&peer.id)
            .await
            .map_err(|e| RelayError::TransmissionFailed(e.to_string()))?;
        self.transport
            .write(&handle, &bytes)
            .await
            .map_err(|e| RelayError::TransmissionFailed(e.to_string()))?;

        debug!("Packet {} sent to peer {}", packet.message_id, peer.id);
        Ok(())
    }

    /// Fan a packet out to every relay-capable peer
    ///
    /// Best-effort: individual failures are logged and skipped so one bad
    /// link never blocks the rest of the mesh. Returns the delivery count.
    pub async fn fan_out(&self, peers: &[Peer], packet: &MeshPacket) -> usize {
        let mut delivered = 0;

        for peer in peers {
            if !can_relay(peer.zone) {
                continue;
            }
            if peer.id == packet.sender_id || packet.relay_path.contains(&peer.id) {
                // No point handing a packet back along its own path
                continue;
            }

            match self.send_to_peer(peer, packet).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Failed to send packet to peer {}: {}", peer.id, e);
                }
            }
        }

        debug!(
            "Packet {} fanned out to {} peer(s)",
            packet.message_id, delivered
        );
        delivered
    }
}
