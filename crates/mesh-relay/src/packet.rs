//! Mesh packet wire format and codec

use crate::error::{RelayError, RelayResult};
use chrono::{DateTime, Utc};
use identity::{Envelope, LocalIdentity, MeshCrypto};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current wire format version
pub const PROTOCOL_VERSION: u8 = 1;

/// Recipient id addressing every listening node
pub const BROADCAST_RECIPIENT: &str = "*";

/// Packet payload categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    Discovery,
    Text,
    PaymentRequest,
    SignedTransaction,
    Ack,
}

impl PacketType {
    /// Hop budget assigned at construction
    pub fn default_ttl(self) -> u8 {
        match self {
            PacketType::Discovery => 3,
            PacketType::Text => 5,
            PacketType::PaymentRequest => 3,
            PacketType::SignedTransaction => 5,
            PacketType::Ack => 3,
        }
    }

    /// Base weight in the relay priority score
    pub fn relay_weight(self) -> u32 {
        match self {
            PacketType::SignedTransaction => 100,
            PacketType::PaymentRequest => 80,
            PacketType::Text => 50,
            _ => 0,
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::Discovery => write!(f, "discovery"),
            PacketType::Text => write!(f, "text"),
            PacketType::PaymentRequest => write!(f, "payment-request"),
            PacketType::SignedTransaction => write!(f, "signed-transaction"),
            PacketType::Ack => write!(f, "ack"),
        }
    }
}

/// A mesh packet
///
/// Immutable after construction except for `ttl`, `hop_count`, and
/// `relay_path`, which each relaying node updates together: `hop_count`
/// always equals `relay_path.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshPacket {
    pub version: u8,
    pub packet_type: PacketType,
    pub sender_id: String,
    /// `"*"` addresses every listening node
    pub recipient_id: String,
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub ttl: u8,
    pub hop_count: u8,
    pub relay_path: Vec<String>,
    /// Ephemeral key of the payload envelope; zeroed for broadcast packets
    pub ephemeral_public: [u8; 32],
    /// Envelope nonce; zeroed for broadcast packets
    pub nonce: [u8; 24],
    /// Sealed payload (plaintext for broadcast packets)
    pub payload: Vec<u8>,
    /// Ed25519 signature over payload, nonce, sender id, and timestamp
    pub signature: Vec<u8>,
}

impl MeshPacket {
    /// Build and sign a packet addressed to a single recipient
    ///
    /// The payload is sealed for `recipient_public`; only that key's holder
    /// can open it, relay nodes see ciphertext.
    pub fn build_direct(
        local: &LocalIdentity,
        packet_type: PacketType,
        recipient_id: &str,
        recipient_public: &[u8; 32],
        plaintext: &[u8],
    ) -> RelayResult<Self> {
        let envelope = MeshCrypto::encrypt(plaintext, recipient_public)
            .map_err(|e| RelayError::EncryptFailed(e.to_string()))?;
        Ok(Self::assemble(local, packet_type, recipient_id, envelope))
    }

    /// Build and sign a broadcast packet
    ///
    /// There is no single recipient key, so the payload travels in the
    /// clear; the signature still binds it to the sender.
    pub fn build_broadcast(
        local: &LocalIdentity,
        packet_type: PacketType,
        plaintext: &[u8],
    ) -> Self {
        let envelope = Envelope {
            ephemeral_public: [0u8; 32],
            nonce: [0u8; 24],
            ciphertext: plaintext.to_vec(),
        };
        Self::assemble(local, packet_type, BROADCAST_RECIPIENT, envelope)
    }

    fn assemble(
        local: &LocalIdentity,
        packet_type: PacketType,
        recipient_id: &str,
        envelope: Envelope,
    ) -> Self {
        let timestamp = Utc::now();
        let signature = local
            .keypair
            .sign(&signing_bytes(
                &envelope.ciphertext,
                &envelope.nonce,
                &local.identity.id,
                timestamp,
            ))
            .to_vec();

        Self {
            version: PROTOCOL_VERSION,
            packet_type,
            sender_id: local.identity.id.clone(),
            recipient_id: recipient_id.to_string(),
            message_id: Uuid::new_v4(),
            timestamp,
            ttl: packet_type.default_ttl(),
            hop_count: 0,
            relay_path: Vec::new(),
            ephemeral_public: envelope.ephemeral_public,
            nonce: envelope.nonce,
            payload: envelope.ciphertext,
            signature,
        }
    }

    /// Verify the packet signature against the claimed sender's key
    pub fn verify_signature(&self, sender_public: &[u8]) -> bool {
        MeshCrypto::verify(
            &signing_bytes(&self.payload, &self.nonce, &self.sender_id, self.timestamp),
            &self.signature,
            sender_public,
        )
    }

    /// Verify and unseal a received packet's payload
    ///
    /// Callers drop the packet silently on any error here; bad packets
    /// never surface past diagnostics.
    pub fn open(&self, local: &LocalIdentity, sender_public: &[u8]) -> RelayResult<Vec<u8>> {
        if !self.verify_signature(sender_public) {
            return Err(RelayError::SignatureMismatch);
        }

        if self.recipient_id == BROADCAST_RECIPIENT {
            return Ok(self.payload.clone());
        }

        let envelope = Envelope {
            ephemeral_public: self.ephemeral_public,
            nonce: self.nonce,
            ciphertext: self.payload.clone(),
        };
        MeshCrypto::decrypt(&envelope, &local.keypair)
            .map_err(|e| RelayError::DecryptFailed(e.to_string()))
    }

    /// Serialize for transmission
    pub fn to_bytes(&self) -> RelayResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a received frame
    pub fn from_bytes(bytes: &[u8]) -> RelayResult<Self> {
        let packet: Self = serde_json::from_slice(bytes)
            .map_err(|e| RelayError::InvalidPacket(e.to_string()))?;

        if packet.hop_count as usize != packet.relay_path.len() {
            return Err(RelayError::InvalidPacket(format!(
                "hop count {} disagrees with relay path length {}",
                packet.hop_count,
                packet.relay_path.len()
            )));
        }

        Ok(packet)
    }
}

/// The byte string covered by the packet signature
fn signing_bytes(
    payload: &[u8],
    nonce: &[u8; 24],
    sender_id: &str,
    timestamp: DateTime<Utc>,
) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(payload.len() + nonce.len() + sender_id.len() + 8);
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(nonce);
    bytes.extend_from_slice(sender_id.as_bytes());
    bytes.extend_from_slice(&timestamp.timestamp_millis().to_be_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MemoryKvStore;

    async fn identity(alias: &str) -> LocalIdentity {
        LocalIdentity::load_or_generate(&MemoryKvStore::new(), alias)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_direct_packet_defaults() {
        let alice = identity("alice").await;
        let bob = identity("bob").await;

        let packet = MeshPacket::build_direct(
            &alice,
            PacketType::SignedTransaction,
            &bob.identity.id,
            &bob.identity.public_key,
            b"tx bytes",
        )
        .unwrap();

        assert_eq!(packet.version, PROTOCOL_VERSION);
        assert_eq!(packet.ttl, 5);
        assert_eq!(packet.hop_count, 0);
        assert!(packet.relay_path.is_empty());
        assert_eq!(packet.sender_id, alice.identity.id);
        // Payload is sealed, not the plaintext
        assert_ne!(packet.payload, b"tx bytes");
    }

    #[tokio::test]
    async fn test_type_ttl_defaults() {
        assert_eq!(PacketType::Discovery.default_ttl(), 3);
        assert_eq!(PacketType::PaymentRequest.default_ttl(), 3);
        assert_eq!(PacketType::Text.default_ttl(), 5);
        assert_eq!(PacketType::SignedTransaction.default_ttl(), 5);
    }

    #[tokio::test]
    async fn test_fresh_message_id_per_packet() {
        let alice = identity("alice").await;
        let a = MeshPacket::build_broadcast(&alice, PacketType::Discovery, b"hello");
        let b = MeshPacket::build_broadcast(&alice, PacketType::Discovery, b"hello");
        assert_ne!(a.message_id, b.message_id);
    }

    #[tokio::test]
    async fn test_open_round_trip() {
        let alice = identity("alice").await;
        let bob = identity("bob").await;

        let packet = MeshPacket::build_direct(
            &alice,
            PacketType::Text,
            &bob.identity.id,
            &bob.identity.public_key,
            b"hi bob",
        )
        .unwrap();

        let opened = packet.open(&bob, &alice.identity.public_key).unwrap();
        assert_eq!(opened, b"hi bob");
    }

    #[tokio::test]
    async fn test_open_rejects_wrong_sender_key() {
        let alice = identity("alice").await;
        let bob = identity("bob").await;
        let mallory = identity("mallory").await;

        let packet = MeshPacket::build_direct(
            &alice,
            PacketType::Text,
            &bob.identity.id,
            &bob.identity.public_key,
            b"hi bob",
        )
        .unwrap();

        let result = packet.open(&bob, &mallory.identity.public_key);
        assert!(matches!(result, Err(RelayError::SignatureMismatch)));
    }

    #[tokio::test]
    async fn test_tampered_payload_fails_verification() {
        let alice = identity("alice").await;
        let bob = identity("bob").await;

        let mut packet = MeshPacket::build_direct(
            &alice,
            PacketType::Text,
            &bob.identity.id,
            &bob.identity.public_key,
            b"hi bob",
        )
        .unwrap();
        packet.payload[0] ^= 0xFF;

        assert!(!packet.verify_signature(&alice.identity.public_key));
    }

    #[tokio::test]
    async fn test_broadcast_payload_readable_and_signed() {
        let alice = identity("alice").await;
        let bob = identity("bob").await;

        let packet = MeshPacket::build_broadcast(&alice, PacketType::Discovery, b"announce");
        assert_eq!(packet.recipient_id, BROADCAST_RECIPIENT);

        let opened = packet.open(&bob, &alice.identity.public_key).unwrap();
        assert_eq!(opened, b"announce");
    }

    #[tokio::test]
    async fn test_wire_round_trip() {
        let alice = identity("alice").await;
        let packet = MeshPacket::build_broadcast(&alice, PacketType::Discovery, b"announce");

        let bytes = packet.to_bytes().unwrap();
        let parsed = MeshPacket::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, packet);
    }

    #[tokio::test]
    async fn test_from_bytes_rejects_inconsistent_hop_count() {
        let alice = identity("alice").await;
        let mut packet = MeshPacket::build_broadcast(&alice, PacketType::Discovery, b"x");
        packet.hop_count = 2; // relay_path is still empty

        let bytes = serde_json::to_vec(&packet).unwrap();
        assert!(matches!(
            MeshPacket::from_bytes(&bytes),
            Err(RelayError::InvalidPacket(_))
        ));
    }
}
