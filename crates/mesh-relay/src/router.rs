//! Routing decisions, duplicate suppression, and the relay priority queue

use crate::packet::{MeshPacket, BROADCAST_RECIPIENT};
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Capacity of the recent-message window used for deduplication
const SEEN_WINDOW_CAPACITY: usize = 1024;

/// Hop-penalty ceiling in the priority score
const HOP_BONUS_CEILING: u32 = 10;

/// Outcome of routing an inbound packet
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// The packet is addressed to this node (or broadcast); process it
    Accept,
    /// Forward this updated clone to the next hop
    Relay(MeshPacket),
    /// Discard silently
    Drop,
}

struct QueuedRelay {
    score: u32,
    seq: u64,
    packet: MeshPacket,
}

impl PartialEq for QueuedRelay {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.seq == other.seq
    }
}

impl Eq for QueuedRelay {}

impl Ord for QueuedRelay {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap on score; older entries win ties
        self.score
            .cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedRelay {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-node packet router
///
/// Tracks recently seen message ids in a bounded window so cyclic
/// topologies cannot amplify a packet into a relay storm, and holds the
/// priority queue of packets awaiting forwarding.
pub struct MeshRouter {
    node_id: String,
    seen: Mutex<LruCache<Uuid, ()>>,
    queue: Mutex<BinaryHeap<QueuedRelay>>,
    seq: AtomicU64,
}

impl MeshRouter {
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            seen: Mutex::new(LruCache::new(
                NonZeroUsize::new(SEEN_WINDOW_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Decide what to do with an inbound packet
    ///
    /// Duplicates within the recent-message window drop regardless of
    /// addressing. A relayed clone gets `ttl - 1`, `hop_count + 1`, and this
    /// node appended to its relay path.
    pub fn route(&self, packet: &MeshPacket) -> RouteDecision {
        {
            let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if seen.contains(&packet.message_id) {
                debug!("Duplicate packet {} dropped", packet.message_id);
                return RouteDecision::Drop;
            }
            seen.put(packet.message_id, ());
        }

        if packet.recipient_id == self.node_id || packet.recipient_id == BROADCAST_RECIPIENT {
            return RouteDecision::Accept;
        }

        if packet.ttl == 0 {
            debug!("Packet {} exhausted its hop budget", packet.message_id);
            return RouteDecision::Drop;
        }
        if packet.sender_id == self.node_id {
            return RouteDecision::Drop;
        }
        if packet.relay_path.iter().any(|id| id == &self.node_id) {
            debug!("Packet {} already passed through this node", packet.message_id);
            return RouteDecision::Drop;
        }

        let mut forwarded = packet.clone();
        forwarded.ttl -= 1;
        forwarded.hop_count += 1;
        forwarded.relay_path.push(self.node_id.clone());

        RouteDecision::Relay(forwarded)
    }

    /// Queue a packet for forwarding
    pub fn enqueue_relay(&self, packet: MeshPacket) {
        let score = relay_priority(&packet, Utc::now());
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);

        let mut queue = self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        queue.push(QueuedRelay { score, seq, packet });
    }

    /// Highest-priority pending relay, if any
    pub fn next_relay(&self) -> Option<MeshPacket> {
        let mut queue = self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        queue.pop().map(|entry| entry.packet)
    }

    pub fn pending_relays(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Relay priority: type weight, plus a freshness bonus, plus a shrinking
/// bonus for packets that have not traveled far yet
pub fn relay_priority(packet: &MeshPacket, now: DateTime<Utc>) -> u32 {
    let age_secs = (now - packet.timestamp).num_seconds().max(0);
    let freshness = if age_secs < 60 {
        20
    } else if age_secs < 300 {
        10
    } else {
        0
    };

    let hop_bonus = HOP_BONUS_CEILING.saturating_sub(packet.hop_count as u32);

    packet.packet_type.relay_weight() + freshness + hop_bonus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketType, PROTOCOL_VERSION};
    use chrono::Duration;
    use proptest::prelude::*;

    fn raw_packet(
        packet_type: PacketType,
        sender: &str,
        recipient: &str,
        ttl: u8,
        relay_path: Vec<String>,
    ) -> MeshPacket {
        MeshPacket {
            version: PROTOCOL_VERSION,
            packet_type,
            sender_id: sender.to_string(),
            recipient_id: recipient.to_string(),
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            ttl,
            hop_count: relay_path.len() as u8,
            relay_path,
            ephemeral_public: [0u8; 32],
            nonce: [0u8; 24],
            payload: vec![1, 2, 3],
            signature: vec![0u8; 64],
        }
    }

    #[test]
    fn test_accept_for_me_and_broadcast() {
        let router = MeshRouter::new("me");

        let direct = raw_packet(PacketType::Text, "other", "me", 5, vec![]);
        assert_eq!(router.route(&direct), RouteDecision::Accept);

        let broadcast = raw_packet(PacketType::Discovery, "other", "*", 3, vec![]);
        assert_eq!(router.route(&broadcast), RouteDecision::Accept);
    }

    #[test]
    fn test_relay_updates_hop_state() {
        let router = MeshRouter::new("me");
        let packet = raw_packet(PacketType::Text, "a", "b", 5, vec!["hop1".into()]);

        match router.route(&packet) {
            RouteDecision::Relay(forwarded) => {
                assert_eq!(forwarded.ttl, 4);
                assert_eq!(forwarded.hop_count, 2);
                assert_eq!(forwarded.relay_path, vec!["hop1".to_string(), "me".to_string()]);
                assert_eq!(forwarded.hop_count as usize, forwarded.relay_path.len());
            }
            other => panic!("expected relay, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_ttl_drops() {
        let router = MeshRouter::new("me");
        let packet = raw_packet(PacketType::SignedTransaction, "a", "b", 0, vec![]);
        assert_eq!(router.route(&packet), RouteDecision::Drop);
    }

    #[test]
    fn test_own_packet_drops() {
        let router = MeshRouter::new("me");
        let packet = raw_packet(PacketType::Text, "me", "b", 5, vec![]);
        assert_eq!(router.route(&packet), RouteDecision::Drop);
    }

    #[test]
    fn test_already_in_relay_path_drops() {
        let router = MeshRouter::new("me");
        let packet = raw_packet(PacketType::Text, "a", "b", 5, vec!["x".into(), "me".into()]);
        assert_eq!(router.route(&packet), RouteDecision::Drop);
    }

    #[test]
    fn test_duplicate_message_id_drops() {
        let router = MeshRouter::new("me");
        let packet = raw_packet(PacketType::Text, "a", "b", 5, vec![]);

        assert!(matches!(router.route(&packet), RouteDecision::Relay(_)));
        assert_eq!(router.route(&packet), RouteDecision::Drop);
    }

    #[test]
    fn test_duplicate_broadcast_drops_on_second_sight() {
        let router = MeshRouter::new("me");
        let packet = raw_packet(PacketType::Discovery, "a", "*", 3, vec![]);

        assert_eq!(router.route(&packet), RouteDecision::Accept);
        assert_eq!(router.route(&packet), RouteDecision::Drop);
    }

    #[test]
    fn test_queue_orders_by_type_weight() {
        let router = MeshRouter::new("me");

        router.enqueue_relay(raw_packet(PacketType::Text, "a", "b", 5, vec![]));
        router.enqueue_relay(raw_packet(PacketType::SignedTransaction, "a", "b", 5, vec![]));
        router.enqueue_relay(raw_packet(PacketType::PaymentRequest, "a", "b", 5, vec![]));

        assert_eq!(
            router.next_relay().unwrap().packet_type,
            PacketType::SignedTransaction
        );
        assert_eq!(
            router.next_relay().unwrap().packet_type,
            PacketType::PaymentRequest
        );
        assert_eq!(router.next_relay().unwrap().packet_type, PacketType::Text);
        assert!(router.next_relay().is_none());
    }

    #[test]
    fn test_priority_rewards_freshness_and_short_paths() {
        let now = Utc::now();

        let fresh = raw_packet(PacketType::Text, "a", "b", 5, vec![]);
        assert_eq!(relay_priority(&fresh, now), 50 + 20 + 10);

        let mut aged = raw_packet(PacketType::Text, "a", "b", 5, vec![]);
        aged.timestamp = now - Duration::seconds(120);
        assert_eq!(relay_priority(&aged, now), 50 + 10 + 10);

        let mut stale = raw_packet(PacketType::Text, "a", "b", 5, vec![]);
        stale.timestamp = now - Duration::seconds(600);
        assert_eq!(relay_priority(&stale, now), 50);

        let well_traveled = raw_packet(
            PacketType::Text,
            "a",
            "b",
            5,
            (0..12).map(|i| format!("hop{}", i)).collect(),
        );
        assert_eq!(relay_priority(&well_traveled, now), 50 + 20);
    }

    proptest! {
        #[test]
        fn prop_zero_ttl_never_relays(
            sender in "[a-z]{1,8}",
            recipient in "[a-z]{1,8}",
            path in proptest::collection::vec("[a-z]{1,8}", 0..5),
        ) {
            prop_assume!(recipient != "me");
            let router = MeshRouter::new("me");
            let packet = raw_packet(PacketType::Text, &sender, &recipient, 0, path);
            prop_assert_eq!(router.route(&packet), RouteDecision::Drop);
        }

        #[test]
        fn prop_relay_path_never_gains_duplicates(
            sender in "[a-z]{1,8}",
            recipient in "[a-z]{1,8}",
            ttl in 1u8..8,
            path in proptest::collection::hash_set("[a-z]{1,8}", 0..5),
        ) {
            prop_assume!(recipient != "me");
            prop_assume!(sender != "me");

            let path: Vec<String> = path.into_iter().collect();
            let router = MeshRouter::new("me");
            let packet = raw_packet(PacketType::Text, &sender, &recipient, ttl, path.clone());

            match router.route(&packet) {
                RouteDecision::Relay(forwarded) => {
                    prop_assert!(!path.contains(&"me".to_string()));
                    let mut unique = forwarded.relay_path.clone();
                    unique.sort();
                    unique.dedup();
                    prop_assert_eq!(unique.len(), forwarded.relay_path.len());
                }
                RouteDecision::Drop => {
                    // Legal only because this node already appears in the path
                    prop_assert!(path.contains(&"me".to_string()));
                }
                RouteDecision::Accept => prop_assert!(false, "not addressed to this node"),
            }
        }
    }
}
