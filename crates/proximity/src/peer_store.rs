//! Nearby-peer tracking and the persisted trust list

use crate::error::Result;
use crate::zone::{classify, Zone};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use shared::storage::{get_json, put_json};
use shared::{keys, KvStore};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Unique identifier for a peer
pub type PeerId = String;

/// Staleness timeout before an unobserved peer is removed
const PEER_STALE_TIMEOUT_SECS: i64 = 60;

/// Maximum retained connection-request log entries
const CONNECTION_LOG_CAPACITY: usize = 100;

/// A device currently (or recently) observed nearby
///
/// Ephemeral: created on first observation, removed outright once stale.
/// `is_trusted` is a projection from the persisted trust list and survives
/// removal of the record itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub alias: String,
    pub public_key: Option<Vec<u8>>,
    pub rssi: Option<i16>,
    pub last_seen_at: DateTime<Utc>,
    pub zone: Zone,
    pub is_connected: bool,
    pub is_trusted: bool,
}

/// Events raised by the store as peer state changes
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    ZoneEntered { peer_id: PeerId, zone: Zone },
    ZoneExited { peer_id: PeerId, zone: Zone },
    DeviceLost { peer_id: PeerId },
}

/// Persisted record of an inbound connection request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub peer_id: PeerId,
    pub requested_at: DateTime<Utc>,
}

struct PeerTable {
    nearby: HashMap<PeerId, Peer>,
    trusted: HashSet<PeerId>,
    connection_requests: VecDeque<ConnectionRequest>,
}

/// Tracks nearby peers and the trusted-peer allowlist
///
/// All mutation goes through one internal lock, so concurrent observation
/// callbacks and housekeeping sweeps serialize: field updates are
/// last-writer-wins, and zone-change events are computed while the lock is
/// held so a transition is emitted exactly once, in observation order.
pub struct PeerStore {
    inner: Mutex<PeerTable>,
    storage: Arc<dyn KvStore>,
    stale_timeout: Duration,
}

impl PeerStore {
    pub fn new(storage: Arc<dyn KvStore>) -> Self {
        Self {
            inner: Mutex::new(PeerTable {
                nearby: HashMap::new(),
                trusted: HashSet::new(),
                connection_requests: VecDeque::new(),
            }),
            storage,
            stale_timeout: Duration::seconds(PEER_STALE_TIMEOUT_SECS),
        }
    }

    /// Restore the trust list and connection-request log from storage
    pub async fn load(&self) -> Result<()> {
        let trusted: Vec<PeerId> = get_json(self.storage.as_ref(), keys::TRUSTED_PEERS)
            .await?
            .unwrap_or_default();
        let requests: Vec<ConnectionRequest> =
            get_json(self.storage.as_ref(), keys::CONNECTION_REQUESTS)
                .await?
                .unwrap_or_default();

        let mut table = self.inner.lock().await;
        table.trusted = trusted.into_iter().collect();
        table.connection_requests = requests.into();

        debug!(
            "Peer store loaded: {} trusted, {} logged connection requests",
            table.trusted.len(),
            table.connection_requests.len()
        );
        Ok(())
    }

    /// Record an observation of a peer
    ///
    /// Upserts the peer record, reclassifies its zone from the new sample,
    /// and returns the zone-transition events this observation produced.
    /// Re-observation within the same zone produces no events.
    pub async fn observe(
        &self,
        peer_id: &str,
        rssi: Option<i16>,
        advertised_name: Option<&str>,
        public_key: Option<Vec<u8>>,
    ) -> Vec<PeerEvent> {
        let now = Utc::now();
        let new_zone = classify(rssi);
        let mut events = Vec::new();

        let mut table = self.inner.lock().await;
        let is_trusted = table.trusted.contains(peer_id);

        match table.nearby.get_mut(peer_id) {
            Some(peer) => {
                let previous_zone = peer.zone;

                peer.rssi = rssi;
                peer.last_seen_at = now;
                peer.zone = new_zone;
                peer.is_trusted = is_trusted;
                if let Some(name) = advertised_name {
                    peer.alias = name.to_string();
                }
                if public_key.is_some() {
                    peer.public_key = public_key;
                }

                if previous_zone != new_zone {
                    debug!("Peer {} moved {} -> {}", peer_id, previous_zone, new_zone);
                    events.push(PeerEvent::ZoneExited {
                        peer_id: peer_id.to_string(),
                        zone: previous_zone,
                    });
                    events.push(PeerEvent::ZoneEntered {
                        peer_id: peer_id.to_string(),
                        zone: new_zone,
                    });
                }
            }
            None => {
                info!("Peer {} discovered in zone {}", peer_id, new_zone);
                table.nearby.insert(
                    peer_id.to_string(),
                    Peer {
                        id: peer_id.to_string(),
                        alias: advertised_name.unwrap_or(peer_id).to_string(),
                        public_key,
                        rssi,
                        last_seen_at: now,
                        zone: new_zone,
                        is_connected: false,
                        is_trusted,
                    },
                );
                events.push(PeerEvent::ZoneEntered {
                    peer_id: peer_id.to_string(),
                    zone: new_zone,
                });
            }
        }

        events
    }

    /// Remove peers not observed within the staleness timeout
    pub async fn evict_stale(&self, now: DateTime<Utc>) -> Vec<PeerEvent> {
        let threshold = now - self.stale_timeout;
        let mut events = Vec::new();

        let mut table = self.inner.lock().await;
        let stale: Vec<PeerId> = table
            .nearby
            .values()
            .filter(|peer| peer.last_seen_at < threshold)
            .map(|peer| peer.id.clone())
            .collect();

        for peer_id in stale {
            table.nearby.remove(&peer_id);
            info!("Peer {} lost (stale)", peer_id);
            events.push(PeerEvent::DeviceLost { peer_id });
        }

        events
    }

    /// Add a peer to the persisted trust list; idempotent
    pub async fn trust(&self, peer_id: &str) -> Result<()> {
        let snapshot = {
            let mut table = self.inner.lock().await;
            if !table.trusted.insert(peer_id.to_string()) {
                return Ok(());
            }
            if let Some(peer) = table.nearby.get_mut(peer_id) {
                peer.is_trusted = true;
            }
            table.trusted.iter().cloned().collect::<Vec<_>>()
        };

        info!("Peer {} trusted", peer_id);
        self.persist_trusted(&snapshot).await
    }

    /// Remove a peer from the persisted trust list; idempotent
    pub async fn untrust(&self, peer_id: &str) -> Result<()> {
        let snapshot = {
            let mut table = self.inner.lock().await;
            if !table.trusted.remove(peer_id) {
                return Ok(());
            }
            if let Some(peer) = table.nearby.get_mut(peer_id) {
                peer.is_trusted = false;
            }
            table.trusted.iter().cloned().collect::<Vec<_>>()
        };

        info!("Peer {} untrusted", peer_id);
        self.persist_trusted(&snapshot).await
    }

    pub async fn is_trusted(&self, peer_id: &str) -> bool {
        let table = self.inner.lock().await;
        table.trusted.contains(peer_id)
    }

    /// Mark a peer's link state after connect/disconnect
    pub async fn set_connected(&self, peer_id: &str, connected: bool) {
        let mut table = self.inner.lock().await;
        if let Some(peer) = table.nearby.get_mut(peer_id) {
            peer.is_connected = connected;
        }
    }

    /// Append to the bounded, persisted connection-request log
    pub async fn record_connection_request(&self, peer_id: &str) -> Result<()> {
        let snapshot = {
            let mut table = self.inner.lock().await;
            table.connection_requests.push_back(ConnectionRequest {
                peer_id: peer_id.to_string(),
                requested_at: Utc::now(),
            });
            while table.connection_requests.len() > CONNECTION_LOG_CAPACITY {
                table.connection_requests.pop_front();
            }
            table
                .connection_requests
                .iter()
                .cloned()
                .collect::<Vec<_>>()
        };

        put_json(self.storage.as_ref(), keys::CONNECTION_REQUESTS, &snapshot).await?;
        Ok(())
    }

    pub async fn connection_requests(&self) -> Vec<ConnectionRequest> {
        let table = self.inner.lock().await;
        table.connection_requests.iter().cloned().collect()
    }

    /// Current view of all nearby peers
    pub async fn snapshot(&self) -> Vec<Peer> {
        let table = self.inner.lock().await;
        table.nearby.values().cloned().collect()
    }

    pub async fn get(&self, peer_id: &str) -> Option<Peer> {
        let table = self.inner.lock().await;
        table.nearby.get(peer_id).cloned()
    }

    async fn persist_trusted(&self, trusted: &[PeerId]) -> Result<()> {
        put_json(self.storage.as_ref(), keys::TRUSTED_PEERS, &trusted.to_vec()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MemoryKvStore;

    fn store() -> PeerStore {
        PeerStore::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn test_first_observation_enters_zone() {
        let peers = store();

        let events = peers.observe("P1", Some(-50), Some("phone"), None).await;
        assert_eq!(
            events,
            vec![PeerEvent::ZoneEntered {
                peer_id: "P1".into(),
                zone: Zone::Alpha
            }]
        );

        let peer = peers.get("P1").await.unwrap();
        assert_eq!(peer.zone, Zone::Alpha);
        assert_eq!(peer.alias, "phone");
    }

    #[tokio::test]
    async fn test_reobservation_same_zone_is_silent() {
        let peers = store();

        peers.observe("P1", Some(-50), None, None).await;
        let events = peers.observe("P1", Some(-52), None, None).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_zone_change_emits_exit_and_enter_once() {
        let peers = store();

        peers.observe("P1", Some(-50), None, None).await;
        let events = peers.observe("P1", Some(-90), None, None).await;

        let exits: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, PeerEvent::ZoneExited { .. }))
            .collect();
        assert_eq!(exits.len(), 1);
        assert_eq!(
            events,
            vec![
                PeerEvent::ZoneExited {
                    peer_id: "P1".into(),
                    zone: Zone::Alpha
                },
                PeerEvent::ZoneEntered {
                    peer_id: "P1".into(),
                    zone: Zone::Relay
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_rssi_classifies_offline() {
        let peers = store();
        peers.observe("P1", None, None, None).await;
        assert_eq!(peers.get("P1").await.unwrap().zone, Zone::Offline);
    }

    #[tokio::test]
    async fn test_evict_stale_removes_and_reports() {
        let peers = store();
        peers.observe("P1", Some(-50), None, None).await;

        // Not yet stale
        let events = peers.evict_stale(Utc::now()).await;
        assert!(events.is_empty());

        let later = Utc::now() + Duration::seconds(PEER_STALE_TIMEOUT_SECS + 1);
        let events = peers.evict_stale(later).await;
        assert_eq!(events, vec![PeerEvent::DeviceLost { peer_id: "P1".into() }]);
        assert!(peers.get("P1").await.is_none());
    }

    #[tokio::test]
    async fn test_trust_is_idempotent_and_survives_eviction() {
        let peers = store();

        peers.observe("P1", Some(-50), None, None).await;
        peers.trust("P1").await.unwrap();
        peers.trust("P1").await.unwrap();
        assert!(peers.get("P1").await.unwrap().is_trusted);

        let later = Utc::now() + Duration::seconds(PEER_STALE_TIMEOUT_SECS + 1);
        peers.evict_stale(later).await;
        assert!(peers.get("P1").await.is_none());

        // Re-discovered peer picks its trust flag back up
        peers.observe("P1", Some(-60), None, None).await;
        assert!(peers.get("P1").await.unwrap().is_trusted);
    }

    #[tokio::test]
    async fn test_trust_list_persists_across_instances() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());

        let peers = PeerStore::new(Arc::clone(&kv));
        peers.trust("P1").await.unwrap();
        peers.untrust("P2").await.unwrap();

        let restored = PeerStore::new(kv);
        restored.load().await.unwrap();
        assert!(restored.is_trusted("P1").await);
        assert!(!restored.is_trusted("P2").await);
    }

    #[tokio::test]
    async fn test_connection_request_log_is_bounded() {
        let peers = store();

        for i in 0..(CONNECTION_LOG_CAPACITY + 10) {
            peers
                .record_connection_request(&format!("P{}", i))
                .await
                .unwrap();
        }

        let log = peers.connection_requests().await;
        assert_eq!(log.len(), CONNECTION_LOG_CAPACITY);
        assert_eq!(log[0].peer_id, "P10");
    }

    #[tokio::test]
    async fn test_concurrent_observations_serialize() {
        let peers = Arc::new(store());
        let mut handles = Vec::new();

        for i in 0..20 {
            let peers = Arc::clone(&peers);
            let rssi = if i % 2 == 0 { -50 } else { -90 };
            handles.push(tokio::spawn(async move {
                peers.observe("P1", Some(rssi), None, None).await
            }));
        }

        let mut transitions = 0;
        for handle in handles {
            let events = handle.await.unwrap();
            transitions += events
                .iter()
                .filter(|e| matches!(e, PeerEvent::ZoneExited { .. }))
                .count();
        }

        // Every exit pairs with exactly one real zone change; nothing is
        // double-counted even under contention.
        assert!(transitions <= 19);
        let peer = peers.get("P1").await.unwrap();
        assert!(peer.zone == Zone::Alpha || peer.zone == Zone::Relay);
    }
}
