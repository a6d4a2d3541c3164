//! Aggregate privacy-zone status and auto-lock scheduling
//!
//! The aggregate status is a pure function of the current trusted-peer zone
//! membership and the settings; it is recomputed on every peer-store change
//! and never persisted. Leaving the active state arms a cancelable delayed
//! lock; the timer re-checks the live status before firing.

use crate::peer_store::{Peer, PeerStore};
use crate::zone::Zone;
use async_trait::async_trait;
use serde::Serialize;
use shared::MeshSettings;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Derived privacy-zone state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PrivacyZoneStatus {
    pub is_active: bool,
    pub in_buffer_zone: bool,
    pub trusted_in_range: usize,
    pub trusted_in_active_zone: usize,
}

/// Action seam for the delayed wallet lock
#[async_trait]
pub trait LockHandler: Send + Sync {
    async fn lock(&self);
}

struct AggregatorState {
    last_status: PrivacyZoneStatus,
    pending_lock: Option<CancellationToken>,
}

/// Recomputes the aggregate status and drives auto-lock scheduling
pub struct ZoneAggregator {
    store: Arc<PeerStore>,
    settings: MeshSettings,
    lock_handler: Arc<dyn LockHandler>,
    state: Mutex<AggregatorState>,
}

/// Compute the aggregate status from a peer snapshot
pub fn compute_status(peers: &[Peer], settings: &MeshSettings) -> PrivacyZoneStatus {
    let trusted_in_range = peers
        .iter()
        .filter(|p| p.is_trusted && p.zone != Zone::Offline)
        .count();
    let trusted_in_active_zone = peers
        .iter()
        .filter(|p| p.is_trusted && p.zone == Zone::Alpha)
        .count();

    let is_active = settings.enabled && trusted_in_active_zone >= settings.require_min_devices;
    let in_buffer_zone = settings.enabled && !is_active && trusted_in_range > 0;

    PrivacyZoneStatus {
        is_active,
        in_buffer_zone,
        trusted_in_range,
        trusted_in_active_zone,
    }
}

impl ZoneAggregator {
    pub fn new(
        store: Arc<PeerStore>,
        settings: MeshSettings,
        lock_handler: Arc<dyn LockHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            settings,
            lock_handler,
            state: Mutex::new(AggregatorState {
                last_status: PrivacyZoneStatus::default(),
                pending_lock: None,
            }),
        })
    }

    /// Current status, computed fresh from the store
    pub async fn status(&self) -> PrivacyZoneStatus {
        let peers = self.store.snapshot().await;
        compute_status(&peers, &self.settings)
    }

    /// Recompute after a peer-store change and react to transitions
    ///
    /// Active -> inactive arms the auto-lock timer; inactive -> active
    /// cancels a pending one.
    pub async fn refresh(&self) -> PrivacyZoneStatus {
        let status = self.status().await;

        let mut state = self.state.lock().await;
        let was_active = state.last_status.is_active;
        state.last_status = status;

        if was_active && !status.is_active {
            info!(
                "Privacy zone deactivated ({} trusted in range)",
                status.trusted_in_range
            );
            if self.settings.auto_lock_enabled {
                self.arm_auto_lock(&mut state);
            }
        } else if !was_active && status.is_active {
            debug!("Privacy zone active");
            if let Some(token) = state.pending_lock.take() {
                token.cancel();
                debug!("Pending auto-lock canceled");
            }
        }

        status
    }

    /// Cancel any pending auto-lock without waiting for a status change
    pub async fn cancel_pending_lock(&self) {
        let mut state = self.state.lock().await;
        if let Some(token) = state.pending_lock.take() {
            token.cancel();
        }
    }

    fn arm_auto_lock(&self, state: &mut AggregatorState) {
        // Re-arming replaces (and cancels) any earlier timer
        if let Some(previous) = state.pending_lock.take() {
            previous.cancel();
        }

        let token = CancellationToken::new();
        state.pending_lock = Some(token.clone());

        let store = Arc::clone(&self.store);
        let settings = self.settings.clone();
        let handler = Arc::clone(&self.lock_handler);
        let delay = std::time::Duration::from_millis(self.settings.auto_lock_delay_ms);
        info!("Auto-lock armed ({} ms)", self.settings.auto_lock_delay_ms);

        tokio::spawn(async move {
            let watch = token.clone();
            tokio::select! {
                _ = watch.cancelled() => {
                    debug!("Auto-lock timer canceled before firing");
                }
                _ = tokio::time::sleep(delay) => {
                    // Status may have changed while the timer ran
                    let peers = store.snapshot().await;
                    let current = compute_status(&peers, &settings);
                    if current.is_active {
                        debug!("Auto-lock skipped: zone active again");
                        token.cancel();
                        return;
                    }

                    info!("Auto-lock firing");
                    handler.lock().await;
                    token.cancel();
                }
            }
        });
    }

    /// Whether an auto-lock timer is currently armed
    pub async fn lock_pending(&self) -> bool {
        let state = self.state.lock().await;
        state
            .pending_lock
            .as_ref()
            .map(|t| !t.is_cancelled())
            .unwrap_or(false)
    }
}
