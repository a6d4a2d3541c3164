//! Radio transport abstraction
//!
//! The physical scanning/advertising layer lives outside this core. The
//! adapter surfaces discovered-peer events over a channel and exposes raw
//! connect/write primitives; it owns no protocol logic.

use crate::error::{ProximityError, Result};
use crate::peer_store::PeerId;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

/// Opaque handle to an established link
pub type ConnectionHandle = String;

/// Events surfaced by the radio layer
#[derive(Debug, Clone)]
pub enum TransportEvent {
    PeerSeen {
        id: PeerId,
        rssi: Option<i16>,
        name: Option<String>,
    },
}

/// Trait for platform-agnostic radio operations
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Begin scanning; discovered peers flow through `events`
    async fn start_scan(&self, events: mpsc::UnboundedSender<TransportEvent>) -> Result<()>;

    /// Stop scanning; stopping an idle transport is not an error
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to a peer
    async fn connect(&self, peer: &PeerId) -> Result<ConnectionHandle>;

    /// Write raw bytes over an established link
    async fn write(&self, handle: &ConnectionHandle, data: &[u8]) -> Result<()>;

    /// Tear down the link to a peer
    async fn disconnect(&self, peer: &PeerId) -> Result<()>;
}

/// In-memory transport double for tests and examples
///
/// Scripted: callers push peer-seen events with [`MockTransport::emit_peer_seen`]
/// and inspect written frames with [`MockTransport::written_frames`].
#[derive(Default)]
pub struct MockTransport {
    sender: RwLock<Option<mpsc::UnboundedSender<TransportEvent>>>,
    scanning: RwLock<bool>,
    connected: RwLock<HashSet<PeerId>>,
    written: Mutex<Vec<(ConnectionHandle, Vec<u8>)>>,
    fail_next_scan: RwLock<bool>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Arrange for the next `start_scan` call to fail
    pub async fn fail_next_scan(&self) {
        *self.fail_next_scan.write().await = true;
    }

    pub async fn is_scanning(&self) -> bool {
        *self.scanning.read().await
    }

    /// Inject a discovery event as the radio layer would
    pub async fn emit_peer_seen(&self, id: &str, rssi: Option<i16>, name: Option<&str>) {
        let sender = self.sender.read().await;
        if let Some(tx) = sender.as_ref() {
            let _ = tx.send(TransportEvent::PeerSeen {
                id: id.to_string(),
                rssi,
                name: name.map(|n| n.to_string()),
            });
        }
    }

    /// Frames written so far, as (handle, bytes) pairs
    pub async fn written_frames(&self) -> Vec<(ConnectionHandle, Vec<u8>)> {
        self.written.lock().await.clone()
    }
}

#[async_trait]
impl RadioTransport for MockTransport {
    async fn start_scan(&self, events: mpsc::UnboundedSender<TransportEvent>) -> Result<()> {
        {
            let mut fail = self.fail_next_scan.write().await;
            if *fail {
                *fail = false;
                return Err(ProximityError::ScanFailed("simulated radio failure".into()));
            }
        }

        *self.sender.write().await = Some(events);
        *self.scanning.write().await = true;
        debug!("Mock transport scanning");
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        *self.sender.write().await = None;
        *self.scanning.write().await = false;
        Ok(())
    }

    async fn connect(&self, peer: &PeerId) -> Result<ConnectionHandle> {
        let mut connected = self.connected.write().await;
        connected.insert(peer.clone());
        Ok(format!("conn:{}", peer))
    }

    async fn write(&self, handle: &ConnectionHandle, data: &[u8]) -> Result<()> {
        let mut written = self.written.lock().await;
        written.push((handle.clone(), data.to_vec()));
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerId) -> Result<()> {
        let mut connected = self.connected.write().await;
        connected.remove(peer);
        Ok(())
    }
}
