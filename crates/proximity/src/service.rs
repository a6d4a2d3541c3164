//! Serialized mesh state-update loop
//!
//! Radio discovery callbacks and housekeeping timers both feed one command
//! queue consumed by a single loop, so no two mutations of the peer table
//! race and events keep their arrival order.

use crate::error::Result;
use crate::peer_store::{PeerEvent, PeerId, PeerStore};
use crate::privacy_zone::ZoneAggregator;
use crate::transport::{RadioTransport, TransportEvent};
use chrono::Utc;
use shared::MeshSettings;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Interval between staleness sweeps
const EVICT_SWEEP_INTERVAL_SECS: u64 = 10;

/// Commands consumed by the state-update loop
#[derive(Debug, Clone)]
pub enum ServiceCommand {
    PeerSeen {
        id: PeerId,
        rssi: Option<i16>,
        name: Option<String>,
    },
    EvictSweep,
    Stop,
}

/// Running-session handle returned by [`MeshService::start`]
pub struct MeshServiceHandle {
    cmd_tx: mpsc::UnboundedSender<ServiceCommand>,
    shutdown: CancellationToken,
}

impl MeshServiceHandle {
    /// Inject a command into the serialized loop
    pub fn command_sender(&self) -> mpsc::UnboundedSender<ServiceCommand> {
        self.cmd_tx.clone()
    }
}

/// Owns all mutable mesh state and the loop that updates it
pub struct MeshService {
    store: Arc<PeerStore>,
    aggregator: Arc<ZoneAggregator>,
    transport: Arc<dyn RadioTransport>,
    settings: MeshSettings,
    scanning: Mutex<bool>,
    notifier: Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
}

impl MeshService {
    pub fn new(
        store: Arc<PeerStore>,
        aggregator: Arc<ZoneAggregator>,
        transport: Arc<dyn RadioTransport>,
        settings: MeshSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            aggregator,
            transport,
            settings,
            scanning: Mutex::new(false),
            notifier: Mutex::new(None),
        })
    }

    /// Receive peer events as they are raised by the loop
    ///
    /// Events are only forwarded when `notify_on_zone_change` is set.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<PeerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.notifier.lock().await = Some(tx);
        rx
    }

    /// Start scanning and the state-update loop
    ///
    /// Subscribe before starting; the loop captures the notifier when it
    /// spawns. A transport failure here leaves the service stopped and is
    /// reported to the caller; it never takes the loop down later.
    pub async fn start(&self) -> Result<MeshServiceHandle> {
        let (transport_tx, mut transport_rx) = mpsc::unbounded_channel();

        {
            let mut scanning = self.scanning.lock().await;
            if let Err(e) = self.transport.start_scan(transport_tx).await {
                *scanning = false;
                error!("Scan start failed: {}", e);
                return Err(e);
            }
            *scanning = true;
        }
        info!("Mesh service scanning");

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ServiceCommand>();
        let shutdown = CancellationToken::new();

        // Pump: radio events -> command queue
        let pump_tx = cmd_tx.clone();
        let pump_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_shutdown.cancelled() => break,
                    event = transport_rx.recv() => match event {
                        Some(TransportEvent::PeerSeen { id, rssi, name }) => {
                            let _ = pump_tx.send(ServiceCommand::PeerSeen { id, rssi, name });
                        }
                        None => break,
                    },
                }
            }
        });

        // Housekeeping: periodic staleness sweeps through the same queue
        let sweep_tx = cmd_tx.clone();
        let sweep_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(EVICT_SWEEP_INTERVAL_SECS));
            ticker.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = sweep_shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if sweep_tx.send(ServiceCommand::EvictSweep).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // The single state-update loop
        let store = Arc::clone(&self.store);
        let aggregator = Arc::clone(&self.aggregator);
        let notify = self.settings.notify_on_zone_change;
        let notifier = self.notifier.lock().await.clone();
        let loop_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_shutdown.cancelled() => break,
                    cmd = cmd_rx.recv() => match cmd {
                        Some(ServiceCommand::Stop) | None => break,
                        Some(cmd) => {
                            Self::apply_command(&store, &aggregator, notify, notifier.as_ref(), cmd)
                                .await
                        }
                    },
                }
            }
            debug!("Mesh service loop exited");
        });

        Ok(MeshServiceHandle { cmd_tx, shutdown })
    }

    /// Stop the loop and the radio; safe to call on an already-stopped service
    pub async fn stop(&self, handle: MeshServiceHandle) -> Result<()> {
        handle.shutdown.cancel();
        let _ = handle.cmd_tx.send(ServiceCommand::Stop);

        *self.scanning.lock().await = false;
        self.transport.stop_scan().await?;
        info!("Mesh service stopped");
        Ok(())
    }

    pub async fn is_scanning(&self) -> bool {
        *self.scanning.lock().await
    }

    async fn apply_command(
        store: &PeerStore,
        aggregator: &ZoneAggregator,
        notify: bool,
        notifier: Option<&mpsc::UnboundedSender<PeerEvent>>,
        cmd: ServiceCommand,
    ) {
        let events = match cmd {
            ServiceCommand::PeerSeen { id, rssi, name } => {
                store.observe(&id, rssi, name.as_deref(), None).await
            }
            ServiceCommand::EvictSweep => store.evict_stale(Utc::now()).await,
            ServiceCommand::Stop => return,
        };

        if !events.is_empty() {
            if notify {
                if let Some(tx) = notifier {
                    for event in &events {
                        let _ = tx.send(event.clone());
                    }
                }
            }
            aggregator.refresh().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy_zone::LockHandler;
    use crate::transport::MockTransport;
    use crate::zone::Zone;
    use async_trait::async_trait;
    use shared::MemoryKvStore;

    struct NoopLock;

    #[async_trait]
    impl LockHandler for NoopLock {
        async fn lock(&self) {}
    }

    async fn setup() -> (Arc<MeshService>, Arc<MockTransport>, Arc<PeerStore>) {
        let store = Arc::new(PeerStore::new(Arc::new(MemoryKvStore::new())));
        let transport = MockTransport::new();
        let aggregator = ZoneAggregator::new(
            Arc::clone(&store),
            MeshSettings::default(),
            Arc::new(NoopLock),
        );
        let service = MeshService::new(
            Arc::clone(&store),
            aggregator,
            Arc::clone(&transport) as Arc<dyn RadioTransport>,
            MeshSettings::default(),
        );
        (service, transport, store)
    }

    #[tokio::test]
    async fn test_discovery_event_updates_store() {
        let (service, transport, store) = setup().await;
        let mut events = service.subscribe().await;

        let handle = service.start().await.unwrap();
        transport.emit_peer_seen("P1", Some(-50), Some("phone")).await;

        // The loop picks the event up asynchronously
        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            PeerEvent::ZoneEntered {
                peer_id: "P1".into(),
                zone: Zone::Alpha
            }
        );
        assert!(store.get("P1").await.is_some());

        service.stop(handle).await.unwrap();
        assert!(!service.is_scanning().await);
    }

    #[tokio::test]
    async fn test_scan_failure_leaves_service_stopped() {
        let (service, transport, _) = setup().await;

        transport.fail_next_scan().await;
        assert!(service.start().await.is_err());
        assert!(!service.is_scanning().await);

        // A later start succeeds once the radio recovers
        let handle = service.start().await.unwrap();
        assert!(service.is_scanning().await);
        service.stop(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_at_transport_level() {
        let (service, transport, _) = setup().await;

        let handle = service.start().await.unwrap();
        service.stop(handle).await.unwrap();
        assert!(!transport.is_scanning().await);

        // Direct second stop of the transport is still fine
        transport.stop_scan().await.unwrap();
    }
}
