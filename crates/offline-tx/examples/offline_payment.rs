//! Example: offline payment over the proximity mesh
//!
//! Demonstrates the full flow: discover a nearby peer, create and sign a
//! transfer while offline, carry it as a mesh packet through a relay node,
//! and broadcast it to the ledger once connectivity returns.
//!
//! Run with: cargo run --example offline_payment

use async_trait::async_trait;
use identity::LocalIdentity;
use mesh_relay::{MeshPacket, MeshRouter, PacketType, RouteDecision};
use offline_tx::{BroadcastReceipt, LedgerClient, OfflineTxManager, OfflineTxResult};
use proximity::{PeerStore, Zone};
use rust_decimal::Decimal;
use shared::{KvStore, MemoryKvStore};
use std::sync::Arc;

/// Ledger stand-in that accepts everything
struct DemoLedger;

#[async_trait]
impl LedgerClient for DemoLedger {
    async fn broadcast(&self, _serialized_tx: &str) -> OfflineTxResult<BroadcastReceipt> {
        Ok(BroadcastReceipt {
            signature: "5DemoNetworkSignature111111111111".to_string(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shared::logging::init_logging_pretty();

    println!("=== Offline Mesh Payment Example ===\n");

    // 1. Node identities
    println!("1. Setting up node identities...");
    let alice_storage: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let alice = Arc::new(LocalIdentity::load_or_generate(alice_storage.as_ref(), "alice").await?);
    let bob = LocalIdentity::load_or_generate(&MemoryKvStore::new(), "bob").await?;
    let carol = LocalIdentity::load_or_generate(&MemoryKvStore::new(), "carol").await?;
    println!("   sender:    {}", alice.identity.id);
    println!("   recipient: {}", bob.identity.id);
    println!("   relay:     {}", carol.identity.id);

    // 2. Alice sees Bob close by and trusts him
    println!("\n2. Discovering peers...");
    let peers = PeerStore::new(Arc::clone(&alice_storage));
    peers
        .observe(&bob.identity.id, Some(-60), Some("bob-phone"), None)
        .await;
    peers.trust(&bob.identity.id).await?;
    let bob_peer = peers
        .get(&bob.identity.id)
        .await
        .ok_or_else(|| anyhow::anyhow!("peer not in store"))?;
    println!("   Bob observed in zone {} (trusted)", bob_peer.zone);
    assert_eq!(bob_peer.zone, Zone::Beta);

    // 3. Create and sign a transfer while offline
    println!("\n3. Creating offline transfer (1.5 SOL)...");
    let manager = OfflineTxManager::new(
        Arc::clone(&alice_storage),
        Arc::clone(&alice),
        Arc::new(DemoLedger),
    );
    let tx = manager
        .create_transfer(&bob.identity.id, Decimal::new(15, 1), "SOL", bob_peer.zone)
        .await?;
    let tx = manager.sign(tx.id).await?;
    let tx = manager.queue_for_broadcast(tx.id).await?;
    println!("   Transaction {} is {:?}", tx.id, tx.status);

    // 4. Wrap it in a sealed mesh packet
    println!("\n4. Sealing transaction into a mesh packet...");
    let packet = MeshPacket::build_direct(
        &alice,
        PacketType::SignedTransaction,
        &bob.identity.id,
        &bob.identity.public_key,
        tx.serialized_tx.as_deref().unwrap_or_default().as_bytes(),
    )?;
    println!("   Packet {} (ttl {})", packet.message_id, packet.ttl);

    // 5. Carol relays it one hop
    println!("\n5. Relaying through Carol...");
    let carol_router = MeshRouter::new(&carol.identity.id);
    let relayed = match carol_router.route(&packet) {
        RouteDecision::Relay(p) => p,
        other => anyhow::bail!("unexpected routing decision: {:?}", other),
    };
    manager.mark_relaying(tx.id, &carol.identity.id).await?;
    println!(
        "   Relayed: ttl {} -> {}, path {:?}",
        packet.ttl, relayed.ttl, relayed.relay_path
    );

    // 6. Bob accepts and opens the payload
    println!("\n6. Delivering to Bob...");
    let bob_router = MeshRouter::new(&bob.identity.id);
    match bob_router.route(&relayed) {
        RouteDecision::Accept => {
            let payload = relayed.open(&bob, &alice.identity.public_key)?;
            println!("   Payload opened ({} bytes)", payload.len());
        }
        other => anyhow::bail!("unexpected routing decision: {:?}", other),
    }

    // 7. Connectivity returns: broadcast and confirm
    println!("\n7. Broadcasting to the ledger...");
    let tx = manager.broadcast(tx.id).await?;
    println!("   Transaction {} is {:?}", tx.id, tx.status);

    let history = manager.history().await;
    println!(
        "   History now holds {} entry(ies); pending table holds {}",
        history.len(),
        manager.pending().await.len()
    );

    println!("\n=== Example Complete ===");
    Ok(())
}
