//! Offline transaction manager
//!
//! Owns the pending-transaction table and the bounded history log. All
//! mutation happens behind one lock; only the final ledger broadcast awaits
//! with the lock released, so local transitions stay synchronous.

use crate::error::{OfflineTxError, OfflineTxResult};
use crate::ledger::{BroadcastReceipt, LedgerClient};
use crate::transaction::{OfflineTransaction, TxStatus, TxType};
use chrono::{DateTime, Utc};
use identity::LocalIdentity;
use proximity::{can_transact, Zone};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::storage::{get_json, put_json};
use shared::{keys, KvStore};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum FAILED -> QUEUED retries per transaction
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// History keeps only the most recent entries
const HISTORY_CAPACITY: usize = 100;

#[derive(Default)]
struct TxTables {
    pending: HashMap<Uuid, OfflineTransaction>,
    history: VecDeque<OfflineTransaction>,
}

/// The payload that gets serialized and signed at signing time
#[derive(Serialize)]
struct SignablePayload<'a> {
    id: Uuid,
    tx_type: TxType,
    from_address: &'a str,
    to_address: &'a str,
    amount: Decimal,
    currency: &'a str,
    created_at: DateTime<Utc>,
}

/// Drives transactions through the offline lifecycle
pub struct OfflineTxManager {
    tables: Mutex<TxTables>,
    storage: Arc<dyn KvStore>,
    identity: Arc<LocalIdentity>,
    ledger: Arc<dyn LedgerClient>,
}

impl OfflineTxManager {
    pub fn new(
        storage: Arc<dyn KvStore>,
        identity: Arc<LocalIdentity>,
        ledger: Arc<dyn LedgerClient>,
    ) -> Self {
        Self {
            tables: Mutex::new(TxTables::default()),
            storage,
            identity,
            ledger,
        }
    }

    /// Restore the pending table and history from storage
    pub async fn load(&self) -> OfflineTxResult<()> {
        let pending: Vec<OfflineTransaction> =
            get_json(self.storage.as_ref(), keys::PENDING_TRANSACTIONS)
                .await?
                .unwrap_or_default();
        let history: Vec<OfflineTransaction> =
            get_json(self.storage.as_ref(), keys::TRANSACTION_HISTORY)
                .await?
                .unwrap_or_default();

        let mut tables = self.tables.lock().await;
        tables.pending = pending.into_iter().map(|tx| (tx.id, tx)).collect();
        tables.history = history.into();

        debug!(
            "Transaction tables loaded: {} pending, {} historical",
            tables.pending.len(),
            tables.history.len()
        );
        Ok(())
    }

    /// Create a transfer toward a counterparty in `counterparty_zone`
    ///
    /// Zone policy gates creation: only the two nearest zones are close
    /// enough to hand a payment to.
    pub async fn create_transfer(
        &self,
        to_address: &str,
        amount: Decimal,
        currency: &str,
        counterparty_zone: Zone,
    ) -> OfflineTxResult<OfflineTransaction> {
        self.create(TxType::Transfer, to_address, amount, currency, counterparty_zone)
            .await
    }

    /// Create a swap toward a counterparty in `counterparty_zone`
    pub async fn create_swap(
        &self,
        to_address: &str,
        amount: Decimal,
        currency: &str,
        counterparty_zone: Zone,
    ) -> OfflineTxResult<OfflineTransaction> {
        self.create(TxType::Swap, to_address, amount, currency, counterparty_zone)
            .await
    }

    async fn create(
        &self,
        tx_type: TxType,
        to_address: &str,
        amount: Decimal,
        currency: &str,
        counterparty_zone: Zone,
    ) -> OfflineTxResult<OfflineTransaction> {
        if !can_transact(counterparty_zone) {
            return Err(OfflineTxError::ZoneRestricted(counterparty_zone.to_string()));
        }

        let tx = OfflineTransaction::new(
            tx_type,
            &self.identity.identity.id,
            to_address,
            amount,
            currency,
        );
        info!(
            "Created {:?} {} for {} {}",
            tx_type, tx.id, amount, currency
        );

        let mut tables = self.tables.lock().await;
        tables.pending.insert(tx.id, tx.clone());
        self.persist(&tables).await?;

        Ok(tx)
    }

    /// Serialize and sign a created transaction
    pub async fn sign(&self, id: Uuid) -> OfflineTxResult<OfflineTransaction> {
        let mut tables = self.tables.lock().await;
        let tx = Self::pending_mut(&mut tables, id)?;

        // Validate the edge before doing any work
        if !tx.status.can_transition(TxStatus::Signed) {
            return Err(OfflineTxError::InvalidTransition {
                from: tx.status.to_string(),
                to: TxStatus::Signed.to_string(),
            });
        }

        let payload = SignablePayload {
            id: tx.id,
            tx_type: tx.tx_type,
            from_address: &tx.from_address,
            to_address: &tx.to_address,
            amount: tx.amount,
            currency: &tx.currency,
            created_at: tx.created_at,
        };
        let serialized = serde_json::to_string(&payload)?;
        let signature = self.identity.keypair.sign(serialized.as_bytes());

        tx.serialized_tx = Some(serialized);
        tx.signature = Some(bs58::encode(signature).into_string());
        tx.transition(TxStatus::Signed)?;

        let tx = tx.clone();
        self.persist(&tables).await?;
        Ok(tx)
    }

    /// Hand a signed transaction to the relay pipeline
    pub async fn queue_for_broadcast(&self, id: Uuid) -> OfflineTxResult<OfflineTransaction> {
        let mut tables = self.tables.lock().await;
        let tx = Self::pending_mut(&mut tables, id)?;
        tx.transition(TxStatus::Queued)?;

        let tx = tx.clone();
        self.persist(&tables).await?;
        Ok(tx)
    }

    /// Record a relay hop for this transaction
    ///
    /// Appends the carrying node and bumps the relay counter without
    /// touching terminal semantics; repeated hops keep the state `Relaying`.
    pub async fn mark_relaying(&self, id: Uuid, node_id: &str) -> OfflineTxResult<OfflineTransaction> {
        let mut tables = self.tables.lock().await;
        let tx = Self::pending_mut(&mut tables, id)?;

        if tx.status != TxStatus::Relaying {
            tx.transition(TxStatus::Relaying)?;
        }
        tx.relayed_via.push(node_id.to_string());
        tx.relay_count += 1;

        let tx = tx.clone();
        self.persist(&tables).await?;
        Ok(tx)
    }

    /// Submit a queued or relayed transaction to the ledger
    ///
    /// Success confirms the transaction and migrates it into history;
    /// failure records the error, bumps the retry counter, and leaves it
    /// `Failed` for a bounded manual retry.
    pub async fn broadcast(&self, id: Uuid) -> OfflineTxResult<OfflineTransaction> {
        // Phase 1: validate and claim the transaction
        let serialized = {
            let mut tables = self.tables.lock().await;
            let tx = Self::pending_mut(&mut tables, id)?;

            let serialized = tx
                .serialized_tx
                .clone()
                .ok_or_else(|| OfflineTxError::MissingPayload(id.to_string()))?;

            tx.transition(TxStatus::Broadcasting)?;
            self.persist(&tables).await?;
            serialized
        };

        // Phase 2: the only awaited external call in the lifecycle
        let outcome = self.ledger.broadcast(&serialized).await;

        // Phase 3: apply the result
        let mut tables = self.tables.lock().await;
        match outcome {
            Ok(BroadcastReceipt { signature }) => {
                let mut confirmed = tables
                    .pending
                    .remove(&id)
                    .ok_or_else(|| OfflineTxError::TransactionNotFound(id.to_string()))?;
                confirmed.transition(TxStatus::Confirmed)?;
                info!("Transaction {} confirmed: {}", id, signature);

                Self::push_history(&mut tables, confirmed.clone());
                self.persist(&tables).await?;
                Ok(confirmed)
            }
            Err(e) => {
                let tx = Self::pending_mut(&mut tables, id)?;
                tx.transition(TxStatus::Failed)?;
                tx.error = Some(e.to_string());
                tx.retry_count += 1;
                warn!(
                    "Transaction {} broadcast failed (attempt {}): {}",
                    id, tx.retry_count, e
                );

                let tx = tx.clone();
                self.persist(&tables).await?;
                Ok(tx)
            }
        }
    }

    /// Re-queue a failed transaction, bounded to three attempts
    pub async fn retry(&self, id: Uuid) -> OfflineTxResult<OfflineTransaction> {
        let mut tables = self.tables.lock().await;
        let tx = Self::pending_mut(&mut tables, id)?;

        if tx.status != TxStatus::Failed {
            return Err(OfflineTxError::InvalidTransition {
                from: tx.status.to_string(),
                to: TxStatus::Queued.to_string(),
            });
        }
        if tx.retry_count > MAX_RETRY_ATTEMPTS {
            return Err(OfflineTxError::RetryLimitExceeded(MAX_RETRY_ATTEMPTS));
        }

        tx.transition(TxStatus::Queued)?;
        info!("Transaction {} re-queued (retry {})", id, tx.retry_count);

        let tx = tx.clone();
        self.persist(&tables).await?;
        Ok(tx)
    }

    /// Drop a transaction that has not reached the network yet
    ///
    /// Rejected while confirmed or mid-broadcast; a canceled record is
    /// removed outright rather than archived.
    pub async fn cancel(&self, id: Uuid) -> OfflineTxResult<OfflineTransaction> {
        let mut tables = self.tables.lock().await;
        let tx = Self::pending_mut(&mut tables, id)?;

        if matches!(tx.status, TxStatus::Confirmed | TxStatus::Broadcasting) {
            return Err(OfflineTxError::InvalidTransition {
                from: tx.status.to_string(),
                to: "Canceled".to_string(),
            });
        }

        let removed = tables
            .pending
            .remove(&id)
            .ok_or_else(|| OfflineTxError::TransactionNotFound(id.to_string()))?;
        info!("Transaction {} canceled from {}", id, removed.status);
        self.persist(&tables).await?;
        Ok(removed)
    }

    /// Expire every non-terminal transaction whose horizon has passed
    ///
    /// Expiry is a swept transition, not an error; expired records migrate
    /// to history and vanish from the relay-ready set.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> OfflineTxResult<Vec<Uuid>> {
        let mut tables = self.tables.lock().await;

        let expired_ids: Vec<Uuid> = tables
            .pending
            .values()
            .filter(|tx| !tx.status.is_terminal() && tx.is_expired(now))
            .map(|tx| tx.id)
            .collect();

        for id in &expired_ids {
            if let Some(mut tx) = tables.pending.remove(id) {
                // Table check is redundant for non-terminal states but keeps
                // the transition audited like every other edge
                tx.transition(TxStatus::Expired)?;
                info!("Transaction {} expired", id);
                Self::push_history(&mut tables, tx);
            }
        }

        if !expired_ids.is_empty() {
            self.persist(&tables).await?;
        }
        Ok(expired_ids)
    }

    /// Queued transactions still inside their expiry horizon
    pub async fn relay_ready(&self, now: DateTime<Utc>) -> Vec<OfflineTransaction> {
        let tables = self.tables.lock().await;
        tables
            .pending
            .values()
            .filter(|tx| tx.status == TxStatus::Queued && !tx.is_expired(now))
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: Uuid) -> Option<OfflineTransaction> {
        let tables = self.tables.lock().await;
        tables.pending.get(&id).cloned()
    }

    pub async fn pending(&self) -> Vec<OfflineTransaction> {
        let tables = self.tables.lock().await;
        tables.pending.values().cloned().collect()
    }

    /// Most recent terminal transactions, newest last
    pub async fn history(&self) -> Vec<OfflineTransaction> {
        let tables = self.tables.lock().await;
        tables.history.iter().cloned().collect()
    }

    fn pending_mut(tables: &mut TxTables, id: Uuid) -> OfflineTxResult<&mut OfflineTransaction> {
        tables
            .pending
            .get_mut(&id)
            .ok_or_else(|| OfflineTxError::TransactionNotFound(id.to_string()))
    }

    fn push_history(tables: &mut TxTables, tx: OfflineTransaction) {
        tables.history.push_back(tx);
        while tables.history.len() > HISTORY_CAPACITY {
            tables.history.pop_front();
        }
    }

    async fn persist(&self, tables: &TxTables) -> OfflineTxResult<()> {
        let pending: Vec<&OfflineTransaction> = tables.pending.values().collect();
        put_json(self.storage.as_ref(), keys::PENDING_TRANSACTIONS, &pending).await?;

        let history: Vec<&OfflineTransaction> = tables.history.iter().collect();
        put_json(self.storage.as_ref(), keys::TRANSACTION_HISTORY, &history).await?;
        Ok(())
    }
}
