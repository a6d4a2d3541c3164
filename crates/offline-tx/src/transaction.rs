//! Offline transaction model and transition table

use crate::error::{OfflineTxError, OfflineTxResult};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Expiry horizon for transfers
const TRANSFER_EXPIRY_HOURS: i64 = 24;
/// Swaps go stale quickly; quotes do not hold for a day
const SWAP_EXPIRY_HOURS: i64 = 1;

/// Kind of user request behind a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    Transfer,
    Swap,
}

impl TxType {
    /// How long a transaction of this kind stays valid
    pub fn expiry_horizon(self) -> Duration {
        match self {
            TxType::Transfer => Duration::hours(TRANSFER_EXPIRY_HOURS),
            TxType::Swap => Duration::hours(SWAP_EXPIRY_HOURS),
        }
    }
}

/// Lifecycle state of an offline transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Created,
    Signed,
    Queued,
    Relaying,
    Broadcasting,
    Confirmed,
    Failed,
    Expired,
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxStatus::Created => write!(f, "Created"),
            TxStatus::Signed => write!(f, "Signed"),
            TxStatus::Queued => write!(f, "Queued"),
            TxStatus::Relaying => write!(f, "Relaying"),
            TxStatus::Broadcasting => write!(f, "Broadcasting"),
            TxStatus::Confirmed => write!(f, "Confirmed"),
            TxStatus::Failed => write!(f, "Failed"),
            TxStatus::Expired => write!(f, "Expired"),
        }
    }
}

impl TxStatus {
    /// States from which no further transitions exist
    pub fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Expired)
    }

    /// The transition table
    ///
    /// Broadcast may start from `Queued` directly: a node that regains
    /// connectivity before any relay hop does not need to pass through
    /// `Relaying`.
    pub fn can_transition(self, to: TxStatus) -> bool {
        use TxStatus::*;
        match (self, to) {
            (Created, Signed) => true,
            (Signed, Queued) => true,
            (Queued, Relaying) => true,
            (Queued, Broadcasting) => true,
            (Relaying, Broadcasting) => true,
            (Broadcasting, Confirmed) => true,
            (Broadcasting, Failed) => true,
            // Explicit bounded retry
            (Failed, Queued) => true,
            // Any non-terminal state may expire
            (from, Expired) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// A user-initiated transaction moving through the offline lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineTransaction {
    pub id: Uuid,
    pub tx_type: TxType,
    pub status: TxStatus,
    pub from_address: String,
    pub to_address: String,
    pub amount: Decimal,
    pub currency: String,
    /// Serialized payload produced at signing time
    pub serialized_tx: Option<String>,
    /// Detached signature over the serialized payload, base58
    pub signature: Option<String>,
    /// Nodes that have carried this transaction, in hop order
    pub relayed_via: Vec<String>,
    pub relay_count: u32,
    pub retry_count: u32,
    /// Last broadcast error, if any
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OfflineTransaction {
    pub fn new(
        tx_type: TxType,
        from_address: &str,
        to_address: &str,
        amount: Decimal,
        currency: &str,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tx_type,
            status: TxStatus::Created,
            from_address: from_address.to_string(),
            to_address: to_address.to_string(),
            amount,
            currency: currency.to_string(),
            serialized_tx: None,
            signature: None,
            relayed_via: Vec::new(),
            relay_count: 0,
            retry_count: 0,
            error: None,
            created_at,
            expires_at: created_at + tx_type.expiry_horizon(),
        }
    }

    /// Apply a transition, failing if the table does not allow it
    pub fn transition(&mut self, to: TxStatus) -> OfflineTxResult<()> {
        if !self.status.can_transition(to) {
            return Err(OfflineTxError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
