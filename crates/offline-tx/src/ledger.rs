//! Ledger client abstraction
//!
//! The on-chain broadcast/confirmation mechanism lives outside this core;
//! the manager only calls it at the final broadcast step.

use crate::error::OfflineTxResult;
use async_trait::async_trait;

/// Proof of a successful broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastReceipt {
    /// Network signature/hash of the accepted transaction
    pub signature: String,
}

/// Trait for the external ledger network client
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a serialized, pre-signed transaction to the network
    ///
    /// Network and rejection errors surface as
    /// [`crate::OfflineTxError::BroadcastFailed`]; the manager maps them to
    /// a `Failed` transaction eligible for bounded retry.
    async fn broadcast(&self, serialized_tx: &str) -> OfflineTxResult<BroadcastReceipt>;
}
