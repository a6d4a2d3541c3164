//! Offline transaction lifecycle
//!
//! Sign -> queue -> relay -> broadcast -> confirm, with bounded retry and
//! scheduled expiry. Transactions are created while offline, carried through
//! the mesh as signed payloads, and handed to the ledger client once a node
//! with connectivity picks them up.

pub mod error;
pub mod ledger;
pub mod manager;
pub mod transaction;

pub use error::{OfflineTxError, OfflineTxResult};
pub use ledger::{BroadcastReceipt, LedgerClient};
pub use manager::OfflineTxManager;
pub use transaction::{OfflineTransaction, TxStatus, TxType};
