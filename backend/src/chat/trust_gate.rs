//! Trust gate: which communication filter applies in each lifecycle phase

use serde::{Deserialize, Serialize};

use crate::transaction::TransactionStatus;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterMode {
    /// Funds not yet secured: contact sharing is blocked
    PreEscrow,
    /// Funds held or released: parties may exchange contact details
    PostEscrow,
}

/// Derive the filter mode from the current transaction status.
///
/// Recomputed on every send attempt; a conversation without a transaction is
/// always `PreEscrow`.
pub fn resolve_filter_mode(status: Option<TransactionStatus>) -> FilterMode {
    use TransactionStatus::*;

    match status {
        Some(EscrowHeld | TransferPending | Completed | DisputeOpened | DisputeResolved) => {
            FilterMode::PostEscrow
        }
        _ => FilterMode::PreEscrow,
    }
}
