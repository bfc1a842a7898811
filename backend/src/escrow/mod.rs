//! Escrow timer
//!
//! Time-driven lifecycle duties: auto-release, payment deadline expiry,
//! charge reconciliation and payout retries.

mod sweeper;

pub use sweeper::{escrow_sweeper, EscrowSweeper, SweepReport};
