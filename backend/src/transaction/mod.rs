//! Transaction lifecycle
//!
//! `model` holds the persisted types, `lifecycle` the legal edges and fee math,
//! and `service` the operations that move a transaction through its states.

pub mod lifecycle;
pub mod model;
pub mod service;

pub use lifecycle::{compute_fees, generate_transaction_code, CANCELLABLE, DISPUTABLE, TRANSFERABLE};
pub use model::*;
pub use service::{PayoutOutcome, TransactionService, REFUNDABLE};
