//! API handlers for the PassVault backend

pub mod chat;
pub mod disputes;
pub mod fraud;
pub mod payments;
pub mod transactions;
pub mod vendor_approvals;

pub use chat::*;
pub use disputes::*;
pub use fraud::*;
pub use payments::*;
pub use transactions::*;
pub use vendor_approvals::*;
