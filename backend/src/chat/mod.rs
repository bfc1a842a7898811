//! Trust-gated chat control
//!
//! The filter mode is derived from the transaction status on every send, and
//! repeated circumvention attempts escalate a per-user penalty.

pub mod analyzer;
pub mod service;
pub mod trust_gate;
pub mod violations;

pub use analyzer::{analyze_message, analyze_message_with, MessageAnalysis, Strictness, ViolationType};
pub use service::{ChatGuard, CheckMessageRequest, SendDecision};
pub use trust_gate::{resolve_filter_mode, FilterMode};
pub use violations::{NewViolation, PenaltyLevel, UserViolationData, ViolationRecord};
