//! Pre-send gate for chat messages

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::analyzer::{analyze_message_with, snippet, DetectedViolation, Strictness};
use super::trust_gate::{resolve_filter_mode, FilterMode};
use super::violations::{NewViolation, PenaltyLevel, UserViolationData};
use crate::error::{ServiceError, ServiceResult};
use crate::store::Store;

#[derive(Debug, Deserialize, Validate)]
pub struct CheckMessageRequest {
    #[validate(length(min = 1, max = 100))]
    pub conversation_id: String,
    /// Transaction the conversation belongs to, if any
    pub transaction_id: Option<i64>,
    #[validate(length(min = 1, max = 4000))]
    pub text: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct SendDecision {
    pub allowed: bool,
    pub mode: FilterMode,
    pub penalty: PenaltyLevel,
    pub violations: Vec<DetectedViolation>,
    pub notice: Option<&'static str>,
}

/// Decides whether a message may be sent and escalates repeat offenders
pub struct ChatGuard {
    store: Arc<dyn Store>,
}

impl ChatGuard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn check_send(
        &self,
        sender_id: Uuid,
        request: CheckMessageRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<SendDecision> {
        request.validate()?;

        let current = self.store.get_violations(sender_id).await?;
        if !current.penalty_level.can_send() {
            return Ok(SendDecision {
                allowed: false,
                mode: FilterMode::PreEscrow,
                penalty: current.penalty_level,
                violations: Vec::new(),
                notice: current.penalty_level.notice(),
            });
        }

        // Status is read fresh on every send; it can change mid-conversation
        let status = match request.transaction_id {
            Some(id) => match self.store.get_transaction(id).await? {
                Some(tx) if !tx.is_party(sender_id) => {
                    return Err(ServiceError::Forbidden(
                        "Not a party to this transaction".to_string(),
                    ))
                }
                Some(tx) => Some(tx.status),
                None => None,
            },
            None => None,
        };
        let mode = resolve_filter_mode(status);

        let strictness = if current.penalty_level >= PenaltyLevel::Restricted {
            Strictness::Strict
        } else {
            Strictness::Standard
        };
        let analysis = analyze_message_with(&request.text, mode, strictness);

        if !analysis.is_blocked {
            return Ok(SendDecision {
                allowed: true,
                mode,
                penalty: current.penalty_level,
                violations: Vec::new(),
                notice: current.penalty_level.notice(),
            });
        }

        let Some(violation_type) = analysis.primary_violation() else {
            return Err(ServiceError::Validation(
                "blocked message carries no violation".to_string(),
            ));
        };

        let updated = self
            .store
            .record_violation(
                sender_id,
                NewViolation {
                    conversation_id: request.conversation_id.clone(),
                    violation_type,
                    snippet: snippet(&request.text),
                },
                now,
            )
            .await?;

        if updated.penalty_level > current.penalty_level {
            warn!(
                user_id = %sender_id,
                violation_count = updated.violation_count,
                penalty = ?updated.penalty_level,
                "Chat penalty escalated"
            );
        } else {
            info!(
                user_id = %sender_id,
                conversation_id = %request.conversation_id,
                violation = ?violation_type,
                "Message blocked"
            );
        }

        Ok(SendDecision {
            allowed: false,
            mode,
            penalty: updated.penalty_level,
            violations: analysis.violations,
            notice: updated.penalty_level.notice(),
        })
    }

    pub async fn violations(&self, user_id: Uuid) -> ServiceResult<UserViolationData> {
        Ok(self.store.get_violations(user_id).await?)
    }

    /// Administrative reset; the only way a penalty goes down
    pub async fn reset(&self, user_id: Uuid, admin_id: Uuid) -> ServiceResult<UserViolationData> {
        let data = self.store.reset_violations(user_id).await?;
        info!(user_id = %user_id, admin_id = %admin_id, "Chat violations reset");
        Ok(data)
    }
}
