//! Dispute service

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use super::model::*;
use crate::error::{ServiceError, ServiceResult};
use crate::notifications::{NotificationKind, Notifier};
use crate::store::Store;
use crate::transaction::{Transaction, TransactionEvent, DISPUTABLE};
use crate::websocket::WsState;

pub const MAX_PROTOCOL_ATTEMPTS: u32 = 5;

type ProtocolGenerator = Box<dyn Fn(DateTime<Utc>) -> String + Send + Sync>;

pub struct DisputeService {
    store: Arc<dyn Store>,
    notifier: Notifier,
    ws_state: WsState,
    protocol_generator: ProtocolGenerator,
}

impl DisputeService {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier, ws_state: WsState) -> Self {
        Self {
            store,
            notifier,
            ws_state,
            protocol_generator: Box::new(generate_protocol),
        }
    }

    /// Replace the protocol number source
    pub fn with_protocol_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(DateTime<Utc>) -> String + Send + Sync + 'static,
    {
        self.protocol_generator = Box::new(generator);
        self
    }

    async fn load_transaction(&self, id: i64) -> ServiceResult<Transaction> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {} not found", id)))
    }

    /// Open a dispute and move the transaction to DISPUTE_OPENED
    pub async fn open_dispute(
        &self,
        transaction_id: i64,
        opener_id: Uuid,
        request: OpenDisputeRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<Dispute> {
        request.validate()?;
        let tx = self.load_transaction(transaction_id).await?;

        if !tx.is_party(opener_id) {
            return Err(ServiceError::Forbidden(
                "Only the buyer or the seller can open a dispute".to_string(),
            ));
        }

        for attempt in 1..=MAX_PROTOCOL_ATTEMPTS {
            let new = NewDispute {
                protocol: (self.protocol_generator)(now),
                transaction_id,
                opener_id,
                reason: request.reason,
                description: request.description.clone(),
                evidence: request.evidence.clone(),
                created_at: now,
            };

            match self.store.open_dispute(new, &DISPUTABLE).await? {
                OpenDisputeOutcome::Opened(dispute, tx) => {
                    info!(
                        transaction_id,
                        dispute_id = dispute.id,
                        protocol = %dispute.protocol,
                        to = %tx.status,
                        "Dispute opened"
                    );
                    let other = if tx.buyer_id == opener_id {
                        tx.seller_id
                    } else {
                        tx.buyer_id
                    };
                    let context = json!({
                        "transaction_id": transaction_id,
                        "protocol": dispute.protocol,
                        "reason": dispute.reason,
                    });
                    self.notifier
                        .notify(opener_id, NotificationKind::DisputeOpened, context.clone());
                    self.notifier
                        .notify(other, NotificationKind::DisputeOpened, context);
                    self.ws_state.broadcast_event(TransactionEvent::DisputeOpened {
                        transaction_id,
                        protocol: dispute.protocol.clone(),
                    });
                    return Ok(dispute);
                }
                OpenDisputeOutcome::ActiveDisputeExists => {
                    return Err(ServiceError::Conflict(
                        "You already have an open dispute on this transaction".to_string(),
                    ))
                }
                OpenDisputeOutcome::InvalidState(status) => {
                    return Err(ServiceError::InvalidState(format!(
                        "Disputes cannot be opened while {}",
                        status
                    )))
                }
                OpenDisputeOutcome::ProtocolTaken => {
                    debug!(transaction_id, attempt, "Dispute protocol collision, retrying");
                }
            }
        }

        warn!(transaction_id, "Exhausted dispute protocol attempts");
        Err(ServiceError::ProtocolGenerationFailed(MAX_PROTOCOL_ATTEMPTS))
    }

    pub async fn list_disputes(
        &self,
        transaction_id: i64,
        user_id: Uuid,
        is_staff: bool,
    ) -> ServiceResult<Vec<Dispute>> {
        let tx = self.load_transaction(transaction_id).await?;
        if !is_staff && !tx.is_party(user_id) {
            return Err(ServiceError::Forbidden(
                "Not a party to this transaction".to_string(),
            ));
        }
        Ok(self.store.list_disputes_for_transaction(transaction_id).await?)
    }

    /// OPEN -> UNDER_REVIEW (administrative)
    pub async fn start_review(
        &self,
        dispute_id: i64,
        admin_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<Dispute> {
        let dispute = self
            .store
            .update_dispute_status(
                dispute_id,
                &[DisputeStatus::Open],
                DisputeStatus::UnderReview,
                now,
            )
            .await?;

        match dispute {
            Some(dispute) => {
                info!(dispute_id, admin_id = %admin_id, "Dispute under review");
                Ok(dispute)
            }
            None => {
                let current = self.store.get_dispute(dispute_id).await?.ok_or_else(|| {
                    ServiceError::NotFound(format!("Dispute {} not found", dispute_id))
                })?;
                Err(ServiceError::InvalidState(format!(
                    "Dispute {} is {:?}",
                    dispute_id, current.status
                )))
            }
        }
    }

    /// Close a dispute with an administrative outcome. The transaction moves to
    /// DISPUTE_RESOLVED once no other dispute on it is active; the next step is
    /// a separate settlement decision.
    pub async fn resolve_dispute(
        &self,
        dispute_id: i64,
        admin_id: Uuid,
        request: ResolveDisputeRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<Dispute> {
        let resolved = self
            .store
            .resolve_dispute(dispute_id, request.resolution, admin_id, request.notes, now)
            .await?;

        let Some((dispute, tx)) = resolved else {
            return Err(ServiceError::InvalidState(format!(
                "Dispute {} is already closed",
                dispute_id
            )));
        };

        info!(
            dispute_id,
            transaction_id = tx.id,
            resolution = ?dispute.status,
            transaction_status = %tx.status,
            "Dispute resolved"
        );

        let context = json!({
            "transaction_id": tx.id,
            "protocol": dispute.protocol,
            "resolution": dispute.status,
        });
        self.notifier
            .notify(tx.buyer_id, NotificationKind::DisputeResolved, context.clone());
        self.notifier
            .notify(tx.seller_id, NotificationKind::DisputeResolved, context);
        self.ws_state.broadcast_event(TransactionEvent::DisputeResolved {
            transaction_id: tx.id,
            protocol: dispute.protocol.clone(),
        });

        Ok(dispute)
    }
}
