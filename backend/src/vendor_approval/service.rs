//! Vendor approval service
//!
//! The seller asks the venue or provider to sign off on the transfer. The vendor
//! answers through a link carrying an unguessable token; the token is the only
//! credential on that path.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use super::model::*;
use crate::error::{ServiceError, ServiceResult};
use crate::notifications::{NotificationKind, Notifier};
use crate::store::{Store, StoreError};
use crate::transaction::TransactionEvent;
use crate::websocket::WsState;

const MAX_TOKEN_ATTEMPTS: u32 = 3;
const TOKEN_CONSTRAINT: &str = "vendor_approvals_token_key";

pub struct VendorApprovalService {
    store: Arc<dyn Store>,
    notifier: Notifier,
    ws_state: WsState,
    ttl: Duration,
}

impl VendorApprovalService {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier, ws_state: WsState, ttl_hours: i64) -> Self {
        Self {
            store,
            notifier,
            ws_state,
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Issue a new approval request for a transaction
    pub async fn request_approval(
        &self,
        transaction_id: i64,
        requester_id: Uuid,
        request: RequestApprovalRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<RequestApprovalResponse> {
        request.validate()?;

        let tx = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {} not found", transaction_id)))?;

        if tx.seller_id != requester_id {
            return Err(ServiceError::Forbidden(
                "Only the seller can request vendor approval".to_string(),
            ));
        }
        if tx.status.is_terminal() {
            return Err(ServiceError::InvalidState(format!(
                "Transaction {} is {}",
                transaction_id, tx.status
            )));
        }

        if let Some(existing) = self.store.find_blocking_approval(transaction_id).await? {
            // A stale pending request no longer blocks
            let stale = existing.status == ApprovalStatus::Pending && existing.is_past_expiry(now);
            if !stale || self.expire(&existing, now).await?.is_none() {
                return Err(ServiceError::Conflict(format!(
                    "Transaction {} already has a {:?} vendor approval",
                    transaction_id, existing.status
                )));
            }
        }

        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let token = generate_approval_token();
            let new = NewVendorApproval {
                token: token.clone(),
                transaction_id,
                listing_id: tx.listing_id,
                requested_by: requester_id,
                vendor_name: request.vendor_name.clone(),
                vendor_email: request.vendor_email.clone(),
                vendor_phone: request.vendor_phone.clone(),
                expires_at: now + self.ttl,
                created_at: now,
            };

            match self.store.insert_approval(new).await {
                Ok(approval) => {
                    info!(
                        transaction_id,
                        approval_id = approval.id,
                        expires_at = %approval.expires_at,
                        "Vendor approval requested"
                    );
                    return Ok(RequestApprovalResponse { approval, token });
                }
                Err(StoreError::UniqueViolation(constraint)) if constraint == TOKEN_CONSTRAINT => {
                    debug!(attempt, "Approval token collision, retrying");
                }
                Err(StoreError::UniqueViolation(_)) => {
                    return Err(ServiceError::Conflict(format!(
                        "Transaction {} already has an active vendor approval",
                        transaction_id
                    )))
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::Conflict(
            "Could not allocate an approval token".to_string(),
        ))
    }

    async fn expire(
        &self,
        approval: &VendorApproval,
        now: DateTime<Utc>,
    ) -> ServiceResult<Option<VendorApproval>> {
        let expired = self
            .store
            .update_approval_status(
                approval.id,
                ApprovalStatus::Pending,
                ApprovalStatus::Expired,
                ApprovalPatch::default(),
                now,
            )
            .await?;
        if expired.is_some() {
            info!(approval_id = approval.id, transaction_id = approval.transaction_id, "Vendor approval expired");
        }
        Ok(expired)
    }

    async fn load_by_token(&self, token: &str) -> ServiceResult<VendorApproval> {
        self.store
            .get_approval_by_token(token)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Approval link not found".to_string()))
    }

    /// Public view for the vendor page; a stale pending record is marked expired
    pub async fn view(&self, token: &str, now: DateTime<Utc>) -> ServiceResult<ApprovalView> {
        let approval = self.load_by_token(token).await?;
        if approval.status == ApprovalStatus::Pending && approval.is_past_expiry(now) {
            self.expire(&approval, now).await?;
            return Err(ServiceError::Gone("Approval link has expired".to_string()));
        }
        if approval.status == ApprovalStatus::Expired {
            return Err(ServiceError::Gone("Approval link has expired".to_string()));
        }
        Ok(ApprovalView::from(&approval))
    }

    /// Vendor approves or rejects
    pub async fn respond(
        &self,
        token: &str,
        request: RespondApprovalRequest,
        responder_ip: Option<String>,
        now: DateTime<Utc>,
    ) -> ServiceResult<VendorApproval> {
        let approval = self.load_by_token(token).await?;

        match approval.status {
            ApprovalStatus::Approved | ApprovalStatus::Rejected => {
                return Err(ServiceError::Conflict(format!(
                    "Approval was already {:?}",
                    approval.status
                )))
            }
            ApprovalStatus::Expired => {
                return Err(ServiceError::Gone("Approval link has expired".to_string()))
            }
            ApprovalStatus::Pending => {}
        }

        if approval.is_past_expiry(now) {
            self.expire(&approval, now).await?;
            return Err(ServiceError::Gone("Approval link has expired".to_string()));
        }

        let reason = request
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        let (next, patch) = match request.action {
            ApprovalAction::Approve => (
                ApprovalStatus::Approved,
                ApprovalPatch {
                    responded_at: Some(now),
                    responder_ip,
                    rejection_reason: None,
                },
            ),
            ApprovalAction::Reject => {
                let Some(reason) = reason else {
                    return Err(ServiceError::Required(
                        "A reason is required to reject".to_string(),
                    ));
                };
                (
                    ApprovalStatus::Rejected,
                    ApprovalPatch {
                        responded_at: Some(now),
                        responder_ip,
                        rejection_reason: Some(reason),
                    },
                )
            }
        };

        let Some(updated) = self
            .store
            .update_approval_status(approval.id, ApprovalStatus::Pending, next, patch, now)
            .await?
        else {
            return Err(ServiceError::Conflict(
                "Approval was answered concurrently".to_string(),
            ));
        };

        info!(
            approval_id = updated.id,
            transaction_id = updated.transaction_id,
            status = ?updated.status,
            "Vendor responded"
        );

        let approved = updated.status == ApprovalStatus::Approved;
        let kind = if approved {
            NotificationKind::VendorApprovalApproved
        } else {
            NotificationKind::VendorApprovalRejected
        };
        if let Some(tx) = self.store.get_transaction(updated.transaction_id).await? {
            let context = json!({
                "transaction_id": tx.id,
                "vendor_name": updated.vendor_name,
                "reason": updated.rejection_reason,
            });
            self.notifier.notify(tx.buyer_id, kind, context.clone());
            self.notifier.notify(tx.seller_id, kind, context);
        }
        self.ws_state
            .broadcast_event(TransactionEvent::VendorApprovalResponded {
                transaction_id: updated.transaction_id,
                approved,
            });

        Ok(updated)
    }

    pub async fn list_for_transaction(
        &self,
        transaction_id: i64,
        user_id: Uuid,
        is_staff: bool,
    ) -> ServiceResult<Vec<VendorApproval>> {
        let tx = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {} not found", transaction_id)))?;
        if !is_staff && !tx.is_party(user_id) {
            return Err(ServiceError::Forbidden(
                "Not a party to this transaction".to_string(),
            ));
        }
        Ok(self.store.list_approvals_for_transaction(transaction_id).await?)
    }
}
