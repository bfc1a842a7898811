//! Vendor approval subflow tests

mod common;

use chrono::Duration;

use common::{t0, Harness};
use passvault_server::error::ServiceError;
use passvault_server::notifications::NotificationKind;
use passvault_server::vendor_approval::{
    ApprovalAction, ApprovalStatus, RequestApprovalRequest, RespondApprovalRequest,
    VendorApprovalService,
};

fn approvals(h: &Harness) -> VendorApprovalService {
    VendorApprovalService::new(
        h.store.clone(),
        h.notifier.clone(),
        h.ws_state.clone(),
        h.transactions.policy().vendor_approval_ttl_hours,
    )
}

fn hotel() -> RequestApprovalRequest {
    RequestApprovalRequest {
        vendor_name: "Hotel Atlântico".to_string(),
        vendor_email: "reservas@atlantico.example".to_string(),
        vendor_phone: None,
    }
}

#[tokio::test]
async fn test_vendor_approves() {
    let h = Harness::new().await;
    let service = approvals(&h);
    let tx = h.held(1_000).await;

    let issued = service
        .request_approval(tx.id, h.seller, hotel(), t0())
        .await
        .unwrap();
    assert_eq!(issued.approval.status, ApprovalStatus::Pending);
    assert_eq!(issued.approval.expires_at, t0() + Duration::hours(72));
    assert_eq!(issued.token.len(), 64);

    let view = service.view(&issued.token, t0() + Duration::hours(1)).await.unwrap();
    assert_eq!(view.transaction_id, tx.id);
    assert_eq!(view.status, ApprovalStatus::Pending);

    let approved = service
        .respond(
            &issued.token,
            RespondApprovalRequest {
                action: ApprovalAction::Approve,
                reason: None,
            },
            Some("192.0.2.44".to_string()),
            t0() + Duration::hours(2),
        )
        .await
        .unwrap();
    assert_eq!(approved.status, ApprovalStatus::Approved);
    assert_eq!(approved.responder_ip.as_deref(), Some("192.0.2.44"));
    assert!(h.sink.wait_for(h.buyer, NotificationKind::VendorApprovalApproved).await);

    let twice = service
        .respond(
            &issued.token,
            RespondApprovalRequest {
                action: ApprovalAction::Reject,
                reason: Some("changed".to_string()),
            },
            None,
            t0() + Duration::hours(3),
        )
        .await;
    assert!(matches!(twice, Err(ServiceError::Conflict(_))));

    // An approved record still blocks a new request
    let again = service
        .request_approval(tx.id, h.seller, hotel(), t0() + Duration::hours(4))
        .await;
    assert!(matches!(again, Err(ServiceError::Conflict(_))));
}

#[tokio::test]
async fn test_reject_requires_reason() {
    let h = Harness::new().await;
    let service = approvals(&h);
    let tx = h.held(1_000).await;
    let issued = service
        .request_approval(tx.id, h.seller, hotel(), t0())
        .await
        .unwrap();

    let blank = service
        .respond(
            &issued.token,
            RespondApprovalRequest {
                action: ApprovalAction::Reject,
                reason: Some("   ".to_string()),
            },
            None,
            t0() + Duration::hours(1),
        )
        .await;
    assert!(matches!(blank, Err(ServiceError::Required(_))));

    let rejected = service
        .respond(
            &issued.token,
            RespondApprovalRequest {
                action: ApprovalAction::Reject,
                reason: Some("Name on booking does not match".to_string()),
            },
            None,
            t0() + Duration::hours(1),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status, ApprovalStatus::Rejected);
    assert_eq!(
        rejected.rejection_reason.as_deref(),
        Some("Name on booking does not match")
    );
    assert!(h.sink.wait_for(h.seller, NotificationKind::VendorApprovalRejected).await);
}

#[tokio::test]
async fn test_expired_link_is_gone() {
    let h = Harness::new().await;
    let service = approvals(&h);
    let tx = h.held(1_000).await;
    let issued = service
        .request_approval(tx.id, h.seller, hotel(), t0())
        .await
        .unwrap();

    let late = t0() + Duration::hours(73);
    let result = service
        .respond(
            &issued.token,
            RespondApprovalRequest {
                action: ApprovalAction::Approve,
                reason: None,
            },
            None,
            late,
        )
        .await;
    assert!(matches!(result, Err(ServiceError::Gone(_))));

    let listed = service
        .list_for_transaction(tx.id, h.buyer, false)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, ApprovalStatus::Expired);

    // The expired record no longer blocks a fresh request
    let fresh = service
        .request_approval(tx.id, h.seller, hotel(), late)
        .await
        .unwrap();
    assert_ne!(fresh.token, issued.token);
}

#[tokio::test]
async fn test_only_seller_requests() {
    let h = Harness::new().await;
    let service = approvals(&h);
    let tx = h.held(1_000).await;

    let result = service
        .request_approval(tx.id, h.buyer, hotel(), t0())
        .await;
    assert!(matches!(result, Err(ServiceError::Forbidden(_))));

    let unknown = service.view("no-such-token", t0()).await;
    assert!(matches!(unknown, Err(ServiceError::NotFound(_))));
}
