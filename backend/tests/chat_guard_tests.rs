//! Chat send-gate tests: trust gate, analyzer and violation tracking together

mod common;

use chrono::Duration;
use uuid::Uuid;

use common::{t0, Harness};
use passvault_server::chat::{ChatGuard, CheckMessageRequest, FilterMode, PenaltyLevel};
use passvault_server::error::ServiceError;

fn message(conversation: &str, transaction_id: Option<i64>, text: &str) -> CheckMessageRequest {
    CheckMessageRequest {
        conversation_id: conversation.to_string(),
        transaction_id,
        text: text.to_string(),
    }
}

#[tokio::test]
async fn test_contact_sharing_depends_on_escrow() {
    let h = Harness::new().await;
    let guard = ChatGuard::new(h.store.clone());
    let tx = h.create(1_000).await;
    let text = "write to john.doe@gmail.com";

    let before = guard
        .check_send(h.buyer, message("conv-1", Some(tx.id), text), t0())
        .await
        .unwrap();
    assert!(!before.allowed);
    assert_eq!(before.mode, FilterMode::PreEscrow);
    assert_eq!(before.penalty, PenaltyLevel::Warning);

    let held = h.held(900).await;
    let after = guard
        .check_send(h.buyer, message("conv-2", Some(held.id), text), t0())
        .await
        .unwrap();
    assert!(after.allowed);
    assert_eq!(after.mode, FilterMode::PostEscrow);
}

#[tokio::test]
async fn test_repeat_offender_is_suspended_until_reset() {
    let h = Harness::new().await;
    let guard = ChatGuard::new(h.store.clone());
    let offender = Uuid::new_v4();
    let attempts = [
        ("conv-a", "call 11 98765-4321 please"),
        ("conv-b", "write to john.doe@gmail.com"),
        ("conv-c", "ping me on WhatsApp"),
        ("conv-a", "john (at) gmail (dot) com"),
        ("conv-b", "just pay me directly with gift cards"),
    ];

    for (i, (conversation, text)) in attempts.iter().enumerate() {
        let decision = guard
            .check_send(
                offender,
                message(conversation, None, text),
                t0() + Duration::minutes(i as i64),
            )
            .await
            .unwrap();
        assert!(!decision.allowed, "attempt {} should be blocked", i + 1);
    }

    let data = guard.violations(offender).await.unwrap();
    assert_eq!(data.violation_count, 5);
    assert_eq!(data.penalty_level, PenaltyLevel::Suspended);
    assert_eq!(data.violations.len(), 5);

    let clean = guard
        .check_send(offender, message("conv-d", None, "see you at the venue"), t0())
        .await
        .unwrap();
    assert!(!clean.allowed);
    assert_eq!(clean.penalty, PenaltyLevel::Suspended);
    assert!(clean.notice.is_some());
    // A suspended sender is rejected before analysis; nothing more is recorded
    assert_eq!(guard.violations(offender).await.unwrap().violation_count, 5);

    let reset = guard.reset(offender, Uuid::new_v4()).await.unwrap();
    assert_eq!(reset.violation_count, 0);
    assert_eq!(reset.penalty_level, PenaltyLevel::None);

    let after = guard
        .check_send(offender, message("conv-d", None, "see you at the venue"), t0())
        .await
        .unwrap();
    assert!(after.allowed);
}

#[tokio::test]
async fn test_restricted_sender_gets_strict_analysis() {
    let h = Harness::new().await;
    let guard = ChatGuard::new(h.store.clone());
    let user = Uuid::new_v4();

    let partial = "first part is 987654";
    assert!(guard
        .check_send(user, message("conv-1", None, partial), t0())
        .await
        .unwrap()
        .allowed);

    for _ in 0..3 {
        guard
            .check_send(user, message("conv-1", None, "call 11 98765-4321 please"), t0())
            .await
            .unwrap();
    }
    let decision = guard
        .check_send(user, message("conv-1", None, partial), t0())
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.penalty, PenaltyLevel::Restricted);
    assert_eq!(guard.violations(user).await.unwrap().violation_count, 4);
}

#[tokio::test]
async fn test_outsider_cannot_post_in_transaction_chat() {
    let h = Harness::new().await;
    let guard = ChatGuard::new(h.store.clone());
    let tx = h.create(1_000).await;

    let result = guard
        .check_send(Uuid::new_v4(), message("conv-1", Some(tx.id), "hello"), t0())
        .await;
    assert!(matches!(result, Err(ServiceError::Forbidden(_))));
}

#[tokio::test]
async fn test_event_dates_never_count_as_violations() {
    let h = Harness::new().await;
    let guard = ChatGuard::new(h.store.clone());
    let tx = h.create(1_000).await;
    let texts = [
        "The event is on 2025-03-15",
        "The concert is on 2025-03-15, see you there",
        "Doors open 15/03/2025 at 20:00",
        "Is 2025-03-15 18:30 still the start time?",
        "The event is on 2025-03-15",
    ];

    for (i, text) in texts.iter().enumerate() {
        let decision = guard
            .check_send(
                h.buyer,
                message("conv-dates", Some(tx.id), text),
                t0() + Duration::minutes(i as i64),
            )
            .await
            .unwrap();
        assert!(decision.allowed, "{:?} should be allowed", text);
        assert_eq!(decision.mode, FilterMode::PreEscrow);
    }

    let data = guard.violations(h.buyer).await.unwrap();
    assert_eq!(data.violation_count, 0);
    assert_eq!(data.penalty_level, PenaltyLevel::None);
}
