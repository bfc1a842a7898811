//! Outbound notifications
//!
//! Services enqueue notifications on a bounded channel and move on. A worker
//! task drains the queue and delivers each notification to the configured sink
//! with exponential backoff. Delivery failures are logged and dropped; they
//! never reach the operation that produced the notification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentConfirmed,
    TransferMarked,
    /// Seller: the payout is on its way
    FundsIncoming,
    /// Buyer: the purchase is complete
    TransactionCompleted,
    TransactionCancelled,
    TransactionRefunded,
    PaymentDeadlineExpired,
    DisputeOpened,
    DisputeResolved,
    VendorApprovalApproved,
    VendorApprovalRejected,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Notification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub context: serde_json::Value,
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Destination of notifications (e-mail relay, push service, log)
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Exponential backoff between delivery attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Fire-and-forget handle shared by every service
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    /// Start the delivery worker and return the enqueue handle
    pub fn spawn(sink: Arc<dyn NotificationSink>, policy: RetryPolicy) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Notification>(QUEUE_CAPACITY);

        let handle = tokio::spawn(async move {
            info!("Notification worker started");
            while let Some(notification) = rx.recv().await {
                deliver_with_retry(sink.as_ref(), &notification, policy).await;
            }
            info!("Notification worker stopped");
        });

        (Self { tx }, handle)
    }

    /// Enqueue without waiting; a full or closed queue drops the notification
    pub fn notify(&self, user_id: Uuid, kind: NotificationKind, context: serde_json::Value) {
        let notification = Notification {
            user_id,
            kind,
            context,
        };
        if let Err(e) = self.tx.try_send(notification) {
            warn!(user_id = %user_id, kind = ?kind, error = %e, "Dropping notification");
        }
    }
}

async fn deliver_with_retry(sink: &dyn NotificationSink, notification: &Notification, policy: RetryPolicy) {
    for attempt in 1..=policy.max_attempts {
        match sink.deliver(notification).await {
            Ok(()) => {
                debug!(
                    user_id = %notification.user_id,
                    kind = ?notification.kind,
                    attempt,
                    "Notification delivered"
                );
                return;
            }
            Err(e) if attempt < policy.max_attempts => {
                warn!(
                    user_id = %notification.user_id,
                    kind = ?notification.kind,
                    attempt,
                    error = %e,
                    "Notification delivery failed, retrying"
                );
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            }
            Err(e) => {
                error!(
                    user_id = %notification.user_id,
                    kind = ?notification.kind,
                    attempts = attempt,
                    error = %e,
                    "Notification delivery abandoned"
                );
            }
        }
    }
}

/// Writes notifications to the log; used when no webhook is configured
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            user_id = %notification.user_id,
            kind = ?notification.kind,
            context = %notification.context,
            "Notification"
        );
        Ok(())
    }
}

/// Posts each notification as JSON to an external relay
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::Delivery(format!(
                "relay answered {}",
                response.status()
            )))
        }
    }
}
