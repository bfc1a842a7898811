//! Transaction and payment models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

/// Lifecycle status of a transaction
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "transaction_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Initiated,
    AwaitingPayment,
    PaymentConfirmed,
    EscrowHeld,
    TransferPending,
    Completed,
    DisputeOpened,
    DisputeResolved,
    Cancelled,
    Refunded,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 10] = [
        TransactionStatus::Initiated,
        TransactionStatus::AwaitingPayment,
        TransactionStatus::PaymentConfirmed,
        TransactionStatus::EscrowHeld,
        TransactionStatus::TransferPending,
        TransactionStatus::Completed,
        TransactionStatus::DisputeOpened,
        TransactionStatus::DisputeResolved,
        TransactionStatus::Cancelled,
        TransactionStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Initiated => "INITIATED",
            TransactionStatus::AwaitingPayment => "AWAITING_PAYMENT",
            TransactionStatus::PaymentConfirmed => "PAYMENT_CONFIRMED",
            TransactionStatus::EscrowHeld => "ESCROW_HELD",
            TransactionStatus::TransferPending => "TRANSFER_PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::DisputeOpened => "DISPUTE_OPENED",
            TransactionStatus::DisputeResolved => "DISPUTE_RESOLVED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of sale. Commercial terms are fixed at creation.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Transaction {
    pub id: i64,
    pub code: String,
    pub listing_id: i64,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub agreed_price: i64,
    pub platform_fee: i64,
    pub platform_fee_rate_bps: i32,
    pub seller_net_amount: i64,
    pub status: TransactionStatus,
    pub payment_deadline: DateTime<Utc>,
    pub payment_confirmed_at: Option<DateTime<Utc>>,
    pub transferred_at: Option<DateTime<Utc>>,
    pub escrow_release_date: Option<DateTime<Utc>>,
    pub buyer_confirmed_at: Option<DateTime<Utc>>,
    pub auto_release: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub buyer_ip: Option<String>,
    pub seller_ip: Option<String>,
    pub first_viewed_at: Option<DateTime<Utc>>,
    pub failed_payment_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }
}

/// Insert payload for a new transaction
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub code: String,
    pub listing_id: i64,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub agreed_price: i64,
    pub platform_fee: i64,
    pub platform_fee_rate_bps: i32,
    pub seller_net_amount: i64,
    pub payment_deadline: DateTime<Utc>,
    pub buyer_ip: Option<String>,
    pub seller_ip: Option<String>,
    pub first_viewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Columns written alongside a status change. `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct TransitionPatch {
    pub payment_confirmed_at: Option<DateTime<Utc>>,
    pub transferred_at: Option<DateTime<Utc>>,
    pub escrow_release_date: Option<DateTime<Utc>>,
    pub buyer_confirmed_at: Option<DateTime<Utc>>,
    pub auto_release: Option<bool>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
}

/// Who confirms receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptActor {
    /// The buyer, by hand
    Buyer(Uuid),
    /// The escrow sweep after the release deadline
    System,
}

/// Payment direction relative to the platform
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_direction", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentDirection {
    Charge,
    Payout,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Pix,
    BankSlip,
    CreditCard,
    BankTransfer,
}

impl PaymentMethod {
    /// Instant transfers and bank slips are issued against the payer's tax id
    pub fn requires_tax_id(&self) -> bool {
        matches!(self, PaymentMethod::Pix | PaymentMethod::BankSlip)
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Paid,
    Failed,
}

/// One gateway-facing charge or payout
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Payment {
    pub id: i64,
    pub transaction_id: i64,
    pub direction: PaymentDirection,
    /// `None` when the platform pays
    pub payer_id: Option<Uuid>,
    /// `None` when the platform receives
    pub payee_id: Option<Uuid>,
    pub gateway_id: Option<String>,
    pub gross_amount: i64,
    pub net_amount: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub transaction_id: i64,
    pub direction: PaymentDirection,
    pub payer_id: Option<Uuid>,
    pub payee_id: Option<Uuid>,
    pub gateway_id: Option<String>,
    pub gross_amount: i64,
    pub net_amount: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub last_error: Option<String>,
}

/// Columns written when a payment is updated after a gateway call
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub status: PaymentStatus,
    pub gateway_id: Option<String>,
    pub last_error: Option<String>,
    pub increment_attempts: bool,
}

/// Gateway-presented instructions for the payer, opaque to the core
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentInstructions {
    Redirect {
        url: String,
    },
    QrCode {
        payload: String,
        expires_at: Option<DateTime<Utc>>,
    },
    BankSlip {
        barcode: String,
        url: Option<String>,
    },
}

/// Request DTO for creating a transaction from an accepted offer
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTransactionRequest {
    pub listing_id: i64,
    #[validate(range(min = 1, message = "agreed_price must be positive"))]
    pub agreed_price: i64,
    /// When the buyer first opened the listing
    pub first_viewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub method: PaymentMethod,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub payment_id: i64,
    pub gateway_id: String,
    pub status: TransactionStatus,
    pub instructions: PaymentInstructions,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CancelTransactionRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

/// Administrative decision after every dispute on a transaction is resolved
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Reopen the transfer window with a fresh release deadline
    ResumeTransfer,
    Refund,
    Cancel,
}

#[derive(Debug, Deserialize)]
pub struct SettleTransactionRequest {
    pub outcome: SettlementOutcome,
    pub reason: Option<String>,
}

/// Status reported by the gateway for a charge
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// Webhook payload sent by the payment gateway
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookPayload {
    pub gateway_id: String,
    pub status: GatewayPaymentStatus,
    /// Whether the confirmation already implies funds are held; defaults to true
    pub funds_held: Option<bool>,
    #[serde(rename = "timestamp")]
    pub _timestamp: Option<DateTime<Utc>>,
}

/// Query parameters for listing transactions
#[derive(Debug, Deserialize, Default)]
pub struct ListTransactionsQuery {
    pub status: Option<TransactionStatus>,
    pub page: Option<i32>,
    pub limit: Option<i32>,
}

/// Domain events for real-time updates
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum TransactionEvent {
    Created {
        transaction_id: i64,
        buyer_id: Uuid,
        seller_id: Uuid,
    },
    PaymentCreated {
        transaction_id: i64,
    },
    PaymentConfirmed {
        transaction_id: i64,
    },
    Transferred {
        transaction_id: i64,
        escrow_release_date: DateTime<Utc>,
    },
    Completed {
        transaction_id: i64,
        auto_release: bool,
    },
    Cancelled {
        transaction_id: i64,
        reason: String,
    },
    Refunded {
        transaction_id: i64,
    },
    DisputeOpened {
        transaction_id: i64,
        protocol: String,
    },
    DisputeResolved {
        transaction_id: i64,
        protocol: String,
    },
    VendorApprovalResponded {
        transaction_id: i64,
        approved: bool,
    },
    StatusUpdated {
        transaction_id: i64,
        status: TransactionStatus,
    },
}

impl TransactionEvent {
    pub fn transaction_id(&self) -> i64 {
        match self {
            TransactionEvent::Created { transaction_id, .. }
            | TransactionEvent::PaymentCreated { transaction_id }
            | TransactionEvent::PaymentConfirmed { transaction_id }
            | TransactionEvent::Transferred { transaction_id, .. }
            | TransactionEvent::Completed { transaction_id, .. }
            | TransactionEvent::Cancelled { transaction_id, .. }
            | TransactionEvent::Refunded { transaction_id }
            | TransactionEvent::DisputeOpened { transaction_id, .. }
            | TransactionEvent::DisputeResolved { transaction_id, .. }
            | TransactionEvent::VendorApprovalResponded { transaction_id, .. }
            | TransactionEvent::StatusUpdated { transaction_id, .. } => *transaction_id,
        }
    }
}
