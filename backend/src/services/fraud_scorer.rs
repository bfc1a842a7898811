//! Fraud risk scoring for listings and transactions
//!
//! Both scorers are pure: the same inputs always produce the same score, and
//! nothing here performs I/O. Missing or malformed inputs contribute zero
//! points rather than failing the score. Scores are advisory and feed the
//! review queue in `fraud_review`.

use std::collections::HashSet;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Listing, UserProfile};
use crate::transaction::Transaction;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Identity points for an account younger than a week
const NEW_ACCOUNT_POINTS: i32 = 10;

/// Identity points for an account younger than a month
const YOUNG_ACCOUNT_POINTS: i32 = 5;

const UNVERIFIED_IDENTITY_POINTS: i32 = 9;

const NO_HISTORY_POINTS: i32 = 6;

/// Upper bound of the identity component; also the divisor of the weakness factor
const MAX_IDENTITY_POINTS: i32 = NEW_ACCOUNT_POINTS + UNVERIFIED_IDENTITY_POINTS + NO_HISTORY_POINTS;

/// Pricing weight, scaled by discount depth and identity weakness
const WEIGHT_PRICING: f64 = 35.0;

/// Cohort size below which the category median is ignored
const MIN_COHORT_SIZE: usize = 3;

const MISSING_IMAGES_POINTS: i32 = 10;
const OWN_DUPLICATE_IMAGE_POINTS: i32 = 10;
const FOREIGN_IMAGE_POINTS: i32 = 15;
const DUPLICATE_TEXT_POINTS: i32 = 15;

/// Word-set Jaccard similarity treated as a relisted item
const TEXT_SIMILARITY_THRESHOLD: f64 = 0.85;

const PAST_EVENT_POINTS: i32 = 25;
const IMMINENT_EVENT_POINTS: i32 = 10;

/// Transfers rarely complete inside this window
const IMMINENT_EVENT_HOURS: i64 = 48;

/// Amount deviation weight for offers above the asking price
const WEIGHT_AMOUNT_DEVIATION: f64 = 30.0;

/// Deviation tolerated before the signal starts
const AMOUNT_DEVIATION_FLOOR: f64 = 0.10;

const SAME_IP_POINTS: i32 = 30;
const ADJACENT_IP_POINTS: i32 = 20;

const FAST_CHECKOUT_SECS: i64 = 5;
const FAST_CHECKOUT_POINTS: i32 = 15;

/// Minor units above which a quick checkout is more suspicious
const HIGH_VALUE_AMOUNT: i64 = 50_000;
const HIGH_VALUE_CHECKOUT_SECS: i64 = 30;
const HIGH_VALUE_CHECKOUT_POINTS: i32 = 20;

/// Slow checkout combined with repeated failures suggests card testing
const SLOW_CHECKOUT_HOURS: i64 = 24;
const CARD_TESTING_MIN_FAILURES: i32 = 3;
const CARD_TESTING_POINTS: i32 = 15;

const WEIGHT_BUYER_IDENTITY: f64 = 10.0;
const WEIGHT_SELLER_IDENTITY: f64 = 5.0;

const MAX_SCORE: i32 = 100;

// ============================================================================
// Data Models
// ============================================================================

/// Risk tier, monotonic in score
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[sqlx(type_name = "risk_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: i32) -> Self {
        match score {
            i32::MIN..=24 => RiskLevel::Low,
            25..=49 => RiskLevel::Medium,
            50..=74 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    /// High and critical scores go to manual review
    pub fn needs_review(&self) -> bool {
        *self >= RiskLevel::High
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    NewAccount,
    UnverifiedIdentity,
    NoTransactionHistory,
    PricingAnomaly,
    MissingImages,
    DuplicateImages,
    ForeignImages,
    DuplicateText,
    PastEvent,
    ImminentEvent,
    AmountDeviation,
    SharedNetwork,
    AdjacentNetwork,
    PaymentFriction,
    FastCheckout,
    CardTesting,
    WeakBuyerIdentity,
    WeakSellerIdentity,
}

/// One contributing signal with the points it added
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FraudSignal {
    pub kind: SignalKind,
    pub points: i32,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FraudScore {
    /// 0-100, higher is riskier
    pub score: i32,
    pub risk: RiskLevel,
    pub signals: Vec<FraudSignal>,
}

impl FraudScore {
    fn from_signals(signals: Vec<FraudSignal>) -> Self {
        let score = signals
            .iter()
            .map(|s| s.points)
            .sum::<i32>()
            .clamp(0, MAX_SCORE);
        Self {
            score,
            risk: RiskLevel::from_score(score),
            signals,
        }
    }
}

struct Signals(Vec<FraudSignal>);

impl Signals {
    fn add(&mut self, kind: SignalKind, points: i32, description: impl Into<String>) {
        if points > 0 {
            self.0.push(FraudSignal {
                kind,
                points,
                description: description.into(),
            });
        }
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Identity signals for a profile; an absent profile is neutral
fn identity_signals(profile: Option<&UserProfile>, now: DateTime<Utc>) -> Vec<FraudSignal> {
    let mut out = Signals(Vec::new());
    let Some(profile) = profile else {
        return out.0;
    };

    if let Some(created) = profile.account_created_at {
        let age = now - created;
        if age >= Duration::zero() {
            if age < Duration::days(7) {
                out.add(
                    SignalKind::NewAccount,
                    NEW_ACCOUNT_POINTS,
                    format!("Account created {} day(s) ago", age.num_days()),
                );
            } else if age < Duration::days(30) {
                out.add(
                    SignalKind::NewAccount,
                    YOUNG_ACCOUNT_POINTS,
                    format!("Account created {} days ago", age.num_days()),
                );
            }
        }
    }

    if !profile.is_identity_verified() {
        out.add(
            SignalKind::UnverifiedIdentity,
            UNVERIFIED_IDENTITY_POINTS,
            "Identity not verified",
        );
    }

    if profile.completed_transactions <= 0 {
        out.add(
            SignalKind::NoTransactionHistory,
            NO_HISTORY_POINTS,
            "No completed transactions",
        );
    }

    out.0
}

/// Identity weakness in [0, 1]
fn weakness_factor(identity: &[FraudSignal]) -> f64 {
    let points: i32 = identity.iter().map(|s| s.points).sum();
    (points as f64 / MAX_IDENTITY_POINTS as f64).clamp(0.0, 1.0)
}

// ============================================================================
// Listing scoring
// ============================================================================

fn median(values: &mut [i64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] as f64 + values[mid] as f64) / 2.0
    } else {
        values[mid] as f64
    })
}

/// Largest discount relative to the face value or the category median
fn discount_depth(listing: &Listing, cohort: &[Listing]) -> f64 {
    if listing.asking_price <= 0 {
        return 0.0;
    }
    let asking = listing.asking_price as f64;

    let vs_original = match listing.original_price {
        Some(original) if original > 0 => 1.0 - asking / original as f64,
        _ => 0.0,
    };

    let mut prices: Vec<i64> = cohort
        .iter()
        .filter(|l| l.id != listing.id && l.category == listing.category && l.asking_price > 0)
        .map(|l| l.asking_price)
        .collect();
    let vs_cohort = if prices.len() >= MIN_COHORT_SIZE {
        median(&mut prices)
            .map(|m| 1.0 - asking / m)
            .unwrap_or(0.0)
    } else {
        0.0
    };

    vs_original.max(vs_cohort).clamp(0.0, 1.0)
}

fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Score a listing against its seller and the other active listings it competes with.
///
/// `cohort` may contain the seller's own listings and listings from other
/// sellers; the listing itself is skipped if present.
pub fn score_listing(
    listing: &Listing,
    seller: Option<&UserProfile>,
    cohort: &[Listing],
    now: DateTime<Utc>,
) -> FraudScore {
    let identity = identity_signals(seller, now);
    let weakness = weakness_factor(&identity);
    let mut signals = Signals(identity);

    // A deep discount alone is the product premise; it only counts on a weak account.
    let depth = discount_depth(listing, cohort);
    let pricing_points = (WEIGHT_PRICING * depth * weakness).round() as i32;
    signals.add(
        SignalKind::PricingAnomaly,
        pricing_points,
        format!(
            "Asking price {:.0}% below reference on a weak account",
            depth * 100.0
        ),
    );

    let others: Vec<&Listing> = cohort.iter().filter(|l| l.id != listing.id).collect();

    if listing.image_hashes.is_empty() {
        signals.add(SignalKind::MissingImages, MISSING_IMAGES_POINTS, "Listing has no images");
    } else {
        let own: HashSet<&str> = listing.image_hashes.iter().map(String::as_str).collect();
        let shares_image = |l: &Listing| l.image_hashes.iter().any(|h| own.contains(h.as_str()));

        if others
            .iter()
            .filter(|l| l.seller_id == listing.seller_id)
            .any(|l| shares_image(l))
        {
            signals.add(
                SignalKind::DuplicateImages,
                OWN_DUPLICATE_IMAGE_POINTS,
                "Image reused across the seller's active listings",
            );
        }
        if others
            .iter()
            .filter(|l| l.seller_id != listing.seller_id)
            .any(|l| shares_image(l))
        {
            signals.add(
                SignalKind::ForeignImages,
                FOREIGN_IMAGE_POINTS,
                "Image matches another seller's listing",
            );
        }
    }

    let text = word_set(&format!("{} {}", listing.title, listing.description));
    let near_duplicate = others.iter().any(|l| {
        jaccard(&text, &word_set(&format!("{} {}", l.title, l.description)))
            >= TEXT_SIMILARITY_THRESHOLD
    });
    if near_duplicate {
        signals.add(
            SignalKind::DuplicateText,
            DUPLICATE_TEXT_POINTS,
            "Title and description nearly identical to another active listing",
        );
    }

    if let Some(event_date) = listing.event_date {
        if event_date < now {
            signals.add(SignalKind::PastEvent, PAST_EVENT_POINTS, "Event date already passed");
        } else if event_date < now + Duration::hours(IMMINENT_EVENT_HOURS) {
            signals.add(
                SignalKind::ImminentEvent,
                IMMINENT_EVENT_POINTS,
                format!("Event within {} hours", IMMINENT_EVENT_HOURS),
            );
        }
    }

    FraudScore::from_signals(signals.0)
}

// ============================================================================
// Transaction scoring
// ============================================================================

enum NetworkRelation {
    Same,
    Adjacent,
    Unrelated,
}

/// Compare two addresses; /24 for IPv4 and /64 for IPv6 count as adjacent
fn network_relation(a: &str, b: &str) -> NetworkRelation {
    let (Ok(a), Ok(b)) = (a.trim().parse::<IpAddr>(), b.trim().parse::<IpAddr>()) else {
        return NetworkRelation::Unrelated;
    };
    if a == b {
        return NetworkRelation::Same;
    }
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) if a.octets()[..3] == b.octets()[..3] => {
            NetworkRelation::Adjacent
        }
        (IpAddr::V6(a), IpAddr::V6(b)) if a.segments()[..4] == b.segments()[..4] => {
            NetworkRelation::Adjacent
        }
        _ => NetworkRelation::Unrelated,
    }
}

fn friction_points(failed_attempts: i32) -> i32 {
    match failed_attempts {
        i32::MIN..=0 => 0,
        1 => 5,
        2 => 10,
        _ => 20,
    }
}

/// Score a transaction from its terms, the originating listing and both parties
pub fn score_transaction(
    transaction: &Transaction,
    listing: Option<&Listing>,
    buyer: Option<&UserProfile>,
    seller: Option<&UserProfile>,
    now: DateTime<Utc>,
) -> FraudScore {
    let mut signals = Signals(Vec::new());

    if let Some(listing) = listing.filter(|l| l.asking_price > 0) {
        let deviation = (transaction.agreed_price - listing.asking_price) as f64
            / listing.asking_price as f64;
        if deviation > AMOUNT_DEVIATION_FLOOR {
            let scaled = ((deviation - AMOUNT_DEVIATION_FLOOR) / (1.0 - AMOUNT_DEVIATION_FLOOR))
                .clamp(0.0, 1.0);
            signals.add(
                SignalKind::AmountDeviation,
                (WEIGHT_AMOUNT_DEVIATION * scaled).round() as i32,
                format!("Agreed price {:.0}% above asking price", deviation * 100.0),
            );
        }
    }

    if let (Some(buyer_ip), Some(seller_ip)) = (&transaction.buyer_ip, &transaction.seller_ip) {
        match network_relation(buyer_ip, seller_ip) {
            NetworkRelation::Same => signals.add(
                SignalKind::SharedNetwork,
                SAME_IP_POINTS,
                "Buyer and seller share an IP address",
            ),
            NetworkRelation::Adjacent => signals.add(
                SignalKind::AdjacentNetwork,
                ADJACENT_IP_POINTS,
                "Buyer and seller on the same network block",
            ),
            NetworkRelation::Unrelated => {}
        }
    }

    let failures = transaction.failed_payment_attempts;
    signals.add(
        SignalKind::PaymentFriction,
        friction_points(failures),
        format!("{} failed payment attempt(s)", failures),
    );

    if let Some(first_viewed) = transaction.first_viewed_at {
        let latency = transaction.created_at - first_viewed;
        if latency >= Duration::zero() {
            if transaction.agreed_price >= HIGH_VALUE_AMOUNT
                && latency < Duration::seconds(HIGH_VALUE_CHECKOUT_SECS)
            {
                signals.add(
                    SignalKind::FastCheckout,
                    HIGH_VALUE_CHECKOUT_POINTS,
                    format!("High-value offer {}s after first view", latency.num_seconds()),
                );
            } else if latency < Duration::seconds(FAST_CHECKOUT_SECS) {
                signals.add(
                    SignalKind::FastCheckout,
                    FAST_CHECKOUT_POINTS,
                    format!("Offer {}s after first view", latency.num_seconds()),
                );
            } else if latency > Duration::hours(SLOW_CHECKOUT_HOURS)
                && failures >= CARD_TESTING_MIN_FAILURES
            {
                signals.add(
                    SignalKind::CardTesting,
                    CARD_TESTING_POINTS,
                    "Slow checkout with repeated payment failures",
                );
            }
        }
    }

    let buyer_weakness = weakness_factor(&identity_signals(buyer, now));
    signals.add(
        SignalKind::WeakBuyerIdentity,
        (WEIGHT_BUYER_IDENTITY * buyer_weakness).round() as i32,
        "Buyer account is new or unverified",
    );

    let seller_weakness = weakness_factor(&identity_signals(seller, now));
    signals.add(
        SignalKind::WeakSellerIdentity,
        (WEIGHT_SELLER_IDENTITY * seller_weakness).round() as i32,
        "Seller account is new or unverified",
    );

    FraudScore::from_signals(signals.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListingStatus;
    use crate::transaction::TransactionStatus;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn veteran() -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            account_created_at: Some(now() - Duration::days(800)),
            verification_level: 3,
            completed_transactions: 40,
            tax_id: Some("123".into()),
        }
    }

    fn newcomer() -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            account_created_at: Some(now() - Duration::days(1)),
            verification_level: 0,
            completed_transactions: 0,
            tax_id: None,
        }
    }

    fn listing(id: i64, seller: Uuid, asking: i64, original: Option<i64>) -> Listing {
        Listing {
            id,
            seller_id: seller,
            category: "hotel".into(),
            title: format!("Listing number {}", id),
            description: format!("Unique description {} with distinct words {}", id, id * 7),
            asking_price: asking,
            original_price: original,
            image_hashes: vec![format!("img-{}", id)],
            event_date: Some(now() + Duration::days(30)),
            status: ListingStatus::Active,
            seller_ip: None,
            created_at: now() - Duration::days(2),
        }
    }

    fn transaction(price: i64) -> Transaction {
        Transaction {
            id: 1,
            code: "TX-AAAAAAAA".into(),
            listing_id: 1,
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            agreed_price: price,
            platform_fee: 0,
            platform_fee_rate_bps: 500,
            seller_net_amount: price,
            status: TransactionStatus::Initiated,
            payment_deadline: now() + Duration::hours(24),
            payment_confirmed_at: None,
            transferred_at: None,
            escrow_release_date: None,
            buyer_confirmed_at: None,
            auto_release: false,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            refunded_at: None,
            buyer_ip: None,
            seller_ip: None,
            first_viewed_at: None,
            failed_payment_attempts: 0,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn test_risk_level_from_score() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(24), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(25), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(50), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(75), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
    }

    #[test]
    fn test_risk_level_monotonic() {
        let mut previous = RiskLevel::from_score(0);
        for score in 1..=100 {
            let level = RiskLevel::from_score(score);
            assert!(level >= previous);
            previous = level;
        }
    }

    #[test]
    fn test_discount_alone_not_penalized() {
        let seller = veteran();
        let l = listing(1, seller.id, 200, Some(1_000));
        let score = score_listing(&l, Some(&seller), &[], now());
        assert!(score
            .signals
            .iter()
            .all(|s| s.kind != SignalKind::PricingAnomaly));
        assert_eq!(score.risk, RiskLevel::Low);
    }

    #[test]
    fn test_discount_with_weak_identity_penalized() {
        let seller = newcomer();
        let l = listing(1, seller.id, 200, Some(1_000));
        let score = score_listing(&l, Some(&seller), &[], now());
        assert!(score
            .signals
            .iter()
            .any(|s| s.kind == SignalKind::PricingAnomaly));
        assert!(score.risk >= RiskLevel::High, "score was {}", score.score);
    }

    #[test]
    fn test_cohort_median_discount() {
        let seller = newcomer();
        let other = Uuid::new_v4();
        let cohort: Vec<Listing> = (2..6).map(|i| listing(i, other, 1_000, None)).collect();
        let l = listing(1, seller.id, 300, None);
        let score = score_listing(&l, Some(&seller), &cohort, now());
        assert!(score
            .signals
            .iter()
            .any(|s| s.kind == SignalKind::PricingAnomaly));
    }

    #[test]
    fn test_content_and_temporal_signals() {
        let seller = veteran();
        let other = Uuid::new_v4();
        let mut l = listing(1, seller.id, 1_000, None);
        l.image_hashes = vec!["shared".into()];
        l.event_date = Some(now() - Duration::days(1));

        let mut copy = listing(2, other, 1_000, None);
        copy.image_hashes = vec!["shared".into()];
        copy.title = l.title.clone();
        copy.description = l.description.clone();

        let score = score_listing(&l, Some(&seller), &[copy], now());
        let kinds: Vec<SignalKind> = score.signals.iter().map(|s| s.kind).collect();
        assert!(kinds.contains(&SignalKind::ForeignImages));
        assert!(kinds.contains(&SignalKind::DuplicateText));
        assert!(kinds.contains(&SignalKind::PastEvent));
    }

    #[test]
    fn test_missing_profile_is_neutral() {
        let l = listing(1, Uuid::new_v4(), 1_000, None);
        let score = score_listing(&l, None, &[], now());
        assert_eq!(score.score, 0);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let seller = newcomer();
        let l = listing(1, seller.id, 200, Some(1_000));
        let first = score_listing(&l, Some(&seller), &[], now());
        for _ in 0..10 {
            assert_eq!(score_listing(&l, Some(&seller), &[], now()), first);
        }
    }

    #[test]
    fn test_shared_ip_and_friction() {
        let mut tx = transaction(1_000);
        tx.buyer_ip = Some("10.0.0.7".into());
        tx.seller_ip = Some("10.0.0.7".into());
        tx.failed_payment_attempts = 3;
        let score = score_transaction(&tx, None, None, None, now());
        assert_eq!(score.score, SAME_IP_POINTS + 20);

        tx.seller_ip = Some("10.0.0.99".into());
        let adjacent = score_transaction(&tx, None, None, None, now());
        assert_eq!(adjacent.score, ADJACENT_IP_POINTS + 20);

        tx.seller_ip = Some("not-an-ip".into());
        let malformed = score_transaction(&tx, None, None, None, now());
        assert_eq!(malformed.score, 20);
    }

    #[test]
    fn test_amount_deviation_only_above_asking() {
        let seller = Uuid::new_v4();
        let l = listing(1, seller, 1_000, None);
        let below = score_transaction(&transaction(800), Some(&l), None, None, now());
        assert_eq!(below.score, 0);

        let double = score_transaction(&transaction(2_000), Some(&l), None, None, now());
        assert!(double
            .signals
            .iter()
            .any(|s| s.kind == SignalKind::AmountDeviation));
    }

    #[test]
    fn test_velocity_signals() {
        let mut tx = transaction(60_000);
        tx.first_viewed_at = Some(tx.created_at - Duration::seconds(10));
        let fast = score_transaction(&tx, None, None, None, now());
        assert_eq!(fast.score, HIGH_VALUE_CHECKOUT_POINTS);

        let mut tx = transaction(1_000);
        tx.first_viewed_at = Some(tx.created_at - Duration::hours(30));
        tx.failed_payment_attempts = 4;
        let slow = score_transaction(&tx, None, None, None, now());
        assert!(slow.signals.iter().any(|s| s.kind == SignalKind::CardTesting));
    }

    #[test]
    fn test_score_is_clamped() {
        let buyer = newcomer();
        let seller = newcomer();
        let l = listing(1, seller.id, 100, None);
        let mut tx = transaction(1_000);
        tx.buyer_ip = Some("192.168.1.1".into());
        tx.seller_ip = Some("192.168.1.1".into());
        tx.failed_payment_attempts = 9;
        tx.first_viewed_at = Some(tx.created_at - Duration::seconds(1));
        let score = score_transaction(&tx, Some(&l), Some(&buyer), Some(&seller), now());
        assert_eq!(score.score, MAX_SCORE);
        assert_eq!(score.risk, RiskLevel::Critical);
    }
}
