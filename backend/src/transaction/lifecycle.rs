//! Transition table and commercial-term math for the transaction lifecycle

use rand::Rng;

use super::model::TransactionStatus;
use TransactionStatus::*;

impl TransactionStatus {
    /// Completed, cancelled and refunded transactions never move again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Completed | Cancelled | Refunded)
    }

    /// Every legal edge of the lifecycle graph
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        match self {
            Initiated => matches!(next, AwaitingPayment | Cancelled),
            AwaitingPayment => matches!(next, PaymentConfirmed | EscrowHeld | Cancelled),
            PaymentConfirmed => matches!(next, EscrowHeld | TransferPending | Cancelled | Refunded),
            EscrowHeld => matches!(next, TransferPending | DisputeOpened | Cancelled | Refunded),
            TransferPending => {
                matches!(next, Completed | DisputeOpened | Cancelled | Refunded)
            }
            DisputeOpened => matches!(next, DisputeResolved),
            DisputeResolved => matches!(next, TransferPending | Refunded | Cancelled),
            Completed | Cancelled | Refunded => false,
        }
    }

    /// Statuses from which `next` is reachable in one step
    pub fn predecessors_of(next: TransactionStatus) -> Vec<TransactionStatus> {
        TransactionStatus::ALL
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

/// The first status in `expected` that has no edge to `to`, if any
pub fn illegal_source(expected: &[TransactionStatus], to: TransactionStatus) -> Option<TransactionStatus> {
    expected.iter().copied().find(|s| !s.can_transition_to(to))
}

/// Statuses from which a party may cancel (non-terminal, no active dispute)
pub const CANCELLABLE: [TransactionStatus; 6] = [
    Initiated,
    AwaitingPayment,
    PaymentConfirmed,
    EscrowHeld,
    TransferPending,
    DisputeResolved,
];

/// Statuses in which the seller may mark the reservation as transferred
pub const TRANSFERABLE: [TransactionStatus; 2] = [EscrowHeld, PaymentConfirmed];

/// Statuses that allow opening a dispute
pub const DISPUTABLE: [TransactionStatus; 2] = [EscrowHeld, TransferPending];

/// Fee and seller net for a price, rounding half up in minor units
pub fn compute_fees(agreed_price: i64, rate_bps: i32) -> (i64, i64) {
    let fee = (agreed_price as i128 * rate_bps as i128 + 5_000) / 10_000;
    let fee = fee as i64;
    (fee, agreed_price - fee)
}

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Human-readable transaction code like `TX-7KQ2M9PA`
pub fn generate_transaction_code() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("TX-{}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_path_edges() {
        let path = [
            Initiated,
            AwaitingPayment,
            PaymentConfirmed,
            EscrowHeld,
            TransferPending,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_collapsed_confirmation_edge() {
        assert!(AwaitingPayment.can_transition_to(EscrowHeld));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in [Completed, Cancelled, Refunded] {
            assert!(terminal.is_terminal());
            for next in TransactionStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_dispute_branch() {
        assert!(EscrowHeld.can_transition_to(DisputeOpened));
        assert!(TransferPending.can_transition_to(DisputeOpened));
        assert!(!AwaitingPayment.can_transition_to(DisputeOpened));
        assert!(!DisputeOpened.can_transition_to(Cancelled));
        assert!(!DisputeOpened.can_transition_to(Completed));
        assert_eq!(TransactionStatus::predecessors_of(DisputeResolved), vec![DisputeOpened]);
    }

    #[test]
    fn test_cancellable_excludes_dispute_and_terminal() {
        assert!(!CANCELLABLE.contains(&DisputeOpened));
        for status in CANCELLABLE {
            assert!(status.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn test_illegal_source_flags_missing_edges() {
        assert_eq!(illegal_source(&CANCELLABLE, Cancelled), None);
        assert_eq!(illegal_source(&TRANSFERABLE, TransferPending), None);
        assert_eq!(illegal_source(&DISPUTABLE, DisputeOpened), None);
        assert_eq!(illegal_source(&[EscrowHeld, Initiated], Completed), Some(EscrowHeld));
        assert_eq!(illegal_source(&[DisputeOpened], Cancelled), Some(DisputeOpened));
        assert_eq!(illegal_source(&[], Completed), None);
    }

    #[test]
    fn test_fee_scenario() {
        assert_eq!(compute_fees(1000, 500), (50, 950));
    }

    #[test]
    fn test_fee_sum_invariant() {
        for price in [1, 7, 99, 1_999, 123_457, 10_000_000] {
            for rate in [0, 250, 500, 1_250, 9_999] {
                let (fee, net) = compute_fees(price, rate);
                assert_eq!(fee + net, price);
                assert!(fee >= 0 && net >= 0);
            }
        }
    }

    #[test]
    fn test_fee_rounds_half_up() {
        // 10 * 5% = 0.5 -> 1
        assert_eq!(compute_fees(10, 500), (1, 9));
        // 9 * 5% = 0.45 -> 0
        assert_eq!(compute_fees(9, 500), (0, 9));
    }

    #[test]
    fn test_transaction_code_format() {
        let code = generate_transaction_code();
        assert!(code.starts_with("TX-"));
        assert_eq!(code.len(), 11);
        assert!(code[3..].bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }
}
