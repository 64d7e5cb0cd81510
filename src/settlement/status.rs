use crate::ledger::models::Transaction;
use crate::payments::models::Covered;

/// Confirmations after which a payment counts as final, regardless of the
/// per-sale threshold
pub const FINAL_CONFIRMATIONS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaymentStatus {
    pub accepted: bool,
    pub confirmed: bool,
}

/// Derive accepted/confirmed from merged fragment confirmations and the
/// backend-reported covered amounts
///
/// `confirmed` implies `accepted`. With no fragments the confirmation checks
/// hold vacuously and the covered amounts decide.
pub fn derive_status(
    amount: i64,
    required_confirmations: i64,
    confirmations: impl IntoIterator<Item = i64>,
    covered: Covered,
) -> PaymentStatus {
    let min_confirmations = confirmations.into_iter().min();
    let all_at_least = |threshold: i64| min_confirmations.map_or(true, |min| min >= threshold);

    let accepted = all_at_least(required_confirmations) && covered.total >= amount;
    let confirmed =
        accepted && all_at_least(FINAL_CONFIRMATIONS) && covered.unlocked >= amount;

    PaymentStatus {
        accepted,
        confirmed,
    }
}

/// Status derived for a transaction whose sub-transactions are already merged
pub fn status_for(transaction: &Transaction, covered: Covered) -> PaymentStatus {
    derive_status(
        transaction.amount,
        transaction.required_confirmations,
        transaction.sub_transactions.iter().map(|s| s.confirmations),
        covered,
    )
}

/// Keep stored flags from regressing
///
/// Returns the status to persist and whether the derived status tried to
/// lower a stored flag.
pub fn hold_monotone(stored: PaymentStatus, derived: PaymentStatus) -> (PaymentStatus, bool) {
    let regressed = (stored.accepted && !derived.accepted) || (stored.confirmed && !derived.confirmed);
    let accepted = stored.accepted || derived.accepted;
    let confirmed = (stored.confirmed || derived.confirmed) && accepted;
    (PaymentStatus { accepted, confirmed }, regressed)
}
