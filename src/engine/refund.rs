//! Refund processor: validated reversals against prior funding entries.
//!
//! Refunds read historical FUND entries to bound the refundable amount, then
//! follow the same atomic discipline as charges: debit and REFUND entry
//! commit together or not at all. Every attempt is recorded, failures with
//! their specific reason.

use chrono::Utc;
use std::sync::atomic::Ordering;

use crate::Cents;
use crate::model::{
    EntryDetail, EntryKind, LedgerEntry, RefundRequest, RefundStatus, TxId, WalletId,
};
use crate::store::WalletStore;

use super::{Engine, EngineError, RefundError};

/// A funding entry with its remaining refundable amount.
#[derive(Debug, Clone)]
pub struct RefundableFunding {
    pub entry: LedgerEntry,
    /// Cumulative amount already refunded against this entry.
    pub refunded: Cents,
    pub remaining: Cents,
}

impl Engine {
    /// FUND entries for a binding that still have a refundable remainder,
    /// most-recent-first. Fully refunded entries are excluded.
    pub fn list_refund_eligible(&self, binding_key: &str) -> Vec<RefundableFunding> {
        let Some(wallet_id) = self.store.lookup(binding_key) else {
            return Vec::new();
        };
        self.ledger
            .entries_for(wallet_id, Some(EntryKind::Fund), None, usize::MAX)
            .into_iter()
            .map(|entry| {
                let refunded = self.ledger.refunded_against(wallet_id, entry.id);
                let remaining = entry.amount - refunded;
                RefundableFunding {
                    entry,
                    refunded,
                    remaining,
                }
            })
            .filter(|r| r.remaining > Cents::ZERO)
            .collect()
    }

    /// Request a (possibly partial) refund of one funding entry.
    ///
    /// Validates, in order: the amount is positive; the funding entry exists,
    /// belongs to this wallet and is FUND-kind; the amount does not exceed
    /// the entry's remaining refundable amount; the amount does not exceed
    /// the current balance (money already spent elsewhere cannot be
    /// refunded). On success the wallet is debited and one REFUND entry
    /// referencing the funding entry is appended, atomically. Every attempt
    /// is recorded; failures carry their specific reason and change nothing.
    pub fn request_refund(
        &self,
        binding_key: &str,
        funding: TxId,
        amount: Cents,
    ) -> Result<RefundRequest, EngineError> {
        let Some(wallet_id) = self.store.lookup(binding_key) else {
            return Err(RefundError::FundingNotFound(funding).into());
        };

        let outcome = self
            .store
            .with_wallet(wallet_id, |wallet| -> Result<Cents, EngineError> {
                if amount <= Cents::ZERO {
                    return Err(RefundError::InvalidAmount(amount).into());
                }
                let entry = self
                    .ledger
                    .get(wallet_id, funding)
                    .filter(|e| e.kind() == EntryKind::Fund)
                    .ok_or(RefundError::FundingNotFound(funding))?;
                let refunded = self.ledger.refunded_against(wallet_id, funding);
                let remaining = entry.amount - refunded;
                if amount > remaining {
                    return Err(RefundError::AmountExceedsOriginal {
                        requested: amount,
                        remaining,
                    }
                    .into());
                }
                if amount > wallet.balance {
                    return Err(RefundError::AmountExceedsBalance {
                        requested: amount,
                        available: wallet.balance,
                    }
                    .into());
                }

                let before = wallet.balance;
                let new_balance = WalletStore::apply_delta(wallet, -amount, Cents::ZERO)
                    .map_err(|e| RefundError::AmountExceedsBalance {
                        requested: e.required,
                        available: e.available,
                    })?;
                let refund_entry = LedgerEntry {
                    id: self.ledger.reserve_id(),
                    wallet: wallet_id,
                    amount: -amount,
                    balance_before: before,
                    balance_after: new_balance,
                    at: Utc::now(),
                    detail: EntryDetail::Refund { funding },
                };
                if let Err(e) = self.ledger.append(refund_entry) {
                    wallet.balance = before;
                    return Err(e.into());
                }
                Ok(new_balance)
            })
            .ok_or(EngineError::WalletNotFound(wallet_id))?;

        match outcome {
            Ok(_) => Ok(self.record_refund(wallet_id, funding, amount, RefundStatus::Success, None)),
            Err(e) => {
                self.record_refund(
                    wallet_id,
                    funding,
                    amount,
                    RefundStatus::Failed,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Every refund request recorded for a binding, successes and failures.
    pub fn refunds_for(&self, binding_key: &str) -> Vec<RefundRequest> {
        let Some(wallet_id) = self.store.lookup(binding_key) else {
            return Vec::new();
        };
        self.refunds
            .read()
            .iter()
            .filter(|r| r.wallet == wallet_id)
            .cloned()
            .collect()
    }

    fn record_refund(
        &self,
        wallet: WalletId,
        funding: TxId,
        amount: Cents,
        status: RefundStatus,
        reason: Option<String>,
    ) -> RefundRequest {
        let request = RefundRequest {
            id: self.next_refund_id.fetch_add(1, Ordering::Relaxed),
            wallet,
            funding,
            amount,
            status,
            reason,
            at: Utc::now(),
        };
        self.refunds.write().push(request.clone());
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cents(value: i64) -> Cents {
        Cents::new(value)
    }

    /// Engine with one wallet funded twice: 20.00 and 10.00.
    fn funded_engine() -> (Engine, TxId, TxId) {
        let engine = Engine::new();
        engine.fund("device-a", cents(2000), "card").unwrap();
        engine.fund("device-a", cents(1000), "ach").unwrap();
        let funds = engine.list_transactions("device-a", Some(EntryKind::Fund), None, usize::MAX);
        // most-recent-first: funds[1] is the 2000 entry
        (engine, funds[1].id, funds[0].id)
    }

    #[test]
    fn list_eligible_reports_remaining_amounts() {
        let (engine, first, second) = funded_engine();

        let eligible = engine.list_refund_eligible("device-a");
        assert_eq!(eligible.len(), 2);
        let big = eligible.iter().find(|r| r.entry.id == first).unwrap();
        assert_eq!(big.refunded, Cents::ZERO);
        assert_eq!(big.remaining, cents(2000));
        let small = eligible.iter().find(|r| r.entry.id == second).unwrap();
        assert_eq!(small.remaining, cents(1000));
    }

    #[test]
    fn fully_refunded_entries_drop_out_of_eligibility() {
        let (engine, first, second) = funded_engine();
        engine.request_refund("device-a", second, cents(1000)).unwrap();

        let eligible = engine.list_refund_eligible("device-a");
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].entry.id, first);
    }

    #[test]
    fn partial_refund_reduces_remaining() {
        let (engine, first, _) = funded_engine();
        engine.request_refund("device-a", first, cents(500)).unwrap();

        let eligible = engine.list_refund_eligible("device-a");
        let entry = eligible.iter().find(|r| r.entry.id == first).unwrap();
        assert_eq!(entry.refunded, cents(500));
        assert_eq!(entry.remaining, cents(1500));
    }

    #[test]
    fn successful_refund_debits_and_appends_entry() {
        let (engine, first, _) = funded_engine();

        let request = engine
            .request_refund("device-a", first, cents(500))
            .unwrap();
        assert_eq!(request.status, RefundStatus::Success);
        assert_eq!(request.funding, first);
        assert_eq!(request.reason, None);

        assert_eq!(engine.balance("device-a"), Some(cents(2500)));
        let refunds =
            engine.list_transactions("device-a", Some(EntryKind::Refund), None, usize::MAX);
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount, cents(-500));
        assert_eq!(refunds[0].detail.reference(), Some(first));
    }

    #[test]
    fn cumulative_refunds_never_exceed_the_original() {
        // Funding of 20.00, already refunded 5.00: 16.00 is over the bound,
        // 15.00 exhausts it exactly.
        let (engine, first, _) = funded_engine();
        engine.request_refund("device-a", first, cents(500)).unwrap();

        let err = engine
            .request_refund("device-a", first, cents(1600))
            .unwrap_err();
        match err {
            EngineError::Refund(RefundError::AmountExceedsOriginal {
                requested,
                remaining,
            }) => {
                assert_eq!(requested, cents(1600));
                assert_eq!(remaining, cents(1500));
            }
            other => panic!("expected AmountExceedsOriginal, got {other:?}"),
        }
        assert_eq!(engine.balance("device-a"), Some(cents(2500)));

        let request = engine
            .request_refund("device-a", first, cents(1500))
            .unwrap();
        assert_eq!(request.status, RefundStatus::Success);
        assert_eq!(engine.balance("device-a"), Some(cents(1000)));
    }

    #[test]
    fn refund_cannot_exceed_current_balance() {
        // Fund 20.00, spend 15.00: only 5.00 is left to give back.
        let engine = Engine::new();
        engine.fund("device-a", cents(2000), "card").unwrap();
        let funding = engine.list_transactions("device-a", None, None, 1)[0].id;
        engine.charge("device-a", cents(1500), "bar").unwrap();

        let err = engine
            .request_refund("device-a", funding, cents(1000))
            .unwrap_err();
        match err {
            EngineError::Refund(RefundError::AmountExceedsBalance {
                requested,
                available,
            }) => {
                assert_eq!(requested, cents(1000));
                assert_eq!(available, cents(500));
            }
            other => panic!("expected AmountExceedsBalance, got {other:?}"),
        }
        assert_eq!(engine.balance("device-a"), Some(cents(500)));
    }

    #[test]
    fn spend_entries_are_not_refundable() {
        let engine = Engine::new();
        engine.fund("device-a", cents(2000), "card").unwrap();
        engine.charge("device-a", cents(500), "bar").unwrap();
        let spend =
            engine.list_transactions("device-a", Some(EntryKind::Spend), None, 1)[0].id;

        let err = engine
            .request_refund("device-a", spend, cents(100))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Refund(RefundError::FundingNotFound(id)) if id == spend
        ));
    }

    #[test]
    fn unknown_funding_entry_fails() {
        let (engine, ..) = funded_engine();
        let err = engine
            .request_refund("device-a", 9999, cents(100))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Refund(RefundError::FundingNotFound(9999))
        ));
    }

    #[test]
    fn another_wallets_funding_entry_is_not_visible() {
        let (engine, first, _) = funded_engine();
        engine.fund("device-b", cents(5000), "card").unwrap();

        let err = engine
            .request_refund("device-b", first, cents(100))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Refund(RefundError::FundingNotFound(id)) if id == first
        ));
        assert_eq!(engine.balance("device-b"), Some(cents(5000)));
    }

    #[test]
    fn unknown_binding_fails() {
        let engine = Engine::new();
        let err = engine.request_refund("ghost", 1, cents(100)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Refund(RefundError::FundingNotFound(1))
        ));
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let (engine, first, _) = funded_engine();
        let err = engine
            .request_refund("device-a", first, Cents::ZERO)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Refund(RefundError::InvalidAmount(_))
        ));
        assert_eq!(engine.balance("device-a"), Some(cents(3000)));
    }

    #[test]
    fn failed_requests_are_recorded_with_reason() {
        let (engine, first, _) = funded_engine();
        let _ = engine.request_refund("device-a", first, cents(99_999));

        let requests = engine.refunds_for("device-a");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].status, RefundStatus::Failed);
        assert!(requests[0].reason.as_deref().unwrap().contains("remaining"));
    }

    #[test]
    fn refund_keeps_replay_invariant() {
        let (engine, first, _) = funded_engine();
        engine.charge("device-a", cents(800), "bar").unwrap();
        engine.request_refund("device-a", first, cents(700)).unwrap();

        let wallet = engine.wallet("device-a").unwrap();
        assert_eq!(engine.ledger().replay(wallet.id), wallet.balance);
    }
}
