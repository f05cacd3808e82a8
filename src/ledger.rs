//! Append-only ledger of balance-changing events.
//!
//! Entries are immutable once written: refunds add new entries, they never
//! rewrite history. For any wallet, replaying all entries in order from zero
//! reproduces the current balance.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::Cents;
use crate::model::{EntryKind, LedgerEntry, TxId, WalletId};

/// Internal invariant violation: an entry whose balances do not reconcile.
/// Fatal; the surrounding transaction must abort, never partially commit.
#[derive(Debug, Error, PartialEq, Eq)]
#[error(
    "ledger entry for wallet {wallet}: balance_after {after} != balance_before {before} + amount {amount}"
)]
pub struct LedgerConsistencyError {
    pub wallet: WalletId,
    pub before: Cents,
    pub after: Cents,
    pub amount: Cents,
}

/// Per-wallet ordered entry store. Appends for one wallet additionally
/// serialize under that wallet's store lock, so each Vec grows in commit order.
pub struct Ledger {
    entries: DashMap<WalletId, Vec<LedgerEntry>>,
    next_id: AtomicU64,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserve the id the caller will assign to an entry it is about to
    /// append. Ids are globally monotonic, so within a wallet they follow
    /// append order and double as the pagination cursor.
    pub fn reserve_id(&self) -> TxId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Append one immutable entry, rejecting it if its balances do not
    /// reconcile.
    pub fn append(&self, entry: LedgerEntry) -> Result<TxId, LedgerConsistencyError> {
        Self::check(&entry)?;
        let id = entry.id;
        self.entries.entry(entry.wallet).or_default().push(entry);
        Ok(id)
    }

    /// Append a group of entries all-or-nothing: every entry is validated
    /// before any is written.
    pub fn append_all(&self, batch: Vec<LedgerEntry>) -> Result<(), LedgerConsistencyError> {
        for entry in &batch {
            Self::check(entry)?;
        }
        for entry in batch {
            self.entries.entry(entry.wallet).or_default().push(entry);
        }
        Ok(())
    }

    fn check(entry: &LedgerEntry) -> Result<(), LedgerConsistencyError> {
        if entry.balance_after != entry.balance_before + entry.amount {
            return Err(LedgerConsistencyError {
                wallet: entry.wallet,
                before: entry.balance_before,
                after: entry.balance_after,
                amount: entry.amount,
            });
        }
        Ok(())
    }

    /// Entries for a wallet, most-recent-first, optionally filtered by kind.
    ///
    /// Pagination is restartable: pass the id of the last entry seen as
    /// `cursor` to resume strictly before it.
    pub fn entries_for(
        &self,
        wallet: WalletId,
        kind: Option<EntryKind>,
        cursor: Option<TxId>,
        limit: usize,
    ) -> Vec<LedgerEntry> {
        let Some(entries) = self.entries.get(&wallet) else {
            return Vec::new();
        };
        entries
            .iter()
            .rev()
            .filter(|e| cursor.is_none_or(|c| e.id < c))
            .filter(|e| kind.is_none_or(|k| e.kind() == k))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Look up one entry belonging to a wallet.
    pub fn get(&self, wallet: WalletId, id: TxId) -> Option<LedgerEntry> {
        self.entries
            .get(&wallet)?
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// Sum of signed amounts for one kind; used to bound cumulative refunds.
    pub fn sum_by_kind(&self, wallet: WalletId, kind: EntryKind) -> Cents {
        self.entries
            .get(&wallet)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.kind() == kind)
                    .map(|e| e.amount)
                    .sum()
            })
            .unwrap_or(Cents::ZERO)
    }

    /// Cumulative amount already refunded against one funding entry.
    /// Refund amounts are negative, so the sum is negated back to a
    /// positive magnitude.
    pub fn refunded_against(&self, wallet: WalletId, funding: TxId) -> Cents {
        self.entries
            .get(&wallet)
            .map(|entries| {
                -entries
                    .iter()
                    .filter(|e| e.detail.reference() == Some(funding) && e.kind() == EntryKind::Refund)
                    .map(|e| e.amount)
                    .sum::<Cents>()
            })
            .unwrap_or(Cents::ZERO)
    }

    /// Fold all of a wallet's entry amounts from zero, in append order.
    /// Equals the wallet's current balance whenever the replay invariant holds.
    pub fn replay(&self, wallet: WalletId) -> Cents {
        self.entries
            .get(&wallet)
            .map(|entries| entries.iter().map(|e| e.amount).sum())
            .unwrap_or(Cents::ZERO)
    }

    /// Number of entries recorded for a wallet.
    pub fn len_for(&self, wallet: WalletId) -> usize {
        self.entries.get(&wallet).map(|e| e.len()).unwrap_or(0)
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
