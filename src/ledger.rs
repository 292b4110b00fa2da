//! Wallet ledger service: credits, debits, freezes and the withdrawal
//! workflow.
//!
//! Every balance mutation is one transaction that reads the wallet, applies
//! the delta, and appends the history row whose before/after match exactly,
//! so concurrent movements on the same wallet serialize instead of
//! interleaving. Withdrawals only draw down a balance after the cached
//! value has been verified against a full ledger replay.

use crate::error::{Abort, ConflictError, InvariantError, ValidationError};
use crate::store::{self, abort};
use crate::types::TimeStamp;
use crate::utils;
use crate::wallet::{replay, EntryKind, Reconciliation, Reference, Wallet, WalletEntry};
use crate::withdrawal::{Destination, Withdrawal, WithdrawalStatus};
use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use std::sync::Arc;
use tracing::{debug, error};

/// Read model for `GET walletSummary`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSummary {
    pub balance: u64,
    pub pending_balance: u64,
    pub total_earned: u64,
    pub total_withdrawn: u64,
    pub is_frozen: bool,
}

pub struct WalletLedger {
    db: Arc<sled::Db>,
}

pub(crate) fn load_wallet(
    tx: &TransactionalTree,
    user_id: &str,
) -> Result<Option<Wallet>, ConflictableTransactionError<Abort>> {
    store::tx_get(tx, &store::wallet_key(user_id))
}

/// Append one ledger row and apply its delta to the in-memory wallet. The
/// caller persists the wallet afterwards, within the same transaction.
pub(crate) fn append_row(
    tx: &TransactionalTree,
    wallet: &mut Wallet,
    kind: EntryKind,
    amount: i64,
    reference: Reference,
    note: Option<String>,
    now: &TimeStamp<Utc>,
) -> Result<(), ConflictableTransactionError<Abort>> {
    let balance_before = wallet.balance;
    let balance_after = if amount >= 0 {
        balance_before.checked_add(amount as u64)
    } else {
        balance_before.checked_sub(amount.unsigned_abs())
    }
    .ok_or_else(|| abort(InvariantError::BalanceMismatch))?;

    let entry = WalletEntry {
        seq: wallet.entries,
        user_id: wallet.user_id.clone(),
        kind,
        amount,
        balance_before,
        balance_after,
        reference,
        note,
        at: now.clone(),
    };
    store::tx_put(tx, &store::history_key(&wallet.user_id, entry.seq), &entry)?;

    wallet.balance = balance_after;
    wallet.entries += 1;
    Ok(())
}

/// Credit a wallet inside an open transaction, creating it on first use.
pub(crate) fn post_credit(
    tx: &TransactionalTree,
    user_id: &str,
    amount: u64,
    kind: EntryKind,
    reference: Reference,
    note: Option<String>,
    now: &TimeStamp<Utc>,
) -> Result<(), ConflictableTransactionError<Abort>> {
    let mut wallet =
        load_wallet(tx, user_id)?.unwrap_or_else(|| Wallet::new(user_id.to_string()));

    append_row(tx, &mut wallet, kind, amount as i64, reference, note, now)?;
    if kind.counts_as_earned() {
        wallet.total_earned += amount;
    }
    store::tx_put(tx, &store::wallet_key(user_id), &wallet)
}

/// Debit a wallet inside an open transaction. Frozen wallets reject all
/// debits; overdrawing is a conflict, not a clamp.
pub(crate) fn post_debit(
    tx: &TransactionalTree,
    user_id: &str,
    amount: u64,
    kind: EntryKind,
    reference: Reference,
    note: Option<String>,
    now: &TimeStamp<Utc>,
) -> Result<(), ConflictableTransactionError<Abort>> {
    let mut wallet = load_wallet(tx, user_id)?.ok_or_else(|| {
        abort(ConflictError::InsufficientFunds {
            requested: amount,
            available: 0,
        })
    })?;

    if wallet.is_frozen {
        return Err(abort(ConflictError::WalletFrozen));
    }
    if amount > wallet.balance {
        return Err(abort(ConflictError::InsufficientFunds {
            requested: amount,
            available: wallet.balance,
        }));
    }

    append_row(tx, &mut wallet, kind, -(amount as i64), reference, note, now)?;
    store::tx_put(tx, &store::wallet_key(user_id), &wallet)
}

impl WalletLedger {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self { db }
    }

    /// Cached aggregates for a user. A user who never earned anything gets
    /// an all-zero summary rather than an error.
    pub fn summary(&self, user_id: &str) -> anyhow::Result<WalletSummary> {
        let wallet = store::get::<Wallet>(&self.db, &store::wallet_key(user_id))?
            .unwrap_or_else(|| Wallet::new(user_id.to_string()));

        Ok(WalletSummary {
            balance: wallet.balance,
            pending_balance: wallet.pending_balance,
            total_earned: wallet.total_earned,
            total_withdrawn: wallet.total_withdrawn,
            is_frozen: wallet.is_frozen,
        })
    }

    /// The wallet's ledger rows in insertion order.
    pub fn history(&self, user_id: &str) -> anyhow::Result<Vec<WalletEntry>> {
        let mut rows = Vec::new();
        for item in self.db.scan_prefix(store::history_prefix(user_id).as_bytes()) {
            let (_, raw) = item?;
            rows.push(minicbor::decode(&raw)?);
        }
        Ok(rows)
    }

    pub fn withdrawal(&self, withdrawal_id: &str) -> anyhow::Result<Withdrawal> {
        store::get(&self.db, &store::withdrawal_key(withdrawal_id))?
            .ok_or_else(|| ConflictError::WithdrawalNotFound.into())
    }

    /// Direct ledger credit (settlements, admin adjustments).
    pub fn credit(
        &self,
        user_id: &str,
        amount: u64,
        kind: EntryKind,
        reference: Reference,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<()> {
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        store::run_txn(&self.db, |tx| {
            post_credit(tx, user_id, amount, kind, reference.clone(), None, &now)
        })?;
        debug!(user = %user_id, amount, ?kind, "wallet credited");
        Ok(())
    }

    /// Direct ledger debit (settlements, admin adjustments).
    pub fn debit(
        &self,
        user_id: &str,
        amount: u64,
        kind: EntryKind,
        reference: Reference,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<()> {
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        store::run_txn(&self.db, |tx| {
            post_debit(tx, user_id, amount, kind, reference.clone(), None, &now)
        })?;
        debug!(user = %user_id, amount, ?kind, "wallet debited");
        Ok(())
    }

    /// Freeze a wallet. Pending settlements are unaffected; all further
    /// debits (including withdrawal requests) are rejected until unfrozen.
    pub fn freeze(&self, user_id: &str, admin_id: &str, now: TimeStamp<Utc>) -> anyhow::Result<()> {
        self.set_frozen(user_id, admin_id, true, now)
    }

    pub fn unfreeze(
        &self,
        user_id: &str,
        admin_id: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<()> {
        self.set_frozen(user_id, admin_id, false, now)
    }

    fn set_frozen(
        &self,
        user_id: &str,
        admin_id: &str,
        frozen: bool,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<()> {
        store::run_txn(&self.db, |tx| {
            let mut wallet =
                load_wallet(tx, user_id)?.unwrap_or_else(|| Wallet::new(user_id.to_string()));
            if wallet.is_frozen == frozen {
                return Ok(());
            }
            wallet.is_frozen = frozen;
            let kind = if frozen {
                EntryKind::Frozen
            } else {
                EntryKind::Unfrozen
            };
            append_row(
                tx,
                &mut wallet,
                kind,
                0,
                Reference::Admin(admin_id.to_string()),
                None,
                &now,
            )?;
            store::tx_put(tx, &store::wallet_key(user_id), &wallet)
        })
    }

    /// Open a payout request: verifies the cached balance against a full
    /// ledger replay, then moves `amount` from balance to pending with a
    /// WithdrawalRequest row.
    pub fn request_withdrawal(
        &self,
        user_id: &str,
        amount: u64,
        destination: Destination,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<Withdrawal> {
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        destination.validate()?;

        let reconciliation = self.reconcile(user_id)?;
        if !reconciliation.consistent() {
            error!(user = %user_id, ?reconciliation, "ledger drift detected; refusing withdrawal");
            return Err(InvariantError::LedgerDrift {
                user_id: user_id.to_string(),
            }
            .into());
        }

        let withdrawal_id = utils::new_uuid_to_bech32("wdr_")?;
        let withdrawal = store::run_txn(&self.db, |tx| {
            let mut wallet = load_wallet(tx, user_id)?.ok_or_else(|| {
                abort(ConflictError::InsufficientFunds {
                    requested: amount,
                    available: 0,
                })
            })?;
            if wallet.is_frozen {
                return Err(abort(ConflictError::WalletFrozen));
            }
            if amount > wallet.balance {
                return Err(abort(ConflictError::InsufficientFunds {
                    requested: amount,
                    available: wallet.balance,
                }));
            }

            append_row(
                tx,
                &mut wallet,
                EntryKind::WithdrawalRequest,
                -(amount as i64),
                Reference::Withdrawal(withdrawal_id.clone()),
                None,
                &now,
            )?;
            wallet.pending_balance += amount;
            store::tx_put(tx, &store::wallet_key(user_id), &wallet)?;

            let withdrawal = Withdrawal::new(
                withdrawal_id.clone(),
                user_id.to_string(),
                amount,
                destination.clone(),
                now.clone(),
            );
            store::tx_put(tx, &store::withdrawal_key(&withdrawal_id), &withdrawal)?;
            Ok(withdrawal)
        })?;

        debug!(user = %user_id, withdrawal = %withdrawal.withdrawal_id, amount, "withdrawal requested");
        Ok(withdrawal)
    }

    /// Approve leaves the funds parked in `pending_balance` awaiting payout.
    pub fn approve_withdrawal(
        &self,
        withdrawal_id: &str,
        admin_id: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<Withdrawal> {
        store::run_txn(&self.db, |tx| {
            let mut withdrawal = self.load_withdrawal(tx, withdrawal_id)?;
            withdrawal
                .transition(WithdrawalStatus::Approved)
                .map_err(abort)?;
            withdrawal.decided_at = Some(now.clone());
            withdrawal.decided_by = Some(admin_id.to_string());

            let mut wallet = self.wallet_for(tx, &withdrawal.user_id)?;
            append_row(
                tx,
                &mut wallet,
                EntryKind::WithdrawalApproved,
                0,
                Reference::Withdrawal(withdrawal_id.to_string()),
                None,
                &now,
            )?;
            store::tx_put(tx, &store::wallet_key(&withdrawal.user_id), &wallet)?;
            store::tx_put(tx, &store::withdrawal_key(withdrawal_id), &withdrawal)?;
            Ok(withdrawal)
        })
    }

    /// Reject returns the held funds to the withdrawable balance.
    pub fn reject_withdrawal(
        &self,
        withdrawal_id: &str,
        admin_id: &str,
        reason: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<Withdrawal> {
        store::run_txn(&self.db, |tx| {
            let mut withdrawal = self.load_withdrawal(tx, withdrawal_id)?;
            withdrawal
                .transition(WithdrawalStatus::Rejected)
                .map_err(abort)?;
            withdrawal.decided_at = Some(now.clone());
            withdrawal.decided_by = Some(admin_id.to_string());
            withdrawal.decision_reason = Some(reason.to_string());

            let mut wallet = self.wallet_for(tx, &withdrawal.user_id)?;
            wallet.pending_balance = wallet
                .pending_balance
                .checked_sub(withdrawal.amount)
                .ok_or_else(|| abort(InvariantError::BalanceMismatch))?;
            append_row(
                tx,
                &mut wallet,
                EntryKind::WithdrawalRejected,
                withdrawal.amount as i64,
                Reference::Withdrawal(withdrawal_id.to_string()),
                Some(reason.to_string()),
                &now,
            )?;
            store::tx_put(tx, &store::wallet_key(&withdrawal.user_id), &wallet)?;
            store::tx_put(tx, &store::withdrawal_key(withdrawal_id), &withdrawal)?;
            Ok(withdrawal)
        })
    }

    /// The payout settled: funds leave the wallet system for good.
    pub fn mark_paid(
        &self,
        withdrawal_id: &str,
        admin_id: &str,
        payment_ref: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<Withdrawal> {
        store::run_txn(&self.db, |tx| {
            let mut withdrawal = self.load_withdrawal(tx, withdrawal_id)?;
            withdrawal
                .transition(WithdrawalStatus::Paid)
                .map_err(abort)?;
            withdrawal.paid_at = Some(now.clone());
            withdrawal.payment_ref = Some(payment_ref.to_string());
            withdrawal.decided_by = Some(admin_id.to_string());

            let mut wallet = self.wallet_for(tx, &withdrawal.user_id)?;
            wallet.pending_balance = wallet
                .pending_balance
                .checked_sub(withdrawal.amount)
                .ok_or_else(|| abort(InvariantError::BalanceMismatch))?;
            wallet.total_withdrawn += withdrawal.amount;
            append_row(
                tx,
                &mut wallet,
                EntryKind::WithdrawalPaid,
                0,
                Reference::Withdrawal(withdrawal_id.to_string()),
                Some(payment_ref.to_string()),
                &now,
            )?;
            store::tx_put(tx, &store::wallet_key(&withdrawal.user_id), &wallet)?;
            store::tx_put(tx, &store::withdrawal_key(withdrawal_id), &withdrawal)?;
            Ok(withdrawal)
        })
    }

    /// The payout bounced: funds return to the withdrawable balance.
    pub fn mark_failed(
        &self,
        withdrawal_id: &str,
        admin_id: &str,
        reason: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<Withdrawal> {
        store::run_txn(&self.db, |tx| {
            let mut withdrawal = self.load_withdrawal(tx, withdrawal_id)?;
            withdrawal
                .transition(WithdrawalStatus::Failed)
                .map_err(abort)?;
            withdrawal.decided_at = Some(now.clone());
            withdrawal.decided_by = Some(admin_id.to_string());
            withdrawal.decision_reason = Some(reason.to_string());

            let mut wallet = self.wallet_for(tx, &withdrawal.user_id)?;
            wallet.pending_balance = wallet
                .pending_balance
                .checked_sub(withdrawal.amount)
                .ok_or_else(|| abort(InvariantError::BalanceMismatch))?;
            append_row(
                tx,
                &mut wallet,
                EntryKind::WithdrawalRejected,
                withdrawal.amount as i64,
                Reference::Withdrawal(withdrawal_id.to_string()),
                Some(format!("payout failed: {reason}")),
                &now,
            )?;
            store::tx_put(tx, &store::wallet_key(&withdrawal.user_id), &wallet)?;
            store::tx_put(tx, &store::withdrawal_key(withdrawal_id), &withdrawal)?;
            Ok(withdrawal)
        })
    }

    /// Check a wallet's cached aggregates against its ledger: replay the
    /// rows from zero, sum the earned-side rows, and sum the settled
    /// amounts of every paid withdrawal the history references.
    pub fn reconcile(&self, user_id: &str) -> anyhow::Result<Reconciliation> {
        let wallet = store::get::<Wallet>(&self.db, &store::wallet_key(user_id))?
            .unwrap_or_else(|| Wallet::new(user_id.to_string()));
        let entries = self.history(user_id)?;

        let replayed_balance = replay(&entries)?;
        let earned_sum = entries
            .iter()
            .filter(|e| e.kind.counts_as_earned() && e.amount > 0)
            .map(|e| e.amount as u64)
            .sum();

        let mut paid_sum = 0u64;
        for entry in entries.iter().filter(|e| e.kind == EntryKind::WithdrawalPaid) {
            if let Reference::Withdrawal(id) = &entry.reference {
                paid_sum += self.withdrawal(id)?.amount;
            }
        }

        Ok(Reconciliation {
            cached_balance: wallet.balance,
            replayed_balance,
            earned_sum,
            cached_earned: wallet.total_earned,
            paid_sum,
            cached_withdrawn: wallet.total_withdrawn,
        })
    }

    fn load_withdrawal(
        &self,
        tx: &TransactionalTree,
        withdrawal_id: &str,
    ) -> Result<Withdrawal, ConflictableTransactionError<Abort>> {
        store::tx_get(tx, &store::withdrawal_key(withdrawal_id))?
            .ok_or_else(|| abort(ConflictError::WithdrawalNotFound))
    }

    /// A workflow row for a withdrawal whose wallet vanished means the store
    /// is corrupt, not that the caller raced us.
    fn wallet_for(
        &self,
        tx: &TransactionalTree,
        user_id: &str,
    ) -> Result<Wallet, ConflictableTransactionError<Abort>> {
        load_wallet(tx, user_id)?.ok_or_else(|| {
            abort(InvariantError::LedgerDrift {
                user_id: user_id.to_string(),
            })
        })
    }
}
