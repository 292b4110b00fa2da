//! Wallets and their append-only ledger.
//!
//! The wallet caches aggregate balances; the ledger rows are the source of
//! truth those caches must always reconcile against. Every row records the
//! exact before/after of the withdrawable balance, so replaying a wallet's
//! ordered history from zero must land on the cached balance. Rows whose
//! movement touches only `pending_balance` or a flag carry a zero delta.

use crate::error::InvariantError;
use crate::types::TimeStamp;
use chrono::Utc;

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum EntryKind {
    #[n(0)]
    Earned,
    #[n(1)]
    WithdrawalRequest,
    #[n(2)]
    WithdrawalApproved,
    #[n(3)]
    WithdrawalPaid,
    #[n(4)]
    WithdrawalRejected,
    #[n(5)]
    RefundCredit,
    #[n(6)]
    Adjustment,
    #[n(7)]
    CommissionDeducted,
    #[n(8)]
    Frozen,
    #[n(9)]
    Unfrozen,
}

impl EntryKind {
    /// Kinds that add to `total_earned` when they credit the balance.
    pub fn counts_as_earned(&self) -> bool {
        matches!(
            self,
            EntryKind::Earned | EntryKind::RefundCredit | EntryKind::CommissionDeducted
        )
    }
}

/// What a ledger row points back at.
#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub enum Reference {
    #[n(0)]
    Booking(#[n(0)] String),
    #[n(1)]
    Withdrawal(#[n(0)] String),
    #[n(2)]
    Admin(#[n(0)] String),
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Wallet {
    #[n(0)]
    pub user_id: String,
    /// Withdrawable funds.
    #[n(1)]
    pub balance: u64,
    /// Funds held by in-flight withdrawals awaiting approval/payment.
    #[n(2)]
    pub pending_balance: u64,
    #[n(3)]
    pub total_earned: u64,
    #[n(4)]
    pub total_withdrawn: u64,
    #[n(5)]
    pub is_frozen: bool,
    /// Ledger length; also the next row's sequence number.
    #[n(6)]
    pub entries: u64,
}

impl Wallet {
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            balance: 0,
            pending_balance: 0,
            total_earned: 0,
            total_withdrawn: 0,
            is_frozen: false,
            entries: 0,
        }
    }
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct WalletEntry {
    #[n(0)]
    pub seq: u64,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub kind: EntryKind,
    /// Signed delta applied to the withdrawable balance by this row.
    #[n(3)]
    pub amount: i64,
    #[n(4)]
    pub balance_before: u64,
    #[n(5)]
    pub balance_after: u64,
    #[n(6)]
    pub reference: Reference,
    #[n(7)]
    pub note: Option<String>,
    #[n(8)]
    pub at: TimeStamp<Utc>,
}

/// Replay an ordered history from zero, checking every row's internal
/// consistency and the chain between rows. Returns the final balance.
pub fn replay(entries: &[WalletEntry]) -> Result<u64, InvariantError> {
    let mut balance: u64 = 0;

    for entry in entries {
        if entry.balance_before != balance {
            return Err(InvariantError::BalanceMismatch);
        }
        let next = if entry.amount >= 0 {
            balance.checked_add(entry.amount as u64)
        } else {
            balance.checked_sub(entry.amount.unsigned_abs())
        }
        .ok_or(InvariantError::BalanceMismatch)?;

        if entry.balance_after != next {
            return Err(InvariantError::BalanceMismatch);
        }
        balance = next;
    }

    Ok(balance)
}

/// Outcome of checking a wallet's caches against its ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub cached_balance: u64,
    pub replayed_balance: u64,
    pub earned_sum: u64,
    pub cached_earned: u64,
    pub paid_sum: u64,
    pub cached_withdrawn: u64,
}

impl Reconciliation {
    pub fn consistent(&self) -> bool {
        self.cached_balance == self.replayed_balance
            && self.cached_earned == self.earned_sum
            && self.cached_withdrawn == self.paid_sum
    }
}
