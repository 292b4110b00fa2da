//! Withdrawals: admin-gated payouts drawn against a wallet.
//!
//! Lifecycle: Pending -> {Approved, Rejected}; Approved -> {Paid, Failed};
//! Rejected, Paid and Failed are terminal. The fund movements (balance to
//! pending and back, or out of the system) live in the ledger service; this
//! module owns the entity and its transition guards.

use crate::error::{ConflictError, ValidationError};
use crate::types::TimeStamp;
use chrono::Utc;

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum WithdrawalStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    Paid,
    #[n(4)]
    Failed,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Rejected => "rejected",
            WithdrawalStatus::Paid => "paid",
            WithdrawalStatus::Failed => "failed",
        }
    }

    fn can_transition_to(&self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Paid) | (Approved, Failed)
        )
    }
}

/// Where the payout lands.
#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub enum Destination {
    #[n(0)]
    Bank {
        #[n(0)]
        account_number: String,
        #[n(1)]
        ifsc: String,
    },
    #[n(1)]
    Upi {
        #[n(0)]
        handle: String,
    },
}

impl Destination {
    /// Structural check, done before any funds move.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let ok = match self {
            Destination::Bank {
                account_number,
                ifsc,
            } => !account_number.trim().is_empty() && !ifsc.trim().is_empty(),
            Destination::Upi { handle } => {
                handle.contains('@') && !handle.starts_with('@') && !handle.ends_with('@')
            }
        };
        if ok {
            Ok(())
        } else {
            Err(ValidationError::BadDestination)
        }
    }
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Withdrawal {
    #[n(0)]
    pub withdrawal_id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub amount: u64,
    #[n(3)]
    pub status: WithdrawalStatus,
    #[n(4)]
    pub destination: Destination,
    #[n(5)]
    pub requested_at: TimeStamp<Utc>,
    #[n(6)]
    pub decided_at: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub decided_by: Option<String>,
    /// Persisted alongside every rejection or failure, per the handling
    /// rules: decisions always carry their reason.
    #[n(8)]
    pub decision_reason: Option<String>,
    #[n(9)]
    pub paid_at: Option<TimeStamp<Utc>>,
    #[n(10)]
    pub payment_ref: Option<String>,
}

impl Withdrawal {
    pub fn new(
        withdrawal_id: String,
        user_id: String,
        amount: u64,
        destination: Destination,
        requested_at: TimeStamp<Utc>,
    ) -> Self {
        Self {
            withdrawal_id,
            user_id,
            amount,
            status: WithdrawalStatus::Pending,
            destination,
            requested_at,
            decided_at: None,
            decided_by: None,
            decision_reason: None,
            paid_at: None,
            payment_ref: None,
        }
    }

    pub fn transition(&mut self, next: WithdrawalStatus) -> Result<(), ConflictError> {
        if !self.status.can_transition_to(next) {
            return Err(ConflictError::InvalidTransition {
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }
}
