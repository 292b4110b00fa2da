//! Error taxonomy for the booking and settlement core.
//!
//! Three classes: validation errors are rejected before any mutation,
//! conflict errors are expected outcomes the caller can recover from, and
//! invariant errors abort the transaction and are logged for operator
//! attention.

/// Rejected before any state is touched.
#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("seat count must be between 1 and {max} per booking")]
    SeatCountOutOfRange { max: u32 },
    #[error("expected {expected} additional guest records, got {got}")]
    AdditionalGuestMismatch { expected: u32, got: usize },
    #[error("amount must be greater than zero")]
    ZeroAmount,
    #[error("payout destination is malformed")]
    BadDestination,
    #[error("event window is invalid (start must precede end)")]
    EventWindowInvalid,
    #[error("refund tiers must be strictly descending with percentages of at most 100")]
    BadRefundTable,
}

/// Expected, recoverable outcomes. Returned as typed failures, never panics.
#[derive(thiserror::Error, Debug)]
pub enum ConflictError {
    #[error("seats no longer available")]
    InventoryExhausted,
    #[error("you already have a booking for this event")]
    DuplicateActiveBooking,
    #[error("event is not open for reservations")]
    EventNotOpen,
    #[error("event not found")]
    EventNotFound,
    #[error("booking not found")]
    BookingNotFound,
    #[error("pass not found")]
    PassNotFound,
    #[error("pass belongs to a different event")]
    EventMismatch,
    #[error("pass has already been used")]
    AlreadyUsed,
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },
    #[error("wallet is frozen")]
    WalletFrozen,
    #[error("withdrawal not found")]
    WithdrawalNotFound,
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("refund window has closed")]
    RefundWindowClosed,
    #[error("caller is not permitted to perform this action")]
    NotPermitted,
}

/// Fatal consistency breaches. The triggering transaction is aborted and the
/// event logged; the store is never patched up in place.
#[derive(thiserror::Error, Debug)]
pub enum InvariantError {
    #[error("wallet ledger for {user_id} does not reconcile with cached balance")]
    LedgerDrift { user_id: String },
    #[error("ledger row would drive a balance negative")]
    BalanceMismatch,
    #[error("seat restore would exceed event capacity")]
    SeatAccounting,
    #[error("generated pass code collided with an existing one")]
    PassCodeCollision,
}

/// Abort payload carried out of a sled transaction closure.
#[derive(thiserror::Error, Debug)]
pub enum Abort {
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    Invariant(#[from] InvariantError),
    #[error("storage codec failure: {0}")]
    Codec(String),
}
