//! Policy configuration: commission, refund tiers, pricing and timeouts.
//!
//! Every percentage or cutoff the engine consults lives here. Callers build
//! one `EngineConfig` at startup; nothing downstream hardcodes a threshold.

use crate::error::ValidationError;

/// One row of the guest refund table: cancelling at least `hours_before`
/// hours ahead of the event start refunds `percent` of the amount paid.
#[derive(Debug, Clone)]
pub struct RefundTier {
    pub hours_before: i64,
    pub percent: u8,
}

/// Ordered refund table for guest-initiated cancellations. Tiers are kept
/// strictly descending by `hours_before`; the first tier whose cutoff the
/// cancellation still clears decides the percentage.
#[derive(Debug, Clone)]
pub struct RefundPolicy {
    tiers: Vec<RefundTier>,
}

impl RefundPolicy {
    pub fn new(tiers: Vec<RefundTier>) -> Result<Self, ValidationError> {
        let descending = tiers
            .windows(2)
            .all(|pair| pair[0].hours_before > pair[1].hours_before);
        let bounded = tiers.iter().all(|t| t.percent <= 100 && t.hours_before >= 0);

        if tiers.is_empty() || !descending || !bounded {
            return Err(ValidationError::BadRefundTable);
        }

        Ok(Self { tiers })
    }

    /// Percentage refunded when cancelling `hours_until_start` hours ahead.
    /// Falls through to 0 when no tier is cleared (including negative hours,
    /// i.e. the event has already started).
    pub fn percent_for(&self, hours_until_start: i64) -> u8 {
        self.tiers
            .iter()
            .find(|t| hours_until_start >= t.hours_before)
            .map(|t| t.percent)
            .unwrap_or(0)
    }
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                RefundTier {
                    hours_before: 24,
                    percent: 100,
                },
                RefundTier {
                    hours_before: 6,
                    percent: 50,
                },
                RefundTier {
                    hours_before: 0,
                    percent: 0,
                },
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Platform cut of every booking total, in basis points.
    pub commission_bps: u32,
    /// Discount applied to the per-seat price for member guests, in basis
    /// points.
    pub member_discount_bps: u32,
    /// Hard cap on seats per booking.
    pub max_seats_per_booking: u32,
    /// How long a booking may sit in PaymentPending before the reaper
    /// cancels it and restores its seats.
    pub payment_window_mins: i64,
    pub refund: RefundPolicy,
    /// Owner of the wallet that collects commission credits.
    pub platform_user: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commission_bps: 1_000,
            member_discount_bps: 500,
            max_seats_per_booking: 3,
            payment_window_mins: 30,
            refund: RefundPolicy::default(),
            platform_user: "platform".to_string(),
        }
    }
}

impl EngineConfig {
    /// Commission portion of an amount, rounded down. The same rounding is
    /// used when clawing commission back on a refund, so a full refund
    /// reverses the original split exactly.
    pub fn commission_of(&self, amount: u64) -> u64 {
        (u128::from(amount) * u128::from(self.commission_bps) / 10_000) as u64
    }

    /// Per-seat price for a guest, applying the member discount when it
    /// applies.
    pub fn price_per_seat(&self, base_price: u64, member: bool) -> u64 {
        if !member {
            return base_price;
        }
        let discount = (u128::from(base_price) * u128::from(self.member_discount_bps) / 10_000) as u64;
        base_price - discount
    }
}
