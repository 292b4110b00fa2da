//! Refund calculation: a pure function of policy, timing and actor.
//!
//! The calculator never moves money; it returns a decision that the ledger
//! settlement consumes. Host- and admin-initiated cancellations always
//! refund in full, guest cancellations follow the configured tier table,
//! and nothing is refunded once the event has started.

use crate::config::RefundPolicy;
use crate::types::{Actor, TimeStamp};
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundDecision {
    pub percent: u8,
    pub amount: u64,
}

impl RefundDecision {
    pub fn none() -> Self {
        Self {
            percent: 0,
            amount: 0,
        }
    }
}

pub fn calculate(
    policy: &RefundPolicy,
    event_start: &TimeStamp<Utc>,
    now: &TimeStamp<Utc>,
    actor: Actor,
    amount_total: u64,
) -> RefundDecision {
    let percent = match actor {
        Actor::Host | Actor::Admin => 100,
        Actor::Guest => {
            let until_start = event_start.to_datetime_utc() - now.to_datetime_utc();
            if until_start.num_seconds() <= 0 {
                0
            } else {
                policy.percent_for(until_start.num_hours())
            }
        }
    };

    let amount = (u128::from(amount_total) * u128::from(percent) / 100) as u64;

    RefundDecision { percent, amount }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> TimeStamp<Utc> {
        TimeStamp::new_with(2026, 9, 12, 19, 0, 0)
    }

    #[test]
    fn host_and_admin_always_refund_in_full() {
        let policy = RefundPolicy::default();
        // One minute before start, where a guest would get nothing.
        let now = TimeStamp::new_with(2026, 9, 12, 18, 59, 0);

        let host = calculate(&policy, &start(), &now, Actor::Host, 30_000);
        let admin = calculate(&policy, &start(), &now, Actor::Admin, 30_000);

        assert_eq!(host.percent, 100);
        assert_eq!(host.amount, 30_000);
        assert_eq!(admin.percent, 100);
        assert_eq!(admin.amount, 30_000);
    }

    #[test]
    fn guest_refund_follows_tier_table() {
        let policy = RefundPolicy::default();

        let two_days_out = TimeStamp::new_with(2026, 9, 10, 19, 0, 0);
        let full = calculate(&policy, &start(), &two_days_out, Actor::Guest, 30_000);
        assert_eq!(full.percent, 100);
        assert_eq!(full.amount, 30_000);

        let twelve_hours_out = TimeStamp::new_with(2026, 9, 12, 7, 0, 0);
        let half = calculate(&policy, &start(), &twelve_hours_out, Actor::Guest, 30_000);
        assert_eq!(half.percent, 50);
        assert_eq!(half.amount, 15_000);

        let three_hours_out = TimeStamp::new_with(2026, 9, 12, 16, 0, 0);
        let zero = calculate(&policy, &start(), &three_hours_out, Actor::Guest, 30_000);
        assert_eq!(zero.percent, 0);
        assert_eq!(zero.amount, 0);
    }

    #[test]
    fn nothing_refunds_after_the_event_has_started() {
        let policy = RefundPolicy::default();
        let after = TimeStamp::new_with(2026, 9, 12, 19, 30, 0);

        let decision = calculate(&policy, &start(), &after, Actor::Guest, 30_000);

        assert_eq!(decision, RefundDecision::none());
    }

    #[test]
    fn amounts_round_down_on_odd_totals() {
        let policy = RefundPolicy::default();
        let twelve_hours_out = TimeStamp::new_with(2026, 9, 12, 7, 0, 0);

        let decision = calculate(&policy, &start(), &twelve_hours_out, Actor::Guest, 101);

        assert_eq!(decision.percent, 50);
        assert_eq!(decision.amount, 50);
    }
}
