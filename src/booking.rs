//! Bookings: one guest's reservation against one event slot.
//!
//! Lifecycle: PaymentPending -> {Confirmed, Cancelled};
//! Confirmed -> {RefundRequired, Cancelled, Completed};
//! RefundRequired -> {Cancelled, Confirmed (refund declined)};
//! Completed and Cancelled are terminal. Transitions go through
//! [`Booking::transition`] so illegal edges are unrepresentable at runtime.

use crate::error::ConflictError;
use crate::types::{Actor, TimeStamp};
use chrono::Utc;

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum BookingStatus {
    #[n(0)]
    PaymentPending,
    #[n(1)]
    Confirmed,
    #[n(2)]
    Cancelled,
    #[n(3)]
    RefundRequired,
    #[n(4)]
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PaymentPending => "payment_pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::RefundRequired => "refund_required",
            BookingStatus::Completed => "completed",
        }
    }

    /// Active bookings hold seats and count against the one-per-(event,
    /// guest) uniqueness rule.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::PaymentPending | BookingStatus::Confirmed)
    }

    fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (PaymentPending, Confirmed)
                | (PaymentPending, Cancelled)
                | (Confirmed, RefundRequired)
                | (Confirmed, Cancelled)
                | (Confirmed, Completed)
                | (RefundRequired, Cancelled)
                | (RefundRequired, Confirmed)
        )
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum Gender {
    #[n(0)]
    Female,
    #[n(1)]
    Male,
    #[n(2)]
    Other,
}

/// Seated-person details. Additional guests are value objects owned by their
/// booking; they have no identity of their own and are never referenced or
/// mutated independently.
#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct GuestDetails {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub mobile: String,
    #[n(2)]
    pub age: u32,
    #[n(3)]
    pub gender: Gender,
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Booking {
    #[n(0)]
    pub booking_id: String,
    #[n(1)]
    pub event_id: String,
    #[n(2)]
    pub venue_id: String,
    #[n(3)]
    pub host_id: String,
    #[n(4)]
    pub guest_id: String,
    #[n(5)]
    pub seats: u32,
    #[n(6)]
    pub price_per_seat: u64,
    #[n(7)]
    pub amount_total: u64,
    #[n(8)]
    pub status: BookingStatus,
    #[n(9)]
    pub primary: GuestDetails,
    #[n(10)]
    pub additional_guests: Vec<GuestDetails>,
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
    #[n(12)]
    pub gateway_ref: Option<String>,
    #[n(13)]
    pub confirmed_at: Option<TimeStamp<Utc>>,
    #[n(14)]
    pub pass_codes: Vec<String>,
    #[n(15)]
    pub refund_requested_at: Option<TimeStamp<Utc>>,
    #[n(16)]
    pub refund_reason: Option<String>,
    #[n(17)]
    pub refund_percent: Option<u8>,
    #[n(18)]
    pub refund_amount: Option<u64>,
    #[n(19)]
    pub cancelled_at: Option<TimeStamp<Utc>>,
    #[n(20)]
    pub cancelled_by: Option<Actor>,
    #[n(21)]
    pub cancel_reason: Option<String>,
    #[n(22)]
    pub completed_at: Option<TimeStamp<Utc>>,
}

impl Booking {
    pub fn new(
        booking_id: String,
        event_id: String,
        venue_id: String,
        host_id: String,
        guest_id: String,
        seats: u32,
        price_per_seat: u64,
        primary: GuestDetails,
        additional_guests: Vec<GuestDetails>,
        created_at: TimeStamp<Utc>,
    ) -> Self {
        let amount_total = price_per_seat * u64::from(seats);
        Self {
            booking_id,
            event_id,
            venue_id,
            host_id,
            guest_id,
            seats,
            price_per_seat,
            amount_total,
            status: BookingStatus::PaymentPending,
            primary,
            additional_guests,
            created_at,
            gateway_ref: None,
            confirmed_at: None,
            pass_codes: vec![],
            refund_requested_at: None,
            refund_reason: None,
            refund_percent: None,
            refund_amount: None,
            cancelled_at: None,
            cancelled_by: None,
            cancel_reason: None,
            completed_at: None,
        }
    }

    /// Move to `next`, rejecting edges the lifecycle does not allow.
    pub fn transition(&mut self, next: BookingStatus) -> Result<(), ConflictError> {
        if !self.status.can_transition_to(next) {
            return Err(ConflictError::InvalidTransition {
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Names of every seated person, primary first. Drives pass issuance.
    pub fn seated_names(&self) -> Vec<&str> {
        std::iter::once(self.primary.name.as_str())
            .chain(self.additional_guests.iter().map(|g| g.name.as_str()))
            .collect()
    }

    /// True once the gateway has confirmed payment, whatever the booking's
    /// current state. Drives whether cancellation must settle a refund.
    pub fn payment_captured(&self) -> bool {
        self.confirmed_at.is_some()
    }
}
