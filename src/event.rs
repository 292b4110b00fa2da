//! Event slots: a hosted time window at a venue with finite seating.
//!
//! `seats_remaining` only ever moves through `try_reserve` and `release`, and
//! both run inside the caller's storage transaction, so the counter can never
//! go negative or exceed capacity under concurrent reservations.

use crate::error::{ConflictError, InvariantError, ValidationError};
use crate::types::TimeStamp;
use crate::utils;
use chrono::Utc;

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum SlotStatus {
    #[n(0)]
    Open,
    #[n(1)]
    Full,
    #[n(2)]
    Completed,
    #[n(3)]
    Cancelled,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Open => "open",
            SlotStatus::Full => "full",
            SlotStatus::Completed => "completed",
            SlotStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct EventSlot {
    #[n(0)]
    pub event_id: String,
    #[n(1)]
    pub host_id: String,
    #[n(2)]
    pub venue_id: String,
    #[n(3)]
    pub starts_at: TimeStamp<Utc>,
    #[n(4)]
    pub ends_at: TimeStamp<Utc>,
    #[n(5)]
    pub max_guests: u32,
    #[n(6)]
    pub seats_remaining: u32,
    #[n(7)]
    pub base_price: u64,
    #[n(8)]
    pub status: SlotStatus,
}

impl EventSlot {
    pub fn new(
        host_id: String,
        venue_id: String,
        starts_at: TimeStamp<Utc>,
        ends_at: TimeStamp<Utc>,
        max_guests: u32,
        base_price: u64,
    ) -> anyhow::Result<Self> {
        if starts_at >= ends_at {
            return Err(ValidationError::EventWindowInvalid.into());
        }
        if max_guests == 0 {
            return Err(ValidationError::SeatCountOutOfRange { max: 0 }.into());
        }
        if base_price == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }

        Ok(Self {
            event_id: utils::new_uuid_to_bech32("event_")?,
            host_id,
            venue_id,
            starts_at,
            ends_at,
            max_guests,
            seats_remaining: max_guests,
            base_price,
            status: SlotStatus::Open,
        })
    }

    /// Conditional decrement: succeeds only while the slot is open and holds
    /// enough seats. A slot that reaches zero flips to Full.
    pub fn try_reserve(&mut self, seats: u32) -> Result<(), ConflictError> {
        if self.status != SlotStatus::Open {
            return Err(ConflictError::EventNotOpen);
        }
        if self.seats_remaining < seats {
            return Err(ConflictError::InventoryExhausted);
        }

        self.seats_remaining -= seats;
        if self.seats_remaining == 0 {
            self.status = SlotStatus::Full;
        }
        Ok(())
    }

    /// Restore previously held seats. Exceeding capacity means the caller's
    /// accounting is broken, which is fatal rather than recoverable. Only a
    /// Full slot flips back to Open; completed or cancelled slots keep their
    /// status.
    pub fn release(&mut self, seats: u32) -> Result<(), InvariantError> {
        let restored = self
            .seats_remaining
            .checked_add(seats)
            .filter(|total| *total <= self.max_guests)
            .ok_or(InvariantError::SeatAccounting)?;

        self.seats_remaining = restored;
        if self.status == SlotStatus::Full {
            self.status = SlotStatus::Open;
        }
        Ok(())
    }

    pub fn has_ended(&self, now: &TimeStamp<Utc>) -> bool {
        self.ends_at <= *now
    }

    pub fn has_started(&self, now: &TimeStamp<Utc>) -> bool {
        self.starts_at <= *now
    }
}
