//! Event passes: one-time check-in credentials, one per seated person.
//!
//! `is_valid` is a one-way flag. Door validation and cancellation voiding
//! both flip it to false; nothing ever flips it back.

use crate::error::ConflictError;
use crate::types::TimeStamp;
use chrono::Utc;

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum PassType {
    #[n(0)]
    Primary,
    #[n(1)]
    Additional,
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct EventPass {
    /// Globally unique uppercase check-in code; also the storage key.
    #[n(0)]
    pub event_code: String,
    #[n(1)]
    pub booking_id: String,
    #[n(2)]
    pub event_id: String,
    #[n(3)]
    pub host_id: String,
    #[n(4)]
    pub guest_id: String,
    /// Snapshot of the seated person's name at issuance.
    #[n(5)]
    pub guest_name: String,
    #[n(6)]
    pub pass_type: PassType,
    #[n(7)]
    pub is_valid: bool,
    #[n(8)]
    pub issued_at: TimeStamp<Utc>,
    #[n(9)]
    pub validated_at: Option<TimeStamp<Utc>>,
    /// Who consumed the pass: the door validator, or the cancelling actor
    /// when the pass was voided (in which case `validated_at` stays empty).
    #[n(10)]
    pub validated_by: Option<String>,
}

impl EventPass {
    pub fn issue(
        event_code: String,
        booking_id: String,
        event_id: String,
        host_id: String,
        guest_id: String,
        guest_name: String,
        pass_type: PassType,
        issued_at: TimeStamp<Utc>,
    ) -> Self {
        Self {
            event_code,
            booking_id,
            event_id,
            host_id,
            guest_id,
            guest_name,
            pass_type,
            is_valid: true,
            issued_at,
            validated_at: None,
            validated_by: None,
        }
    }

    /// Door check-in. The caller runs this inside a storage transaction so
    /// two simultaneous attempts on the same code cannot both succeed.
    pub fn consume(
        &mut self,
        event_id: &str,
        validator_id: &str,
        now: TimeStamp<Utc>,
    ) -> Result<(), ConflictError> {
        if self.event_id != event_id {
            return Err(ConflictError::EventMismatch);
        }
        if !self.is_valid {
            return Err(ConflictError::AlreadyUsed);
        }

        self.is_valid = false;
        self.validated_at = Some(now);
        self.validated_by = Some(validator_id.to_string());
        Ok(())
    }

    /// Invalidate an unused pass when its booking is cancelled. Records the
    /// voiding actor without a validation timestamp.
    pub fn void(&mut self, voided_by: &str) {
        if self.is_valid {
            self.is_valid = false;
            self.validated_by = Some(voided_by.to_string());
        }
    }
}
