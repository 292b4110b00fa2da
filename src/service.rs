//! Booking service: reservation, payment confirmation, check-in passes,
//! cancellation, refunds and the reaper sweeps.
//!
//! Reservation spans two entities (the slot's seat counter and the booking
//! row) plus the active-pair uniqueness probe; all three land in one
//! transaction, so overselling and duplicate active bookings are ruled out
//! by the store rather than by caller discipline. Payment confirmation is an
//! asynchronous callback from the gateway collaborator: bookings sit in
//! PaymentPending until it arrives or the reaper times them out.

use crate::booking::{Booking, BookingStatus, GuestDetails};
use crate::config::EngineConfig;
use crate::error::{Abort, ConflictError, InvariantError, ValidationError};
use crate::event::{EventSlot, SlotStatus};
use crate::ledger;
use crate::pass::{EventPass, PassType};
use crate::refund::{self, RefundDecision};
use crate::store::{self, abort};
use crate::types::{Actor, TimeStamp};
use crate::utils;
use crate::wallet::{EntryKind, Reference};
use chrono::{Duration, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use std::sync::Arc;
use tracing::debug;

/// Input to `reserve`. Additional guests are value objects owned by the
/// resulting booking; their count must be exactly `seats - 1`.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub event_id: String,
    pub guest_id: String,
    pub seats: u32,
    /// Member guests get the configured per-seat discount.
    pub member: bool,
    pub primary: GuestDetails,
    pub additional_guests: Vec<GuestDetails>,
}

/// Outcome of a cancellation, carrying the refund decision alongside the
/// updated booking.
#[derive(Debug, Clone)]
pub struct CancelReceipt {
    pub booking: Booking,
    pub refund_percent: u8,
    pub refund_amount: u64,
}

/// Outcome of a successful door validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReceipt {
    pub guest_name: String,
    pub pass_type: PassType,
}

pub struct BookingService {
    db: Arc<sled::Db>,
    config: EngineConfig,
}

impl BookingService {
    pub fn new(db: Arc<sled::Db>, config: EngineConfig) -> Self {
        Self { db, config }
    }

    /// Publish a new slot, open for reservations at full capacity.
    pub fn publish_event(
        &self,
        host_id: &str,
        venue_id: &str,
        starts_at: TimeStamp<Utc>,
        ends_at: TimeStamp<Utc>,
        max_guests: u32,
        base_price: u64,
    ) -> anyhow::Result<EventSlot> {
        let slot = EventSlot::new(
            host_id.to_string(),
            venue_id.to_string(),
            starts_at,
            ends_at,
            max_guests,
            base_price,
        )?;
        let bytes = minicbor::to_vec(&slot)?;
        self.db.insert(store::event_key(&slot.event_id).as_bytes(), bytes)?;
        Ok(slot)
    }

    pub fn event(&self, event_id: &str) -> anyhow::Result<EventSlot> {
        store::get(&self.db, &store::event_key(event_id))?
            .ok_or_else(|| ConflictError::EventNotFound.into())
    }

    pub fn booking(&self, booking_id: &str) -> anyhow::Result<Booking> {
        store::get(&self.db, &store::booking_key(booking_id))?
            .ok_or_else(|| ConflictError::BookingNotFound.into())
    }

    pub fn pass(&self, event_code: &str) -> anyhow::Result<EventPass> {
        store::get(&self.db, &store::pass_key(event_code))?
            .ok_or_else(|| ConflictError::PassNotFound.into())
    }

    /// Hold seats for a guest. One transaction covers the conditional seat
    /// decrement, the one-active-booking-per-(event, guest) probe and the
    /// booking insert, so two racing requests for the last seats cannot
    /// both succeed.
    pub fn reserve(&self, req: ReserveRequest, now: TimeStamp<Utc>) -> anyhow::Result<Booking> {
        let max = self.config.max_seats_per_booking;
        if req.seats == 0 || req.seats > max {
            return Err(ValidationError::SeatCountOutOfRange { max }.into());
        }
        let expected = req.seats - 1;
        if req.additional_guests.len() != expected as usize {
            return Err(ValidationError::AdditionalGuestMismatch {
                expected,
                got: req.additional_guests.len(),
            }
            .into());
        }

        let booking_id = utils::new_uuid_to_bech32("booking_")?;
        let event_key = store::event_key(&req.event_id);
        let active_key = store::active_key(&req.event_id, &req.guest_id);

        let booking = store::run_txn(&self.db, |tx| {
            let mut slot: EventSlot = store::tx_get(tx, &event_key)?
                .ok_or_else(|| abort(ConflictError::EventNotFound))?;

            if tx.get(active_key.as_bytes())?.is_some() {
                return Err(abort(ConflictError::DuplicateActiveBooking));
            }
            slot.try_reserve(req.seats).map_err(abort)?;

            let price_per_seat = self.config.price_per_seat(slot.base_price, req.member);
            let booking = Booking::new(
                booking_id.clone(),
                req.event_id.clone(),
                slot.venue_id.clone(),
                slot.host_id.clone(),
                req.guest_id.clone(),
                req.seats,
                price_per_seat,
                req.primary.clone(),
                req.additional_guests.clone(),
                now.clone(),
            );

            store::tx_put(tx, &event_key, &slot)?;
            tx.insert(active_key.as_bytes(), booking_id.as_bytes())?;
            store::tx_put(tx, &store::booking_key(&booking_id), &booking)?;
            Ok(booking)
        })?;

        debug!(
            booking = %booking.booking_id,
            event = %booking.event_id,
            seats = booking.seats,
            "reservation held, awaiting payment"
        );
        Ok(booking)
    }

    /// Gateway callback on successful capture. Idempotent: confirming an
    /// already-Confirmed booking is a no-op. Confirmation mints the passes
    /// and settles the host credit net of commission, all in the same
    /// transaction as the status flip.
    pub fn confirm_payment(
        &self,
        booking_id: &str,
        gateway_ref: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<Booking> {
        let booking_key = store::booking_key(booking_id);

        // Seat count is immutable after reserve, so it is safe to read it
        // ahead of the transaction to mint a stable set of codes.
        let seats = self.booking(booking_id)?.seats;
        let codes: Vec<String> = (0..seats).map(|_| utils::new_pass_code()).collect();

        let booking = store::run_txn(&self.db, |tx| {
            let mut booking: Booking = store::tx_get(tx, &booking_key)?
                .ok_or_else(|| abort(ConflictError::BookingNotFound))?;

            if booking.status == BookingStatus::Confirmed {
                return Ok(booking);
            }
            // Only a pending booking may confirm; the RefundRequired ->
            // Confirmed edge is reserved for declined refunds.
            if booking.status != BookingStatus::PaymentPending {
                return Err(abort(ConflictError::InvalidTransition {
                    from: booking.status.as_str(),
                    to: BookingStatus::Confirmed.as_str(),
                }));
            }
            booking.transition(BookingStatus::Confirmed).map_err(abort)?;
            booking.gateway_ref = Some(gateway_ref.to_string());
            booking.confirmed_at = Some(now.clone());

            let names: Vec<String> = booking
                .seated_names()
                .into_iter()
                .map(str::to_string)
                .collect();
            for (index, name) in names.iter().enumerate() {
                let code = &codes[index];
                let pass_key = store::pass_key(code);
                if tx.get(pass_key.as_bytes())?.is_some() {
                    return Err(abort(InvariantError::PassCodeCollision));
                }
                let pass_type = if index == 0 {
                    PassType::Primary
                } else {
                    PassType::Additional
                };
                let pass = EventPass::issue(
                    code.clone(),
                    booking.booking_id.clone(),
                    booking.event_id.clone(),
                    booking.host_id.clone(),
                    booking.guest_id.clone(),
                    name.clone(),
                    pass_type,
                    now.clone(),
                );
                store::tx_put(tx, &pass_key, &pass)?;
            }
            booking.pass_codes = codes.clone();

            let commission = self.config.commission_of(booking.amount_total);
            let net = booking.amount_total - commission;
            ledger::post_credit(
                tx,
                &booking.host_id,
                net,
                EntryKind::Earned,
                Reference::Booking(booking.booking_id.clone()),
                None,
                &now,
            )?;
            if commission > 0 {
                ledger::post_credit(
                    tx,
                    &self.config.platform_user,
                    commission,
                    EntryKind::CommissionDeducted,
                    Reference::Booking(booking.booking_id.clone()),
                    None,
                    &now,
                )?;
            }

            store::tx_put(tx, &booking_key, &booking)?;
            Ok(booking)
        })?;

        debug!(booking = %booking.booking_id, "payment confirmed, passes issued");
        Ok(booking)
    }

    /// Guest asks for their money back on a confirmed booking, before the
    /// event starts. Moves no money; a host/admin resolution does.
    pub fn request_refund(
        &self,
        booking_id: &str,
        reason: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<Booking> {
        let booking_key = store::booking_key(booking_id);

        store::run_txn(&self.db, |tx| {
            let mut booking: Booking = store::tx_get(tx, &booking_key)?
                .ok_or_else(|| abort(ConflictError::BookingNotFound))?;
            let slot: EventSlot = store::tx_get(tx, &store::event_key(&booking.event_id))?
                .ok_or_else(|| abort(ConflictError::EventNotFound))?;

            if slot.has_started(&now) {
                return Err(abort(ConflictError::RefundWindowClosed));
            }
            booking
                .transition(BookingStatus::RefundRequired)
                .map_err(abort)?;
            booking.refund_requested_at = Some(now.clone());
            booking.refund_reason = Some(reason.to_string());

            store::tx_put(tx, &booking_key, &booking)?;
            Ok(booking)
        })
    }

    /// Admin decision on a pending refund request. Approval assesses the
    /// refund as of the moment the guest asked (not the moment an admin got
    /// around to it), settles the compensating ledger movements, releases
    /// the seats and cancels the booking. Decline returns the booking to
    /// Confirmed, with the request fields kept for the record.
    pub fn resolve_refund(
        &self,
        booking_id: &str,
        approve: bool,
        admin_id: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<Booking> {
        let booking_key = store::booking_key(booking_id);

        store::run_txn(&self.db, |tx| {
            let mut booking: Booking = store::tx_get(tx, &booking_key)?
                .ok_or_else(|| abort(ConflictError::BookingNotFound))?;

            if !approve {
                booking.transition(BookingStatus::Confirmed).map_err(abort)?;
                store::tx_put(tx, &booking_key, &booking)?;
                return Ok(booking);
            }

            let event_key = store::event_key(&booking.event_id);
            let mut slot: EventSlot = store::tx_get(tx, &event_key)?
                .ok_or_else(|| abort(ConflictError::EventNotFound))?;

            let assessed_at = booking
                .refund_requested_at
                .clone()
                .unwrap_or_else(|| now.clone());
            let decision = refund::calculate(
                &self.config.refund,
                &slot.starts_at,
                &assessed_at,
                Actor::Guest,
                booking.amount_total,
            );

            booking.transition(BookingStatus::Cancelled).map_err(abort)?;
            self.settle_refund(tx, &booking, &decision, &now)?;
            slot.release(booking.seats).map_err(abort)?;
            self.void_passes(tx, &booking, admin_id)?;
            tx.remove(store::active_key(&booking.event_id, &booking.guest_id).as_bytes())?;

            booking.refund_percent = Some(decision.percent);
            booking.refund_amount = Some(decision.amount);
            booking.cancelled_at = Some(now.clone());
            booking.cancelled_by = Some(Actor::Admin);
            booking.cancel_reason = booking.refund_reason.clone();

            store::tx_put(tx, &event_key, &slot)?;
            store::tx_put(tx, &booking_key, &booking)?;
            Ok(booking)
        })
    }

    /// Cancel a booking. Permitted to the booking's guest, the event's host
    /// or an admin; the refund policy keys off which of them acted. Releases
    /// the held seats, voids unvalidated passes and, when a payment had been
    /// captured, settles the compensating ledger movements.
    pub fn cancel(
        &self,
        booking_id: &str,
        actor: Actor,
        actor_id: &str,
        reason: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<CancelReceipt> {
        let booking_key = store::booking_key(booking_id);

        let receipt = store::run_txn(&self.db, |tx| {
            let mut booking: Booking = store::tx_get(tx, &booking_key)?
                .ok_or_else(|| abort(ConflictError::BookingNotFound))?;

            let permitted = match actor {
                Actor::Guest => actor_id == booking.guest_id,
                Actor::Host => actor_id == booking.host_id,
                Actor::Admin => true,
            };
            if !permitted {
                return Err(abort(ConflictError::NotPermitted));
            }

            let event_key = store::event_key(&booking.event_id);
            let mut slot: EventSlot = store::tx_get(tx, &event_key)?
                .ok_or_else(|| abort(ConflictError::EventNotFound))?;

            booking.transition(BookingStatus::Cancelled).map_err(abort)?;

            let decision = if booking.payment_captured() {
                let decision = refund::calculate(
                    &self.config.refund,
                    &slot.starts_at,
                    &now,
                    actor,
                    booking.amount_total,
                );
                self.settle_refund(tx, &booking, &decision, &now)?;
                booking.refund_percent = Some(decision.percent);
                booking.refund_amount = Some(decision.amount);
                decision
            } else {
                RefundDecision::none()
            };

            slot.release(booking.seats).map_err(abort)?;
            self.void_passes(tx, &booking, actor_id)?;
            tx.remove(store::active_key(&booking.event_id, &booking.guest_id).as_bytes())?;

            booking.cancelled_at = Some(now.clone());
            booking.cancelled_by = Some(actor);
            booking.cancel_reason = Some(reason.to_string());

            store::tx_put(tx, &event_key, &slot)?;
            store::tx_put(tx, &booking_key, &booking)?;
            Ok(CancelReceipt {
                booking,
                refund_percent: decision.percent,
                refund_amount: decision.amount,
            })
        })?;

        debug!(
            booking = %receipt.booking.booking_id,
            actor = actor.as_str(),
            refund = receipt.refund_amount,
            "booking cancelled"
        );
        Ok(receipt)
    }

    /// Host or admin cancels a whole slot. Every booking still holding
    /// seats goes through the normal cancellation path (full refund, per
    /// the actor policy), then the slot closes. Returns how many bookings
    /// were cancelled.
    pub fn cancel_event(
        &self,
        event_id: &str,
        actor: Actor,
        actor_id: &str,
        reason: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<usize> {
        let slot = self.event(event_id)?;
        let permitted = match actor {
            Actor::Host => actor_id == slot.host_id,
            Actor::Admin => true,
            Actor::Guest => false,
        };
        if !permitted {
            return Err(ConflictError::NotPermitted.into());
        }
        if matches!(slot.status, SlotStatus::Completed | SlotStatus::Cancelled) {
            return Err(ConflictError::InvalidTransition {
                from: slot.status.as_str(),
                to: SlotStatus::Cancelled.as_str(),
            }
            .into());
        }

        let mut cancelled = 0usize;
        for booking in self.bookings_for_event(event_id)? {
            if matches!(
                booking.status,
                BookingStatus::PaymentPending
                    | BookingStatus::Confirmed
                    | BookingStatus::RefundRequired
            ) {
                self.cancel(&booking.booking_id, actor, actor_id, reason, now.clone())?;
                cancelled += 1;
            }
        }

        let event_key = store::event_key(event_id);
        store::run_txn(&self.db, |tx| {
            let mut slot: EventSlot = store::tx_get(tx, &event_key)?
                .ok_or_else(|| abort(ConflictError::EventNotFound))?;
            slot.status = SlotStatus::Cancelled;
            store::tx_put(tx, &event_key, &slot)
        })?;

        Ok(cancelled)
    }

    /// Door check-in. The flip of `is_valid` is a conditional update inside
    /// one transaction, so two simultaneous attempts on the same code get
    /// exactly one success.
    pub fn validate_pass(
        &self,
        event_code: &str,
        event_id: &str,
        validator_id: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<PassReceipt> {
        let pass_key = store::pass_key(event_code);

        store::run_txn(&self.db, |tx| {
            let mut pass: EventPass = store::tx_get(tx, &pass_key)?
                .ok_or_else(|| abort(ConflictError::PassNotFound))?;

            pass.consume(event_id, validator_id, now.clone())
                .map_err(abort)?;

            store::tx_put(tx, &pass_key, &pass)?;
            Ok(PassReceipt {
                guest_name: pass.guest_name.clone(),
                pass_type: pass.pass_type,
            })
        })
    }

    /// Reaper sweep: cancel PaymentPending bookings whose confirmation
    /// never arrived inside the configured window, restoring their seats.
    /// Returns how many were expired.
    pub fn expire_pending(&self, now: TimeStamp<Utc>) -> anyhow::Result<usize> {
        let deadline = now.to_datetime_utc() - Duration::minutes(self.config.payment_window_mins);
        let mut expired = 0usize;

        for booking in self.all_bookings()? {
            if booking.status != BookingStatus::PaymentPending
                || booking.created_at.to_datetime_utc() > deadline
            {
                continue;
            }

            let booking_key = store::booking_key(&booking.booking_id);
            let swept = store::run_txn(&self.db, |tx| {
                let mut booking: Booking = match store::tx_get(tx, &booking_key)? {
                    Some(b) => b,
                    None => return Ok(false),
                };
                // Re-check under the transaction; a racing confirmation wins.
                if booking.status != BookingStatus::PaymentPending {
                    return Ok(false);
                }

                let event_key = store::event_key(&booking.event_id);
                let mut slot: EventSlot = store::tx_get(tx, &event_key)?
                    .ok_or_else(|| abort(ConflictError::EventNotFound))?;
                slot.release(booking.seats).map_err(abort)?;

                booking.transition(BookingStatus::Cancelled).map_err(abort)?;
                booking.cancelled_at = Some(now.clone());
                booking.cancel_reason = Some("payment window elapsed".to_string());
                tx.remove(store::active_key(&booking.event_id, &booking.guest_id).as_bytes())?;

                store::tx_put(tx, &event_key, &slot)?;
                store::tx_put(tx, &booking_key, &booking)?;
                Ok(true)
            })?;

            if swept {
                debug!(booking = %booking.booking_id, "pending booking expired");
                expired += 1;
            }
        }

        Ok(expired)
    }

    /// Reaper sweep: move Confirmed bookings whose event has ended to
    /// Completed, and close out the finished slots. Returns how many
    /// bookings were completed.
    pub fn settle_completed(&self, now: TimeStamp<Utc>) -> anyhow::Result<usize> {
        let mut completed = 0usize;

        for booking in self.all_bookings()? {
            if booking.status != BookingStatus::Confirmed {
                continue;
            }
            let slot = self.event(&booking.event_id)?;
            if !slot.has_ended(&now) {
                continue;
            }

            let booking_key = store::booking_key(&booking.booking_id);
            let settled = store::run_txn(&self.db, |tx| {
                let mut booking: Booking = match store::tx_get(tx, &booking_key)? {
                    Some(b) => b,
                    None => return Ok(false),
                };
                if booking.status != BookingStatus::Confirmed {
                    return Ok(false);
                }

                booking.transition(BookingStatus::Completed).map_err(abort)?;
                booking.completed_at = Some(now.clone());
                tx.remove(store::active_key(&booking.event_id, &booking.guest_id).as_bytes())?;

                store::tx_put(tx, &booking_key, &booking)?;
                Ok(true)
            })?;

            if settled {
                completed += 1;
            }
        }

        for slot in self.all_events()? {
            if !matches!(slot.status, SlotStatus::Open | SlotStatus::Full)
                || !slot.has_ended(&now)
            {
                continue;
            }
            let event_key = store::event_key(&slot.event_id);
            store::run_txn(&self.db, |tx| {
                let mut slot: EventSlot = match store::tx_get(tx, &event_key)? {
                    Some(s) => s,
                    None => return Ok(()),
                };
                if matches!(slot.status, SlotStatus::Open | SlotStatus::Full) {
                    slot.status = SlotStatus::Completed;
                    store::tx_put(tx, &event_key, &slot)?;
                }
                Ok(())
            })?;
        }

        Ok(completed)
    }

    /// Post the compensating movements for a refund: the host repays the
    /// net share, the platform repays its commission share (same rounding
    /// as the original split), and the guest receives the full amount.
    /// A zero decision moves nothing and posts no rows.
    fn settle_refund(
        &self,
        tx: &TransactionalTree,
        booking: &Booking,
        decision: &RefundDecision,
        now: &TimeStamp<Utc>,
    ) -> Result<(), ConflictableTransactionError<Abort>> {
        if decision.amount == 0 {
            return Ok(());
        }

        let commission_part = self.config.commission_of(decision.amount);
        let host_part = decision.amount - commission_part;
        let reference = Reference::Booking(booking.booking_id.clone());

        if host_part > 0 {
            ledger::post_debit(
                tx,
                &booking.host_id,
                host_part,
                EntryKind::Adjustment,
                reference.clone(),
                Some("refund clawback".to_string()),
                now,
            )?;
        }
        if commission_part > 0 {
            ledger::post_debit(
                tx,
                &self.config.platform_user,
                commission_part,
                EntryKind::Adjustment,
                reference.clone(),
                Some("commission reversal".to_string()),
                now,
            )?;
        }
        ledger::post_credit(
            tx,
            &booking.guest_id,
            decision.amount,
            EntryKind::RefundCredit,
            reference,
            None,
            now,
        )
    }

    fn void_passes(
        &self,
        tx: &TransactionalTree,
        booking: &Booking,
        voided_by: &str,
    ) -> Result<(), ConflictableTransactionError<Abort>> {
        for code in &booking.pass_codes {
            let pass_key = store::pass_key(code);
            if let Some(mut pass) = store::tx_get::<EventPass>(tx, &pass_key)? {
                if pass.is_valid {
                    pass.void(voided_by);
                    store::tx_put(tx, &pass_key, &pass)?;
                }
            }
        }
        Ok(())
    }

    fn all_bookings(&self) -> anyhow::Result<Vec<Booking>> {
        let mut bookings = Vec::new();
        for item in self.db.scan_prefix(b"booking/") {
            let (_, raw) = item?;
            bookings.push(minicbor::decode(&raw)?);
        }
        Ok(bookings)
    }

    fn all_events(&self) -> anyhow::Result<Vec<EventSlot>> {
        let mut events = Vec::new();
        for item in self.db.scan_prefix(b"event/") {
            let (_, raw) = item?;
            events.push(minicbor::decode(&raw)?);
        }
        Ok(events)
    }

    fn bookings_for_event(&self, event_id: &str) -> anyhow::Result<Vec<Booking>> {
        Ok(self
            .all_bookings()?
            .into_iter()
            .filter(|b| b.event_id == event_id)
            .collect())
    }
}
