#![allow(unused_imports)]

use anyhow::Context;
use booking_settlement::booking::{BookingStatus, Gender, GuestDetails};
use booking_settlement::config::{EngineConfig, RefundPolicy, RefundTier};
use booking_settlement::error::ConflictError;
use booking_settlement::event::SlotStatus;
use booking_settlement::ledger::WalletLedger;
use booking_settlement::pass::PassType;
use booking_settlement::service::{BookingService, ReserveRequest};
use booking_settlement::types::{Actor, TimeStamp};
use booking_settlement::utils;
use booking_settlement::wallet::EntryKind;
use booking_settlement::withdrawal::{Destination, WithdrawalStatus};
use chrono::Utc;
use std::sync::Arc;

use tempfile::tempdir; // Use for test db cleanup.

// Sled uses file-based locking to prevent concurrent access, so each test
// opens its own database under a tempdir, mirroring how the suite isolates
// state between scenarios.
fn open_services(
    dir: &tempfile::TempDir,
    name: &str,
    config: EngineConfig,
) -> anyhow::Result<(BookingService, WalletLedger)> {
    let db = sled::open(dir.path().join(name))?;
    let db = Arc::new(db);
    db.clear()?;

    Ok((
        BookingService::new(db.clone(), config),
        WalletLedger::new(db),
    ))
}

fn primary() -> GuestDetails {
    GuestDetails {
        name: "Asha".to_string(),
        mobile: "9000000001".to_string(),
        age: 31,
        gender: Gender::Female,
    }
}

fn plus_one(name: &str) -> GuestDetails {
    GuestDetails {
        name: name.to_string(),
        mobile: "9000000002".to_string(),
        age: 29,
        gender: Gender::Other,
    }
}

fn reserve_request(event_id: &str, guest_id: &str, seats: u32) -> ReserveRequest {
    let additional_guests = (1..seats)
        .map(|i| plus_one(&format!("Guest {i}")))
        .collect();
    ReserveRequest {
        event_id: event_id.to_string(),
        guest_id: guest_id.to_string(),
        seats,
        member: false,
        primary: primary(),
        additional_guests,
    }
}

// Event runs 19:00-22:00 on 2026-09-12; bookings happen two days ahead.
fn event_start() -> TimeStamp<Utc> {
    TimeStamp::new_with(2026, 9, 12, 19, 0, 0)
}

fn event_end() -> TimeStamp<Utc> {
    TimeStamp::new_with(2026, 9, 12, 22, 0, 0)
}

fn booking_day() -> TimeStamp<Utc> {
    TimeStamp::new_with(2026, 9, 10, 12, 0, 0)
}

#[test]
fn reserve_confirm_and_settle() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, ledger) = open_services(&temp_dir, "reserve_confirm.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    assert_eq!(slot.seats_remaining, 10);

    let booking = service
        .reserve(reserve_request(&slot.event_id, &guest_id, 3), booking_day())
        .context("reservation failed")?;

    assert_eq!(booking.status, BookingStatus::PaymentPending);
    assert_eq!(booking.amount_total, 36_000);
    assert_eq!(service.event(&slot.event_id)?.seats_remaining, 7);

    // Gateway reports success; passes are minted and the host is credited
    // net of the 10% commission.
    let booking = service.confirm_payment(&booking.booking_id, "gw_ref_001", booking_day())?;
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.pass_codes.len(), 3);

    let first = service.pass(&booking.pass_codes[0])?;
    assert_eq!(first.pass_type, PassType::Primary);
    assert!(first.is_valid);

    let host = ledger.summary(&host_id)?;
    assert_eq!(host.balance, 32_400);
    assert_eq!(host.total_earned, 32_400);

    let platform = ledger.summary("platform")?;
    assert_eq!(platform.balance, 3_600);

    // Confirming again is a no-op, not an error, and credits nothing twice.
    let again = service.confirm_payment(&booking.booking_id, "gw_ref_001", booking_day())?;
    assert_eq!(again.status, BookingStatus::Confirmed);
    assert_eq!(ledger.summary(&host_id)?.balance, 32_400);

    Ok(())
}

#[test]
fn duplicate_active_booking_is_rejected_until_cancelled() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, _ledger) = open_services(&temp_dir, "duplicate.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking = service.reserve(reserve_request(&slot.event_id, &guest_id, 1), booking_day())?;

    let err = service
        .reserve(reserve_request(&slot.event_id, &guest_id, 1), booking_day())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConflictError>(),
        Some(ConflictError::DuplicateActiveBooking)
    ));

    // Once the first booking is cancelled the guest may book again.
    service.cancel(&booking.booking_id, Actor::Guest, &guest_id, "plans changed", booking_day())?;
    let second = service.reserve(reserve_request(&slot.event_id, &guest_id, 1), booking_day())?;
    assert_eq!(second.status, BookingStatus::PaymentPending);

    Ok(())
}

#[test]
fn racing_reservations_for_the_last_seat_produce_one_winner() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, _ledger) = open_services(&temp_dir, "last_seat.db", EngineConfig::default())?;
    let service = Arc::new(service);

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;
    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 1, 12_000)?;

    let guest_a = utils::new_uuid_to_bech32("guest_")?;
    let guest_b = utils::new_uuid_to_bech32("guest_")?;

    let mut outcomes = Vec::new();
    std::thread::scope(|scope| {
        let handles: Vec<_> = [guest_a, guest_b]
            .into_iter()
            .map(|guest| {
                let service = Arc::clone(&service);
                let event_id = slot.event_id.clone();
                scope.spawn(move || {
                    service.reserve(reserve_request(&event_id, &guest, 1), booking_day())
                })
            })
            .collect();
        for handle in handles {
            outcomes.push(handle.join().expect("reservation thread panicked"));
        }
    });

    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one reservation may win the last seat");

    let loser = outcomes
        .into_iter()
        .find(|r| r.is_err())
        .expect("one reservation must lose")
        .unwrap_err();
    assert!(matches!(
        loser.downcast_ref::<ConflictError>(),
        Some(ConflictError::InventoryExhausted)
    ));

    assert_eq!(service.event(&slot.event_id)?.seats_remaining, 0);
    assert_eq!(service.event(&slot.event_id)?.status, SlotStatus::Full);

    Ok(())
}

#[test]
fn concurrent_reservations_never_oversell() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, _ledger) = open_services(&temp_dir, "oversell.db", EngineConfig::default())?;
    let service = Arc::new(service);

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;
    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 5, 12_000)?;

    // Eight guests contend for two seats each against a capacity of five.
    let mut won_seats = Vec::new();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                let event_id = slot.event_id.clone();
                scope.spawn(move || {
                    let guest = utils::new_uuid_to_bech32("guest_").expect("id minting");
                    service
                        .reserve(reserve_request(&event_id, &guest, 2), booking_day())
                        .map(|b| b.seats)
                })
            })
            .collect();
        for handle in handles {
            if let Ok(seats) = handle.join().expect("reservation thread panicked") {
                won_seats.push(seats);
            }
        }
    });

    let total: u32 = won_seats.iter().sum();
    assert!(total <= 5, "sold {total} seats against a capacity of 5");
    assert_eq!(service.event(&slot.event_id)?.seats_remaining, 5 - total);

    Ok(())
}

#[test]
fn pass_validates_exactly_once() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, _ledger) = open_services(&temp_dir, "pass_once.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking = service.reserve(reserve_request(&slot.event_id, &guest_id, 2), booking_day())?;
    let booking = service.confirm_payment(&booking.booking_id, "gw_ref_002", booking_day())?;

    let door_time = TimeStamp::new_with(2026, 9, 12, 19, 5, 0);
    let code = &booking.pass_codes[0];

    let receipt = service.validate_pass(code, &slot.event_id, &host_id, door_time.clone())?;
    assert_eq!(receipt.guest_name, "Asha");
    assert_eq!(receipt.pass_type, PassType::Primary);

    let err = service
        .validate_pass(code, &slot.event_id, &host_id, door_time.clone())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConflictError>(),
        Some(ConflictError::AlreadyUsed)
    ));

    // A code from some other event's door scanner resolves but mismatches.
    let other = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 4, 9_000)?;
    let err = service
        .validate_pass(&booking.pass_codes[1], &other.event_id, &host_id, door_time.clone())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConflictError>(),
        Some(ConflictError::EventMismatch)
    ));

    let err = service
        .validate_pass("FFFFFFFFFFFF", &slot.event_id, &host_id, door_time)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConflictError>(),
        Some(ConflictError::PassNotFound)
    ));

    Ok(())
}

#[test]
fn racing_checkins_admit_exactly_one() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, _ledger) = open_services(&temp_dir, "pass_race.db", EngineConfig::default())?;
    let service = Arc::new(service);

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking = service.reserve(reserve_request(&slot.event_id, &guest_id, 1), booking_day())?;
    let booking = service.confirm_payment(&booking.booking_id, "gw_ref_003", booking_day())?;
    let code = booking.pass_codes[0].clone();

    let mut outcomes = Vec::new();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = Arc::clone(&service);
                let code = code.clone();
                let event_id = slot.event_id.clone();
                let host_id = host_id.clone();
                scope.spawn(move || {
                    let door_time = TimeStamp::new_with(2026, 9, 12, 19, 5, 0);
                    service.validate_pass(&code, &event_id, &host_id, door_time)
                })
            })
            .collect();
        for handle in handles {
            outcomes.push(handle.join().expect("check-in thread panicked"));
        }
    });

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);

    Ok(())
}

#[test]
fn guest_cancellation_far_out_refunds_in_full() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, ledger) = open_services(&temp_dir, "full_refund.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking = service.reserve(reserve_request(&slot.event_id, &guest_id, 2), booking_day())?;
    let booking = service.confirm_payment(&booking.booking_id, "gw_ref_004", booking_day())?;

    // Two days out clears the 24-hour tier: 100% back.
    let receipt = service.cancel(
        &booking.booking_id,
        Actor::Guest,
        &guest_id,
        "plans changed",
        booking_day(),
    )?;
    assert_eq!(receipt.refund_percent, 100);
    assert_eq!(receipt.refund_amount, 24_000);
    assert_eq!(receipt.booking.status, BookingStatus::Cancelled);

    // Seats restored, host and platform fully clawed back, guest made whole.
    assert_eq!(service.event(&slot.event_id)?.seats_remaining, 10);
    assert_eq!(ledger.summary(&host_id)?.balance, 0);
    assert_eq!(ledger.summary("platform")?.balance, 0);
    assert_eq!(ledger.summary(&guest_id)?.balance, 24_000);

    // The voided passes can no longer be used at the door.
    let err = service
        .validate_pass(
            &receipt.booking.pass_codes[0],
            &slot.event_id,
            &host_id,
            TimeStamp::new_with(2026, 9, 12, 19, 5, 0),
        )
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConflictError>(),
        Some(ConflictError::AlreadyUsed)
    ));

    Ok(())
}

#[test]
fn guest_cancellation_inside_cutoff_refunds_nothing() -> anyhow::Result<()> {
    // Single 24-hour cutoff: full refund outside it, nothing inside it.
    let config = EngineConfig {
        refund: RefundPolicy::new(vec![
            RefundTier {
                hours_before: 24,
                percent: 100,
            },
            RefundTier {
                hours_before: 0,
                percent: 0,
            },
        ])?,
        ..EngineConfig::default()
    };
    let temp_dir = tempdir()?;
    let (service, ledger) = open_services(&temp_dir, "zero_refund.db", config)?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking = service.reserve(reserve_request(&slot.event_id, &guest_id, 2), booking_day())?;
    let booking = service.confirm_payment(&booking.booking_id, "gw_ref_005", booking_day())?;

    let host_before = ledger.summary(&host_id)?.balance;
    let host_rows = ledger.history(&host_id)?.len();

    // 21 hours before start: inside the cutoff, zero refund.
    let receipt = service.cancel(
        &booking.booking_id,
        Actor::Guest,
        &guest_id,
        "cold feet",
        TimeStamp::new_with(2026, 9, 11, 22, 0, 0),
    )?;
    assert_eq!(receipt.refund_percent, 0);
    assert_eq!(receipt.refund_amount, 0);

    // Seats come back, but no money moves and no ledger rows appear.
    assert_eq!(service.event(&slot.event_id)?.seats_remaining, 10);
    assert_eq!(ledger.summary(&host_id)?.balance, host_before);
    assert_eq!(ledger.history(&host_id)?.len(), host_rows);
    assert_eq!(ledger.summary(&guest_id)?.balance, 0);

    Ok(())
}

#[test]
fn host_cancellation_always_refunds_in_full() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, ledger) = open_services(&temp_dir, "host_cancel.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking = service.reserve(reserve_request(&slot.event_id, &guest_id, 1), booking_day())?;
    let booking = service.confirm_payment(&booking.booking_id, "gw_ref_006", booking_day())?;

    // Minutes before the doors open, the host pulls the plug: still 100%.
    let receipt = service.cancel(
        &booking.booking_id,
        Actor::Host,
        &host_id,
        "kitchen flooded",
        TimeStamp::new_with(2026, 9, 12, 18, 45, 0),
    )?;
    assert_eq!(receipt.refund_percent, 100);
    assert_eq!(ledger.summary(&guest_id)?.balance, 12_000);

    Ok(())
}

#[test]
fn refund_request_and_resolution() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, ledger) = open_services(&temp_dir, "refund_flow.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;
    let admin_id = utils::new_uuid_to_bech32("admin_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking = service.reserve(reserve_request(&slot.event_id, &guest_id, 1), booking_day())?;
    let booking = service.confirm_payment(&booking.booking_id, "gw_ref_007", booking_day())?;

    let booking = service.request_refund(&booking.booking_id, "allergy concerns", booking_day())?;
    assert_eq!(booking.status, BookingStatus::RefundRequired);

    // Declining returns the booking to Confirmed, seats still held.
    let booking = service.resolve_refund(&booking.booking_id, false, &admin_id, booking_day())?;
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(service.event(&slot.event_id)?.seats_remaining, 9);

    // Asking again and approving settles at the percentage assessed when
    // the guest asked (two days out: 100%).
    let booking = service.request_refund(&booking.booking_id, "allergy concerns", booking_day())?;
    let booking = service.resolve_refund(&booking.booking_id, true, &admin_id, event_start())?;
    assert_eq!(booking.status, BookingStatus::Cancelled);
    assert_eq!(booking.refund_percent, Some(100));
    assert_eq!(booking.refund_amount, Some(12_000));
    assert_eq!(service.event(&slot.event_id)?.seats_remaining, 10);
    assert_eq!(ledger.summary(&guest_id)?.balance, 12_000);

    Ok(())
}

#[test]
fn refund_request_after_start_is_rejected() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, _ledger) = open_services(&temp_dir, "refund_late.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking = service.reserve(reserve_request(&slot.event_id, &guest_id, 1), booking_day())?;
    let booking = service.confirm_payment(&booking.booking_id, "gw_ref_008", booking_day())?;

    let err = service
        .request_refund(
            &booking.booking_id,
            "changed my mind",
            TimeStamp::new_with(2026, 9, 12, 19, 30, 0),
        )
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConflictError>(),
        Some(ConflictError::RefundWindowClosed)
    ));

    Ok(())
}

#[test]
fn withdrawal_request_then_reject_restores_balance_exactly() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, ledger) = open_services(&temp_dir, "wdr_reject.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;
    let admin_id = utils::new_uuid_to_bech32("admin_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking = service.reserve(reserve_request(&slot.event_id, &guest_id, 3), booking_day())?;
    service.confirm_payment(&booking.booking_id, "gw_ref_009", booking_day())?;

    let before = ledger.summary(&host_id)?;
    assert_eq!(before.balance, 32_400);

    let withdrawal = ledger.request_withdrawal(
        &host_id,
        20_000,
        Destination::Upi {
            handle: "host@okbank".to_string(),
        },
        booking_day(),
    )?;
    let held = ledger.summary(&host_id)?;
    assert_eq!(held.balance, 12_400);
    assert_eq!(held.pending_balance, 20_000);

    let withdrawal =
        ledger.reject_withdrawal(&withdrawal.withdrawal_id, &admin_id, "kyc incomplete", booking_day())?;
    assert_eq!(withdrawal.status, WithdrawalStatus::Rejected);
    assert_eq!(withdrawal.decision_reason.as_deref(), Some("kyc incomplete"));

    let after = ledger.summary(&host_id)?;
    assert_eq!(after.balance, before.balance);
    assert_eq!(after.pending_balance, 0);
    assert_eq!(after.total_withdrawn, 0);

    assert!(ledger.reconcile(&host_id)?.consistent());

    Ok(())
}

#[test]
fn withdrawal_paid_flow_updates_aggregates() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, ledger) = open_services(&temp_dir, "wdr_paid.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;
    let admin_id = utils::new_uuid_to_bech32("admin_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking = service.reserve(reserve_request(&slot.event_id, &guest_id, 3), booking_day())?;
    service.confirm_payment(&booking.booking_id, "gw_ref_010", booking_day())?;

    let withdrawal = ledger.request_withdrawal(
        &host_id,
        30_000,
        Destination::Bank {
            account_number: "50100200300".to_string(),
            ifsc: "HDFC0001".to_string(),
        },
        booking_day(),
    )?;
    let withdrawal = ledger.approve_withdrawal(&withdrawal.withdrawal_id, &admin_id, booking_day())?;
    assert_eq!(withdrawal.status, WithdrawalStatus::Approved);
    // Approval parks the funds; nothing returns to balance yet.
    assert_eq!(ledger.summary(&host_id)?.pending_balance, 30_000);

    let withdrawal =
        ledger.mark_paid(&withdrawal.withdrawal_id, &admin_id, "utr_777", booking_day())?;
    assert_eq!(withdrawal.status, WithdrawalStatus::Paid);
    assert_eq!(withdrawal.payment_ref.as_deref(), Some("utr_777"));

    let summary = ledger.summary(&host_id)?;
    assert_eq!(summary.balance, 2_400);
    assert_eq!(summary.pending_balance, 0);
    assert_eq!(summary.total_withdrawn, 30_000);
    assert!(ledger.reconcile(&host_id)?.consistent());

    // Terminal states refuse further transitions.
    let err = ledger
        .mark_failed(&withdrawal.withdrawal_id, &admin_id, "late bounce", booking_day())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConflictError>(),
        Some(ConflictError::InvalidTransition { .. })
    ));

    Ok(())
}

#[test]
fn failed_payout_restores_the_balance() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, ledger) = open_services(&temp_dir, "wdr_failed.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;
    let admin_id = utils::new_uuid_to_bech32("admin_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking = service.reserve(reserve_request(&slot.event_id, &guest_id, 2), booking_day())?;
    service.confirm_payment(&booking.booking_id, "gw_ref_011", booking_day())?;

    let earned = ledger.summary(&host_id)?.balance;
    let withdrawal = ledger.request_withdrawal(
        &host_id,
        earned,
        Destination::Upi {
            handle: "host@okbank".to_string(),
        },
        booking_day(),
    )?;
    let withdrawal = ledger.approve_withdrawal(&withdrawal.withdrawal_id, &admin_id, booking_day())?;
    let withdrawal =
        ledger.mark_failed(&withdrawal.withdrawal_id, &admin_id, "account closed", booking_day())?;
    assert_eq!(withdrawal.status, WithdrawalStatus::Failed);

    let summary = ledger.summary(&host_id)?;
    assert_eq!(summary.balance, earned);
    assert_eq!(summary.pending_balance, 0);
    assert_eq!(summary.total_withdrawn, 0);
    assert!(ledger.reconcile(&host_id)?.consistent());

    Ok(())
}

#[test]
fn frozen_wallet_rejects_debits_until_unfrozen() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, ledger) = open_services(&temp_dir, "frozen.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;
    let admin_id = utils::new_uuid_to_bech32("admin_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking = service.reserve(reserve_request(&slot.event_id, &guest_id, 1), booking_day())?;
    service.confirm_payment(&booking.booking_id, "gw_ref_012", booking_day())?;

    ledger.freeze(&host_id, &admin_id, booking_day())?;
    assert!(ledger.summary(&host_id)?.is_frozen);

    let err = ledger
        .request_withdrawal(
            &host_id,
            1_000,
            Destination::Upi {
                handle: "host@okbank".to_string(),
            },
            booking_day(),
        )
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConflictError>(),
        Some(ConflictError::WalletFrozen)
    ));

    ledger.unfreeze(&host_id, &admin_id, booking_day())?;
    let withdrawal = ledger.request_withdrawal(
        &host_id,
        1_000,
        Destination::Upi {
            handle: "host@okbank".to_string(),
        },
        booking_day(),
    )?;
    assert_eq!(withdrawal.status, WithdrawalStatus::Pending);

    Ok(())
}

#[test]
fn reaper_expires_stale_pending_bookings() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, _ledger) = open_services(&temp_dir, "reaper.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking = service.reserve(reserve_request(&slot.event_id, &guest_id, 2), booking_day())?;
    assert_eq!(service.event(&slot.event_id)?.seats_remaining, 8);

    // Five minutes in: nothing to reap yet.
    let swept = service.expire_pending(TimeStamp::new_with(2026, 9, 10, 12, 5, 0))?;
    assert_eq!(swept, 0);

    // Past the 30-minute payment window the reservation is released.
    let swept = service.expire_pending(TimeStamp::new_with(2026, 9, 10, 13, 0, 0))?;
    assert_eq!(swept, 1);
    assert_eq!(service.event(&slot.event_id)?.seats_remaining, 10);
    assert_eq!(
        service.booking(&booking.booking_id)?.status,
        BookingStatus::Cancelled
    );

    // A gateway confirmation arriving after the timeout is a conflict.
    let err = service
        .confirm_payment(&booking.booking_id, "gw_late", booking_day())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConflictError>(),
        Some(ConflictError::InvalidTransition { .. })
    ));

    Ok(())
}

#[test]
fn completed_events_settle_their_bookings() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, _ledger) = open_services(&temp_dir, "complete.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking = service.reserve(reserve_request(&slot.event_id, &guest_id, 1), booking_day())?;
    service.confirm_payment(&booking.booking_id, "gw_ref_013", booking_day())?;

    let after_dinner = TimeStamp::new_with(2026, 9, 12, 23, 0, 0);
    let settled = service.settle_completed(after_dinner)?;
    assert_eq!(settled, 1);
    assert_eq!(
        service.booking(&booking.booking_id)?.status,
        BookingStatus::Completed
    );
    assert_eq!(service.event(&slot.event_id)?.status, SlotStatus::Completed);

    Ok(())
}

#[test]
fn cancelling_an_event_refunds_every_booking() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, ledger) = open_services(&temp_dir, "cancel_event.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;
    let guest_a = utils::new_uuid_to_bech32("guest_")?;
    let guest_b = utils::new_uuid_to_bech32("guest_")?;

    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    let booking_a = service.reserve(reserve_request(&slot.event_id, &guest_a, 2), booking_day())?;
    service.confirm_payment(&booking_a.booking_id, "gw_ref_014", booking_day())?;
    let booking_b = service.reserve(reserve_request(&slot.event_id, &guest_b, 1), booking_day())?;
    // booking_b never pays; it is still released without any refund.

    let cancelled = service.cancel_event(
        &slot.event_id,
        Actor::Host,
        &host_id,
        "venue unavailable",
        TimeStamp::new_with(2026, 9, 11, 9, 0, 0),
    )?;
    assert_eq!(cancelled, 2);

    assert_eq!(service.event(&slot.event_id)?.status, SlotStatus::Cancelled);
    assert_eq!(ledger.summary(&guest_a)?.balance, 24_000);
    assert_eq!(ledger.summary(&guest_b)?.balance, 0);
    assert_eq!(ledger.summary(&host_id)?.balance, 0);

    // A guest cannot cancel someone else's event.
    let other = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 4, 9_000)?;
    let err = service
        .cancel_event(&other.event_id, Actor::Guest, &guest_a, "nope", booking_day())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConflictError>(),
        Some(ConflictError::NotPermitted)
    ));

    Ok(())
}

#[test]
fn ledger_history_replays_to_the_cached_balance() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let (service, ledger) = open_services(&temp_dir, "replay.db", EngineConfig::default())?;

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;
    let admin_id = utils::new_uuid_to_bech32("admin_")?;

    // A busy host: two confirmed bookings, one guest cancellation, one
    // rejected and one paid withdrawal.
    let slot = service.publish_event(&host_id, &venue_id, event_start(), event_end(), 10, 12_000)?;
    for seats in [2, 3] {
        let guest = utils::new_uuid_to_bech32("guest_")?;
        let booking = service.reserve(reserve_request(&slot.event_id, &guest, seats), booking_day())?;
        service.confirm_payment(&booking.booking_id, "gw_ref", booking_day())?;
        if seats == 2 {
            service.cancel(&booking.booking_id, Actor::Guest, &guest, "rain", booking_day())?;
        }
    }
    let withdrawal = ledger.request_withdrawal(
        &host_id,
        5_000,
        Destination::Upi {
            handle: "host@okbank".to_string(),
        },
        booking_day(),
    )?;
    ledger.reject_withdrawal(&withdrawal.withdrawal_id, &admin_id, "try later", booking_day())?;
    let withdrawal = ledger.request_withdrawal(
        &host_id,
        5_000,
        Destination::Upi {
            handle: "host@okbank".to_string(),
        },
        booking_day(),
    )?;
    ledger.approve_withdrawal(&withdrawal.withdrawal_id, &admin_id, booking_day())?;
    ledger.mark_paid(&withdrawal.withdrawal_id, &admin_id, "utr_888", booking_day())?;

    let history = ledger.history(&host_id)?;
    assert!(!history.is_empty());
    for row in &history {
        let delta = row.balance_after as i64 - row.balance_before as i64;
        assert_eq!(delta, row.amount, "row {} breaks the delta invariant", row.seq);
    }

    let reconciliation = ledger.reconcile(&host_id)?;
    assert!(
        reconciliation.consistent(),
        "ledger must reconcile: {reconciliation:?}"
    );

    Ok(())
}
