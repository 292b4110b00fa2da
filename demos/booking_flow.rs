//! End-to-end walkthrough: publish a slot, reserve, confirm payment,
//! check a guest in at the door, then run a withdrawal through approval.
//!
//! Run with `cargo run --example booking_flow`.

use booking_settlement::booking::{Gender, GuestDetails};
use booking_settlement::config::EngineConfig;
use booking_settlement::ledger::WalletLedger;
use booking_settlement::service::{BookingService, ReserveRequest};
use booking_settlement::types::TimeStamp;
use booking_settlement::utils;
use booking_settlement::withdrawal::Destination;
use chrono::{Duration, Utc};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let db = Arc::new(sled::open("booking-demo-db")?);
    db.clear()?;

    let service = BookingService::new(db.clone(), EngineConfig::default());
    let ledger = WalletLedger::new(db);

    let host_id = utils::new_uuid_to_bech32("host_")?;
    let venue_id = utils::new_uuid_to_bech32("venue_")?;
    let guest_id = utils::new_uuid_to_bech32("guest_")?;
    let admin_id = utils::new_uuid_to_bech32("admin_")?;

    let now = TimeStamp::now();
    let starts = TimeStamp::from(now.to_datetime_utc() + Duration::hours(48));
    let ends = TimeStamp::from(now.to_datetime_utc() + Duration::hours(51));

    let slot = service.publish_event(&host_id, &venue_id, starts, ends, 10, 12_000)?;
    println!("published {} with {} seats", slot.event_id, slot.seats_remaining);

    let booking = service.reserve(
        ReserveRequest {
            event_id: slot.event_id.clone(),
            guest_id: guest_id.clone(),
            seats: 2,
            member: false,
            primary: GuestDetails {
                name: "Asha".to_string(),
                mobile: "9000000001".to_string(),
                age: 31,
                gender: Gender::Female,
            },
            additional_guests: vec![GuestDetails {
                name: "Rohan".to_string(),
                mobile: "9000000002".to_string(),
                age: 33,
                gender: Gender::Male,
            }],
        },
        TimeStamp::now(),
    )?;
    println!(
        "reserved {} ({} seats, total {})",
        booking.booking_id, booking.seats, booking.amount_total
    );

    let booking = service.confirm_payment(&booking.booking_id, "gw_ref_001", TimeStamp::now())?;
    println!("confirmed; passes: {:?}", booking.pass_codes);

    let door: TimeStamp<Utc> = TimeStamp::now();
    let receipt = service.validate_pass(&booking.pass_codes[0], &booking.event_id, &host_id, door)?;
    println!("checked in {} ({:?})", receipt.guest_name, receipt.pass_type);

    let summary = ledger.summary(&host_id)?;
    println!("host wallet after settlement: {summary:?}");

    let withdrawal = ledger.request_withdrawal(
        &host_id,
        summary.balance,
        Destination::Upi {
            handle: "host@okbank".to_string(),
        },
        TimeStamp::now(),
    )?;
    let withdrawal = ledger.approve_withdrawal(&withdrawal.withdrawal_id, &admin_id, TimeStamp::now())?;
    let withdrawal =
        ledger.mark_paid(&withdrawal.withdrawal_id, &admin_id, "utr_12345", TimeStamp::now())?;
    println!("withdrawal {} is {:?}", withdrawal.withdrawal_id, withdrawal.status);

    println!("final host wallet: {:?}", ledger.summary(&host_id)?);
    Ok(())
}
