//! Booking reservation and wallet settlement engine for a dining-event
//! marketplace: seat-safe reservations, gateway-driven payment confirmation,
//! one-time check-in passes, and an append-only wallet ledger with an
//! admin-gated withdrawal workflow. Everything persists in one embedded
//! sled database; every cross-entity mutation is a single serializable
//! transaction.

pub mod booking;
pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod pass;
pub mod refund;
pub mod service;
mod store;
pub mod types;
pub mod utils;
pub mod wallet;
pub mod withdrawal;
