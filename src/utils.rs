//! Identifier minting and pass-code derivation.

use bech32::Bech32m;
use uuid7::uuid7;

/// Mint a unique id and encode it as bech32m under the given entity prefix,
/// e.g. `booking_1...`, `event_1...`.
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Derive a fresh check-in code: the random tail of a uuid7 rendered as 12
/// uppercase hex characters. Uniqueness is still enforced at insert time;
/// the randomness only makes collisions astronomically unlikely.
pub fn new_pass_code() -> String {
    hex::encode_upper(&uuid7().as_bytes()[10..16])
}

/// Content-addressed key for the one-active-booking-per-(event, guest)
/// uniqueness probe. Hashing the pair keeps the key a fixed width and free
/// of separator ambiguity.
pub fn active_pair_digest(event_id: &str, guest_id: &str) -> String {
    sha256::digest(format!("{event_id}\n{guest_id}"))
}
