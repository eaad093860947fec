//! Counter-nonce freshness filtering.
//!
//! Every secured message carries a 24-bit counter nonce. A receiver accepts
//! a nonce that is at most `D*` behind its own, where `D*` is the adaptive
//! tolerance: the configured maximum delay `D`, scaled down linearly as the
//! silence since the last valid reception approaches the configured maximum
//! silence interval `S`. Right after a valid message the full tolerance
//! applies; at or beyond `S` of silence the tolerance is zero.
//!
//! During a renewal phase two sessions are live at once and the filter must
//! decide which one a received nonce belongs to before checking freshness;
//! the parties use different selection rules (midpoint on the Server,
//! previous-first on the Client) implemented by their cores on top of the
//! primitives here.

use crate::errors::Error;
use crate::payload::CTRNONCE_EXPIRED;
use crate::time::{time_delta, Timestamp};

/// Fails iff the received nonce reached the 24-bit expiry value.
#[inline]
pub fn reject_if_overflown(received: u32) -> Result<(), Error> {
    if received >= CTRNONCE_EXPIRED {
        return Err(Error::ReceivedOverflownNonce);
    }
    Ok(())
}

/// The adaptive tolerance `D*` for a nonce received at `now`, given the
/// last valid reception at `last_rx`.
///
/// Linear decay: `D - D * elapsed / S`, zero at or beyond `S` of silence.
#[must_use]
pub fn tolerated_delay(
    last_rx: Timestamp,
    now: Timestamp,
    max_delay: u32,
    max_silence_ms: u16,
) -> u32 {
    let elapsed = time_delta(last_rx, now);
    let max_silence = u32::from(max_silence_ms);
    if elapsed >= max_silence {
        return 0;
    }
    // u64 intermediate: max_delay may be up to 2^22.
    max_delay - (u64::from(max_delay) * u64::from(elapsed) / u64::from(max_silence)) as u32
}

/// Fails iff `received` is older than `local_ctrnonce - delay`.
///
/// Signed comparison: the subtraction may go below zero, in which case every
/// 24-bit nonce is acceptable.
#[inline]
pub fn reject_if_old(received: u32, local_ctrnonce: u32, delay: u32) -> Result<(), Error> {
    let oldest_tolerated = i64::from(local_ctrnonce) - i64::from(delay);
    if i64::from(received) < oldest_tolerated {
        return Err(Error::OldMessage);
    }
    Ok(())
}

/// Full freshness check for one session: overflow, then age against the
/// adaptive tolerance.
pub fn check(
    received: u32,
    local_ctrnonce: u32,
    last_rx: Timestamp,
    now: Timestamp,
    max_delay: u32,
    max_silence_ms: u16,
) -> Result<(), Error> {
    reject_if_overflown(received)?;
    let delay = tolerated_delay(last_rx, now, max_delay, max_silence_ms);
    reject_if_old(received, local_ctrnonce, delay)
}

/// Increment a counter nonce, saturating at the expiry value.
#[inline]
pub fn increment_saturating(ctrnonce: &mut u32) {
    if *ctrnonce < CTRNONCE_EXPIRED {
        *ctrnonce += 1;
    }
}

/// Fold an accepted received nonce into the local one: take the maximum,
/// then move one past it (saturating), so the same value cannot be
/// replayed.
#[inline]
pub fn advance(local_ctrnonce: &mut u32, received: u32) {
    if received > *local_ctrnonce {
        *local_ctrnonce = received;
    }
    increment_saturating(local_ctrnonce);
}

/// Server-side session selection during renewal: a nonce at or above the
/// midpoint of the two session nonces belongs to the previous session
/// (whose counter is the high one, the new session having restarted at 0).
#[inline]
#[must_use]
pub fn belongs_to_previous_session(received: u32, current: u32, previous: u32) -> bool {
    let midpoint = (current + previous) / 2;
    received >= midpoint
}
