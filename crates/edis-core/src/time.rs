//! Wall-clock time helpers.
//!
//! Expirations are stored as absolute epoch instants so they survive
//! restarts alongside the records that carry them.

use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel expiry meaning "never".
pub const NO_EXPIRY: u64 = 0;

fn since_epoch() -> std::time::Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Current wall-clock time in milliseconds since the epoch.
#[inline]
pub fn now_ms() -> u64 {
    since_epoch().as_millis() as u64
}

/// Current wall-clock time in whole seconds since the epoch.
#[inline]
pub fn now_secs() -> u64 {
    since_epoch().as_secs()
}

/// Current wall-clock time in fractional seconds since the epoch.
#[inline]
pub fn now_secs_f64() -> f64 {
    since_epoch().as_secs_f64()
}

/// Returns true if the given expiry instant has passed.
#[inline]
pub fn is_expired(expire_at_ms: u64) -> bool {
    expire_at_ms != NO_EXPIRY && now_ms() >= expire_at_ms
}

/// Remaining whole seconds until `expire_at_ms`, or `None` for "never".
#[inline]
pub fn remaining_secs(expire_at_ms: u64) -> Option<u64> {
    if expire_at_ms == NO_EXPIRY {
        None
    } else {
        Some(expire_at_ms.saturating_sub(now_ms()) / 1000)
    }
}
