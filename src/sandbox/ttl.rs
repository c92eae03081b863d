//! TTL-based expiration math.
//!
//! A sandbox expires when the reference time is strictly past
//! `last_used_at + ttl_seconds`. TTLs are fractional seconds; the
//! arithmetic runs in integer milliseconds so sub-second values behave.

use chrono::{DateTime, Duration, Utc};

/// Default interval between background prune passes, in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Returns true when `reference` is past the expiration deadline.
///
/// A `ttl_seconds` of `None` means never-expiring. Non-positive TTLs
/// mean the deadline is at (or before) `last_used_at` itself.
pub fn is_expired(
    last_used_at: DateTime<Utc>,
    ttl_seconds: Option<f64>,
    reference: DateTime<Utc>,
) -> bool {
    match deadline(last_used_at, ttl_seconds) {
        Some(deadline) => reference > deadline,
        None => false,
    }
}

/// Computes the expiration deadline, or `None` for never-expiring.
///
/// A TTL too large to represent as a timestamp also yields `None`: a
/// deadline past the end of representable time never arrives.
pub fn deadline(last_used_at: DateTime<Utc>, ttl_seconds: Option<f64>) -> Option<DateTime<Utc>> {
    let ttl = ttl_seconds?;
    let millis = (ttl * 1000.0) as i64;
    let delta = Duration::try_milliseconds(millis)?;
    last_used_at.checked_add_signed(delta)
}
