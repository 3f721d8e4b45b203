//! Time-to-live arithmetic.
//!
//! Expiry is stored as an absolute Unix timestamp in milliseconds, with
//! `0` reserved for "never". Reads compare against the wall clock at read
//! time; merges drop expired versions once no reader can still see them.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in Unix milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Converts a relative TTL into an absolute expiry.
///
/// `None` or a zero TTL never expires. Sub-millisecond TTLs round up to
/// one millisecond so that a non-zero TTL never maps to "never".
#[must_use]
pub fn expires_at_from_ttl(now_ms: u64, ttl: Option<Duration>) -> u64 {
    match ttl {
        None => 0,
        Some(ttl) if ttl.is_zero() => 0,
        Some(ttl) => {
            let ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            now_ms.saturating_add(ms)
        }
    }
}

/// Whether a version with this expiry is dead at `now_ms`.
#[must_use]
pub const fn is_expired(expires_at: u64, now_ms: u64) -> bool {
    expires_at != 0 && expires_at <= now_ms
}

/// Maps a signed millisecond TTL to a duration; zero or negative means
/// no expiry.
#[must_use]
pub fn ttl_from_millis(ms: i64) -> Option<Duration> {
    u64::try_from(ms)
        .ok()
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_ttl_never_expires() {
        assert_eq!(expires_at_from_ttl(1_000, None), 0);
        assert_eq!(expires_at_from_ttl(1_000, Some(Duration::ZERO)), 0);
        assert!(!is_expired(0, u64::MAX));
    }

    #[test]
    fn ttl_adds_to_now() {
        let at = expires_at_from_ttl(1_000, Some(Duration::from_millis(50)));
        assert_eq!(at, 1_050);
        assert!(!is_expired(at, 1_049));
        assert!(is_expired(at, 1_050));
    }

    #[test]
    fn tiny_ttl_rounds_up() {
        assert_eq!(expires_at_from_ttl(10, Some(Duration::from_micros(1))), 11);
    }

    #[test]
    fn huge_ttl_saturates() {
        assert_eq!(
            expires_at_from_ttl(u64::MAX - 1, Some(Duration::from_secs(10))),
            u64::MAX
        );
    }

    #[test]
    fn millis_conversion() {
        assert_eq!(ttl_from_millis(0), None);
        assert_eq!(ttl_from_millis(-5), None);
        assert_eq!(ttl_from_millis(250), Some(Duration::from_millis(250)));
    }

    #[test]
    fn clock_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
