//! Process-wide monotonic millisecond clock.
//!
//! All persisted timestamps come from here. The clock tracks wall time but
//! never repeats and never goes backward, even across system clock
//! adjustments, so ordering by timestamp is always meaningful.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

static LAST_MS: AtomicI64 = AtomicI64::new(0);

/// Current time as monotonic milliseconds since the epoch.
pub fn now_ms() -> i64 {
    let wall = Utc::now().timestamp_millis();
    let mut last = LAST_MS.load(Ordering::Relaxed);
    loop {
        let next = wall.max(last + 1);
        match LAST_MS.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(observed) => last = observed,
        }
    }
}

/// Current time as a `DateTime<Utc>`, from the same monotonic source.
pub fn now() -> DateTime<Utc> {
    from_ms(now_ms())
}

/// Convert stored milliseconds back to a `DateTime<Utc>`.
///
/// Out-of-range values clamp to the epoch rather than panic; stored
/// timestamps are always produced by [`now_ms`] so the clamp is unreachable
/// in practice.
pub fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Convert a `DateTime<Utc>` to milliseconds for storage.
pub fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_strictly_increases() {
        let mut prev = now_ms();
        for _ in 0..1000 {
            let next = now_ms();
            assert!(next > prev, "clock must never repeat: {prev} then {next}");
            prev = next;
        }
    }

    #[test]
    fn test_ms_round_trip() {
        let ts = now();
        assert_eq!(from_ms(to_ms(ts)), ts);
    }

    #[test]
    fn test_now_ms_concurrent_uniqueness() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..200).map(|_| now_ms()).collect::<Vec<_>>()))
            .collect();
        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let len = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), len, "concurrent callers must get distinct timestamps");
    }
}
