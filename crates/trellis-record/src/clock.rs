//! Process-wide monotonic column timestamps.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use trellis_proto::Timestamp;

static LAST: AtomicI64 = AtomicI64::new(0);

/// Microseconds since the epoch, strictly increasing within the process.
pub fn timestamp() -> Timestamp {
    let now = Utc::now().timestamp_micros();
    let mut prev = LAST.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}
