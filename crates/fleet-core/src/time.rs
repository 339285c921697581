//! Wall-clock helpers and operation ids.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static OPERATION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A process-unique operation id such as `bulk-assign-1700000000000-3`.
pub fn operation_id(prefix: &str) -> String {
    let seq = OPERATION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{seq}", epoch_millis())
}
