//! Time-based identifiers for sessions and messages

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Hands out millisecond-timestamp ids that never repeat or go backwards
///
/// Two ids requested in the same millisecond become `t` and `t + 1`.
///
/// # Examples
///
/// ```
/// use mathchat::storage::IdGenerator;
///
/// let ids = IdGenerator::new();
/// let a: i64 = ids.next_id().parse().unwrap();
/// let b: i64 = ids.next_id().parse().unwrap();
/// assert!(b > a);
/// ```
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicI64,
}

impl IdGenerator {
    /// Create a generator with no history
    pub fn new() -> Self {
        Self::default()
    }

    /// Next identifier as a decimal string
    pub fn next_id(&self) -> String {
        self.next_at(Utc::now().timestamp_millis()).to_string()
    }

    fn next_at(&self, now_ms: i64) -> i64 {
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = if now_ms > prev { now_ms } else { prev + 1 };
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}
