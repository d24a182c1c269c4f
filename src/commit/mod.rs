pub mod apply;
pub mod validation;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitResult {
    pub write_ts: u64,
    /// False when last-write-wins discarded the write or a delete matched
    /// nothing.
    pub applied: bool,
}

/// Strictly increasing microsecond timestamps for writes that do not carry
/// their own.
#[derive(Debug, Default)]
pub struct WriteClock {
    last: AtomicU64,
}

impl WriteClock {
    pub fn next(&self) -> u64 {
        let now = now_micros();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(observed) => current = observed,
            }
        }
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::WriteClock;

    #[test]
    fn clock_never_repeats() {
        let clock = WriteClock::default();
        let mut last = 0;
        for _ in 0..1_000 {
            let ts = clock.next();
            assert!(ts > last);
            last = ts;
        }
    }
}
