//! Wall-clock abstraction.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time.
///
/// Production code injects [`SystemClock`]; tests inject a fixed clock so
/// that submission window checks are deterministic.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock time in seconds since the UNIX epoch.
    fn now_secs(&self) -> u64;
}

/// Clock backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemClock.now_secs() > 1_577_836_800);
    }
}
