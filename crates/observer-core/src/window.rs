//! Submission window check for prepared assertions.
//!
//! A prepared assertion commits to [`TimeBounds`]; once the chain moves past
//! them the assertion can no longer be submitted and must be thrown away.
//! The check uses the current wall-clock time as an estimate of the block
//! timestamp the assertion will be included with. A wrong estimate only
//! drops a usable assertion or gets one rejected on chain; it never commits
//! to anything incorrect.

use thiserror::Error;

use crate::protocol::TimeBounds;

/// Blocks added to the latest height to absorb inclusion delay.
pub const DEFAULT_END_CUSHION_BLOCKS: u64 = 3;

/// Why a prepared assertion is no longer submittable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WindowRejection {
    /// The chain has not reached the lower block bound yet.
    #[error("latest block {height} is below lower bound {lower_block}")]
    BeforeLowerBlock {
        /// Latest observed height.
        height: u64,
        /// Lower block bound.
        lower_block: u64,
    },

    /// Too few blocks remain before the upper bound.
    #[error("latest block {height} plus cushion {cushion} exceeds upper bound {upper_block}")]
    InsufficientCushion {
        /// Latest observed height.
        height: u64,
        /// Cushion in blocks.
        cushion: u64,
        /// Upper block bound.
        upper_block: u64,
    },

    /// The current time is before the lower timestamp bound.
    #[error("time {now} is before lower timestamp {lower_timestamp}")]
    BeforeLowerTimestamp {
        /// Current wall-clock time.
        now: u64,
        /// Lower timestamp bound.
        lower_timestamp: u64,
    },

    /// The current time is past the upper timestamp bound.
    #[error("time {now} is after upper timestamp {upper_timestamp}")]
    AfterUpperTimestamp {
        /// Current wall-clock time.
        now: u64,
        /// Upper timestamp bound.
        upper_timestamp: u64,
    },
}

/// Checks whether an assertion with `bounds` can still be submitted.
///
/// # Errors
///
/// Returns the first bound that excludes submission at `height` and
/// `now_secs`.
pub const fn check_submission_window(
    bounds: &TimeBounds,
    height: u64,
    now_secs: u64,
    cushion: u64,
) -> Result<(), WindowRejection> {
    if height < bounds.lower_block {
        return Err(WindowRejection::BeforeLowerBlock {
            height,
            lower_block: bounds.lower_block,
        });
    }
    if height.saturating_add(cushion) > bounds.upper_block {
        return Err(WindowRejection::InsufficientCushion {
            height,
            cushion,
            upper_block: bounds.upper_block,
        });
    }
    if now_secs < bounds.lower_timestamp {
        return Err(WindowRejection::BeforeLowerTimestamp {
            now: now_secs,
            lower_timestamp: bounds.lower_timestamp,
        });
    }
    if now_secs > bounds.upper_timestamp {
        return Err(WindowRejection::AfterUpperTimestamp {
            now: now_secs,
            upper_timestamp: bounds.upper_timestamp,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: TimeBounds = TimeBounds {
        lower_block: 100,
        upper_block: 120,
        lower_timestamp: 1_000,
        upper_timestamp: 2_000,
    };

    fn check(height: u64, now: u64) -> Result<(), WindowRejection> {
        check_submission_window(&BOUNDS, height, now, DEFAULT_END_CUSHION_BLOCKS)
    }

    #[test]
    fn inside_window_is_accepted() {
        assert_eq!(check(100, 1_000), Ok(()));
        assert_eq!(check(117, 2_000), Ok(()));
    }

    #[test]
    fn cushion_is_applied_to_upper_block() {
        assert!(matches!(
            check(118, 1_500),
            Err(WindowRejection::InsufficientCushion { .. })
        ));
    }

    #[test]
    fn block_bounds_checked_before_time() {
        assert!(matches!(
            check(99, 5_000),
            Err(WindowRejection::BeforeLowerBlock { .. })
        ));
    }

    #[test]
    fn timestamp_bounds_are_inclusive() {
        assert!(matches!(
            check(110, 999),
            Err(WindowRejection::BeforeLowerTimestamp { .. })
        ));
        assert!(matches!(
            check(110, 2_001),
            Err(WindowRejection::AfterUpperTimestamp { .. })
        ));
    }
}
