//! Deadline normalization rules shared by the store and the RPC procedures.

use crate::constants::{DEADLINE_MAX, XT_RELATIVE_SENTINEL};

/// Full §3.1 normalization: positive `xt` (up to the sentinel) means
/// relative seconds; negative `xt` means absolute epoch `-xt`; `xt` equal
/// to the sentinel or `0` means "no expiration".
pub fn normalize_xt(xt: i64, now: u64) -> u64 {
    if xt == 0 {
        return DEADLINE_MAX;
    }
    if xt < 0 {
        let abs = xt.unsigned_abs();
        return abs.min(DEADLINE_MAX);
    }
    if xt as u64 > XT_RELATIVE_SENTINEL as u64 {
        return DEADLINE_MAX;
    }
    now.saturating_add(xt as u64).min(DEADLINE_MAX)
}

/// `true` when `deadline` has already elapsed at `now`.
pub fn is_expired(deadline: u64, now: u64) -> bool {
    deadline <= now
}

/// Seconds remaining until `deadline`, or `0` if already expired.
pub fn remaining(deadline: u64, now: u64) -> u64 {
    deadline.saturating_sub(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_no_expiration() {
        assert_eq!(normalize_xt(0, 1000), DEADLINE_MAX);
    }

    #[test]
    fn positive_is_relative() {
        assert_eq!(normalize_xt(60, 1000), 1060);
    }

    #[test]
    fn negative_is_absolute() {
        assert_eq!(normalize_xt(-500, 1000), 500);
    }

    #[test]
    fn negative_absolute_in_past_is_immediately_expired() {
        let deadline = normalize_xt(-1, 1000);
        assert!(is_expired(deadline, 1000));
    }

    #[test]
    fn relative_clamped_to_max() {
        assert_eq!(normalize_xt(i64::MAX - 1, 0), DEADLINE_MAX);
    }
}
