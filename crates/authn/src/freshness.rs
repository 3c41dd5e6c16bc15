//! Anti-replay timestamp checks.

use std::time::Duration;

use crate::error::{AuthError, Result};

/// Default window for API requests (60 seconds).
pub const DEFAULT_REPLAY_WINDOW: Duration = Duration::from_secs(60);

/// Default window for login requests (300 seconds).
///
/// Login has no prior session, so clients get more clock-skew slack.
pub const DEFAULT_LOGIN_REPLAY_WINDOW: Duration = Duration::from_secs(300);

/// Accepts `timestamp` if `|now - timestamp| <= window`.
///
/// The boundary is inclusive: with a 60 s window a request exactly 60 s old
/// is accepted and one 61 s old is rejected. Timestamps in the future are
/// treated symmetrically.
///
/// # Errors
///
/// Returns [`AuthError::ReplayDetected`] when the skew exceeds the window.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use zerotrust_authn::freshness::check_freshness;
///
/// let window = Duration::from_secs(60);
/// assert!(check_freshness(1_000, 1_060, window).is_ok());
/// assert!(check_freshness(1_000, 1_061, window).is_err());
/// ```
pub fn check_freshness(timestamp: u64, now: u64, window: Duration) -> Result<()> {
    let skew_secs = now.abs_diff(timestamp);
    let window_secs = window.as_secs();

    if skew_secs > window_secs {
        return Err(AuthError::stale_timestamp(skew_secs, window_secs));
    }
    Ok(())
}

/// Applies [`check_freshness`] to an optional timestamp.
///
/// A missing timestamp passes unless `required` is set.
///
/// # Errors
///
/// Returns [`AuthError::MalformedRequest`] for a missing, required timestamp,
/// or [`AuthError::ReplayDetected`] for a stale one.
pub fn check_optional_freshness(
    timestamp: Option<u64>,
    now: u64,
    window: Duration,
    required: bool,
) -> Result<()> {
    match timestamp {
        Some(timestamp) => check_freshness(timestamp, now, window),
        None if required => Err(AuthError::malformed_request("payload missing timestamp")),
        None => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::error::ReplayReason;

    const NOW: u64 = 1_700_000_000;

    #[rstest]
    #[case::same_second(0, true)]
    #[case::just_inside(59, true)]
    #[case::on_boundary(60, true)]
    #[case::just_outside(61, false)]
    #[case::far_outside(3_600, false)]
    fn test_past_timestamps(#[case] age: u64, #[case] accepted: bool) {
        let result = check_freshness(NOW - age, NOW, DEFAULT_REPLAY_WINDOW);
        assert_eq!(result.is_ok(), accepted, "age {age}s");
    }

    #[rstest]
    #[case::on_boundary(60, true)]
    #[case::just_outside(61, false)]
    fn test_future_timestamps(#[case] ahead: u64, #[case] accepted: bool) {
        let result = check_freshness(NOW + ahead, NOW, DEFAULT_REPLAY_WINDOW);
        assert_eq!(result.is_ok(), accepted, "ahead {ahead}s");
    }

    #[test]
    fn test_rejection_reports_skew() {
        let err = check_freshness(NOW - 61, NOW, DEFAULT_REPLAY_WINDOW).unwrap_err();
        assert!(matches!(
            err,
            AuthError::ReplayDetected(ReplayReason::Stale { skew_secs: 61, window_secs: 60 })
        ));
    }

    #[test]
    fn test_login_window_is_wider() {
        assert!(check_freshness(NOW - 300, NOW, DEFAULT_LOGIN_REPLAY_WINDOW).is_ok());
        assert!(check_freshness(NOW - 301, NOW, DEFAULT_LOGIN_REPLAY_WINDOW).is_err());
    }

    #[test]
    fn test_optional_timestamp() {
        assert!(check_optional_freshness(None, NOW, DEFAULT_REPLAY_WINDOW, false).is_ok());
        assert!(matches!(
            check_optional_freshness(None, NOW, DEFAULT_REPLAY_WINDOW, true),
            Err(AuthError::MalformedRequest(_))
        ));
        assert!(check_optional_freshness(Some(NOW - 61), NOW, DEFAULT_REPLAY_WINDOW, false).is_err());
    }

    #[test]
    fn test_extreme_values_do_not_overflow() {
        assert!(check_freshness(0, u64::MAX, DEFAULT_REPLAY_WINDOW).is_err());
        assert!(check_freshness(u64::MAX, 0, DEFAULT_REPLAY_WINDOW).is_err());
    }
}
