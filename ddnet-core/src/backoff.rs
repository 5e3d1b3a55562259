//! Reconnect backoff policy for the signaling link.

use std::time::Duration;

/// Delay before the first reconnect attempt.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Attempts made before giving up and surfacing a disconnect.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay to wait before reconnect `attempt` (1-based).
///
/// Doubles per attempt starting from [`RECONNECT_BASE_DELAY`]; returns `None`
/// once [`MAX_RECONNECT_ATTEMPTS`] is exceeded.
pub fn reconnect_delay(attempt: u32) -> Option<Duration> {
    if attempt == 0 || attempt > MAX_RECONNECT_ATTEMPTS {
        return None;
    }
    Some(RECONNECT_BASE_DELAY * 2u32.pow(attempt - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_per_attempt() {
        assert_eq!(reconnect_delay(1), Some(Duration::from_secs(1)));
        assert_eq!(reconnect_delay(2), Some(Duration::from_secs(2)));
        assert_eq!(reconnect_delay(3), Some(Duration::from_secs(4)));
        assert_eq!(reconnect_delay(4), Some(Duration::from_secs(8)));
        assert_eq!(reconnect_delay(5), Some(Duration::from_secs(16)));
    }

    #[test]
    fn exhausts_after_max_attempts() {
        assert_eq!(reconnect_delay(MAX_RECONNECT_ATTEMPTS + 1), None);
        assert_eq!(reconnect_delay(100), None);
    }

    #[test]
    fn attempt_zero_is_invalid() {
        assert_eq!(reconnect_delay(0), None);
    }
}
