use std::time::Duration;

/// How long to wait before the next connection attempt
///
/// Attempts are 0-indexed. `next_delay` returning `None` means the caller
/// should give up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Always wait the same amount of time
    Fixed {
        delay: Duration,
        max_attempts: Option<usize>,
    },
    /// `initial * 2^attempt`, capped at `max`
    Exponential {
        initial: Duration,
        max: Duration,
        max_attempts: Option<usize>,
    },
    /// Never reconnect
    Never,
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration, max_attempts: Option<usize>) -> Self {
        ReconnectPolicy::Fixed { delay, max_attempts }
    }

    pub fn exponential(initial: Duration, max: Duration, max_attempts: Option<usize>) -> Self {
        ReconnectPolicy::Exponential {
            initial,
            max,
            max_attempts,
        }
    }

    /// Delay before attempt number `attempt`, or `None` when exhausted
    pub fn next_delay(&self, attempt: usize) -> Option<Duration> {
        if !self.allows(attempt) {
            return None;
        }

        match self {
            ReconnectPolicy::Fixed { delay, .. } => Some(*delay),
            ReconnectPolicy::Exponential { initial, max, .. } => {
                // Shift is bounded so large attempt numbers saturate instead of overflowing
                let factor = 1u64.checked_shl(attempt.min(32) as u32).unwrap_or(u64::MAX);
                let millis = (initial.as_millis() as u64).saturating_mul(factor);
                Some(Duration::from_millis(millis.min(max.as_millis() as u64)))
            }
            ReconnectPolicy::Never => None,
        }
    }

    /// Whether attempt number `attempt` is permitted at all
    pub fn allows(&self, attempt: usize) -> bool {
        match self {
            ReconnectPolicy::Fixed { max_attempts, .. }
            | ReconnectPolicy::Exponential { max_attempts, .. } => {
                max_attempts.map_or(true, |max| attempt < max)
            }
            ReconnectPolicy::Never => false,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::exponential(Duration::from_secs(1), Duration::from_secs(60), Some(10))
    }
}
