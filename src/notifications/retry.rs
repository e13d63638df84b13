/// Bounds how often a notification batch is attempted.
///
/// Attempts are counted from 1 and another one is made only while the count
/// is below `retries`. A policy of `retries = 3` therefore makes three
/// attempts in total: the first one plus `retries - 1` reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    retries: u32,
}

impl RetryPolicy {
    pub const DEFAULT_RETRIES: u32 = 3;

    pub fn new(retries: u32) -> Self {
        Self { retries }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Whether another attempt follows a failed `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.retries
    }

    /// Attempts made before the last error is surfaced. Never less than one.
    pub fn max_attempts(&self) -> u32 {
        self.retries.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RETRIES)
    }
}
