//! Per-second origination limits for RREQ and RERR
//!
//! The engine resets each counter from a one-second timer, so the limit is
//! a fixed window rather than a token bucket.

/// Counter of messages originated in the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCounter {
    limit: u32,
    count: u32,
}

impl RateCounter {
    pub fn new(limit: u32) -> Self {
        Self { limit, count: 0 }
    }

    /// Whether the window is exhausted
    pub fn is_limited(&self) -> bool {
        self.count >= self.limit
    }

    /// Take one slot. Returns `false` when the window is exhausted.
    pub fn try_acquire(&mut self) -> bool {
        if self.is_limited() {
            return false;
        }
        self.count += 1;
        true
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn set_limit(&mut self, limit: u32) {
        self.limit = limit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_and_reset() {
        let mut counter = RateCounter::new(2);
        assert!(counter.try_acquire());
        assert!(counter.try_acquire());
        assert!(counter.is_limited());
        assert!(!counter.try_acquire());
        assert_eq!(counter.count(), 2);

        counter.reset();
        assert!(!counter.is_limited());
        assert!(counter.try_acquire());
    }

    #[test]
    fn test_zero_limit_blocks_everything() {
        let mut counter = RateCounter::new(0);
        assert!(!counter.try_acquire());
    }
}
