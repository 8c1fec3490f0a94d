use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

/// Sliding window limiter for admin login attempts, keyed by client address.
#[derive(Clone)]
pub struct LoginThrottle {
    attempts: Arc<DashMap<String, VecDeque<Instant>>>,
    limit: usize,
    window: Duration,
}

impl LoginThrottle {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self { attempts: Arc::new(DashMap::new()), limit, window }
    }

    /// Records an attempt; false once `client` has used up its window.
    pub fn allow(&self, client: &str) -> bool {
        if self.limit == 0 { return true; }
        let now = Instant::now();
        let mut entry = self.attempts.entry(client.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= self.window { entry.pop_front(); } else { break; }
        }
        if entry.len() < self.limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }

    /// Forget a client after a successful login.
    pub fn reset(&self, client: &str) {
        self.attempts.remove(client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_limit() {
        let t = LoginThrottle::new(3, Duration::from_secs(60));
        for _ in 0..3 { assert!(t.allow("10.0.0.1")); }
        assert!(!t.allow("10.0.0.1"));
        assert!(t.allow("10.0.0.2"));
        t.reset("10.0.0.1");
        assert!(t.allow("10.0.0.1"));
    }

    #[test]
    fn zero_limit_disables() {
        let t = LoginThrottle::new(0, Duration::from_secs(60));
        for _ in 0..10 { assert!(t.allow("x")); }
    }
}
