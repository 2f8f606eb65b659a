use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window rate limiter for password-reset requests, keyed by caller.
///
/// In-process only: a multi-instance deployment throttles per instance,
/// which is acceptable for an abuse brake.
pub struct ResetThrottle {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl ResetThrottle {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a hit for `key` and report whether it is within the limit.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock().expect("throttle mutex poisoned");
        let entry = hits.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() >= self.limit {
            return false;
        }
        entry.push(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_denies() {
        let throttle = ResetThrottle::new(5, Duration::from_secs(3600));
        for _ in 0..5 {
            assert!(throttle.allow("10.0.0.1"));
        }
        assert!(!throttle.allow("10.0.0.1"));
    }

    #[test]
    fn keys_are_independent() {
        let throttle = ResetThrottle::new(1, Duration::from_secs(3600));
        assert!(throttle.allow("10.0.0.1"));
        assert!(!throttle.allow("10.0.0.1"));
        assert!(throttle.allow("10.0.0.2"));
    }

    #[test]
    fn window_expiry_frees_the_budget() {
        let throttle = ResetThrottle::new(1, Duration::from_millis(10));
        assert!(throttle.allow("10.0.0.1"));
        assert!(!throttle.allow("10.0.0.1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(throttle.allow("10.0.0.1"));
    }
}
