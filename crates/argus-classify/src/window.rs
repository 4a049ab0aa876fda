use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Sliding count window keyed externally by (host, signal). Stores only
/// timestamps; evicts entries older than the window on every push.
pub struct SlidingCounter {
    window_secs: i64,
    hits: VecDeque<DateTime<Utc>>,
}

impl SlidingCounter {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs: window_secs as i64,
            hits: VecDeque::new(),
        }
    }

    pub fn push(&mut self, at: DateTime<Utc>) {
        self.hits.push_back(at);
        self.evict(at);
    }

    pub fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(self.window_secs);
        while let Some(front) = self.hits.front() {
            if *front < cutoff {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_within_window() {
        let mut counter = SlidingCounter::new(60);
        let now = Utc::now();
        for i in 0..5 {
            counter.push(now - Duration::seconds(50 - i * 10));
        }
        assert_eq!(counter.count(), 5);
    }

    #[test]
    fn evicts_expired_hits() {
        let mut counter = SlidingCounter::new(60);
        let now = Utc::now();
        counter.push(now - Duration::seconds(120));
        counter.push(now - Duration::seconds(90));
        counter.push(now);
        assert_eq!(counter.count(), 1);
    }
}
