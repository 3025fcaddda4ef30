use std::time::{Duration, Instant};

/// Grace period between a stop request and the final shutdown callback.
///
/// Unset until armed; once armed the start time never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePeriod {
    start: Option<Instant>,
    duration: Duration,
}

impl GracePeriod {
    pub fn new(duration: Duration) -> Self {
        Self {
            start: None,
            duration,
        }
    }

    /// Arm at `now`. Returns false (and changes nothing) if already armed.
    pub fn arm(&mut self, now: Instant) -> bool {
        if self.start.is_some() {
            return false;
        }
        self.start = Some(now);
        true
    }

    pub fn is_armed(&self) -> bool {
        self.start.is_some()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.start
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Armed and `now - start > duration`.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.start {
            Some(start) => now.saturating_duration_since(start) > self.duration,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unarmed_never_expires() {
        let grace = GracePeriod::new(Duration::ZERO);
        assert!(!grace.is_armed());
        assert!(!grace.is_expired(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn test_expiry_is_strict() {
        let start = Instant::now();
        let mut grace = GracePeriod::new(Duration::from_secs(30));
        assert!(grace.arm(start));

        assert!(!grace.is_expired(start));
        assert!(!grace.is_expired(start + Duration::from_secs(30)));
        assert!(grace.is_expired(start + Duration::from_secs(30) + Duration::from_nanos(1)));
    }

    #[test]
    fn test_rearm_is_ignored() {
        let start = Instant::now();
        let mut grace = GracePeriod::new(Duration::from_secs(30));
        assert!(grace.arm(start));

        for i in 1..=10 {
            assert!(!grace.arm(start + Duration::from_secs(i)));
            assert_eq!(grace.started_at(), Some(start));
        }
        assert!(grace.is_expired(start + Duration::from_secs(31)));
    }
}
