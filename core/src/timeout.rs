//! Per-operation deadline.

use std::time::{Duration, Instant};

/// Deadline armed when an operation is admitted and disarmed when it reaches
/// a terminal state. Operations without a deadline (scans) get a guard that
/// never fires.
#[derive(Debug)]
pub struct TimeoutGuard {
    deadline: Option<Instant>,
    after: Duration,
    armed: bool,
}

impl TimeoutGuard {
    pub fn arm(after: Option<Duration>, now: Instant) -> Self {
        Self {
            deadline: after.map(|after| now + after),
            after: after.unwrap_or_default(),
            armed: true,
        }
    }

    /// Instant at which the guard fires, while armed.
    pub fn deadline(&self) -> Option<Instant> {
        if self.armed {
            self.deadline
        } else {
            None
        }
    }

    pub fn duration(&self) -> Duration {
        self.after
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.deadline(), Some(deadline) if now >= deadline)
    }

    /// Returns true only on the first call.
    pub fn disarm(&mut self) -> bool {
        std::mem::replace(&mut self.armed, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_at_deadline() {
        let now = Instant::now();
        let guard = TimeoutGuard::arm(Some(Duration::from_secs(30)), now);
        assert!(!guard.is_expired(now));
        assert!(!guard.is_expired(now + Duration::from_secs(29)));
        assert!(guard.is_expired(now + Duration::from_secs(30)));
        assert_eq!(guard.duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_disarm_once() {
        let now = Instant::now();
        let mut guard = TimeoutGuard::arm(Some(Duration::from_secs(1)), now);
        assert!(guard.disarm());
        assert!(!guard.disarm());
        assert_eq!(guard.deadline(), None);
        assert!(!guard.is_expired(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_without_deadline_never_fires() {
        let now = Instant::now();
        let guard = TimeoutGuard::arm(None, now);
        assert_eq!(guard.deadline(), None);
        assert!(!guard.is_expired(now + Duration::from_secs(3600)));
    }
}
