//! Retry policy for build status polling

use std::time::Duration;

use tokio::time::Instant;

/// How often and for how long to poll a pending build
///
/// The service never pushes completion, so the client asks again every
/// `interval` while the job reports HTTP 202. Without bounds the loop runs
/// until the service returns a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    pub deadline: Option<Duration>,
}

impl PollPolicy {
    /// Poll forever at the given interval
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            deadline: None,
        }
    }

    /// Stop after this many status requests
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Stop once this much time has passed since the first request
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub(crate) fn start(&self) -> PollState {
        PollState {
            policy: *self,
            started: Instant::now(),
            attempts: 0,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_secs(5))
    }
}

/// Attempt bookkeeping for one polling run
#[derive(Debug)]
pub(crate) struct PollState {
    policy: PollPolicy,
    started: Instant,
    attempts: u32,
}

impl PollState {
    /// Record a status request, returning its 1-based attempt number
    pub(crate) fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether another request may be issued after the next sleep
    pub(crate) fn may_retry(&self) -> bool {
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return false;
            }
        }
        if let Some(deadline) = self.policy.deadline {
            if self.started.elapsed() + self.policy.interval > deadline {
                return false;
            }
        }
        true
    }

    pub(crate) fn interval(&self) -> Duration {
        self.policy.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_always_retries() {
        let mut state = PollPolicy::unbounded(Duration::from_millis(1)).start();
        for _ in 0..1000 {
            state.record_attempt();
        }
        assert!(state.may_retry());
        assert_eq!(state.attempts(), 1000);
    }

    #[test]
    fn test_max_attempts() {
        let policy = PollPolicy::unbounded(Duration::from_millis(1)).with_max_attempts(2);
        let mut state = policy.start();
        assert_eq!(state.record_attempt(), 1);
        assert!(state.may_retry());
        assert_eq!(state.record_attempt(), 2);
        assert!(!state.may_retry());
    }

    #[test]
    fn test_deadline_shorter_than_interval() {
        let policy = PollPolicy::unbounded(Duration::from_secs(5))
            .with_deadline(Duration::from_secs(1));
        let mut state = policy.start();
        state.record_attempt();
        assert!(!state.may_retry());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let policy = PollPolicy::unbounded(Duration::from_secs(1))
            .with_deadline(Duration::from_secs(3));
        let mut state = policy.start();
        state.record_attempt();
        assert!(state.may_retry());

        tokio::time::advance(Duration::from_secs(2)).await;
        state.record_attempt();
        assert!(state.may_retry());

        tokio::time::advance(Duration::from_millis(1500)).await;
        state.record_attempt();
        assert!(!state.may_retry());
    }

    #[test]
    fn test_default_interval() {
        assert_eq!(PollPolicy::default().interval, Duration::from_secs(5));
    }
}
