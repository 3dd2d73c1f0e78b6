//! Delay lifecycle and retry policy
//!
//! A delayed message moves through these states:
//!
//! ```text
//! Scheduled --ttl expires--> Ready --publish ok--> Delivered
//!                              |
//!                              +--publish fails, retries left--> Rescheduled --ttl--> Ready
//!                              |
//!                              +--publish fails, retries exhausted--> ErrorQueued
//! ```
//!
//! The broker implements the `Scheduled -> Ready` edge (TTL plus dead-lettering); the
//! ready-queue handler implements the rest according to [`RetryPolicy`].

use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DelayState {
    Scheduled,
    Ready,
    Delivered,
    Rescheduled,
    ErrorQueued,
}

impl DelayState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DelayState::Delivered | DelayState::ErrorQueued)
    }

    pub fn can_transition_to(&self, next: DelayState) -> bool {
        use DelayState::*;
        matches!(
            (self, next),
            (Scheduled, Ready)
                | (Ready, Delivered)
                | (Ready, Rescheduled)
                | (Ready, ErrorQueued)
                | (Rescheduled, Ready)
        )
    }
}

/// What to do after a re-publish attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    /// Park the envelope again with `next_retry_count` for `delay`
    Reschedule { next_retry_count: u32, delay: Duration },
    /// Give up and publish an error envelope
    ErrorQueue,
}

impl FailureTransition {
    pub fn state(&self) -> DelayState {
        match self {
            FailureTransition::Reschedule { .. } => DelayState::Rescheduled,
            FailureTransition::ErrorQueue => DelayState::ErrorQueued,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn on_failure(&self, retry_count: u32) -> FailureTransition {
        if retry_count < self.max_retries {
            FailureTransition::Reschedule {
                next_retry_count: retry_count + 1,
                delay: self.retry_delay,
            }
        } else {
            FailureTransition::ErrorQueue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_until_maximum_then_error_queues() {
        let policy = RetryPolicy::default();

        let transitions: Vec<_> = (0..=5).map(|count| policy.on_failure(count)).collect();
        for (count, transition) in transitions.iter().take(5).enumerate() {
            assert_eq!(
                *transition,
                FailureTransition::Reschedule {
                    next_retry_count: count as u32 + 1,
                    delay: Duration::from_millis(1_000)
                }
            );
        }
        assert_eq!(transitions[5], FailureTransition::ErrorQueue);
        assert_eq!(policy.on_failure(9), FailureTransition::ErrorQueue);
    }

    #[test]
    fn zero_retries_goes_straight_to_error_queue() {
        let policy = RetryPolicy {
            max_retries: 0,
            retry_delay: Duration::from_millis(10),
        };
        assert_eq!(policy.on_failure(0).state(), DelayState::ErrorQueued);
    }

    #[test]
    fn lifecycle_edges() {
        assert!(DelayState::Scheduled.can_transition_to(DelayState::Ready));
        assert!(DelayState::Ready.can_transition_to(DelayState::Rescheduled));
        assert!(DelayState::Rescheduled.can_transition_to(DelayState::Ready));
        assert!(!DelayState::Delivered.can_transition_to(DelayState::Ready));
        assert!(!DelayState::Scheduled.can_transition_to(DelayState::Delivered));
        assert!(DelayState::ErrorQueued.is_terminal());
        assert!(!DelayState::Rescheduled.is_terminal());
    }
}
