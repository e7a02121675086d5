// Copyright (c) 2025, The Metapipe Authors
// MIT License
// All rights reserved.

//! # Retry/Dead-letter Policy
//!
//! Pure decision logic for failed deliveries. Given the attempt count carried
//! in the message headers and the queue's retry budget, the policy decides
//! whether the message goes back to its original queue with an incremented
//! count or diverts to the dead-letter queue. Retry bookkeeping travels with
//! the message, so the policy needs no shared state.

use crate::queue::QueueDefinition;

/// Reserved header key carrying the retry count of a logical message.
/// Absent on first delivery, which counts as zero.
pub const RETRY_COUNT_HEADER: &str = "x-retries";

/// Where a failed delivery is republished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryTarget {
    /// Back to the original queue for another attempt.
    Requeue,
    /// To the dead-letter queue; the retry budget is exhausted.
    DeadLetter,
}

/// Outcome of consulting the policy for one failed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    pub target: RetryTarget,
    /// Retry count to stamp on the republished message. Incremented on
    /// requeue; carried unchanged to the DLQ (informational only).
    pub attempt_count: i64,
}

/// Retry/DLQ policy for a single queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    queue_name: String,
    dlq_name: String,
    max_retries: i64,
}

impl RetryPolicy {
    pub fn new(def: &QueueDefinition) -> RetryPolicy {
        RetryPolicy {
            queue_name: def.name().to_owned(),
            dlq_name: def.dlq_name().to_owned(),
            max_retries: def.max_retries(),
        }
    }

    /// Decides the fate of a failed delivery.
    ///
    /// A message is requeued while `attempt_count + 1 < max_retries`, so the
    /// budget bounds the total deliveries to the original queue. With
    /// `max_retries <= 1` the very first failure dead-letters, with no
    /// special-casing.
    pub fn decide(&self, attempt_count: i64) -> RetryDecision {
        if attempt_count + 1 < self.max_retries {
            RetryDecision {
                target: RetryTarget::Requeue,
                attempt_count: attempt_count + 1,
            }
        } else {
            RetryDecision {
                target: RetryTarget::DeadLetter,
                attempt_count,
            }
        }
    }

    /// Queue name the decision's target resolves to.
    pub fn destination(&self, decision: &RetryDecision) -> &str {
        match decision.target {
            RetryTarget::Requeue => &self.queue_name,
            RetryTarget::DeadLetter => &self.dlq_name,
        }
    }

    pub fn max_retries(&self) -> i64 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: i64) -> RetryPolicy {
        RetryPolicy::new(&QueueDefinition::new("video_metadata").with_max_retries(max_retries))
    }

    #[test]
    fn requeues_while_budget_remains() {
        let policy = policy(3);

        let first = policy.decide(0);
        assert_eq!(first.target, RetryTarget::Requeue);
        assert_eq!(first.attempt_count, 1);
        assert_eq!(policy.destination(&first), "video_metadata");

        let second = policy.decide(1);
        assert_eq!(second.target, RetryTarget::Requeue);
        assert_eq!(second.attempt_count, 2);
    }

    #[test]
    fn dead_letters_once_budget_is_spent() {
        let policy = policy(3);

        let last = policy.decide(2);
        assert_eq!(last.target, RetryTarget::DeadLetter);
        // Count is informational on dead-letter, not incremented.
        assert_eq!(last.attempt_count, 2);
        assert_eq!(policy.destination(&last), "video_metadata.dlq");
    }

    #[test]
    fn first_failure_dead_letters_when_budget_is_one() {
        let policy = policy(1);
        let decision = policy.decide(0);
        assert_eq!(decision.target, RetryTarget::DeadLetter);
        assert_eq!(decision.attempt_count, 0);
    }

    #[test]
    fn zero_budget_also_dead_letters_immediately() {
        let policy = policy(0);
        assert_eq!(policy.decide(0).target, RetryTarget::DeadLetter);
    }

    #[test]
    fn decision_is_deterministic() {
        let policy = policy(3);
        for attempt in 0..5 {
            assert_eq!(policy.decide(attempt), policy.decide(attempt));
        }
    }

    #[test]
    fn count_only_increases_across_a_retry_lifecycle() {
        let policy = policy(5);
        let mut attempt = 0;
        loop {
            let decision = policy.decide(attempt);
            match decision.target {
                RetryTarget::Requeue => {
                    assert_eq!(decision.attempt_count, attempt + 1);
                    attempt = decision.attempt_count;
                }
                RetryTarget::DeadLetter => {
                    assert_eq!(decision.attempt_count, attempt);
                    break;
                }
            }
        }
        // max_retries bounds total original-queue deliveries.
        assert_eq!(attempt, 4);
    }
}
