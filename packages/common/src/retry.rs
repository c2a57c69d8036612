use std::time::Duration;

use rand::Rng;

use crate::config::DlqConfig;

/// What to do with a delivery whose processing failed with a retryable error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the message back on the queue after `delay`.
    Requeue { attempt: u32, delay: Duration },
    /// Route the message to the dead-letter queue.
    DeadLetter { attempts: u32 },
}

/// Retry policy driven by the broker's redelivery counter.
///
/// The counter travels with the message, so the decision is the same no matter
/// which worker receives the redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Decide for a delivery that has already been redelivered `redeliveries` times.
    pub fn decide(&self, redeliveries: u32) -> RetryDecision {
        if redeliveries < self.max_retries {
            let attempt = redeliveries + 1;
            RetryDecision::Requeue {
                attempt,
                delay: calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms),
            }
        } else {
            RetryDecision::DeadLetter {
                attempts: redeliveries + 1,
            }
        }
    }
}

impl From<&DlqConfig> for RetryPolicy {
    fn from(config: &DlqConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(base_ms * 2^(attempt-1) + jitter, max_ms)` (0-25% jitter)
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter).min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_backoff_basic() {
        let d1 = calculate_backoff(1, 1000, 60000);
        assert!(d1.as_millis() >= 1000 && d1.as_millis() <= 1250);

        let d3 = calculate_backoff(3, 1000, 60000);
        assert!(d3.as_millis() >= 4000 && d3.as_millis() <= 5000);
    }

    #[test]
    fn test_calculate_backoff_respects_max() {
        let d = calculate_backoff(10, 10000, 60000);
        assert!(d.as_millis() <= 60000);
    }

    #[test]
    fn test_calculate_backoff_zero_attempt() {
        assert_eq!(calculate_backoff(0, 1000, 60000), Duration::ZERO);
    }

    #[test]
    fn test_policy_requeues_below_max_then_dead_letters() {
        let policy = RetryPolicy::new(3);

        for redeliveries in 0..3 {
            match policy.decide(redeliveries) {
                RetryDecision::Requeue { attempt, delay } => {
                    assert_eq!(attempt, redeliveries + 1);
                    assert_eq!(delay, Duration::ZERO);
                }
                other => panic!("expected Requeue, got {other:?}"),
            }
        }

        assert_eq!(policy.decide(3), RetryDecision::DeadLetter { attempts: 4 });
        assert_eq!(policy.decide(7), RetryDecision::DeadLetter { attempts: 8 });
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from(&DlqConfig::default());
        assert_eq!(policy.max_retries, 3);
        match policy.decide(1) {
            RetryDecision::Requeue { delay, .. } => assert!(delay.as_millis() <= policy.max_delay_ms as u128),
            other => panic!("expected Requeue, got {other:?}"),
        }
    }
}
