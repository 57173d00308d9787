//! Retry policy for upstream calls
//!
//! Upstream outcomes arrive as [`UpstreamFailure`] values; the policy turns each
//! one into an explicit [`RetryDecision`]. Throttling and transient failures
//! back off exponentially with jitter, never sooner than a server supplied
//! `Retry-After` hint.

use rand::Rng;
use std::time::Duration;
use tastesync_common::config::RetryConfig;

use super::upstream::UpstreamFailure;
use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on computed backoff (a larger `Retry-After` still wins)
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Random jitter range as a fraction (0.2 = ±20%)
    pub jitter_percent: f64,
    /// Total attempts including the first
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// What to do after a failed attempt
#[derive(Debug)]
pub enum RetryDecision {
    /// Wait, then try again
    Retry(Duration),
    /// Refresh the credential once, then try again
    RefreshCredential,
    /// Stop with this error
    GiveUp(SyncError),
}

impl RetryPolicy {
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        jitter_percent: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_factor: backoff_factor.max(1.0),
            jitter_percent: jitter_percent.clamp(0.0, 1.0),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff_factor,
            config.jitter,
            config.max_attempts,
        )
    }

    /// Backoff before retry number `retry` (0-indexed), jitter applied
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let initial_ms = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);

        let exp = retry.min(31) as i32;
        let base_ms = ((initial_ms as f64) * self.backoff_factor.powi(exp)).min(max_ms as f64);

        let jitter = if self.jitter_percent > 0.0 && base_ms > 0.0 {
            let range = base_ms * self.jitter_percent;
            rand::thread_rng().gen_range(-range..=range)
        } else {
            0.0
        };

        Duration::from_millis((base_ms + jitter).max(0.0) as u64)
    }

    /// Decide how to continue after `attempt` (1-based) failed with `failure`
    pub fn decide(&self, failure: &UpstreamFailure, attempt: u32) -> RetryDecision {
        match failure {
            UpstreamFailure::AuthExpired => RetryDecision::RefreshCredential,
            UpstreamFailure::Unavailable(msg) => {
                RetryDecision::GiveUp(SyncError::UpstreamUnavailable(msg.clone()))
            }
            UpstreamFailure::Throttled { retry_after } => {
                if attempt >= self.max_attempts {
                    return RetryDecision::GiveUp(SyncError::RateLimited { attempts: attempt });
                }
                let backoff = self.delay_for_attempt(attempt - 1);
                let delay = match retry_after {
                    Some(hint) => backoff.max(*hint),
                    None => backoff,
                };
                RetryDecision::Retry(delay)
            }
            UpstreamFailure::Transient(msg) => {
                if attempt >= self.max_attempts {
                    return RetryDecision::GiveUp(SyncError::UpstreamUnavailable(format!(
                        "{} (after {} attempts)",
                        msg, attempt
                    )));
                }
                RetryDecision::Retry(self.delay_for_attempt(attempt - 1))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(1000),
            2.0,
            0.0,
            max_attempts,
        )
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = no_jitter(5);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(
            Duration::from_millis(1000),
            Duration::from_secs(10),
            2.0,
            0.2,
            5,
        );
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(0).as_millis();
            assert!((800..=1200).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_retry_after_is_a_floor() {
        let policy = no_jitter(5);
        let failure = UpstreamFailure::Throttled {
            retry_after: Some(Duration::from_secs(7)),
        };
        match policy.decide(&failure, 1) {
            RetryDecision::Retry(delay) => assert_eq!(delay, Duration::from_secs(7)),
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn test_throttle_exhaustion_is_rate_limited() {
        let policy = no_jitter(3);
        let failure = UpstreamFailure::Throttled { retry_after: None };
        assert!(matches!(policy.decide(&failure, 2), RetryDecision::Retry(_)));
        assert!(matches!(
            policy.decide(&failure, 3),
            RetryDecision::GiveUp(SyncError::RateLimited { attempts: 3 })
        ));
    }

    #[test]
    fn test_transient_exhaustion_is_unavailable() {
        let policy = no_jitter(2);
        let failure = UpstreamFailure::Transient("503".to_string());
        assert!(matches!(policy.decide(&failure, 1), RetryDecision::Retry(_)));
        assert!(matches!(
            policy.decide(&failure, 2),
            RetryDecision::GiveUp(SyncError::UpstreamUnavailable(_))
        ));
    }

    #[test]
    fn test_permanent_failure_gives_up_immediately() {
        let policy = no_jitter(5);
        let failure = UpstreamFailure::Unavailable("404".to_string());
        assert!(matches!(
            policy.decide(&failure, 1),
            RetryDecision::GiveUp(SyncError::UpstreamUnavailable(_))
        ));
    }

    #[test]
    fn test_auth_expiry_requests_refresh() {
        let policy = no_jitter(5);
        assert!(matches!(
            policy.decide(&UpstreamFailure::AuthExpired, 1),
            RetryDecision::RefreshCredential
        ));
    }
}
