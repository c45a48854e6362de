//! Bounded retries for silent renewal
//!
//! A single silent renewal is made of up to [`RetryPolicy::max_attempts()`]
//! attempts. Each attempt races the provider against a timer, and a failed
//! attempt is followed by a fixed pause before the next one.

use std::{error, sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    providers::{BoxError, IdentityProvider},
    User,
};

/// Configuration for how hard to try when renewing silently
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    attempt_timeout: Duration,
    retry_delay: Duration,
}

impl Default for RetryPolicy {
    /// Default retry policy
    ///
    /// Makes up to 3 attempts, gives each attempt 10 seconds, and waits
    /// 2 seconds between attempts.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Constructs a new retry policy
    ///
    /// A `max_attempts` of zero still makes one attempt.
    pub fn new(max_attempts: u32, attempt_timeout: Duration, retry_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt_timeout,
            retry_delay,
        }
    }

    /// The most attempts a single renewal will make
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// How long a single attempt may take
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// The pause between a failed attempt and the next one
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

/// Why a single renewal attempt failed
#[derive(Debug, Error)]
pub enum AttemptError {
    /// The provider did not answer in time
    #[error("silent renewal timed out after {0:?}")]
    Timeout(Duration),
    /// The provider refused or failed to renew
    #[error("identity provider failed to renew silently")]
    Provider(#[source] BoxError),
}

/// A renewal that could not be completed
#[derive(Debug, Error)]
pub enum RenewalError {
    /// Every attempt allowed by the policy failed
    #[error("silent renewal failed after {attempts} attempts")]
    Exhausted {
        /// How many attempts were made
        attempts: u32,
        /// Why the final attempt failed
        #[source]
        last: AttemptError,
    },
}

/// Tracks attempts made against a [`RetryPolicy`]
#[derive(Debug)]
pub struct RetryHandler {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryHandler {
    /// Constructs a new handler with no attempts made
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Records the start of an attempt and returns its 1-based number
    pub fn begin(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Reports a failed attempt
    ///
    /// Returns the pause before the next attempt, or `None` once the
    /// policy is exhausted.
    pub fn error(&self) -> Option<Duration> {
        if self.attempts < self.policy.max_attempts {
            Some(self.policy.retry_delay)
        } else {
            None
        }
    }

    /// How many attempts have been started
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Renews silently, retrying according to `policy`
pub async fn silent_renew<P>(
    provider: &P,
    policy: &RetryPolicy,
) -> Result<Arc<User>, RenewalError>
where
    P: IdentityProvider + ?Sized,
{
    let mut handler = RetryHandler::new(policy.clone());
    let max_attempts = policy.max_attempts();

    loop {
        let attempt = handler.begin();
        tracing::debug!(attempt, max_attempts, "attempting silent renewal");

        let error =
            match tokio::time::timeout(policy.attempt_timeout(), provider.signin_silent()).await {
                Ok(Ok(user)) => {
                    tracing::info!(attempt, expiry = user.expiry().0, "silent renewal succeeded");
                    return Ok(user);
                }
                Ok(Err(error)) => AttemptError::Provider(error),
                Err(_) => AttemptError::Timeout(policy.attempt_timeout()),
            };

        match handler.error() {
            Some(delay) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "silent renewal attempt failed, will retry"
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    attempt,
                    max_attempts,
                    "silent renewal attempts exhausted, sign-in may be required"
                );
                return Err(RenewalError::Exhausted {
                    attempts: handler.attempts(),
                    last: error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::testing::{ScriptedProvider, Step};

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn handler_stops_after_the_last_attempt() {
        let mut handler = RetryHandler::new(RetryPolicy::default());

        handler.begin();
        assert_eq!(handler.error(), Some(Duration::from_secs(2)));
        handler.begin();
        assert_eq!(handler.error(), Some(Duration::from_secs(2)));
        handler.begin();
        assert_eq!(handler.error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_provider_is_tried_three_times_then_given_up() {
        let provider = ScriptedProvider::expired().with_steps([Step::Hang, Step::Hang, Step::Hang]);
        let started = Instant::now();

        let error = silent_renew(&provider, &RetryPolicy::default())
            .await
            .unwrap_err();

        assert_eq!(provider.attempts(), 3);
        // three 10s timeouts separated by two 2s pauses
        assert_eq!(started.elapsed(), Duration::from_secs(34));
        match error {
            RenewalError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(last, AttemptError::Timeout(_)));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_second_attempt_waits_one_delay() {
        let provider =
            ScriptedProvider::expired().with_steps([Step::Fail, Step::Renew("second-try")]);
        let started = Instant::now();

        let user = silent_renew(&provider, &RetryPolicy::default())
            .await
            .unwrap();

        let elapsed = started.elapsed();
        assert_eq!(user.access_token().as_str(), "second-try");
        assert_eq!(provider.attempts(), 2);
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(22));
    }

    #[tokio::test(start_paused = true)]
    async fn provider_errors_are_reported_from_the_last_attempt() {
        let provider = ScriptedProvider::expired().with_steps([Step::Fail]);
        let policy = RetryPolicy::new(1, Duration::from_secs(10), Duration::from_secs(2));

        let error = silent_renew(&provider, &policy).await.unwrap_err();

        let RenewalError::Exhausted { attempts, last } = error;
        assert_eq!(attempts, 1);
        assert!(matches!(last, AttemptError::Provider(_)));
    }
}
