//! Fixed-interval retries for calls the executor may not answer right away

use std::thread;
use std::time::Duration;

/// How often and how many times a blocking operation is attempted
///
/// `max_attempts: None` keeps trying forever
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

/// Why `RetryPolicy::run` stopped without a success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl RetryPolicy {
    pub const fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    pub const fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts),
        }
    }

    /// Calls `attempt` until it returns `Ok`
    ///
    /// `attempt` receives the 1-based attempt number, the policy sleeps `interval` between tries
    pub fn run<T, E>(
        &self,
        mut attempt: impl FnMut(u32) -> Result<T, E>,
    ) -> Result<T, Exhausted<E>> {
        let mut tries = 0u32;

        loop {
            tries = tries.saturating_add(1);

            match attempt(tries) {
                Ok(value) => return Ok(value),
                Err(last) => {
                    if self.max_attempts.is_some_and(|max| tries >= max) {
                        return Err(Exhausted {
                            attempts: tries,
                            last,
                        });
                    }
                }
            }

            if !self.interval.is_zero() {
                thread::sleep(self.interval);
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_after_failures() {
        let policy = RetryPolicy::unbounded(Duration::ZERO);
        let mut seen = Vec::new();

        let result = policy.run(|attempt| {
            seen.push(attempt);
            if attempt < 4 {
                Err("offline")
            } else {
                Ok(attempt * 10)
            }
        });

        assert_eq!(result, Ok(40));
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn bounded_policy_gives_up() {
        let policy = RetryPolicy::bounded(Duration::ZERO, 3);
        let mut calls = 0;

        let result: Result<(), _> = policy.run(|_| {
            calls += 1;
            Err(calls)
        });

        assert_eq!(
            result,
            Err(Exhausted {
                attempts: 3,
                last: 3
            })
        );
    }

    #[test]
    fn first_success_does_not_sleep() {
        let policy = RetryPolicy::unbounded(Duration::from_secs(60));
        let result: Result<_, Exhausted<()>> = policy.run(|attempt| Ok(attempt));

        assert_eq!(result, Ok(1));
    }
}
