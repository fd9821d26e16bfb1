use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::warn;

/// Fixed attempt count with a fixed pause between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Runs `op` until it succeeds, the error is not retryable, or attempts run out.
    /// `op` receives the 1-based attempt number.
    pub fn run<T, E, F, R>(&self, what: &str, mut op: F, retryable: R) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.attempts && retryable(&e) => {
                    warn!(
                        what,
                        attempt,
                        max_attempts = self.attempts,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO)
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result: Result<&str, String> = policy(3).run(
            "op",
            |attempt| {
                calls += 1;
                if attempt < 3 { Err("flaky".to_string()) } else { Ok("done") }
            },
            |_| true,
        );
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), String> = policy(2).run(
            "op",
            |_| {
                calls += 1;
                Err("down".to_string())
            },
            |_| true,
        );
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), String> = policy(5).run(
            "op",
            |_| {
                calls += 1;
                Err("bad request".to_string())
            },
            |_| false,
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let mut calls = 0;
        let _: Result<(), String> = policy(0).run(
            "op",
            |_| {
                calls += 1;
                Err("x".to_string())
            },
            |_| true,
        );
        assert_eq!(calls, 1);
    }
}
