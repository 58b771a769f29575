use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

/// Clock abstraction for every wait in the pipeline.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Returns immediately and remembers every requested wait.
#[derive(Debug, Default, Clone)]
pub struct RecordingSleeper {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.waits().into_iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut guard) = self.waits.lock() {
            guard.push(duration);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: usize,
    schedule: Vec<Duration>,
    jitter_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub error: E,
    pub attempts: usize,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempt(s): {}", self.attempts, self.error)
    }
}

impl RetryPolicy {
    /// Same delay between every attempt.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: (max_attempts as usize).max(1),
            schedule: vec![delay],
            jitter_seconds: 0,
        }
    }

    /// Explicit per-retry delays; the last entry repeats.
    pub fn with_schedule(max_attempts: u32, schedule: Vec<Duration>) -> Self {
        let schedule = if schedule.is_empty() {
            vec![Duration::ZERO]
        } else {
            schedule
        };
        Self {
            max_attempts: (max_attempts as usize).max(1),
            schedule,
            jitter_seconds: 0,
        }
    }

    pub fn with_jitter(mut self, jitter_seconds: u64) -> Self {
        self.jitter_seconds = jitter_seconds;
        self
    }

    pub fn jitter_seconds(&self) -> u64 {
        self.jitter_seconds
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        let base = self
            .schedule
            .get(retry.saturating_sub(1))
            .or_else(|| self.schedule.last())
            .copied()
            .unwrap_or(Duration::ZERO);
        if self.jitter_seconds > 0 {
            let jitter = rand::thread_rng().gen_range(0..=self.jitter_seconds);
            base + Duration::from_secs(jitter)
        } else {
            base
        }
    }

    /// Runs `operation` until it succeeds, the error is not retryable, or the
    /// attempt budget is spent. The closure receives the zero-based attempt.
    pub async fn run<F, Fut, T, E, P>(
        &self,
        stage: &str,
        sleeper: &dyn Sleeper,
        is_retryable: P,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, RetryExhausted<E>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0usize;
        loop {
            match operation(attempt).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt + 1,
                    })
                }
                Err(error) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !is_retryable(&error) {
                        return Err(RetryExhausted {
                            error,
                            attempts: attempt,
                        });
                    }
                    let wait = self.delay_for_retry(attempt);
                    warn!(
                        stage,
                        attempt,
                        wait = ?wait,
                        error = %error,
                        "retrying operation"
                    );
                    sleeper.sleep(wait).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(10));
        let outcome = policy
            .run(
                "render",
                &sleeper,
                |_: &String| true,
                |attempt| async move {
                    if attempt < 2 {
                        Err(format!("exit 1 on attempt {attempt}"))
                    } else {
                        Ok("done")
                    }
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.result, "done");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(
            sleeper.waits(),
            vec![Duration::from_secs(10), Duration::from_secs(10)]
        );
    }

    #[tokio::test]
    async fn stops_on_non_retryable_error() {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy::fixed(5, Duration::from_secs(5));
        let failure = policy
            .run(
                "tts",
                &sleeper,
                |err: &String| !err.contains("429"),
                |_| async { Err::<(), _>("HTTP 429".to_string()) },
            )
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert!(sleeper.waits().is_empty());
    }

    #[tokio::test]
    async fn exhausts_budget_and_returns_last_error() {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy::with_schedule(
            3,
            vec![Duration::from_secs(1), Duration::from_secs(2)],
        );
        let failure = policy
            .run(
                "upload",
                &sleeper,
                |_: &String| true,
                |attempt| async move { Err::<(), _>(format!("boom {attempt}")) },
            )
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error, "boom 2");
        assert_eq!(sleeper.total(), Duration::from_secs(3));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = RetryPolicy::fixed(5, Duration::from_secs(10)).with_jitter(3);
        for retry in 1..=50 {
            let delay = policy.delay_for_retry(retry);
            assert!(delay >= Duration::from_secs(10));
            assert!(delay <= Duration::from_secs(13));
        }
    }

    #[test]
    fn schedule_repeats_last_delay() {
        let policy = RetryPolicy::with_schedule(10, vec![Duration::from_secs(4)]);
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_retry(7), Duration::from_secs(4));
    }
}
