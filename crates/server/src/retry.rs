//! Sabit ya da üstel bekleme ile yeniden deneme sürücüsü.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential { factor: u32, max_delay: Duration },
}

impl Backoff {
    /// Varsayılan üstel profil: her denemede iki katı, en fazla beş dakika.
    #[must_use]
    pub const fn exponential() -> Self {
        Self::Exponential {
            factor: 2,
            max_delay: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// `attempt` numaralı denemeden (1'den başlar) önce beklenecek süre.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { factor, max_delay } => {
                let exponent = attempt.saturating_sub(1);
                let multiplier = factor.saturating_pow(exponent);
                self.delay.saturating_mul(multiplier).min(max_delay)
            }
        }
    }
}

/// Yeniden denenmemesi gereken hatalar.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug)]
pub enum RetryOutcome<E> {
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32, last_error: Option<E> },
}

impl<E> RetryOutcome<E> {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Sürecin çıkış kodu: başarıda 0, aksi halde 1.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// `operation`'ı politika bitene kadar çalıştırır.
///
/// Her denemeden önce beklenir; ilk bekleme DNS kayıtlarının yayılmasına
/// zaman tanır. Yeniden denenemez bir hata döngüyü hemen bitirir.
pub async fn run_with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> RetryOutcome<E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut last_error = None;
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.delay_before(attempt)).await;
        info!(attempt, max = policy.max_attempts, "sertifika üretimi deneniyor");
        match operation(attempt).await {
            Ok(_) => return RetryOutcome::Succeeded { attempts: attempt },
            Err(err) if !err.is_retryable() => {
                warn!(attempt, error = %err, "yeniden denenemez hata");
                return RetryOutcome::Exhausted {
                    attempts: attempt,
                    last_error: Some(err),
                };
            }
            Err(err) => {
                warn!(attempt, error = %err, "deneme başarısız");
                last_error = Some(err);
            }
        }
    }
    RetryOutcome::Exhausted {
        attempts: policy.max_attempts,
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Debug)]
    struct Flaky(bool);

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("flaky")
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_fourth_attempt_after_four_waits() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();
        let outcome = run_with_retry(&RetryPolicy::default(), |attempt| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 4 {
                    Err(Flaky(true))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(matches!(outcome, RetryOutcome::Succeeded { attempts: 4 }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(20) && elapsed < Duration::from_secs(21));
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_ten_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = run_with_retry(&RetryPolicy::default(), |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Flaky(true))
            }
        })
        .await;

        assert!(matches!(
            outcome,
            RetryOutcome::Exhausted {
                attempts: 10,
                last_error: Some(_)
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = run_with_retry(&RetryPolicy::default(), |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Flaky(false))
            }
        })
        .await;

        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            delay: Duration::from_secs(5),
            backoff: Backoff::Exponential {
                factor: 2,
                max_delay: Duration::from_secs(30),
            },
        };
        let delays: Vec<u64> = (1..=5).map(|n| policy.delay_before(n).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 30, 30]);
        assert_eq!(RetryPolicy::default().delay_before(7), Duration::from_secs(5));
    }
}
