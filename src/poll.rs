//! Bounded receipt polling
//!
//! Both the intent submitter and the authorization confirmation wait use
//! [`poll_until`]: a probe is re-run at a fixed interval until it yields a
//! value, a fixed ceiling elapses, or the caller cancels. Cancelling only
//! stops the local loop; whatever was submitted stays submitted.

use crate::config::PollSettings;
use std::future::Future;
use tokio::sync::watch;
use tokio::time::Instant;

/// Caller side of a cancellation pair
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Stop any loop watching the paired token
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: Some(self.tx.subscribe()),
        }
    }
}

/// Loop side of a cancellation pair
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

/// Create a linked handle/token pair
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx: Some(rx) })
}

impl CancelToken {
    /// Token that is never cancelled
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once cancelled; pends forever otherwise
    pub async fn cancelled(&self) {
        let Some(rx) = self.rx.as_ref() else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling
                return std::future::pending().await;
            }
        }
    }
}

/// How a poll loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

/// Run `probe` every `settings.interval()` until it returns `Some`.
///
/// The probe receives the 1-based attempt number. The ceiling also bounds
/// a probe that hangs.
pub async fn poll_until<T, F, Fut>(
    settings: PollSettings,
    cancel: &CancelToken,
    mut probe: F,
) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + settings.timeout();
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        if Instant::now() >= deadline {
            return PollOutcome::TimedOut;
        }
        attempt += 1;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = tokio::time::sleep_until(deadline) => return PollOutcome::TimedOut,
            result = probe(attempt) => {
                if let Some(value) = result {
                    return PollOutcome::Ready(value);
                }
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return PollOutcome::TimedOut;
        }
        let wait = settings.interval().min(deadline - now);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn settings(interval_ms: u64, timeout_ms: u64) -> PollSettings {
        PollSettings {
            interval_ms,
            timeout_ms,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_ready_value() {
        let outcome = poll_until(settings(100, 10_000), &CancelToken::never(), |attempt| async move {
            (attempt == 3).then_some(attempt)
        })
        .await;
        assert_eq!(outcome, PollOutcome::Ready(3));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_ceiling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();

        let outcome: PollOutcome<()> =
            poll_until(settings(100, 1_000), &CancelToken::never(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { None }
            })
            .await;

        assert_eq!(outcome, PollOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(1_000));
        // one probe at t=0 then one per interval up to the ceiling
        let probes = calls.load(Ordering::SeqCst);
        assert!((10..=11).contains(&probes), "probes = {}", probes);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_probe_is_bounded() {
        let outcome: PollOutcome<()> =
            poll_until(settings(100, 500), &CancelToken::never(), |_| {
                std::future::pending::<Option<()>>()
            })
            .await;
        assert_eq!(outcome, PollOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_loop() {
        let (handle, token) = cancel_pair();

        let task = tokio::spawn(async move {
            poll_until(settings(100, 60_000), &token, |_| async { None::<()> }).await
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        handle.cancel();

        assert_eq!(task.await.unwrap(), PollOutcome::Cancelled);
    }

    #[tokio::test]
    async fn already_cancelled_never_probes() {
        let (handle, token) = cancel_pair();
        handle.cancel();
        let calls = AtomicU32::new(0);

        let outcome = poll_until(settings(100, 1_000), &token, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { None::<()> }
        })
        .await;
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn default_token_is_not_cancelled() {
        assert!(!CancelToken::default().is_cancelled());
        let (handle, _) = cancel_pair();
        let token = handle.token();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }
}
