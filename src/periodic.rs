//! Timer-driven loop shared by the poller and the purge jobs.

use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run `tick` every `period` until `shutdown` is cancelled.
///
/// With `immediate` the first tick runs right away, otherwise after one
/// period. A tick that overruns its period delays the next one instead of
/// triggering a burst of catch-up ticks. Shutdown is only observed between
/// ticks; a running tick completes.
pub async fn run_every<F, Fut>(
    name: &str,
    period: Duration,
    immediate: bool,
    shutdown: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    if !immediate {
        // The first tick of a tokio interval completes immediately.
        interval.tick().await;
    }

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!("{} stopped", name);
                return;
            }

            _ = interval.tick() => tick().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn ticks_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let handle = {
            let count = Arc::clone(&count);
            let token = token.clone();
            tokio::spawn(async move {
                run_every("test", Duration::from_secs(10), true, token, || {
                    let count = Arc::clone(&count);
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_secs(25)).await;
        token.cancel();
        handle.await.unwrap();
        // t = 0, 10, 20
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_start_skips_first_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let handle = {
            let count = Arc::clone(&count);
            let token = token.clone();
            tokio::spawn(async move {
                run_every("test", Duration::from_secs(10), false, token, || {
                    let count = Arc::clone(&count);
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(10)).await;
        token.cancel();
        handle.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
