// libs/realtime-cell/src/services/timer.rs
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Repeating timer for slot auto-refresh and connection rechecks. The
/// backing task is aborted when the timer is dropped, so a torn-down screen
/// can never trigger another refresh.
pub struct RefreshTimer {
    handle: JoinHandle<()>,
}

impl RefreshTimer {
    pub fn start<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The immediate first tick is the interval's, not ours
            interval.tick().await;
            loop {
                interval.tick().await;
                tick().await;
            }
        });

        Self { handle }
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.handle.abort();
        debug!("Refresh timer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn fires_repeatedly_while_alive() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let _timer = RefreshTimer::start(Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn never_fires_after_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let timer = RefreshTimer::start(Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(35)).await;
        drop(timer);
        let frozen = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), frozen);
    }
}
