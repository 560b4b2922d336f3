//! Dedicated listener task with capped reconnect backoff.
//!
//! One long-running task per process owns the subscription connection. On
//! any connection failure it closes, waits an increasing (capped) backoff,
//! reopens, and re-issues the subscription for every channel the router
//! cares about. Shutdown via the cancellation token is a normal exit, not
//! an error.

use super::bus::NotifyBus;
use super::subscription::NotificationRouter;
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fixed-increment backoff with an upper bound.
#[derive(Debug, Clone)]
pub struct Backoff {
    increment: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(increment: Duration, cap: Duration) -> Backoff {
        Backoff {
            increment,
            cap,
            current: Duration::ZERO,
        }
    }

    /// Next delay to wait. Grows by the increment each failure, up to the
    /// cap.
    pub fn next(&mut self) -> Duration {
        self.current = (self.current + self.increment).min(self.cap);
        self.current
    }

    /// Reset after a healthy connection.
    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }
}

/// Run the notification listener until `shutdown` fires.
pub async fn run_listener(
    bus: Arc<dyn NotifyBus>,
    router: Arc<NotificationRouter>,
    mut backoff: Backoff,
    shutdown: CancellationToken,
) {
    let channels = router.channels();
    loop {
        if shutdown.is_cancelled() {
            debug!("notification listener shut down");
            return;
        }

        let mut stream = match bus.subscribe(&channels).await {
            Ok(stream) => stream,
            Err(e) => {
                let delay = backoff.next();
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "notification subscribe failed, retrying");
                metrics::listener_reconnect();
                if sleep_or_shutdown(delay, &shutdown).await {
                    return;
                }
                continue;
            }
        };
        info!(?channels, "notification listener subscribed");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("notification listener shut down");
                    return;
                }
                result = stream.recv() => match result {
                    Ok(notification) => {
                        backoff.reset();
                        router.dispatch(&notification.channel, notification.payload.as_deref());
                    }
                    Err(e) => {
                        let delay = backoff.next();
                        info!(error = %e, delay_ms = delay.as_millis() as u64, "notification connection lost, reconnecting");
                        metrics::listener_reconnect();
                        if sleep_or_shutdown(delay, &shutdown).await {
                            return;
                        }
                        break;
                    }
                }
            }
        }
    }
}

/// Returns true if shutdown fired during the sleep.
async fn sleep_or_shutdown(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_to_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_millis(1200));
        assert_eq!(backoff.next(), Duration::from_millis(500));
        assert_eq!(backoff.next(), Duration::from_millis(1000));
        assert_eq!(backoff.next(), Duration::from_millis(1200));
        assert_eq!(backoff.next(), Duration::from_millis(1200));
        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn shutdown_interrupts_sleep() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(sleep_or_shutdown(Duration::from_secs(60), &token).await);
    }
}
