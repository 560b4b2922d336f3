//! Generic subscribe/decode/filter/dispatch pipeline.
//!
//! Every moderation concern (bans, username rules, fleet kicks) is one
//! [`NotificationSubscription`] over the same shape: early filter (no
//! payload access, runs on the listener task), JSON decode, optional
//! post filter, then a handler that hops the payload onto the moderation
//! actor's queue. That hop is the single synchronization point the whole
//! pipeline relies on; nothing downstream of it needs a lock.

use crate::metrics;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

type EarlyFilter = Box<dyn Fn() -> bool + Send + Sync>;
type PostFilter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type Handler<T> = Box<dyn Fn(T) + Send + Sync>;

/// One channel's decode-and-dispatch hook set.
pub struct NotificationSubscription<T> {
    channel: &'static str,
    early_filter: Option<EarlyFilter>,
    post_filter: Option<PostFilter<T>>,
    handler: Handler<T>,
}

impl<T: DeserializeOwned> NotificationSubscription<T> {
    pub fn new(channel: &'static str, handler: impl Fn(T) + Send + Sync + 'static) -> Self {
        NotificationSubscription {
            channel,
            early_filter: None,
            post_filter: None,
            handler: Box::new(handler),
        }
    }

    /// Filter run before the payload is even decoded (e.g. rate limiting).
    /// Runs on the listener task, so it must be cheap and lock-light.
    pub fn with_early_filter(mut self, filter: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.early_filter = Some(Box::new(filter));
        self
    }

    /// Filter over the decoded payload (e.g. self-origin suppression).
    pub fn with_post_filter(mut self, filter: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.post_filter = Some(Box::new(filter));
        self
    }
}

/// Type-erased subscription, so the router can hold a mixed set.
pub trait NotificationSink: Send + Sync {
    fn channel(&self) -> &'static str;

    /// Process one raw payload. Never panics and never returns an error;
    /// all failure modes end in "log and drop".
    fn deliver(&self, payload: Option<&str>);
}

impl<T: DeserializeOwned> NotificationSink for NotificationSubscription<T> {
    fn channel(&self) -> &'static str {
        self.channel
    }

    fn deliver(&self, payload: Option<&str>) {
        if let Some(filter) = &self.early_filter
            && !filter()
        {
            debug!(channel = self.channel, "notification dropped by early filter");
            metrics::notification_dropped(self.channel, "early_filter");
            return;
        }

        let Some(raw) = payload else {
            debug!(channel = self.channel, "notification without payload dropped");
            metrics::notification_dropped(self.channel, "empty");
            return;
        };

        let decoded: T = match serde_json::from_str(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(channel = self.channel, error = %e, "undecodable notification payload dropped");
                metrics::notification_dropped(self.channel, "decode");
                return;
            }
        };

        if let Some(filter) = &self.post_filter
            && !filter(&decoded)
        {
            debug!(channel = self.channel, "notification dropped by post filter");
            metrics::notification_dropped(self.channel, "post_filter");
            return;
        }

        (self.handler)(decoded);
    }
}

/// Explicit registration table mapping channels to sinks, built once at
/// startup.
#[derive(Default)]
pub struct NotificationRouter {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl NotificationRouter {
    pub fn new() -> NotificationRouter {
        NotificationRouter::default()
    }

    pub fn register(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    /// Channels this router cares about, for the LISTEN re-subscribe on
    /// reconnect.
    pub fn channels(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.channel()).collect()
    }

    pub fn dispatch(&self, channel: &str, payload: Option<&str>) {
        metrics::notification_received(channel);
        let mut routed = false;
        for sink in &self.sinks {
            if sink.channel() == channel {
                sink.deliver(payload);
                routed = true;
            }
        }
        if !routed {
            debug!(channel, "notification on unrouted channel dropped");
        }
    }
}
