//! Prometheus metrics for wardend.
//!
//! Tracks notification flow (received / dropped / applied), listener
//! health, and enforcement activity. Exposed over HTTP for scraping; see
//! [`crate::http`].

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Notifications received, by channel.
pub static NOTIFICATIONS_RECEIVED: OnceLock<IntCounterVec> = OnceLock::new();

/// Notifications dropped before the actor hop, by channel and reason.
pub static NOTIFICATIONS_DROPPED: OnceLock<IntCounterVec> = OnceLock::new();

/// Notifications that survived refetch and were applied, by channel.
pub static NOTIFICATIONS_APPLIED: OnceLock<IntCounterVec> = OnceLock::new();

/// Listener reconnect attempts.
pub static LISTENER_RECONNECTS: OnceLock<IntCounter> = OnceLock::new();

/// Sessions disconnected by enforcement.
pub static SESSIONS_KICKED: OnceLock<IntCounter> = OnceLock::new();

/// Role-ban list updates pushed to clients.
pub static ROLE_BAN_PUSHES: OnceLock<IntCounter> = OnceLock::new();

/// Currently connected sessions.
pub static CONNECTED_SESSIONS: OnceLock<IntGauge> = OnceLock::new();

/// Session cache entries (loading or ready).
pub static CACHED_SESSIONS: OnceLock<IntGauge> = OnceLock::new();

/// Compiled username rules.
pub static COMPILED_RULES: OnceLock<IntGauge> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded.
/// Recording helpers are no-ops if this never ran, so library users and
/// tests can skip it.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    register!(
        NOTIFICATIONS_RECEIVED,
        IntCounterVec::new(
            Opts::new("warden_notifications_received_total", "Notifications received"),
            &["channel"]
        )
    );
    register!(
        NOTIFICATIONS_DROPPED,
        IntCounterVec::new(
            Opts::new("warden_notifications_dropped_total", "Notifications dropped"),
            &["channel", "reason"]
        )
    );
    register!(
        NOTIFICATIONS_APPLIED,
        IntCounterVec::new(
            Opts::new("warden_notifications_applied_total", "Notifications applied"),
            &["channel"]
        )
    );
    register!(
        LISTENER_RECONNECTS,
        IntCounter::new("warden_listener_reconnects_total", "Listener reconnect attempts")
    );
    register!(
        SESSIONS_KICKED,
        IntCounter::new("warden_sessions_kicked_total", "Sessions disconnected by enforcement")
    );
    register!(
        ROLE_BAN_PUSHES,
        IntCounter::new("warden_role_ban_pushes_total", "Role-ban list updates pushed")
    );
    register!(
        CONNECTED_SESSIONS,
        IntGauge::new("warden_connected_sessions", "Currently connected sessions")
    );
    register!(
        CACHED_SESSIONS,
        IntGauge::new("warden_cached_sessions", "Session cache entries")
    );
    register!(
        COMPILED_RULES,
        IntGauge::new("warden_compiled_rules", "Compiled username rules")
    );
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

#[inline]
pub fn notification_received(channel: &str) {
    if let Some(c) = NOTIFICATIONS_RECEIVED.get() {
        c.with_label_values(&[channel]).inc();
    }
}

#[inline]
pub fn notification_dropped(channel: &str, reason: &str) {
    if let Some(c) = NOTIFICATIONS_DROPPED.get() {
        c.with_label_values(&[channel, reason]).inc();
    }
}

#[inline]
pub fn notification_applied(channel: &str) {
    if let Some(c) = NOTIFICATIONS_APPLIED.get() {
        c.with_label_values(&[channel]).inc();
    }
}

#[inline]
pub fn listener_reconnect() {
    if let Some(c) = LISTENER_RECONNECTS.get() {
        c.inc();
    }
}

#[inline]
pub fn session_kicked() {
    if let Some(c) = SESSIONS_KICKED.get() {
        c.inc();
    }
}

#[inline]
pub fn role_ban_push() {
    if let Some(c) = ROLE_BAN_PUSHES.get() {
        c.inc();
    }
}

#[inline]
pub fn set_connected_sessions(count: usize) {
    if let Some(g) = CONNECTED_SESSIONS.get() {
        g.set(count as i64);
    }
}

#[inline]
pub fn set_cached_sessions(count: usize) {
    if let Some(g) = CACHED_SESSIONS.get() {
        g.set(count as i64);
    }
}

#[inline]
pub fn set_compiled_rules(count: usize) {
    if let Some(g) = COMPILED_RULES.get() {
        g.set(count as i64);
    }
}
