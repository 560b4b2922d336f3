//! The moderation engine: actor, propagation pipeline, and wiring.
//!
//! # Ownership rule
//!
//! Two execution domains exist. The moderation actor task owns the session
//! table, the per-session data cache, and the compiled rule cache, and is
//! the only code that touches them; it performs no locking. The listener
//! task owns the notification connection and touches exactly one piece of
//! shared state directly: the rate limiter's mutex, to decide whether to
//! hop at all. Everything else crosses domains through the actor's event
//! queue. Remove that hop and every cache access here needs a lock.

pub mod actor;
pub mod handle;
mod pipeline;

pub use actor::{Event, Moderator};
pub use handle::{LoadCancelled, ModerationHandle, RoleBanDraft, ServerBanDraft, UsernameRuleDraft};

use crate::ban::RoleRegistry;
use crate::config::{Config, NotifyConfig};
use crate::db::ModerationStore;
use crate::error::BanError;
use crate::notify::{
    BAN_CHANNEL, Backoff, BanNotice, FLEET_KICK_CHANNEL, FleetKickNotice, NotificationRouter,
    NotificationSubscription, NotifyBus, NotifyRateLimiter, USERNAME_RULE_CHANNEL,
    UsernameRuleNotice, run_listener,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Depth of the actor event queue. Sized to absorb a full rate-limiter
/// window of notifications plus session churn without backpressure.
const EVENT_QUEUE_DEPTH: usize = 1024;

/// Engine startup options, a subset of [`Config`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Fleet-unique name of this process.
    pub server_name: String,
    pub notify: NotifyConfig,
    pub appeal_url: Option<String>,
    pub maintenance_interval: Duration,
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> EngineOptions {
        EngineOptions {
            server_name: config.server.name.clone(),
            notify: config.notify.clone(),
            appeal_url: config.moderation.appeal_url.clone(),
            maintenance_interval: config.moderation.maintenance_interval(),
        }
    }
}

/// Start the moderation engine.
///
/// Resolves this server's identity, primes the rule cache, and spawns the
/// actor, listener, and maintenance tasks. The returned handle is the only
/// way in; dropping every handle shuts the actor down, and `shutdown`
/// stops the background tasks.
pub async fn start(
    options: EngineOptions,
    store: Arc<dyn ModerationStore>,
    bus: Arc<dyn NotifyBus>,
    roles: RoleRegistry,
    shutdown: CancellationToken,
) -> Result<ModerationHandle, BanError> {
    // Resolved once per process lifetime; tags outgoing notifications and
    // suppresses self-origin ones.
    let local_server_id = store.resolve_server_id(&options.server_name).await?;
    info!(
        server = %options.server_name,
        server_id = local_server_id,
        "moderation engine starting"
    );

    let initial_rules = store.active_username_rules().await?;
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let moderator = Moderator::new(
        store.clone(),
        local_server_id,
        options.appeal_url.clone(),
        events_tx.clone(),
        &initial_rules,
    );
    tokio::spawn(moderator.run(events_rx));

    let router = Arc::new(build_router(&options.notify, events_tx.clone(), local_server_id));
    let backoff = Backoff::new(options.notify.backoff_increment(), options.notify.backoff_cap());
    tokio::spawn(run_listener(bus.clone(), router, backoff, shutdown.clone()));

    spawn_maintenance(events_tx.clone(), options.maintenance_interval, shutdown);

    Ok(ModerationHandle::new(
        events_tx,
        store,
        bus,
        Arc::new(roles),
        local_server_id,
    ))
}

/// Build the channel registration table: one subscription per concern over
/// the same generic pipeline.
fn build_router(
    notify: &NotifyConfig,
    events_tx: mpsc::Sender<Event>,
    local_server_id: i32,
) -> NotificationRouter {
    let mut router = NotificationRouter::new();

    let ban_limiter = Arc::new(NotifyRateLimiter::new(
        notify.rate_window(),
        notify.rate_max_admits,
    ));
    let tx = events_tx.clone();
    router.register(Box::new(
        NotificationSubscription::<BanNotice>::new(BAN_CHANNEL, move |notice| {
            queue_event(&tx, Event::BanNotice(notice), BAN_CHANNEL);
        })
        .with_early_filter(move || ban_limiter.admit())
        .with_post_filter(move |notice: &BanNotice| notice.server_id != Some(local_server_id)),
    ));

    let rule_limiter = Arc::new(NotifyRateLimiter::new(
        notify.rate_window(),
        notify.rate_max_admits,
    ));
    let tx = events_tx.clone();
    router.register(Box::new(
        NotificationSubscription::<UsernameRuleNotice>::new(USERNAME_RULE_CHANNEL, move |notice| {
            queue_event(&tx, Event::RuleNotice(notice), USERNAME_RULE_CHANNEL);
        })
        .with_early_filter(move || rule_limiter.admit())
        .with_post_filter(move |notice: &UsernameRuleNotice| {
            notice.server_id != Some(local_server_id)
        }),
    ));

    let tx = events_tx;
    router.register(Box::new(
        NotificationSubscription::<FleetKickNotice>::new(FLEET_KICK_CHANNEL, move |notice| {
            queue_event(&tx, Event::FleetKick(notice), FLEET_KICK_CHANNEL);
        })
        .with_post_filter(move |notice: &FleetKickNotice| notice.server_id != local_server_id),
    ));

    router
}

/// Hop from the listener task onto the actor queue. Must not block the
/// listener; a full queue drops the notification (the record survives in
/// the store, only propagation speed degrades).
fn queue_event(events_tx: &mpsc::Sender<Event>, event: Event, channel: &'static str) {
    if events_tx.try_send(event).is_err() {
        warn!(channel, "actor queue full, notification dropped");
        crate::metrics::notification_dropped(channel, "queue_full");
    }
}

fn spawn_maintenance(
    events_tx: mpsc::Sender<Event>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // immediate first tick is uninteresting
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if events_tx.send(Event::Maintenance).await.is_err() {
                        return;
                    }
                }
            }
        }
    });
}
