//! Test fleet management.
//!
//! Spawns in-process moderation engines that share one store and one
//! notification bus, plus a fake player whose session channel can be
//! asserted on.

use super::store::MemStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wardend::ban::RoleRegistry;
use wardend::config::NotifyConfig;
use wardend::enforce::{self, EngineOptions, ModerationHandle};
use wardend::notify::MemoryNotifyBus;
use wardend::state::{PlayerSession, SessionMessage};

/// Roles known to every test server.
pub const TEST_ROLES: &[&str] = &["job:captain", "job:engineer", "antag:traitor"];

/// A fleet of in-process moderation engines sharing one store and bus.
pub struct TestFleet {
    pub store: Arc<MemStore>,
    pub bus: Arc<MemoryNotifyBus>,
    shutdown: CancellationToken,
}

impl Default for TestFleet {
    fn default() -> Self {
        TestFleet::new()
    }
}

impl TestFleet {
    pub fn new() -> TestFleet {
        TestFleet {
            store: Arc::new(MemStore::new()),
            bus: Arc::new(MemoryNotifyBus::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn a server with default notification policy.
    pub async fn spawn_server(&self, name: &str) -> ModerationHandle {
        self.spawn_server_with(name, NotifyConfig::default()).await
    }

    /// Spawn a server with a custom notification policy.
    pub async fn spawn_server_with(&self, name: &str, notify: NotifyConfig) -> ModerationHandle {
        let options = EngineOptions {
            server_name: name.to_string(),
            notify,
            appeal_url: None,
            maintenance_interval: Duration::from_secs(3600),
        };
        enforce::start(
            options,
            self.store.clone(),
            self.bus.clone(),
            RoleRegistry::from_ids(TEST_ROLES.iter().copied()),
            self.shutdown.clone(),
        )
        .await
        .expect("engine start")
    }
}

impl Drop for TestFleet {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A fake connected player holding the receiving end of its session
/// channel.
pub struct TestPlayer {
    pub session: PlayerSession,
    rx: mpsc::Receiver<SessionMessage>,
}

impl TestPlayer {
    pub fn new(username: &str) -> TestPlayer {
        let (tx, rx) = mpsc::channel(16);
        TestPlayer {
            session: PlayerSession {
                session_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                username: username.to_string(),
                address: None,
                hardware_id: None,
                is_new_account: false,
                sender: tx,
            },
            rx,
        }
    }

    pub fn with_address(mut self, addr: &str) -> TestPlayer {
        self.session.address = Some(addr.parse().expect("test address"));
        self
    }

    pub fn user_id(&self) -> Uuid {
        self.session.user_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session.session_id
    }

    /// Connect to a server, wait for the moderation data load, and return
    /// the initial role-ban push.
    pub async fn join(&mut self, server: &ModerationHandle) -> Vec<i32> {
        server
            .session_connected(self.session.clone())
            .await
            .expect("engine running");
        server
            .wait_data_loaded(self.session.session_id)
            .await
            .expect("data load");
        self.expect_role_bans().await
    }

    /// Next message pushed to this player's client.
    pub async fn recv(&mut self) -> SessionMessage {
        timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for session message")
            .expect("session channel open")
    }

    /// Wait for a kick, skipping role-ban pushes. Returns the kick message.
    pub async fn expect_kick(&mut self) -> String {
        loop {
            match self.recv().await {
                SessionMessage::Kicked { message } => return message,
                SessionMessage::RoleBans { .. } => continue,
            }
        }
    }

    /// Wait for a role-ban id push.
    pub async fn expect_role_bans(&mut self) -> Vec<i32> {
        match self.recv().await {
            SessionMessage::RoleBans { ban_ids } => ban_ids,
            other => panic!("expected role ban push, got {other:?}"),
        }
    }

    /// Assert that nothing is pushed within a grace window.
    pub async fn expect_silence(&mut self) {
        if let Ok(Some(msg)) = timeout(Duration::from_millis(300), self.rx.recv()).await {
            panic!("expected no session message, got {msg:?}");
        }
    }
}

/// Poll `check` until it returns true or two seconds elapse.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..80 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}
