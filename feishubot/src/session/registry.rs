//! Live sessions keyed by (chat, sender).

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::actor::SessionActor;
use super::{Session, SessionContext, SessionKey};

/// Owns every live session and retires the idle ones.
///
/// Lookups take the read lock; creation and removal take the write lock and
/// re-check, so concurrent first contacts for a key spawn exactly one actor.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionKey, Session>>,
    ctx: Arc<SessionContext>,
}

impl SessionRegistry {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ctx,
        }
    }

    /// Existing session for `key` with its expiry pushed out, or a fresh one.
    pub async fn get_or_create(&self, key: SessionKey, chat_id: &str, sender_id: &str) -> Session {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(&key) {
                session.refresh_expiry();
                return session.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(&key) {
            session.refresh_expiry();
            return session.clone();
        }

        let (session, _handle) = SessionActor::spawn(key.clone(), chat_id, sender_id, self.ctx.clone());
        info!(session_id = %key, chat_id, sender_id, "Session created");
        sessions.insert(key, session.clone());
        session
    }

    /// Cancel and remove every expired session. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let candidates: Vec<SessionKey> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, session)| session.is_expired())
                .map(|(key, _)| key.clone())
                .collect()
        };

        if candidates.is_empty() {
            return 0;
        }

        let mut removed = 0;
        let mut sessions = self.sessions.write().await;
        for key in candidates {
            // A message may have refreshed it between the two locks.
            let still_expired = sessions.get(&key).is_some_and(Session::is_expired);
            if !still_expired {
                continue;
            }
            if let Some(session) = sessions.remove(&key) {
                session.cancel();
                removed += 1;
                info!(session_id = %key, "Session expired");
            }
        }

        if removed > 0 {
            debug!(removed, remaining = sessions.len(), "Sweep finished");
        }
        removed
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval` until the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let period = self.ctx.settings.sweep_interval;
        let registry: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    debug!("Session registry dropped, sweeper exiting");
                    break;
                };
                registry.sweep().await;
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.read().await.contains_key(key)
    }
}
