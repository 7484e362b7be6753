//! Player manager (C5).
//!
//! Registry of connected and authenticated sessions; authenticates a
//! session against the persistence layer. Grounded on the teacher's
//! connected-sessions map pattern (`network/session.rs`'s `SessionManager`)
//! generalized to the two-map `connected`/`authenticated` split spec'd in
//! §4.2.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::db::Database;
use crate::ids::PlayerId;
use crate::network::auth;
use crate::network::session::PlayerSession;

struct AuthenticatedEntry {
    session: Arc<dyn PlayerSession>,
    user_id: i64,
    username: String,
}

/// Owns every connected session. Exclusive owner per §3's ownership rule:
/// C9/C7 only ever hold `PlayerId`s and must re-resolve through here.
pub struct PlayerManager {
    db: Arc<Database>,
    connected: RwLock<HashMap<PlayerId, Arc<dyn PlayerSession>>>,
    authenticated: RwLock<HashMap<PlayerId, AuthenticatedEntry>>,
}

impl PlayerManager {
    /// Construct an empty manager bound to `db`.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            connected: RwLock::new(HashMap::new()),
            authenticated: RwLock::new(HashMap::new()),
        }
    }

    /// Register a newly connected (not yet authenticated) session.
    pub async fn add(&self, session: Arc<dyn PlayerSession>) {
        self.connected
            .write()
            .await
            .insert(session.player_id(), session);
    }

    /// Validate `token` against the persistence layer; on success, binds
    /// the session to its resolved user id. Returns `false` on unknown
    /// token -- the caller is responsible for disconnecting (§4.2).
    pub async fn auth(&self, player_id: PlayerId, token: &str) -> bool {
        let Some(user) = auth::authenticate(&self.db, token).ok().flatten() else {
            return false;
        };
        let Some(session) = self.connected.read().await.get(&player_id).cloned() else {
            return false;
        };
        self.authenticated.write().await.insert(
            player_id,
            AuthenticatedEntry {
                session,
                user_id: user.user_id,
                username: user.username,
            },
        );
        true
    }

    /// Remove a session from both maps (on disconnect).
    pub async fn remove(&self, player_id: PlayerId) {
        self.connected.write().await.remove(&player_id);
        self.authenticated.write().await.remove(&player_id);
    }

    /// Look up an authenticated session by player id.
    pub async fn get_player_by_id(&self, player_id: PlayerId) -> Option<Arc<dyn PlayerSession>> {
        self.authenticated
            .read()
            .await
            .get(&player_id)
            .map(|e| e.session.clone())
    }

    /// Resolve an authenticated player's stored user id.
    pub async fn get_user_id(&self, player_id: PlayerId) -> Option<i64> {
        self.authenticated
            .read()
            .await
            .get(&player_id)
            .map(|e| e.user_id)
    }

    /// Fan out an error notification to every connected session.
    pub async fn broadcast_error(&self, message: &str) {
        for session in self.connected.read().await.values() {
            session.notify_error(message).await;
        }
    }

    /// Disconnect every connected session (graceful shutdown).
    pub async fn disconnect_all(&self, reason: &str) {
        for session in self.connected.read().await.values() {
            session.disconnect(reason).await;
        }
    }

    /// Current matchmaking parameters for a user, read through to C2.
    pub fn get_matchmaking_parameters(&self, user_id: i64) -> Option<(f64, f64)> {
        self.db
            .get_user(user_id)
            .ok()
            .flatten()
            .map(|u| (u.mu, u.sigma))
    }

    /// Write updated matchmaking parameters back to C2.
    pub fn update_matchmaking_parameters(&self, user_id: i64, mu: f64, sigma: f64) -> bool {
        self.db.update_rating(user_id, mu, sigma).is_ok()
    }

    /// Number of authenticated players, used by matchmaking's
    /// `percentage_min_players_waiting` gate.
    pub async fn authenticated_count(&self) -> usize {
        self.authenticated.read().await.len()
    }

    /// Every connected session's id paired with its username, if it has
    /// authenticated yet. Used by the monitor snapshot's "Connected
    /// players" block.
    pub async fn list_connected(&self) -> Vec<(PlayerId, Option<String>)> {
        let connected = self.connected.read().await;
        let authenticated = self.authenticated.read().await;
        connected
            .keys()
            .map(|id| (*id, authenticated.get(id).map(|e| e.username.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct StubSession {
        player_id: PlayerId,
        connected: AtomicBool,
    }

    impl StubSession {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                player_id: PlayerId::new(),
                connected: AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl PlayerSession for StubSession {
        fn player_id(&self) -> PlayerId {
            self.player_id
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        async fn authenticate(&self, _timeout: Duration) -> Result<String, crate::error::CoreError> {
            unimplemented!()
        }
        async fn is_ready(&self, _timeout: Duration) -> Result<bool, crate::error::CoreError> {
            unimplemented!()
        }
        async fn notify_start(&self, _game_id: &str) {}
        async fn get_action(
            &self,
            _observation: Vec<f64>,
            _timeout: Duration,
        ) -> Result<Vec<f64>, crate::error::CoreError> {
            unimplemented!()
        }
        async fn notify_end(&self, _player_won: bool, _stats: Vec<f64>) {}
        async fn notify_info(&self, _message: &str) {}
        async fn notify_error(&self, _message: &str) {}
        async fn disconnect(&self, _reason: &str) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn auth_with_unknown_token_fails() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let manager = PlayerManager::new(db);
        let session = StubSession::new();
        let player_id = session.player_id();
        manager.add(session).await;
        assert!(!manager.auth(player_id, "nope").await);
        assert!(manager.get_user_id(player_id).await.is_none());
    }

    #[tokio::test]
    async fn auth_with_known_token_binds_user_id() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.register_user("alice", "pw", "tok", Role::User).unwrap();
        let manager = PlayerManager::new(db);
        let session = StubSession::new();
        let player_id = session.player_id();
        manager.add(session).await;

        assert!(manager.auth(player_id, "tok").await);
        assert!(manager.get_user_id(player_id).await.is_some());
        assert!(manager.get_player_by_id(player_id).await.is_some());
    }

    #[tokio::test]
    async fn remove_clears_both_maps() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.register_user("bob", "pw", "tok2", Role::User).unwrap();
        let manager = PlayerManager::new(db);
        let session = StubSession::new();
        let player_id = session.player_id();
        manager.add(session).await;
        manager.auth(player_id, "tok2").await;

        manager.remove(player_id).await;
        assert!(manager.get_player_by_id(player_id).await.is_none());
        assert!(manager.get_user_id(player_id).await.is_none());
    }
}
