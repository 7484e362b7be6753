//! Game manager (C8).
//!
//! Owns active game instances, persists results via the persistence layer,
//! force-ends games on player disconnect. Grounded on `GameManager` in
//! `managers.py` (`start_game`, `end_game` idempotency, `force_game_end`'s
//! linear scan).

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::db::Database;
use crate::game::GameInstance;
use crate::ids::{GameId, PlayerId};

/// Owns every active game, keyed by id.
pub struct GameManager {
    db: Arc<Database>,
    games: RwLock<HashMap<GameId, Arc<GameInstance>>>,
}

impl GameManager {
    /// Construct an empty manager bound to `db`.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            games: RwLock::new(HashMap::new()),
        }
    }

    /// Register a freshly constructed instance, registering this
    /// manager's own `end_game` as a finish callback, then start it
    /// (broadcasts `notify_start` and makes it eligible for ticking).
    pub async fn start_game(self: &Arc<Self>, instance: Arc<GameInstance>) {
        let game_id = instance.game_id();
        self.games.write().await.insert(game_id, instance.clone());

        let this = self.clone();
        instance
            .register_finish_callback(Box::new(move |report| {
                let this = this.clone();
                let game_id = report.game_id;
                let result = report.result.clone();
                tokio::spawn(async move {
                    this.end_game(game_id, result).await;
                });
            }))
            .await;

        instance.start().await;
    }

    /// Idempotent: if `game_id` is still present, persist the result (if
    /// any) and drop the instance from the active map.
    pub async fn end_game(&self, game_id: GameId, result: Option<crate::db::GameResult>) {
        let removed = self.games.write().await.remove(&game_id);
        if removed.is_none() {
            return; // already ended
        }
        match result {
            Some(result) => {
                if let Err(e) = self.db.insert_game_result(&result) {
                    error!(%game_id, error = %e, "failed to persist game result");
                }
            }
            None => {
                // §4.3: get_result() returned null -- a recoverable bug
                // condition (a participant's user_id never resolved).
                error!(%game_id, "game ended with unresolved user_id, skipping persistence");
            }
        }
        info!(%game_id, "game removed from active set");
    }

    /// Linearly scan active games for membership of `player_id` and force
    /// each to end. O(N*2) is acceptable: N is bounded by
    /// `max_parallel_games`.
    pub async fn force_game_end(&self, player_id: PlayerId) {
        let matching: Vec<Arc<GameInstance>> = self
            .games
            .read()
            .await
            .values()
            .filter(|g| g.has_player(player_id))
            .cloned()
            .collect();
        for game in matching {
            game.force_end(player_id).await;
        }
    }

    /// Number of currently active games (§8 property #7).
    pub async fn active_count(&self) -> usize {
        self.games.read().await.len()
    }

    /// Snapshot of active games paired with their two participants, used
    /// by the monitor writer's "Games" block.
    pub async fn active_games_snapshot(&self) -> Vec<(GameId, [PlayerId; 2])> {
        self.games
            .read()
            .await
            .values()
            .map(|g| (g.game_id(), g.player_ids()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::adapter::GameAdapterRegistry;
    use crate::network::session::PlayerSession;
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

    fn tmp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("comprl-gm-test-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn force_game_end_finds_and_ends_the_right_game() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let manager = Arc::new(GameManager::new(db));
        let registry = GameAdapterRegistry::with_builtins();

        let p1 = PlayerId::new();
        let p2 = PlayerId::new();
        let s1 = StubSession::new();
        let s2 = StubSession::new();
        let adapter = registry.build("demo", [p1, p2]).unwrap();
        let instance = GameInstance::new(
            GameId::new(),
            [(p1, Some(1), s1), (p2, Some(2), s2)],
            adapter,
            Duration::from_secs(1),
            tmp_dir(),
        );
        manager.start_game(instance.clone()).await;
        assert_eq!(manager.active_count().await, 1);

        manager.force_game_end(p1).await;
        // end_game runs in a spawned task; yield until it lands.
        for _ in 0..50 {
            if manager.active_count().await == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn end_game_is_idempotent() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let manager = GameManager::new(db);
        let game_id = GameId::new();
        manager.end_game(game_id, None).await;
        manager.end_game(game_id, None).await;
    }
}
