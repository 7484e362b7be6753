//! Matchmaking manager (C9).
//!
//! Queue of ready authenticated players; every tick selects compatible
//! pairs using the rating model and hands them to the game manager.
//! Grounded on `MatchmakingManager`/`QueueEntry`/`_search_for_matches`/
//! `_rate_match_quality`/`_end_game` in the original `managers.py`,
//! including the "don't advance i when a match is found" detail and the
//! unordered-pair-keyed quality cache.

use chrono::{DateTime, Utc};
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::MatchmakingConfig;
use crate::db::{Database, Role};
use crate::game::{GameAdapterRegistry, GameInstance};
use crate::game_manager::GameManager;
use crate::ids::{GameId, PlayerId};
use crate::network::session::PlayerSession;
use crate::player_manager::PlayerManager;
use crate::rating::{self, Rating};

/// User data snapshotted into a queue entry at enqueue time (§3).
#[derive(Debug, Clone)]
pub struct UserSnapshot {
    /// Stable user id.
    pub user_id: i64,
    /// Display name, also the quality-cache key.
    pub username: String,
    /// Role, used by the legality predicate.
    pub role: Role,
    /// Rating mean at enqueue time.
    pub mu: f64,
    /// Rating uncertainty at enqueue time.
    pub sigma: f64,
}

/// One entry in the matchmaking queue (§3). At most one per player_id.
#[derive(Debug, Clone)]
struct QueueEntry {
    player_id: PlayerId,
    user: UserSnapshot,
    in_queue_since: DateTime<Utc>,
}

/// A connected session's matching status, read by the monitor writer.
#[derive(Debug, Clone)]
pub struct QueueSnapshotEntry {
    /// Queued player.
    pub player_id: PlayerId,
    /// Username at enqueue time.
    pub username: String,
    /// When the entry was queued.
    pub in_queue_since: DateTime<Utc>,
}

fn cache_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Owns the queue and the stochastic pairing pass.
pub struct MatchmakingManager {
    db: Arc<Database>,
    player_manager: Arc<PlayerManager>,
    game_manager: Arc<GameManager>,
    adapters: Arc<GameAdapterRegistry>,
    game_class: String,
    action_timeout: std::time::Duration,
    recordings_dir: PathBuf,
    config: RwLock<MatchmakingConfig>,
    queue: Mutex<Vec<QueueEntry>>,
    last_quality_scores: Mutex<HashMap<(String, String), f64>>,
}

impl MatchmakingManager {
    /// Construct a new manager with an empty queue.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        player_manager: Arc<PlayerManager>,
        game_manager: Arc<GameManager>,
        adapters: Arc<GameAdapterRegistry>,
        game_class: String,
        action_timeout: std::time::Duration,
        recordings_dir: PathBuf,
        config: MatchmakingConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            player_manager,
            game_manager,
            adapters,
            game_class,
            action_timeout,
            recordings_dir,
            config: RwLock::new(config),
            queue: Mutex::new(Vec::new()),
            last_quality_scores: Mutex::new(HashMap::new()),
        })
    }

    /// Current config snapshot.
    pub async fn config(&self) -> MatchmakingConfig {
        self.config.read().await.clone()
    }

    /// Swap in a freshly re-read `matchmaking` subtable (§6: hot-reloadable
    /// without restart). Takes effect on the next `update()` pass.
    pub async fn reload_config(&self, config: MatchmakingConfig) {
        *self.config.write().await = config;
    }

    /// Current queue length (§8 property #1 is checked against this).
    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Snapshot of the queue for the monitor writer's "Players in queue"
    /// block.
    pub async fn queue_snapshot(&self) -> Vec<QueueSnapshotEntry> {
        self.queue
            .lock()
            .await
            .iter()
            .map(|e| QueueSnapshotEntry {
                player_id: e.player_id,
                username: e.user.username.clone(),
                in_queue_since: e.in_queue_since,
            })
            .collect()
    }

    /// Snapshot of the match-quality cache built by the most recent
    /// `update()` pass, for the monitor writer's "Match quality scores"
    /// block.
    pub async fn quality_scores_snapshot(&self) -> Vec<((String, String), f64)> {
        self.last_quality_scores
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// §4.6 `try_match`: ask the session whether it wants to play; on
    /// `true`, notify it and append a queue entry.
    pub async fn try_match(&self, player_id: PlayerId) {
        let Some(session) = self.player_manager.get_player_by_id(player_id).await else {
            return;
        };
        let Some(user_id) = self.player_manager.get_user_id(player_id).await else {
            return;
        };
        let Ok(true) = session.is_ready(self.action_timeout).await else {
            return;
        };
        let Some(user) = self.db.get_user(user_id).ok().flatten() else {
            return;
        };

        session.notify_info("Waiting in queue").await;

        let mut queue = self.queue.lock().await;
        // Defensive: at most one entry per player_id.
        queue.retain(|e| e.player_id != player_id);
        queue.push(QueueEntry {
            player_id,
            user: UserSnapshot {
                user_id: user.user_id,
                username: user.username,
                role: user.role,
                mu: user.mu,
                sigma: user.sigma,
            },
            in_queue_since: Utc::now(),
        });
    }

    /// §4.6 `remove`: drop all entries for `player_id` (defensive).
    pub async fn remove(&self, player_id: PlayerId) {
        self.queue.lock().await.retain(|e| e.player_id != player_id);
    }

    fn legal_pair(a: &UserSnapshot, b: &UserSnapshot) -> bool {
        a.user_id != b.user_id && !(a.role == Role::Bot && b.role == Role::Bot)
    }

    fn quality(config: &MatchmakingConfig, a: &QueueEntry, b: &QueueEntry) -> f64 {
        let wait_a = (Utc::now() - a.in_queue_since).num_milliseconds() as f64 / 1000.0;
        let wait_b = (Utc::now() - b.in_queue_since).num_milliseconds() as f64 / 1000.0;
        let combined_minutes = (wait_a + wait_b) / 60.0;
        let waiting_bonus = (combined_minutes - 1.0).max(0.0) * config.percental_time_bonus;
        let draw_prob = rating::predict_draw(
            Rating::create_rating(a.user.mu, a.user.sigma),
            Rating::create_rating(b.user.mu, b.user.sigma),
        );
        draw_prob + waiting_bonus
    }

    /// §4.6 matching pass, invoked once per server tick. Reads the
    /// matchmaking config fresh from the `RwLock` so a hot-reload
    /// (`reload_config`) takes effect on the very next pass.
    pub async fn update(self: &Arc<Self>) {
        let config = self.config.read().await.clone();
        let mut cache: HashMap<(String, String), f64> = HashMap::new();
        let mut queue = self.queue.lock().await;

        let authenticated = self.player_manager.authenticated_count().await as f64;
        let min_waiting =
            (authenticated * config.percentage_min_players_waiting).floor() as usize;
        if queue.len() < min_waiting {
            *self.last_quality_scores.lock().await = cache;
            return;
        }

        let mut i = 0usize;
        while queue.len() >= 2 && i < queue.len() - 1 {
            if self.game_manager.active_count().await >= config.max_parallel_games {
                break;
            }

            let mut candidates: Vec<(usize, f64)> = Vec::new();
            for j in (i + 1)..queue.len() {
                if !Self::legal_pair(&queue[i].user, &queue[j].user) {
                    continue;
                }
                let key = cache_key(&queue[i].user.username, &queue[j].user.username);
                let q = *cache
                    .entry(key)
                    .or_insert_with(|| Self::quality(&config, &queue[i], &queue[j]));
                if q > config.match_quality_threshold {
                    candidates.push((j, q));
                }
            }

            if candidates.is_empty() {
                i += 1;
                continue;
            }

            let weights: Vec<f64> = candidates.iter().map(|(_, q)| *q).collect();
            let chosen = match WeightedIndex::new(&weights) {
                Ok(dist) => candidates[dist.sample(&mut rand::thread_rng())].0,
                Err(_) => candidates[0].0,
            };

            let (hi, lo) = if chosen > i { (chosen, i) } else { (i, chosen) };
            let b = queue.remove(hi);
            let a = queue.remove(lo);
            drop(queue);

            self.start_match(a, b).await;

            queue = self.queue.lock().await;
            // i is not advanced: whatever was at i+1 (or later) has
            // shifted down into i's old slot.
        }
        drop(queue);
        *self.last_quality_scores.lock().await = cache;
    }

    async fn start_match(self: &Arc<Self>, a: QueueEntry, b: QueueEntry) {
        let Some(session_a) = self.player_manager.get_player_by_id(a.player_id).await else {
            return;
        };
        let Some(session_b) = self.player_manager.get_player_by_id(b.player_id).await else {
            return;
        };
        let Some(adapter) = self
            .adapters
            .build(&self.game_class, [a.player_id, b.player_id])
        else {
            warn!(game_class = %self.game_class, "unknown game adapter, dropping match");
            return;
        };

        let game_id = GameId::new();
        let instance = GameInstance::new(
            game_id,
            [
                (a.player_id, Some(a.user.user_id), session_a),
                (b.player_id, Some(b.user.user_id), session_b),
            ],
            adapter,
            self.action_timeout,
            self.recordings_dir.clone(),
        );

        self.register_rating_callback(&instance).await;
        self.game_manager.start_game(instance).await;
        info!(%game_id, a = %a.user.username, b = %b.user.username, "match started");
    }

    async fn register_rating_callback(self: &Arc<Self>, instance: &Arc<GameInstance>) {
        let this = self.clone();
        instance
            .register_finish_callback(Box::new(move |report| {
                let this = this.clone();
                let report = report.clone();
                tokio::spawn(async move {
                    this.end_game(report).await;
                });
            }))
            .await;
    }

    /// §4.6 `end_game` finish callback: unless the game ended
    /// DISCONNECTED, pull current ratings, call `rate`, write them back;
    /// then re-enter both surviving players into the queue.
    async fn end_game(&self, report: crate::game::GameEndReport) {
        if let Some(result) = &report.result {
            if result.end_state != crate::db::EndState::Disconnected {
                if let (Some(u1), Some(u2)) = (
                    self.db.get_user(result.user1_id).ok().flatten(),
                    self.db.get_user(result.user2_id).ok().flatten(),
                ) {
                    let (r1, r2) = rating::rate(
                        Rating::create_rating(u1.mu, u1.sigma),
                        Rating::create_rating(u2.mu, u2.sigma),
                        result.score1,
                        result.score2,
                    );
                    let _ = self.db.update_rating(u1.user_id, r1.mu, r1.sigma);
                    let _ = self.db.update_rating(u2.user_id, r2.mu, r2.sigma);
                }
            }
        }

        for player_id in report.players {
            self.try_match(player_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct AlwaysReadySession {
        player_id: PlayerId,
        connected: AtomicBool,
        notify_count: AtomicUsize,
    }

    impl AlwaysReadySession {
        fn new(player_id: PlayerId) -> Arc<Self> {
            Arc::new(Self {
                player_id,
                connected: AtomicBool::new(true),
                notify_count: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PlayerSession for AlwaysReadySession {
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
            Ok(true)
        }
        async fn notify_start(&self, _game_id: &str) {}
        async fn get_action(
            &self,
            _observation: Vec<f64>,
            _timeout: Duration,
        ) -> Result<Vec<f64>, crate::error::CoreError> {
            Ok(vec![1.0, 0.0, 0.0])
        }
        async fn notify_end(&self, _player_won: bool, _stats: Vec<f64>) {}
        async fn notify_info(&self, _message: &str) {
            self.notify_count.fetch_add(1, Ordering::SeqCst);
        }
        async fn notify_error(&self, _message: &str) {}
        async fn disconnect(&self, _reason: &str) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    fn test_setup() -> (
        Arc<Database>,
        Arc<PlayerManager>,
        Arc<GameManager>,
        Arc<GameAdapterRegistry>,
    ) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let player_manager = Arc::new(PlayerManager::new(db.clone()));
        let game_manager = Arc::new(GameManager::new(db.clone()));
        let adapters = Arc::new(GameAdapterRegistry::with_builtins());
        (db, player_manager, game_manager, adapters)
    }

    async fn add_ready_player(
        db: &Database,
        pm: &PlayerManager,
        username: &str,
        role: Role,
    ) -> PlayerId {
        let token = format!("tok-{username}");
        db.register_user(username, "pw", &token, role).unwrap();
        let session = AlwaysReadySession::new(PlayerId::new());
        let player_id = session.player_id();
        pm.add(session).await;
        pm.auth(player_id, &token).await;
        player_id
    }

    fn tmp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("comprl-mm-test-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn queue_has_at_most_one_entry_per_player() {
        let (db, pm, gm, adapters) = test_setup();
        let mm = MatchmakingManager::new(
            db.clone(),
            pm.clone(),
            gm,
            adapters,
            "demo".into(),
            Duration::from_secs(1),
            tmp_dir(),
            MatchmakingConfig::default(),
        );
        let p1 = add_ready_player(&db, &pm, "alice", Role::User).await;
        mm.try_match(p1).await;
        mm.try_match(p1).await;
        assert_eq!(mm.queue_len().await, 1);
    }

    #[tokio::test]
    async fn self_match_is_refused() {
        let (db, pm, gm, adapters) = test_setup();
        let mm = MatchmakingManager::new(
            db.clone(),
            pm.clone(),
            gm.clone(),
            adapters,
            "demo".into(),
            Duration::from_secs(1),
            tmp_dir(),
            MatchmakingConfig {
                percentage_min_players_waiting: 0.0,
                ..Default::default()
            },
        );

        // One user, two simultaneous sessions.
        db.register_user("solo", "pw", "tok-solo", Role::User).unwrap();
        let s1 = AlwaysReadySession::new(PlayerId::new());
        let s2 = AlwaysReadySession::new(PlayerId::new());
        let p1 = s1.player_id();
        let p2 = s2.player_id();
        pm.add(s1).await;
        pm.add(s2).await;
        pm.auth(p1, "tok-solo").await;
        pm.auth(p2, "tok-solo").await;

        mm.try_match(p1).await;
        mm.try_match(p2).await;
        assert_eq!(mm.queue_len().await, 2);

        mm.update().await;
        assert_eq!(mm.queue_len().await, 2);
        assert_eq!(gm.active_count().await, 0);
    }

    #[tokio::test]
    async fn bot_vs_bot_is_refused() {
        let (db, pm, gm, adapters) = test_setup();
        let mm = MatchmakingManager::new(
            db.clone(),
            pm.clone(),
            gm.clone(),
            adapters,
            "demo".into(),
            Duration::from_secs(1),
            tmp_dir(),
            MatchmakingConfig {
                percentage_min_players_waiting: 0.0,
                ..Default::default()
            },
        );
        let p1 = add_ready_player(&db, &pm, "bot1", Role::Bot).await;
        let p2 = add_ready_player(&db, &pm, "bot2", Role::Bot).await;
        mm.try_match(p1).await;
        mm.try_match(p2).await;

        mm.update().await;
        assert_eq!(mm.queue_len().await, 2);
        assert_eq!(gm.active_count().await, 0);
    }

    #[tokio::test]
    async fn identical_ratings_match_immediately() {
        let (db, pm, gm, adapters) = test_setup();
        let mm = MatchmakingManager::new(
            db.clone(),
            pm.clone(),
            gm.clone(),
            adapters,
            "demo".into(),
            Duration::from_secs(1),
            tmp_dir(),
            MatchmakingConfig {
                percentage_min_players_waiting: 0.0,
                ..Default::default()
            },
        );
        let p1 = add_ready_player(&db, &pm, "a", Role::User).await;
        let p2 = add_ready_player(&db, &pm, "b", Role::User).await;
        mm.try_match(p1).await;
        mm.try_match(p2).await;

        mm.update().await;
        assert_eq!(mm.queue_len().await, 0);
        assert_eq!(gm.active_count().await, 1);
    }
}
