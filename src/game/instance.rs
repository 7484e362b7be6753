//! Game instance (C7).
//!
//! Runs one match: polls both sessions for actions each tick, applies them
//! via the game adapter (C6), detects end, emits a result. Grounded on
//! `IGame`/`IPlayer` in the original `interfaces.py` -- `_run`/`_end`/
//! `force_end`/`get_result` map directly onto this module's methods.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::adapter::GameAdapter;
use crate::db::{EndState, GameResult};
use crate::ids::{GameId, PlayerId};
use crate::network::session::PlayerSession;

struct PlayerSlot {
    player_id: PlayerId,
    user_id: Option<i64>,
    session: Arc<dyn PlayerSession>,
}

/// Outcome handed to every registered finish callback (§4.4/§4.6 "finish
/// callbacks"). `result` is `None` exactly when `get_result()` would have
/// returned null: a recoverable bug condition where a participant's
/// user_id never resolved.
#[derive(Debug, Clone)]
pub struct GameEndReport {
    /// The game that ended.
    pub game_id: GameId,
    /// The two participants, in the order passed to `GameInstance::new`.
    pub players: [PlayerId; 2],
    /// Persisted result, or `None` if persistence should be skipped.
    pub result: Option<GameResult>,
}

/// One running (or just-finished) match.
pub struct GameInstance {
    game_id: GameId,
    players: [PlayerSlot; 2],
    adapter: Mutex<Box<dyn GameAdapter>>,
    disconnected_player_id: Mutex<Option<PlayerId>>,
    start_time: DateTime<Utc>,
    ended: AtomicBool,
    finish_callbacks: Mutex<Vec<Box<dyn Fn(&GameEndReport) + Send + Sync>>>,
    action_timeout: Duration,
    recordings_dir: PathBuf,
}

impl GameInstance {
    /// Create a new instance. Does not start it -- call `start()` once
    /// registered with the game manager.
    pub fn new(
        game_id: GameId,
        players: [(PlayerId, Option<i64>, Arc<dyn PlayerSession>); 2],
        adapter: Box<dyn GameAdapter>,
        action_timeout: Duration,
        recordings_dir: PathBuf,
    ) -> Arc<GameInstance> {
        let [p1, p2] = players;
        Arc::new(GameInstance {
            game_id,
            players: [
                PlayerSlot {
                    player_id: p1.0,
                    user_id: p1.1,
                    session: p1.2,
                },
                PlayerSlot {
                    player_id: p2.0,
                    user_id: p2.1,
                    session: p2.2,
                },
            ],
            adapter: Mutex::new(adapter),
            disconnected_player_id: Mutex::new(None),
            start_time: Utc::now(),
            ended: AtomicBool::new(false),
            finish_callbacks: Mutex::new(Vec::new()),
            action_timeout,
            recordings_dir,
        })
    }

    /// This game's id.
    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    /// The two participants' player ids.
    pub fn player_ids(&self) -> [PlayerId; 2] {
        [self.players[0].player_id, self.players[1].player_id]
    }

    /// Whether `player_id` is one of this game's two participants.
    pub fn has_player(&self, player_id: PlayerId) -> bool {
        self.players.iter().any(|p| p.player_id == player_id)
    }

    /// Register a finish callback (used by the game manager to persist a
    /// result, and by the matchmaking manager to update ratings and
    /// re-queue both players).
    pub async fn register_finish_callback(
        &self,
        cb: Box<dyn Fn(&GameEndReport) + Send + Sync>,
    ) {
        self.finish_callbacks.lock().await.push(cb);
    }

    /// Broadcast `notify_start` to both players.
    pub async fn start(&self) {
        for p in &self.players {
            p.session.notify_start(&self.game_id.to_string()).await;
        }
    }

    fn slot(&self, player_id: PlayerId) -> &PlayerSlot {
        self.players
            .iter()
            .find(|p| p.player_id == player_id)
            .expect("player_id must belong to this game")
    }

    fn other(&self, player_id: PlayerId) -> PlayerId {
        if player_id == self.players[0].player_id {
            self.players[1].player_id
        } else {
            self.players[0].player_id
        }
    }

    /// Run one tick of the orchestration algorithm (§4.3). Returns `true`
    /// once the game has ended (either because the adapter reported the
    /// match over, or because a player was disconnected/invalid).
    pub async fn run_tick(&self) -> bool {
        if self.ended.load(Ordering::SeqCst) {
            return true;
        }
        if self.disconnected_player_id.lock().await.is_some() {
            // A disconnect was already observed; abort without further RPCs.
            self._end("Player disconnected").await;
            return true;
        }

        let obs = {
            let adapter = self.adapter.lock().await;
            [
                adapter.observation_for(self.players[0].player_id),
                adapter.observation_for(self.players[1].player_id),
            ]
        };

        let (r1, r2) = tokio::join!(
            self.players[0]
                .session
                .get_action(obs[0].clone(), self.action_timeout),
            self.players[1]
                .session
                .get_action(obs[1].clone(), self.action_timeout),
        );

        for (player, result) in [
            (self.players[0].player_id, &r1),
            (self.players[1].player_id, &r2),
        ] {
            if let Err(e) = result {
                warn!(game_id = %self.game_id, %player, error = %e, "player dropped out of tick");
                self.slot(player).session.disconnect("Player disconnected").await;
                *self.disconnected_player_id.lock().await = Some(player);
            }
        }
        if self.disconnected_player_id.lock().await.is_some() {
            self._end("Player disconnected").await;
            return true;
        }

        let actions: HashMap<PlayerId, Vec<f64>> = [
            (self.players[0].player_id, r1.unwrap()),
            (self.players[1].player_id, r2.unwrap()),
        ]
        .into_iter()
        .collect();

        let invalid: Vec<PlayerId> = {
            let adapter = self.adapter.lock().await;
            [
                self.players[0].player_id,
                self.players[1].player_id,
            ]
            .into_iter()
            .filter(|p| !adapter.validate_action(&actions[p]))
            .collect()
        };
        if !invalid.is_empty() {
            for player in &invalid {
                warn!(game_id = %self.game_id, %player, "invalid action");
                self.slot(*player).session.disconnect("Invalid action").await;
            }
            let mut disconnected = self.disconnected_player_id.lock().await;
            if disconnected.is_none() {
                *disconnected = Some(invalid[0]);
            }
            drop(disconnected);
            self._end("Invalid action").await;
            return true;
        }

        let finished = {
            let mut adapter = self.adapter.lock().await;
            adapter.update(&actions)
        };
        if finished {
            self._end("Player won").await;
        }
        finished
    }

    async fn _end(&self, reason: &str) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return; // idempotent
        }
        info!(game_id = %self.game_id, reason, "game ended");

        if self.disconnected_player_id.lock().await.is_none() {
            if let Err(e) = self.persist_recording().await {
                error!(game_id = %self.game_id, error = %e, "failed to persist recording, continuing");
            }
        }

        let report = self.build_end_report().await;
        for cb in self.finish_callbacks.lock().await.iter() {
            cb(&report);
        }

        for p in &self.players {
            if p.session.is_connected() {
                let (won, stats) = {
                    let adapter = self.adapter.lock().await;
                    (adapter.player_won(p.player_id), adapter.player_stats(p.player_id))
                };
                p.session.notify_end(won, stats).await;
            }
        }
    }

    async fn persist_recording(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.recordings_dir)?;
        let path = self.recordings_dir.join(format!("{}.json", self.game_id));
        let value = self.adapter.lock().await.recording();
        std::fs::write(path, serde_json::to_vec_pretty(&value)?)
    }

    /// `force_end`: called when the server observes a disconnect outside a
    /// tick (e.g. `on_disconnect`/`on_timeout`). Idempotent.
    pub async fn force_end(&self, player_id: PlayerId) {
        {
            let mut disconnected = self.disconnected_player_id.lock().await;
            if disconnected.is_none() {
                *disconnected = Some(player_id);
            }
        }
        self._end("Player disconnected").await;
    }

    /// §4.3 `get_result`.
    pub fn get_result(&self) -> Option<GameResult> {
        // Synchronous snapshot; callers only invoke this from `_end`,
        // after the adapter/disconnect state has settled.
        let disconnected = self
            .disconnected_player_id
            .try_lock()
            .ok()
            .and_then(|g| *g);

        let u1 = self.players[0].user_id;
        let u2 = self.players[1].user_id;
        let (Some(u1), Some(u2)) = (u1, u2) else {
            return None;
        };

        let adapter = self.adapter.try_lock().ok()?;
        let score1 = adapter.score(self.players[0].player_id);
        let score2 = adapter.score(self.players[1].player_id);
        let p1_won = adapter.player_won(self.players[0].player_id);
        let p2_won = adapter.player_won(self.players[1].player_id);
        drop(adapter);

        let (end_state, winner_id, disconnected_id) = if let Some(dc) = disconnected {
            let dc_user = if dc == self.players[0].player_id {
                u1
            } else {
                u2
            };
            (EndState::Disconnected, None, Some(dc_user))
        } else if p1_won {
            (EndState::Win, Some(u1), None)
        } else if p2_won {
            (EndState::Win, Some(u2), None)
        } else {
            (EndState::Draw, None, None)
        };

        Some(GameResult {
            game_id: self.game_id.to_string(),
            user1_id: u1,
            user2_id: u2,
            score1,
            score2,
            start_time: self.start_time,
            end_state,
            winner_id,
            disconnected_id,
        })
    }

    async fn build_end_report(&self) -> GameEndReport {
        GameEndReport {
            game_id: self.game_id,
            players: self.player_ids(),
            result: self.get_result(),
        }
    }

    #[allow(dead_code)]
    fn other_player(&self, player_id: PlayerId) -> PlayerId {
        self.other(player_id)
    }
}
