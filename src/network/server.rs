//! Server loop (C10).
//!
//! Owns connect/disconnect/timeout/tick callbacks; drives the player,
//! game, and matchmaking managers on a fixed cadence; writes a monitoring
//! snapshot. Grounded on the teacher's accept-loop / background-task split
//! in `network/server.rs`, and on `Server` in the original
//! `__main__.py` for the callback names and the monitor snapshot's exact
//! text format (`_write_monitoring_data`).

use chrono::Utc;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::game::GameAdapterRegistry;
use crate::game_manager::GameManager;
use crate::ids::PlayerId;
use crate::matchmaking::MatchmakingManager;
use crate::network::session::{run_reader, run_writer, WsPlayerSession};
use crate::player_manager::PlayerManager;

/// Errors that can abort a server launch.
#[derive(Debug, Error)]
pub enum GameServerError {
    /// Could not bind the listening socket.
    #[error("failed to bind port {0}: {1}")]
    BindFailed(u16, std::io::Error),
}

/// Owns every manager and drives the scheduler tick.
pub struct GameServer {
    config: Config,
    db: Arc<Database>,
    player_manager: Arc<PlayerManager>,
    game_manager: Arc<GameManager>,
    matchmaking: Arc<MatchmakingManager>,
    last_monitor_write: Mutex<Option<std::time::Instant>>,
    monitor_interval: Duration,
    last_config_reload: Mutex<Option<std::time::Instant>>,
    config_reload_interval: Duration,
}

impl GameServer {
    /// Wire up every manager from `config` and a pre-opened database.
    pub fn new(config: Config, db: Arc<Database>, adapters: Arc<GameAdapterRegistry>) -> Arc<Self> {
        let player_manager = Arc::new(PlayerManager::new(db.clone()));
        let game_manager = Arc::new(GameManager::new(db.clone()));
        let matchmaking = MatchmakingManager::new(
            db.clone(),
            player_manager.clone(),
            game_manager.clone(),
            adapters,
            config.game_class.clone(),
            Duration::from_secs(config.timeout),
            config.game_actions_dir(),
            config.matchmaking.clone(),
        );

        Arc::new(Self {
            config,
            db,
            player_manager,
            game_manager,
            matchmaking,
            last_monitor_write: Mutex::new(None),
            monitor_interval: Duration::from_secs(10),
            last_config_reload: Mutex::new(None),
            config_reload_interval: Duration::from_secs(10),
        })
    }

    /// Run the accept loop and the scheduler loop concurrently. Returns
    /// only on a fatal bind error.
    pub async fn run(self: &Arc<Self>) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port))
            .await
            .map_err(|e| GameServerError::BindFailed(self.config.port, e))?;
        info!(port = self.config.port, "listening");

        let this = self.clone();
        tokio::spawn(async move { this.run_scheduler().await });

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(stream).await {
                    warn!(%addr, error = %e, "connection handler failed");
                }
            });
        }
    }

    async fn run_scheduler(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(
            self.config.server_update_interval,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.on_update().await;
        }
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let ws = accept_async(stream).await?;
        let (sink, stream) = ws.split();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let player_id = PlayerId::new();
        let session = WsPlayerSession::new(player_id, tx);

        tokio::spawn(run_writer(sink, rx));
        let reader_session = session.clone();
        tokio::spawn(run_reader(stream, reader_session));

        self.on_connect(session).await;
        Ok(())
    }

    /// Register the session, authenticate it, and either enqueue it or
    /// disconnect it (§4.7).
    async fn on_connect(self: &Arc<Self>, session: Arc<WsPlayerSession>) {
        let player_id = session.player_id();
        self.player_manager.add(session.clone()).await;

        let timeout = Duration::from_secs(self.config.timeout);
        let auth_result = session.authenticate(timeout).await;
        let token = match auth_result {
            Ok(token) => token,
            Err(_) => {
                self.disconnect_and_cleanup(player_id, session, "Authentication failed")
                    .await;
                return;
            }
        };

        if !self.player_manager.auth(player_id, &token).await {
            self.disconnect_and_cleanup(player_id, session, "Authentication failed")
                .await;
            return;
        }

        session.notify_info("Authentication successful").await;
        self.matchmaking.try_match(player_id).await;
    }

    async fn disconnect_and_cleanup(
        &self,
        player_id: PlayerId,
        session: Arc<WsPlayerSession>,
        reason: &str,
    ) {
        session.disconnect(reason).await;
        self.on_disconnect(player_id).await;
    }

    /// §4.7 `on_disconnect`: unwind a player out of every manager.
    pub async fn on_disconnect(&self, player_id: PlayerId) {
        self.matchmaking.remove(player_id).await;
        self.player_manager.remove(player_id).await;
        self.game_manager.force_game_end(player_id).await;
    }

    /// §4.7 `on_timeout`: disconnect after a per-RPC timeout elapses.
    pub async fn on_timeout(&self, player_id: PlayerId, session: &Arc<WsPlayerSession>, after: Duration) {
        info!(%player_id, ?after, "player timed out");
        session.disconnect(&format!("Timeout after {}s", after.as_secs())).await;
        self.on_disconnect(player_id).await;
    }

    /// §4.7 `on_remote_error`: log only, never disconnects directly.
    pub async fn on_remote_error(&self, player_id: PlayerId, connected: bool, message: &str) {
        if connected {
            error!(%player_id, message, "remote agent error");
        } else {
            info!(%player_id, message, "remote agent error (already disconnected)");
        }
    }

    /// §4.7 `on_update`: hot-reload the matchmaking/score_decay subtables
    /// at most every `config_reload_interval`, run the matchmaking pass
    /// every tick, and, at most every 10 seconds, write the monitor
    /// snapshot.
    async fn on_update(&self) {
        self.maybe_reload_config().await;
        self.matchmaking.update().await;

        if self.config.monitor_log_path.is_none() {
            return;
        }
        let mut last = self.last_monitor_write.lock().await;
        let due = match *last {
            Some(t) => t.elapsed() >= self.monitor_interval,
            None => true,
        };
        if !due {
            return;
        }
        *last = Some(std::time::Instant::now());
        drop(last);

        if let Some(path) = &self.config.monitor_log_path {
            if let Err(e) = self.write_monitor_snapshot(path).await {
                warn!(error = %e, "failed to write monitor snapshot");
            }
        }
    }

    /// §6: re-read the `matchmaking` subtable from the config file at most
    /// every `config_reload_interval`, and swap it into the matchmaking
    /// manager. Every other key requires a restart and is left alone.
    async fn maybe_reload_config(&self) {
        let mut last = self.last_config_reload.lock().await;
        let due = match *last {
            Some(t) => t.elapsed() >= self.config_reload_interval,
            None => true,
        };
        if !due {
            return;
        }
        *last = Some(std::time::Instant::now());
        drop(last);

        match self.config.reload_hot_subtables() {
            Ok((matchmaking, _score_decay)) => self.matchmaking.reload_config(matchmaking).await,
            Err(e) => warn!(error = %e, "failed to hot-reload config, keeping previous matchmaking settings"),
        }
    }

    /// Builds the plain-text monitor snapshot, matching the original
    /// server's `_write_monitoring_data` format: a timestamp, then four
    /// blank-line-prefixed blocks each with one indented row per entry.
    async fn write_monitor_snapshot(&self, path: &std::path::Path) -> std::io::Result<()> {
        let connected = self.player_manager.list_connected().await;
        let games = self.game_manager.active_games_snapshot().await;
        let queue = self.matchmaking.queue_snapshot().await;
        let quality_scores = self.matchmaking.quality_scores_snapshot().await;

        let mut out = String::new();
        out.push_str(&Utc::now().to_rfc3339());
        out.push('\n');

        out.push_str(&format!("\nConnected players ({}):\n", connected.len()));
        for (id, username) in &connected {
            out.push_str(&format!(
                "\t{} [{}]\n",
                username.as_deref().unwrap_or("<unauthenticated>"),
                id
            ));
        }

        out.push_str(&format!("\nGames ({}):\n", games.len()));
        for (game_id, players) in &games {
            out.push_str(&format!("\t{} ({}, {})\n", game_id, players[0], players[1]));
        }

        out.push_str(&format!("\nPlayers in queue ({}):\n", queue.len()));
        for entry in &queue {
            out.push_str(&format!(
                "\t{} [{}] since {}\n",
                entry.username,
                entry.player_id,
                entry.in_queue_since.to_rfc3339()
            ));
        }

        out.push_str("\nMatch quality scores:\n");
        for ((u1, u2), score) in &quality_scores {
            out.push_str(&format!("\t{u1} vs {u2}: {score:.4}\n"));
        }

        out.push_str("\nEND\n");

        // Best-effort atomicity: write to a temp file then rename, but
        // tolerate torn writes per §5 (readers must tolerate them too).
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, out)?;
        std::fs::rename(tmp_path, path)
    }

    /// Access to the persistence layer, e.g. for the score-decay binary.
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }
}
