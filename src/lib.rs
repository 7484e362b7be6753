//! # CompRL
//!
//! A competition server hosting two-player turn-based contests between
//! remote agents. Clients connect, authenticate with a token, and are
//! queued for matches; the server pairs them by skill and waiting time,
//! drives the full game as a turn-by-turn request/response exchange, and
//! records the outcome and updated skill ratings.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  config       - TOML configuration, hot-reloadable subtables  │
//! │  db           - users/games persistence (SQLite)              │
//! │  rating       - Weng-Lin skill model                          │
//! │  ids          - opaque player/game identifiers                │
//! │  player_manager   - connected/authenticated session registry   │
//! │  game/        - game adapter interface + per-game orchestrator │
//! │  game_manager     - owns active games, persists results        │
//! │  matchmaking      - queue, quality scoring, pairing            │
//! │  network/     - wire protocol, session transport, server loop  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod db;
pub mod error;
pub mod game;
pub mod game_manager;
pub mod ids;
pub mod matchmaking;
pub mod network;
pub mod player_manager;
pub mod rating;

pub use config::Config;
pub use db::Database;
pub use error::CoreError;
pub use game_manager::GameManager;
pub use ids::{GameId, PlayerId};
pub use matchmaking::MatchmakingManager;
pub use network::GameServer;
pub use player_manager::PlayerManager;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
