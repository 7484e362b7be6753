//! Persistence layer (C2).
//!
//! Durable store for users (credentials, token, skill rating) and finished
//! games. Backed by SQLite via `rusqlite`; schema matches §6 exactly.
//! Grounded on `UserData`/`GameData` in the original `sql_backend.py`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::error::CoreError;

/// A user's role, gating matchmaking legality (§4.6) and registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A human- or agent-controlled competitor.
    User,
    /// A non-competitive automated agent; two BOTs may never be matched.
    Bot,
    /// An administrator account.
    Admin,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Bot => "bot",
            Role::Admin => "admin",
        }
    }

    fn from_str(s: &str) -> Role {
        match s {
            "bot" => Role::Bot,
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

/// Persistent user record (§3).
#[derive(Debug, Clone)]
pub struct User {
    /// Stable integer identifier.
    pub user_id: i64,
    /// Unique, non-empty display/login name.
    pub username: String,
    /// Salted bcrypt hash of the account password.
    pub password_hash: String,
    /// Opaque authentication token.
    pub token: String,
    /// Account role.
    pub role: Role,
    /// Rating mean.
    pub mu: f64,
    /// Rating standard deviation.
    pub sigma: f64,
}

impl User {
    /// Ranking key: mu minus three standard deviations.
    pub fn score(&self) -> f64 {
        self.mu - 3.0 * self.sigma
    }
}

/// Outcome of a finished game (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndState {
    /// One player won outright.
    Win = 0,
    /// Scores tied.
    Draw = 1,
    /// A player disconnected before completion.
    Disconnected = 2,
}

impl EndState {
    fn to_i64(self) -> i64 {
        self as i64
    }

    fn from_i64(v: i64) -> EndState {
        match v {
            0 => EndState::Win,
            2 => EndState::Disconnected,
            _ => EndState::Draw,
        }
    }
}

/// Write-once record of a finished game (§3).
#[derive(Debug, Clone)]
pub struct GameResult {
    /// Opaque game identifier.
    pub game_id: String,
    /// First participant.
    pub user1_id: i64,
    /// Second participant.
    pub user2_id: i64,
    /// First participant's final score.
    pub score1: f64,
    /// Second participant's final score.
    pub score2: f64,
    /// When the game started.
    pub start_time: DateTime<Utc>,
    /// Canonical closure kind.
    pub end_state: EndState,
    /// Winning participant, required iff `end_state == Win`.
    pub winner_id: Option<i64>,
    /// Disconnecting participant, required iff `end_state == Disconnected`.
    pub disconnected_id: Option<i64>,
}

impl GameResult {
    /// Invariants from §3: WIN implies a valid winner, DISCONNECTED implies
    /// a valid disconnecter, DRAW implies no winner.
    pub fn is_consistent(&self) -> bool {
        match self.end_state {
            EndState::Win => matches!(self.winner_id, Some(id) if id == self.user1_id || id == self.user2_id),
            EndState::Disconnected => {
                matches!(self.disconnected_id, Some(id) if id == self.user1_id || id == self.user2_id)
            }
            EndState::Draw => self.winner_id.is_none(),
        }
    }
}

/// Pairwise head-to-head statistics between two users. Supplemental
/// feature (dashboard-adjacent), grounded on
/// `sql_backend.py::get_user_pair_statistics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairStatistics {
    /// Games where `user1` won.
    pub user1_wins: u64,
    /// Games where `user2` won.
    pub user2_wins: u64,
    /// Drawn games.
    pub draws: u64,
}

/// Thin synchronous wrapper around a SQLite connection.
///
/// §5 treats the database as a short, bounded-time call invoked directly
/// from the scheduler task; a `Mutex` serializes access since
/// `rusqlite::Connection` is `!Sync`.
pub struct Database {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE NOT NULL,
    password BLOB NOT NULL,
    token TEXT UNIQUE,
    role TEXT NOT NULL DEFAULT 'user',
    mu REAL NOT NULL DEFAULT 25.0,
    sigma REAL NOT NULL DEFAULT 8.333
);
CREATE TABLE IF NOT EXISTS games (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id TEXT UNIQUE NOT NULL,
    user1 INTEGER NOT NULL REFERENCES users(user_id),
    user2 INTEGER NOT NULL REFERENCES users(user_id),
    score1 REAL NOT NULL,
    score2 REAL NOT NULL,
    start_time DATETIME NOT NULL,
    end_state INTEGER NOT NULL,
    winner INTEGER REFERENCES users(user_id),
    disconnected INTEGER REFERENCES users(user_id)
);
";

impl Database {
    /// Open (creating if necessary) the SQLite file at `path` and apply
    /// the schema migration.
    pub fn open(path: impl AsRef<Path>) -> Result<Database, CoreError> {
        let conn = Connection::open(path)
            .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Database, CoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    /// Register a new user. `password` is hashed with bcrypt; `token` is
    /// the caller-generated opaque credential.
    pub fn register_user(
        &self,
        username: &str,
        password: &str,
        token: &str,
        role: Role,
    ) -> Result<i64, CoreError> {
        let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (username, password, token, role) VALUES (?1, ?2, ?3, ?4)",
            params![username, hash, token, role.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Look up a user by their authentication token (§4.2 `auth`).
    pub fn get_user_by_token(&self, token: &str) -> Result<Option<User>, CoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT user_id, username, password, token, role, mu, sigma \
                 FROM users WHERE token = ?1",
                params![token],
                Self::row_to_user,
            )
            .optional()?;
        Ok(row)
    }

    /// Look up a user by id, used for rating refresh in `end_game`.
    pub fn get_user(&self, user_id: i64) -> Result<Option<User>, CoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT user_id, username, password, token, role, mu, sigma \
                 FROM users WHERE user_id = ?1",
                params![user_id],
                Self::row_to_user,
            )
            .optional()?;
        Ok(row)
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            user_id: row.get(0)?,
            username: row.get(1)?,
            password_hash: row.get(2)?,
            token: row.get(3)?,
            role: Role::from_str(&row.get::<_, String>(4)?),
            mu: row.get(5)?,
            sigma: row.get(6)?,
        })
    }

    /// Write back an updated rating (`MatchmakingManager::end_game`).
    pub fn update_rating(&self, user_id: i64, mu: f64, sigma: f64) -> Result<(), CoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE users SET mu = ?1, sigma = ?2 WHERE user_id = ?3",
            params![mu, sigma, user_id],
        )?;
        Ok(())
    }

    /// Add `delta` to every user's sigma. Used by the score-decay job.
    pub fn decay_all_sigmas(&self, delta: f64) -> Result<usize, CoreError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("UPDATE users SET sigma = sigma + ?1", params![delta])?;
        Ok(n)
    }

    /// Restore every user's mu/sigma to the default prior. Admin action,
    /// grounded on `reset_all_matchmaking_parameters`.
    pub fn reset_all_matchmaking_parameters(&self) -> Result<usize, CoreError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("UPDATE users SET mu = 25.0, sigma = 8.333", [])?;
        Ok(n)
    }

    /// Insert a finished game's result exactly once (invariant #4).
    pub fn insert_game_result(&self, result: &GameResult) -> Result<(), CoreError> {
        debug_assert!(result.is_consistent());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO games \
             (game_id, user1, user2, score1, score2, start_time, end_state, winner, disconnected) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                result.game_id,
                result.user1_id,
                result.user2_id,
                result.score1,
                result.score2,
                result.start_time,
                result.end_state.to_i64(),
                result.winner_id,
                result.disconnected_id,
            ],
        )?;
        Ok(())
    }

    /// Head-to-head record between two users, most recent games first.
    /// Dashboard-adjacent supplemental feature.
    pub fn get_user_pair_statistics(
        &self,
        user_a: i64,
        user_b: i64,
    ) -> Result<PairStatistics, CoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user1, user2, end_state, winner FROM games \
             WHERE (user1 = ?1 AND user2 = ?2) OR (user1 = ?2 AND user2 = ?1)",
        )?;
        let mut stats = PairStatistics::default();
        let rows = stmt.query_map(params![user_a, user_b], |row| {
            let u1: i64 = row.get(0)?;
            let u2: i64 = row.get(1)?;
            let end_state = EndState::from_i64(row.get(2)?);
            let winner: Option<i64> = row.get(3)?;
            Ok((u1, u2, end_state, winner))
        })?;
        for row in rows {
            let (u1, _u2, end_state, winner) = row?;
            match end_state {
                EndState::Draw => stats.draws += 1,
                EndState::Win | EndState::Disconnected => {
                    if let Some(w) = winner {
                        if w == user_a {
                            stats.user1_wins += 1;
                        } else if w == user_b {
                            stats.user2_wins += 1;
                        }
                    }
                }
            }
            let _ = u1;
        }
        Ok(stats)
    }

    /// Verify a plaintext password against the account's stored hash.
    pub fn verify_password(&self, user: &User, password: &str) -> bool {
        bcrypt::verify(password, &user.password_hash).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup_by_token() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .register_user("alice", "hunter2", "tok-alice", Role::User)
            .unwrap();
        let user = db.get_user_by_token("tok-alice").unwrap().unwrap();
        assert_eq!(user.user_id, id);
        assert_eq!(user.username, "alice");
        assert_eq!(user.mu, 25.0);
        assert!(db.verify_password(&user, "hunter2"));
        assert!(!db.verify_password(&user, "wrong"));
    }

    #[test]
    fn unknown_token_returns_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_user_by_token("nope").unwrap().is_none());
    }

    #[test]
    fn rating_update_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .register_user("bob", "pw", "tok-bob", Role::User)
            .unwrap();
        db.update_rating(id, 30.0, 5.0).unwrap();
        let user = db.get_user(id).unwrap().unwrap();
        assert_eq!(user.mu, 30.0);
        assert_eq!(user.sigma, 5.0);
    }

    #[test]
    fn game_result_insert_and_invariants() {
        let db = Database::open_in_memory().unwrap();
        let a = db.register_user("a", "pw", "ta", Role::User).unwrap();
        let b = db.register_user("b", "pw", "tb", Role::User).unwrap();
        let result = GameResult {
            game_id: "g1".into(),
            user1_id: a,
            user2_id: b,
            score1: 3.0,
            score2: 1.0,
            start_time: Utc::now(),
            end_state: EndState::Win,
            winner_id: Some(a),
            disconnected_id: None,
        };
        assert!(result.is_consistent());
        db.insert_game_result(&result).unwrap();

        let bad = GameResult {
            winner_id: None,
            ..result
        };
        assert!(!bad.is_consistent());
    }

    #[test]
    fn decay_and_reset() {
        let db = Database::open_in_memory().unwrap();
        let id = db.register_user("c", "pw", "tc", Role::User).unwrap();
        db.update_rating(id, 30.0, 2.0).unwrap();
        db.decay_all_sigmas(0.5).unwrap();
        let user = db.get_user(id).unwrap().unwrap();
        assert_eq!(user.sigma, 2.5);

        db.reset_all_matchmaking_parameters().unwrap();
        let user = db.get_user(id).unwrap().unwrap();
        assert_eq!(user.mu, 25.0);
        assert_eq!(user.sigma, 8.333);
    }

    #[test]
    fn pair_statistics_tally_wins_and_draws() {
        let db = Database::open_in_memory().unwrap();
        let a = db.register_user("x", "pw", "tx", Role::User).unwrap();
        let b = db.register_user("y", "pw", "ty", Role::User).unwrap();
        db.insert_game_result(&GameResult {
            game_id: "g1".into(),
            user1_id: a,
            user2_id: b,
            score1: 1.0,
            score2: 0.0,
            start_time: Utc::now(),
            end_state: EndState::Win,
            winner_id: Some(a),
            disconnected_id: None,
        })
        .unwrap();
        db.insert_game_result(&GameResult {
            game_id: "g2".into(),
            user1_id: b,
            user2_id: a,
            score1: 1.0,
            score2: 1.0,
            start_time: Utc::now(),
            end_state: EndState::Draw,
            winner_id: None,
            disconnected_id: None,
        })
        .unwrap();

        let stats = db.get_user_pair_statistics(a, b).unwrap();
        assert_eq!(stats.user1_wins, 1);
        assert_eq!(stats.user2_wins, 0);
        assert_eq!(stats.draws, 1);
    }
}
