//! Configuration (§6).
//!
//! Parsed from a TOML file under the top-level `[comprl]` key. Relative
//! path-valued options are resolved against the config file's own
//! directory at load time, matching the original Python loader. The
//! `matchmaking` and `score_decay` subtables are hot-reloadable; everything
//! else requires a restart.
//!
//! Deliberately not a global singleton (§9 Design Notes) -- `Config` is
//! constructed once in `main` and handed by `Arc` to whichever manager
//! needs it.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Scheduler tick period, in seconds.
    #[serde(default = "default_update_interval")]
    pub server_update_interval: f64,

    /// Per-RPC timeout, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Logger level (`tracing` filter directive).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Name of the registered game adapter to use (see `game::adapter`).
    pub game_class: String,

    /// SQLite database file.
    pub database_path: PathBuf,

    /// Directory holding per-game recordings. Must exist.
    pub data_dir: PathBuf,

    /// Optional monitor snapshot path.
    #[serde(default)]
    pub monitor_log_path: Option<PathBuf>,

    /// Shared secret gating new registrations.
    #[serde(default)]
    pub registration_key: String,

    /// Advertised hostname for clients.
    #[serde(default)]
    pub server_url: String,

    /// Hot-reloadable matchmaking tunables.
    #[serde(default)]
    pub matchmaking: MatchmakingConfig,

    /// Hot-reloadable score-decay tunables.
    #[serde(default)]
    pub score_decay: ScoreDecayConfig,

    /// Where this config was loaded from, kept so the hot-reload subtables
    /// can be re-read from the same file later. Not part of the TOML
    /// schema itself.
    #[serde(skip)]
    pub source_path: PathBuf,
}

fn default_port() -> u16 {
    8080
}
fn default_update_interval() -> f64 {
    1.0
}
fn default_timeout() -> u64 {
    10
}
fn default_log_level() -> String {
    "INFO".to_string()
}

/// §4.6 tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    /// Minimum acceptable match quality for a pairing to start.
    pub match_quality_threshold: f64,
    /// Fraction of authenticated players that must be queued before a
    /// matching pass runs at all.
    pub percentage_min_players_waiting: f64,
    /// Per-minute-over-one-minute waiting bonus factor.
    pub percental_time_bonus: f64,
    /// Hard cap on simultaneously active games.
    pub max_parallel_games: usize,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            match_quality_threshold: 0.3,
            percentage_min_players_waiting: 0.1,
            percental_time_bonus: 0.1,
            max_parallel_games: 100,
        }
    }
}

/// Score-decay background job tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoreDecayConfig {
    /// 0 disables the job.
    pub interval_minutes: u64,
    /// Sigma increment applied to every user each interval.
    pub delta: f64,
}

impl Default for ScoreDecayConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 0,
            delta: 0.5,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    comprl: Config,
}

impl Config {
    /// Load and validate configuration from a TOML file, resolving
    /// relative paths against the file's parent directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, CoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::ConfigError(format!("reading {}: {e}", path.display())))?;
        let parsed: ConfigFile = toml::from_str(&text)
            .map_err(|e| CoreError::ConfigError(format!("parsing {}: {e}", path.display())))?;
        let mut config = parsed.comprl;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.database_path = resolve(base, &config.database_path);
        config.data_dir = resolve(base, &config.data_dir);
        config.monitor_log_path = config.monitor_log_path.map(|p| resolve(base, &p));
        config.source_path = path.to_path_buf();

        config.validate()?;
        Ok(config)
    }

    /// Re-read just the `matchmaking`/`score_decay` subtables from the file
    /// this config was loaded from (§6: these two are hot-reloadable
    /// without a restart; every other key requires one). Returns an error
    /// if the file has since gone missing or become unparseable; callers
    /// should log and keep running on the stale subtables rather than
    /// treat this as fatal.
    pub fn reload_hot_subtables(&self) -> Result<(MatchmakingConfig, ScoreDecayConfig), CoreError> {
        let reloaded = Config::load(&self.source_path)?;
        Ok((reloaded.matchmaking, reloaded.score_decay))
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.game_class.is_empty() {
            return Err(CoreError::ConfigError("game_class must be set".into()));
        }
        if !self.data_dir.is_dir() {
            return Err(CoreError::ConfigError(format!(
                "data_dir {} does not exist",
                self.data_dir.display()
            )));
        }
        if self.server_update_interval <= 0.0 {
            return Err(CoreError::ConfigError(
                "server_update_interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Directory holding per-game action recordings.
    pub fn game_actions_dir(&self) -> PathBuf {
        self.data_dir.join("game_actions")
    }
}

fn resolve(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_defaults_and_resolves_relative_paths() {
        let dir = tempdir("loads-defaults");
        std::fs::create_dir_all(dir.join("data")).unwrap();
        let toml_path = dir.join("comprl.toml");
        let mut f = std::fs::File::create(&toml_path).unwrap();
        writeln!(
            f,
            r#"
            [comprl]
            game_class = "demo"
            database_path = "comprl.db"
            data_dir = "data"
            "#
        )
        .unwrap();

        let config = Config::load(&toml_path).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.database_path, dir.join("comprl.db"));
        assert_eq!(config.data_dir, dir.join("data"));
        assert_eq!(config.matchmaking.match_quality_threshold, 0.3);
    }

    #[test]
    fn missing_game_class_is_a_config_error() {
        let dir = tempdir("missing-game-class");
        std::fs::create_dir_all(dir.join("data")).unwrap();
        let toml_path = dir.join("comprl.toml");
        let mut f = std::fs::File::create(&toml_path).unwrap();
        writeln!(
            f,
            r#"
            [comprl]
            game_class = ""
            database_path = "comprl.db"
            data_dir = "data"
            "#
        )
        .unwrap();

        assert!(Config::load(&toml_path).is_err());
    }

    fn tempdir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "comprl-config-test-{}-{}",
            std::process::id(),
            label
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
