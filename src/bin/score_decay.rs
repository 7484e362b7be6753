//! Score-decay background job.
//!
//! Periodically increases every user's rating uncertainty (`sigma`) so
//! that inactive players drift back toward "unknown" rather than keeping
//! a stale, overconfident rating forever. Supplemental feature pulled in
//! from `original_source/.../scripts/score_decay.py`'s `adjust_scores`
//! loop; `config.score_decay.*` (§6) supplies the interval and delta.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use comprl::{Config, Database};

/// Runs the periodic rating-decay job against a CompRL database.
#[derive(Parser, Debug)]
#[command(name = "comprl-score-decay")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "comprl.toml")]
    config: String,

    /// Run one decay pass immediately and exit, ignoring the configured
    /// interval.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: {e}");
            std::process::exit(1);
        }
    };

    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    let db = match Database::open(&config.database_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            eprintln!("fatal: failed to open database: {e}");
            std::process::exit(1);
        }
    };

    if cli.once || config.score_decay.interval_minutes == 0 {
        run_once(&db, config.score_decay.delta);
        return;
    }

    // §6: `score_decay` is hot-reloadable -- re-read it from disk before
    // every pass instead of trusting the snapshot taken at startup, so an
    // operator editing the config file doesn't need to restart this job.
    // The sleep duration itself is recomputed each time for the same
    // reason, which `tokio::time::interval`'s fixed period can't give us.
    let mut decay = config.score_decay.clone();
    loop {
        tokio::time::sleep(Duration::from_secs(decay.interval_minutes.max(1) * 60)).await;
        match config.reload_hot_subtables() {
            Ok((_, score_decay)) => decay = score_decay,
            Err(e) => warn!(error = %e, "failed to reload config, keeping previous score_decay settings"),
        }
        if decay.interval_minutes == 0 {
            continue;
        }
        run_once(&db, decay.delta);
    }
}

fn run_once(db: &Database, delta: f64) {
    match db.decay_all_sigmas(delta) {
        Ok(n) => info!(users = n, delta, "applied score decay"),
        Err(e) => warn!(error = %e, "score decay failed"),
    }
}
