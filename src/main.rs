//! CompRL server entrypoint.
//!
//! Loads configuration, opens the database, builds the game adapter
//! registry, and runs the server loop. Grounded on `main()` in the
//! original `__main__.py`.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use comprl::db::Role;
use comprl::game::GameAdapterRegistry;
use comprl::network::{self, AuthConfig};
use comprl::{Config, Database, GameServer, VERSION};

/// CompRL competition server.
#[derive(Parser, Debug)]
#[command(name = "comprl-server", version = VERSION)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "comprl.toml")]
    config: String,

    /// Subcommand to run; defaults to serving.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new account, gated by the configured registration key
    /// (§6 `registration_key`).
    Register {
        /// Desired username.
        username: String,
        /// Desired password.
        password: String,
        /// Shared secret from the server's config.
        key: String,
        /// Register as a bot account instead of a regular user.
        #[arg(long)]
        bot: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            // ConfigError is fatal at startup (§7); logging isn't set up
            // yet since the level itself comes from the config we failed
            // to load, so this goes straight to stderr.
            eprintln!("fatal: {e}");
            std::process::exit(1);
        }
    };

    let level = config.log_level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    let db = match Database::open(&config.database_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(error = %e, "failed to open database");
            std::process::exit(1);
        }
    };

    if let Some(Command::Register {
        username,
        password,
        key,
        bot,
    }) = cli.command
    {
        let auth_config = AuthConfig {
            registration_key: config.registration_key.clone(),
        };
        let role = if bot { Role::Bot } else { Role::User };
        match network::register(&db, &auth_config, &key, &username, &password, role) {
            Ok((user_id, token)) => {
                println!("registered {username} (user_id={user_id}) with token {token}");
            }
            Err(e) => {
                eprintln!("fatal: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    info!("CompRL server v{}", VERSION);
    info!(port = config.port, game_class = %config.game_class, "starting up");

    let adapters = Arc::new(GameAdapterRegistry::with_builtins());
    let server = GameServer::new(config, db, adapters);

    if let Err(e) = server.run().await {
        error!(error = %e, "server exited");
        std::process::exit(1);
    }
}
