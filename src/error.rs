//! Core error taxonomy.
//!
//! Each variant corresponds to one of the recoverable failure classes a
//! running server encounters; all of them are handled locally by the
//! component that raises them (see the module docs on `network::session`,
//! `matchmaking`, and `db`) and never unwind past an RPC boundary into the
//! scheduler.

use thiserror::Error;

/// Errors that can surface across component boundaries.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Session presented an unknown or malformed auth token.
    #[error("authentication failed")]
    AuthFailed,

    /// No reply arrived within the configured RPC timeout.
    #[error("player timed out after {0:?}")]
    PlayerTimeout(std::time::Duration),

    /// Transport closed mid-call.
    #[error("player disconnected")]
    PlayerDisconnected,

    /// Game adapter rejected an action.
    #[error("invalid action")]
    InvalidAction,

    /// The remote agent's handler raised.
    #[error("remote agent error: {0}")]
    RemoteAgentError(String),

    /// Database write or recording-file write failed.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// Invalid or incomplete configuration at startup. Fatal.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::PersistenceFailure(e.to_string())
    }
}
