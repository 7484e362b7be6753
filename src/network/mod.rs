//! Network layer: wire protocol, session transport, auth, and the
//! accept/scheduler loop. Non-deterministic by nature; all game-specific
//! logic lives in `game::adapter`/`game::instance`.

pub mod auth;
pub mod protocol;
pub mod server;
pub mod session;

pub use auth::{authenticate, register, AuthConfig, AuthError};
pub use protocol::{ClientReply, ServerRequest};
pub use server::{GameServer, GameServerError};
pub use session::{PlayerSession, WsPlayerSession};
