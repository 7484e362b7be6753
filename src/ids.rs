//! Identifier service (C1).
//!
//! Mints opaque, globally-unique identifiers for players and games. Both
//! newtypes wrap a v4 UUID; they are not interchangeable even though the
//! representation is identical, so a `PlayerId` can never be handed to an
//! API expecting a `GameId` by accident.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Per-connection identifier, minted when a session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

/// Per-match identifier, minted when a game instance is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameId(pub Uuid);

impl PlayerId {
    /// Mint a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl GameId {
    /// Mint a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for GameId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(PlayerId::new(), PlayerId::new());
        assert_ne!(GameId::new(), GameId::new());
    }

    #[test]
    fn player_and_game_ids_do_not_conflate() {
        // Same representation, different type -- this is a compile-time
        // guarantee, asserted here only to document the intent.
        let p = PlayerId::new();
        let g = GameId::new();
        assert_ne!(p.0, g.0);
    }
}
