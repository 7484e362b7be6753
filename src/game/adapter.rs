//! Game adapter interface and registry (C6, §9 Design Notes).
//!
//! A game adapter is the pluggable, game-specific rules implementation C7
//! drives. The source loads one adapter class per process by file path
//! plus class name; reimplementations substitute a tagged registry
//! (name to constructor) instead, since the capability set is fixed.

use std::collections::HashMap;

use crate::ids::PlayerId;

/// The two players of one game instance, in a fixed order. An adapter is
/// free to treat them symmetrically or not (`observation_for` handles any
/// side-swap).
pub type Players = [PlayerId; 2];

/// Pluggable two-player game implementation (§4.3).
pub trait GameAdapter: Send {
    /// Domain-level action validity. §9(a): whether an over-long action
    /// vector should truncate or reject is adapter-local, not a core rule.
    fn validate_action(&self, action: &[f64]) -> bool;

    /// The observation the named player should see this tick.
    fn observation_for(&self, player: PlayerId) -> Vec<f64>;

    /// Advance one tick given both actions. Returns `true` iff the whole
    /// match (not merely a round) is over. Must update per-player scores,
    /// append to the recording buffer, and manage any internal round
    /// bookkeeping itself.
    fn update(&mut self, actions: &HashMap<PlayerId, Vec<f64>>) -> bool;

    /// Post-game query; `false` while the game is in progress.
    fn player_won(&self, player: PlayerId) -> bool;

    /// Post-game summary statistics for `notify_end`.
    fn player_stats(&self, player: PlayerId) -> Vec<f64>;

    /// Current score for the named player, fed into the rating update.
    fn score(&self, player: PlayerId) -> f64;

    /// Recording buffer contents, serialized verbatim to the per-game
    /// recording file at `_end`. Opaque to the core (§6): at minimum
    /// contains an `actions` key, may add adapter-supplied keys.
    fn recording(&self) -> serde_json::Value;
}

/// Constructs a fresh adapter instance for a newly matched pair of
/// players.
pub type AdapterConstructor = fn(Players) -> Box<dyn GameAdapter>;

/// Name-to-constructor table resolved from `config.game_class` at startup.
/// Replaces the original dynamic file/class string resolution (§9).
#[derive(Default)]
pub struct GameAdapterRegistry {
    constructors: HashMap<String, AdapterConstructor>,
}

impl GameAdapterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register an adapter under `name`.
    pub fn register(&mut self, name: impl Into<String>, ctor: AdapterConstructor) {
        self.constructors.insert(name.into(), ctor);
    }

    /// Build the default registry, containing every adapter shipped with
    /// this server.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("demo", |players| {
            Box::new(crate::game::demo::RockPaperScissorsAdapter::new(players))
        });
        registry
    }

    /// Construct an adapter by registered name.
    pub fn build(&self, name: &str, players: Players) -> Option<Box<dyn GameAdapter>> {
        self.constructors.get(name).map(|ctor| ctor(players))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_resolves_the_demo_adapter() {
        let registry = GameAdapterRegistry::with_builtins();
        let players = [PlayerId::new(), PlayerId::new()];
        assert!(registry.build("demo", players).is_some());
        assert!(registry.build("no-such-adapter", players).is_none());
    }
}
