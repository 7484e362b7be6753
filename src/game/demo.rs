//! Reference game adapter: best-of-`ROUNDS` rock-paper-scissors.
//!
//! Registered under the name `"demo"`. Exists so the adapter registry and
//! the orchestrator (`game::instance`) have a concrete implementation to
//! run in tests; not meant to be a serious competitive game. Round
//! bookkeeping (a cycle counter with a hard cap) is loosely modeled on the
//! teamprojekt prototype's `cycle_count`/`MAX_CYCLE_COUNT` pattern.

use std::collections::HashMap;

use super::adapter::{GameAdapter, Players};
use crate::ids::PlayerId;

const ROUNDS: u32 = 5;

/// One-hot action: `[1,0,0]` rock, `[0,1,0]` paper, `[0,0,1]` scissors.
/// Over-long vectors truncate to the first three elements (§9(a):
/// adapter-local, not a core rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Throw {
    Rock,
    Paper,
    Scissors,
}

impl Throw {
    fn from_action(action: &[f64]) -> Option<Throw> {
        let action = &action[..action.len().min(3)];
        if action.iter().any(|v| v.is_nan()) {
            return None;
        }
        let idx = action
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)?;
        match idx {
            0 => Some(Throw::Rock),
            1 => Some(Throw::Paper),
            _ => Some(Throw::Scissors),
        }
    }

    /// `true` if `self` beats `other`.
    fn beats(self, other: Throw) -> bool {
        matches!(
            (self, other),
            (Throw::Rock, Throw::Scissors)
                | (Throw::Paper, Throw::Rock)
                | (Throw::Scissors, Throw::Paper)
        )
    }
}

/// Reference `GameAdapter` implementation.
pub struct RockPaperScissorsAdapter {
    players: Players,
    wins: HashMap<PlayerId, u32>,
    round: u32,
    actions_log: Vec<(PlayerId, Vec<f64>)>,
}

impl RockPaperScissorsAdapter {
    /// Construct a fresh match for `players`.
    pub fn new(players: Players) -> Self {
        let mut wins = HashMap::new();
        wins.insert(players[0], 0);
        wins.insert(players[1], 0);
        Self {
            players,
            wins,
            round: 0,
            actions_log: Vec::new(),
        }
    }

    fn opponent(&self, player: PlayerId) -> PlayerId {
        if player == self.players[0] {
            self.players[1]
        } else {
            self.players[0]
        }
    }
}

impl GameAdapter for RockPaperScissorsAdapter {
    fn validate_action(&self, action: &[f64]) -> bool {
        Throw::from_action(action).is_some()
    }

    fn observation_for(&self, player: PlayerId) -> Vec<f64> {
        let mine = *self.wins.get(&player).unwrap_or(&0) as f64;
        let theirs = *self.wins.get(&self.opponent(player)).unwrap_or(&0) as f64;
        vec![self.round as f64, mine, theirs]
    }

    fn update(&mut self, actions: &HashMap<PlayerId, Vec<f64>>) -> bool {
        for (player, action) in actions {
            self.actions_log.push((*player, action.clone()));
        }
        let t1 = Throw::from_action(&actions[&self.players[0]]);
        let t2 = Throw::from_action(&actions[&self.players[1]]);
        if let (Some(t1), Some(t2)) = (t1, t2) {
            if t1.beats(t2) {
                *self.wins.get_mut(&self.players[0]).unwrap() += 1;
            } else if t2.beats(t1) {
                *self.wins.get_mut(&self.players[1]).unwrap() += 1;
            }
        }
        self.round += 1;
        self.round >= ROUNDS
    }

    fn player_won(&self, player: PlayerId) -> bool {
        if self.round < ROUNDS {
            return false;
        }
        let mine = *self.wins.get(&player).unwrap_or(&0);
        let theirs = *self.wins.get(&self.opponent(player)).unwrap_or(&0);
        mine > theirs
    }

    fn player_stats(&self, player: PlayerId) -> Vec<f64> {
        vec![
            *self.wins.get(&player).unwrap_or(&0) as f64,
            self.round as f64,
        ]
    }

    fn score(&self, player: PlayerId) -> f64 {
        *self.wins.get(&player).unwrap_or(&0) as f64
    }

    fn recording(&self) -> serde_json::Value {
        let actions: Vec<_> = self
            .actions_log
            .iter()
            .map(|(p, a)| serde_json::json!({"player": p.to_string(), "action": a}))
            .collect();
        serde_json::json!({ "actions": actions, "rounds": ROUNDS })
    }
}
