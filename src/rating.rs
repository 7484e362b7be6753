//! Rating model (C3).
//!
//! A two-player skill model with Plackett-Luce-style semantics. Wraps
//! `skillratings`'s Weng-Lin implementation -- the Rust analogue of the
//! original `openskill.models.PlackettLuce` dependency (`managers.py`).
//! Pure functions only: no mutation, no I/O.

use skillratings::weng_lin::{expected_score, weng_lin, WengLinConfig, WengLinRating};
use skillratings::Outcomes;

/// A user's rating, mu/sigma only (matches the `User` fields in `db`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rating {
    /// Mean skill estimate.
    pub mu: f64,
    /// Uncertainty.
    pub sigma: f64,
}

impl Rating {
    /// Build a rating from stored mu/sigma (§4.5 `create_rating`).
    pub fn create_rating(mu: f64, sigma: f64) -> Rating {
        Rating { mu, sigma }
    }

    fn to_weng_lin(self) -> WengLinRating {
        WengLinRating {
            rating: self.mu,
            uncertainty: self.sigma,
        }
    }

    fn from_weng_lin(r: WengLinRating) -> Rating {
        Rating {
            mu: r.rating,
            sigma: r.uncertainty,
        }
    }
}

/// Predicted probability that a match between `a` and `b` ends in a draw.
/// Always in `[0, 1]` (§4.5, invariant used by §8 properties 5/6).
///
/// `skillratings` gives us each side's expected win probability; the two
/// necessarily sum to 1, and how far they sit from 0.5 measures the skill
/// gap. We fold that gap into a draw estimate: evenly matched players
/// (expectations near 0.5/0.5) draw often, lopsided pairings almost never.
pub fn predict_draw(a: Rating, b: Rating) -> f64 {
    let (p_a, _p_b) = expected_score(&a.to_weng_lin(), &b.to_weng_lin(), &WengLinConfig::new());
    (1.0 - (2.0 * p_a - 1.0).abs()).clamp(0.0, 1.0)
}

/// Update both ratings from a finished game's scores. Higher score wins;
/// equal scores are a draw. Deterministic given its inputs (§4.5).
pub fn rate(a: Rating, b: Rating, score_a: f64, score_b: f64) -> (Rating, Rating) {
    let outcome = if score_a > score_b {
        Outcomes::WIN
    } else if score_a < score_b {
        Outcomes::LOSS
    } else {
        Outcomes::DRAW
    };
    let (new_a, new_b) = weng_lin(
        &a.to_weng_lin(),
        &b.to_weng_lin(),
        &outcome,
        &WengLinConfig::new(),
    );
    (Rating::from_weng_lin(new_a), Rating::from_weng_lin(new_b))
}
