//! Elo rating update (spec §4.3) — standard Elo with K=32.
//!
//! Factored out of `engine` because it is pure and has no dependency on
//! game state beyond two ratings and a score; see DESIGN.md's resolution
//! of the "Elo only on natural conclusion" Open Question — the formula
//! below runs on every Started→Finished transition regardless of
//! `conclusion`, fed the appropriate `Score` for how the game ended.

pub const K_FACTOR: f64 = 32.0;

/// The actual score contributed by one side: win, draw, or loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Win,
    Draw,
    Loss,
}

impl Score {
    fn as_f64(self) -> f64 {
        match self {
            Score::Win => 1.0,
            Score::Draw => 0.5,
            Score::Loss => 0.0,
        }
    }

    pub fn opponent_score(self) -> Score {
        match self {
            Score::Win => Score::Loss,
            Score::Draw => Score::Draw,
            Score::Loss => Score::Win,
        }
    }
}

/// Expected score for the side rated `rating_a` against `rating_b`.
fn expected_score(rating_a: i32, rating_b: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf((rating_b - rating_a) as f64 / 400.0))
}

/// Returns the new rating for side A after a game against side B, given
/// A's actual score. `R_A' = round(R_A + K * (S_A - E_A))`.
pub fn updated_rating(rating_a: i32, rating_b: i32, score_a: Score) -> i32 {
    let expected = expected_score(rating_a, rating_b);
    let delta = K_FACTOR * (score_a.as_f64() - expected);
    (rating_a as f64 + delta).round() as i32
}

/// Computes both updated ratings for a finished game in one call.
pub fn update_pair(rating_host: i32, rating_away: i32, host_score: Score) -> (i32, i32) {
    let new_host = updated_rating(rating_host, rating_away, host_score);
    let new_away = updated_rating(rating_away, rating_host, host_score.opponent_score());
    (new_host, new_away)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ratings_win_gives_plus_16() {
        let (host, away) = update_pair(1000, 1000, Score::Win);
        assert_eq!(host, 1016);
        assert_eq!(away, 984);
    }

    #[test]
    fn equal_ratings_draw_is_a_no_op() {
        let (host, away) = update_pair(1000, 1000, Score::Draw);
        assert_eq!(host, 1000);
        assert_eq!(away, 1000);
    }

    #[test]
    fn deltas_are_equal_and_opposite() {
        let (host, away) = update_pair(1200, 1400, Score::Win);
        let host_delta = host - 1200;
        let away_delta = away - 1400;
        assert_eq!(host_delta, -away_delta);
    }

    #[test]
    fn higher_rated_winner_gains_less_than_k_half() {
        let (host, _away) = update_pair(1600, 1200, Score::Win);
        assert!(host - 1600 < 16);
    }
}
