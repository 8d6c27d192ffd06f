//! Clock accountant (spec §4.2) — Fischer-with-delay-and-increment clock
//! arithmetic, factored out of the engine as pure functions so the
//! deduction/credit rules can be tested without a whole `Game`.
//!
//! A player starts with `main_thinking_time + fixed_extra_time` seconds.
//! `fixed_extra_time` is not tracked as a separate bucket at runtime — it is
//! baked into the initial total, exactly as §4.2 specifies. Granularity is
//! whole seconds throughout.

/// Deducts elapsed wall-clock seconds from a player's remaining time.
///
/// Returns the new remaining time, which may be negative — a negative
/// result means the player has timed out; the caller (the engine) is
/// responsible for treating that as a loss rather than clamping it.
pub fn deduct(remaining: i64, elapsed_seconds: i64) -> i64 {
    remaining - elapsed_seconds
}

/// Adds the per-turn increment back to a player's clock after they complete
/// a move. Only called on an accepted move, never on a clock that has
/// already gone negative.
pub fn credit_increment(remaining: i64, increment: i64) -> i64 {
    remaining + increment
}

/// `true` once `remaining` has gone strictly below zero — "remaining < 0
/// after deduction" is the spec's stated loss condition (§9's resolution of
/// the exact-boundary Open Question: a move that lands exactly on zero
/// remaining time is accepted, not a timeout).
pub fn has_timed_out(remaining: i64) -> bool {
    remaining < 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduct_then_credit_round_trips_for_on_time_moves() {
        let remaining = 60;
        let elapsed = 10;
        let increment = 5;
        let after_deduct = deduct(remaining, elapsed);
        assert_eq!(after_deduct, 50);
        let after_credit = credit_increment(after_deduct, increment);
        assert_eq!(after_credit, 55);
        assert!(!has_timed_out(after_credit));
    }

    #[test]
    fn exact_zero_remaining_is_not_a_timeout() {
        assert!(!has_timed_out(0));
        assert!(has_timed_out(-1));
    }

    #[test]
    fn large_elapsed_drives_remaining_negative() {
        let remaining = 10;
        let elapsed = 11;
        let after_deduct = deduct(remaining, elapsed);
        assert_eq!(after_deduct, -1);
        assert!(has_timed_out(after_deduct));
    }
}
