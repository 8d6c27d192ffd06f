//! Game engine (spec §4.3) — owns one Game's state machine. Composes
//! `movegen` (chess rules) and `clock` (the clock accountant), exposes the
//! five command operations, and emits events for `hub` to fan out.
//!
//! Commands are serialised per game by the caller (see `hub::GameHub`,
//! which is the sole owner of a live game's `Game` value) — nothing in here
//! takes a lock, by design (spec §5: "this makes the state machine
//! reasoning sequential and removes need for locks inside the engine
//! itself").

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::KasupelError;
use crate::movegen;
use crate::types::*;

pub type GameId = Uuid;
pub type UserId = u64;

/// The shared store of games that have no hub yet — Searching, Invited, and
/// Started-but-nobody-has-connected-a-socket-yet games all live here.
/// `ws::ws_connect` removes an entry the moment a game is started and its
/// first socket connects, handing ownership to a spawned `hub::GameHub`
/// (§4.5 "one hub per live game").
pub type GameStore = std::sync::Mutex<std::collections::HashMap<GameId, Game>>;

/// The four-field time-control profile a Game was created with. Two
/// profiles are the matchmaker's notion of "identical time controls"
/// (spec §4.4) when all four fields are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeControl {
    pub main_thinking_time: i64,
    pub fixed_extra_time: i64,
    pub time_increment_per_turn: i64,
    pub mode: GameModeKey,
}

/// `GameMode` is not `Eq`/`Hash` (it carries a `#[repr(u8)]` discriminant
/// only), so the matchmaker profile key uses this small mirror enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameModeKey {
    Chess,
}

impl From<GameMode> for GameModeKey {
    fn from(m: GameMode) -> Self {
        match m {
            GameMode::Chess => GameModeKey::Chess,
        }
    }
}

/// A reason a side may claim a draw — the closed set in §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimDrawReason {
    AgreedDraw,
    ThreefoldRepetition,
    FiftyMoveRule,
}

/// An event the engine emits as a side effect of a command, for `hub` to
/// route per the per-recipient rules in §4.5.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A move was accepted; routed to the *opponent* of `mover`.
    MoveMade { mover: Side, mv: ChessMove },
    /// `side` offered a draw; routed to their opponent.
    DrawOffered { side: Side },
    /// The game started (both sides now connected and the position is
    /// live) — routed to both.
    GameStarted,
    /// The game ended — routed to both, followed by `game_disconnect`.
    GameEnded { winner: Winner, conclusion: Conclusion },
}

/// One live (or finished) game's full state — the Game row of spec §3.
#[derive(Debug, Clone)]
pub struct Game {
    pub id: GameId,
    pub mode: GameMode,
    pub host_id: UserId,
    pub away_id: Option<UserId>,
    pub invited_id: Option<UserId>,

    pub time_control: TimeControl,
    pub host_time: i64,
    pub away_time: i64,
    pub host_offering_draw: bool,
    pub away_offering_draw: bool,

    pub current_turn: Side,
    pub turn_number: u32,
    pub position: Position,
    pub position_history: Vec<Fingerprint>,
    pub halfmove_clock: u32,
    /// The full move sequence, for crash-recovery snapshots and archival
    /// (`storage::GameStorage`) — not exposed as a per-move replay API.
    pub move_log: Vec<ChessMove>,

    pub winner: Winner,
    pub conclusion: Conclusion,

    pub opened_at: i64,
    pub started_at: Option<i64>,
    pub last_turn: Option<i64>,
    pub ended_at: Option<i64>,

    /// Set once, at the moment the game concludes, by `settle_elo`.
    pub host_elo_delta: Option<i32>,
    pub away_elo_delta: Option<i32>,
}

impl Game {
    /// Creates a new Searching game (spec §4.4 `Find`'s "otherwise create
    /// a new game" branch) — `away_id`/`invited_id` both null.
    pub fn new_searching(id: GameId, host_id: UserId, time_control: TimeControl, opened_at: i64) -> Self {
        Self::new_pending(id, host_id, None, time_control, opened_at)
    }

    /// Creates a new Invited game (spec §4.4 `SendInvitation`) —
    /// `invited_id` set, `away_id` null.
    pub fn new_invited(
        id: GameId,
        host_id: UserId,
        invited_id: UserId,
        time_control: TimeControl,
        opened_at: i64,
    ) -> Self {
        Self::new_pending(id, host_id, Some(invited_id), time_control, opened_at)
    }

    fn new_pending(
        id: GameId,
        host_id: UserId,
        invited_id: Option<UserId>,
        time_control: TimeControl,
        opened_at: i64,
    ) -> Self {
        let initial_time = time_control.main_thinking_time + time_control.fixed_extra_time;
        let position = Position::starting(Color::White);
        let initial_fingerprint = movegen::fingerprint(&position);
        Self {
            id,
            mode: GameMode::Chess,
            host_id,
            away_id: None,
            invited_id,
            time_control,
            host_time: initial_time,
            away_time: initial_time,
            host_offering_draw: false,
            away_offering_draw: false,
            current_turn: Side::Host,
            turn_number: 0,
            position,
            position_history: vec![initial_fingerprint],
            halfmove_clock: 0,
            move_log: Vec::new(),
            winner: Winner::None,
            conclusion: Conclusion::None,
            opened_at,
            started_at: None,
            last_turn: None,
            ended_at: None,
            host_elo_delta: None,
            away_elo_delta: None,
        }
    }

    /// Binds a second player and starts the game — called by the
    /// matchmaker on `Find` pairing or `AcceptInvitation`.
    pub fn start(&mut self, away_id: UserId, wall_time: i64) {
        self.away_id = Some(away_id);
        self.invited_id = None;
        self.started_at = Some(wall_time);
        self.last_turn = Some(wall_time);
    }

    /// Rebuilds a `Game` from a stored header plus its move log — used by
    /// `storage::GameStorage` to restore active games after a restart.
    /// Replays the whole log through `movegen`; this is not the per-move
    /// analysis replay API (dropped, see DESIGN.md), just state
    /// reconstruction.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: GameId,
        host_id: UserId,
        away_id: Option<UserId>,
        invited_id: Option<UserId>,
        time_control: TimeControl,
        host_time: i64,
        away_time: i64,
        winner: Winner,
        conclusion: Conclusion,
        host_elo_delta: Option<i32>,
        away_elo_delta: Option<i32>,
        opened_at: i64,
        started_at: Option<i64>,
        ended_at: Option<i64>,
        moves: Vec<ChessMove>,
    ) -> Self {
        let mut position = Position::starting(Color::White);
        let mut position_history = vec![movegen::fingerprint(&position)];
        let mut halfmove_clock = 0u32;
        for mv in &moves {
            let reversible = movegen::is_reversible(mv, &position);
            position = movegen::apply(&position, mv);
            position_history.push(movegen::fingerprint(&position));
            halfmove_clock = if reversible { halfmove_clock + 1 } else { 0 };
        }
        let turn_number = moves.len() as u32;
        Self {
            id,
            mode: GameMode::Chess,
            host_id,
            away_id,
            invited_id,
            time_control,
            host_time,
            away_time,
            host_offering_draw: false,
            away_offering_draw: false,
            current_turn: Side::to_move_on(turn_number),
            turn_number,
            position,
            position_history,
            halfmove_clock,
            move_log: moves,
            winner,
            conclusion,
            opened_at,
            started_at,
            last_turn: ended_at.or(started_at),
            ended_at,
            host_elo_delta,
            away_elo_delta,
        }
    }

    pub fn is_started(&self) -> bool {
        self.away_id.is_some() && self.started_at.is_some() && self.ended_at.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    fn remaining_for(&self, side: Side) -> i64 {
        match side {
            Side::Host => self.host_time,
            Side::Away => self.away_time,
        }
    }

    fn set_remaining_for(&mut self, side: Side, value: i64) {
        match side {
            Side::Host => self.host_time = value,
            Side::Away => self.away_time = value,
        }
    }

    fn offering_draw_mut(&mut self, side: Side) -> &mut bool {
        match side {
            Side::Host => &mut self.host_offering_draw,
            Side::Away => &mut self.away_offering_draw,
        }
    }

    fn require_in_progress(&self) -> Result<(), KasupelError> {
        if !self.is_started() {
            return Err(KasupelError::NotInProgress);
        }
        Ok(())
    }

    /// Checks whether the side to move has exhausted their clock as of
    /// `wall_time`, ending the game if so. Returns `true` if the game was
    /// just ended by this check.
    fn evaluate_timeout(&mut self, wall_time: i64) -> bool {
        let side_to_move = self.current_turn;
        let last_turn = self.last_turn.expect("started game has last_turn");
        let elapsed = wall_time - last_turn;
        let old_remaining = self.remaining_for(side_to_move);
        let remaining = crate::clock::deduct(old_remaining, elapsed);
        if crate::clock::has_timed_out(remaining) {
            self.set_remaining_for(side_to_move, remaining);
            self.conclude(
                match side_to_move {
                    Side::Host => Winner::Away,
                    Side::Away => Winner::Host,
                },
                Conclusion::OutOfTime,
                // pinned to the clock-exhaustion instant, per §4.3 end-of-game
                // side effects: the moment `remaining` actually hit zero.
                last_turn + old_remaining,
            );
            true
        } else {
            false
        }
    }

    fn conclude(&mut self, winner: Winner, conclusion: Conclusion, ended_at: i64) {
        self.winner = winner;
        self.conclusion = conclusion;
        self.ended_at = Some(ended_at);
    }

    /// Settles the Elo update at game end — see DESIGN.md's resolution of
    /// the "Elo only on natural conclusion" Open Question: the formula
    /// runs unconditionally, fed the score the conclusion implies.
    pub fn settle_elo(&mut self, host_rating: i32, away_rating: i32) -> (i32, i32) {
        let host_score = match self.winner {
            Winner::Host => crate::elo::Score::Win,
            Winner::Away => crate::elo::Score::Loss,
            Winner::Draw | Winner::None => crate::elo::Score::Draw,
        };
        let (new_host, new_away) = crate::elo::update_pair(host_rating, away_rating, host_score);
        self.host_elo_delta = Some(new_host - host_rating);
        self.away_elo_delta = Some(new_away - away_rating);
        (new_host, new_away)
    }

    // -- Commands ------------------------------------------------------

    /// `Move(side, move, wall_time)` per §4.3.
    pub fn make_move(
        &mut self,
        side: Side,
        mv: ChessMove,
        wall_time: i64,
    ) -> Result<Vec<EngineEvent>, KasupelError> {
        self.require_in_progress()?;
        if side != self.current_turn {
            return Err(KasupelError::NotYourTurn);
        }

        if self.evaluate_timeout(wall_time) {
            return Ok(vec![EngineEvent::GameEnded {
                winner: self.winner,
                conclusion: self.conclusion,
            }]);
        }

        // Match against the legal-move list on from/to/promotion only: a
        // wire-decoded move never carries `is_castling`/`is_en_passant` (see
        // `MoveWire::to_chess_move`), those are derived facts about the
        // position that only `legal_moves` knows. Use the matched entry
        // (with its flags filled in) for `apply`, not the caller's `mv`.
        let legal = movegen::legal_moves(&self.position);
        let mv = *legal
            .iter()
            .find(|candidate| candidate.from == mv.from && candidate.to == mv.to && candidate.promotion == mv.promotion)
            .ok_or(KasupelError::InvalidMove)?;

        let reversible = movegen::is_reversible(&mv, &self.position);
        let next_position = movegen::apply(&self.position, &mv);

        let last_turn = self.last_turn.expect("started game has last_turn");
        let elapsed = wall_time - last_turn;
        let mover_remaining = crate::clock::deduct(self.remaining_for(side), elapsed);
        let mover_remaining =
            crate::clock::credit_increment(mover_remaining, self.time_control.time_increment_per_turn);
        self.set_remaining_for(side, mover_remaining);

        if reversible {
            self.halfmove_clock += 1;
        } else {
            self.halfmove_clock = 0;
        }

        self.position = next_position;
        self.position_history.push(movegen::fingerprint(&self.position));
        self.move_log.push(mv);
        self.host_offering_draw = false;
        self.away_offering_draw = false;
        self.turn_number += 1;
        self.current_turn = self.current_turn.opponent();
        self.last_turn = Some(wall_time);

        let mut events = vec![EngineEvent::MoveMade { mover: side, mv }];

        match movegen::terminal(&self.position, self.current_turn.color()) {
            movegen::Terminal::Checkmate => {
                self.conclude(
                    match side {
                        Side::Host => Winner::Host,
                        Side::Away => Winner::Away,
                    },
                    Conclusion::Checkmate,
                    wall_time,
                );
                events.push(EngineEvent::GameEnded {
                    winner: self.winner,
                    conclusion: self.conclusion,
                });
            }
            movegen::Terminal::Stalemate => {
                self.conclude(Winner::Draw, Conclusion::Stalemate, wall_time);
                events.push(EngineEvent::GameEnded {
                    winner: self.winner,
                    conclusion: self.conclusion,
                });
            }
            movegen::Terminal::None => {}
        }

        Ok(events)
    }

    /// `OfferDraw(side)` per §4.3.
    pub fn offer_draw(&mut self, side: Side) -> Result<Vec<EngineEvent>, KasupelError> {
        self.require_in_progress()?;
        if *self.offering_draw_mut(side) {
            return Err(KasupelError::NotInProgress);
        }
        *self.offering_draw_mut(side) = true;
        Ok(vec![EngineEvent::DrawOffered { side }])
    }

    /// `ClaimDraw(side, reason, wall_time)` per §4.3.
    pub fn claim_draw(
        &mut self,
        side: Side,
        reason: ClaimDrawReason,
        wall_time: i64,
    ) -> Result<Vec<EngineEvent>, KasupelError> {
        self.require_in_progress()?;

        if self.evaluate_timeout(wall_time) {
            return Ok(vec![EngineEvent::GameEnded {
                winner: self.winner,
                conclusion: self.conclusion,
            }]);
        }

        match reason {
            ClaimDrawReason::AgreedDraw => {
                let opponent_offering = match side.opponent() {
                    Side::Host => self.host_offering_draw,
                    Side::Away => self.away_offering_draw,
                };
                if !opponent_offering {
                    return Err(KasupelError::DrawNotAvailable);
                }
                self.conclude(Winner::Draw, Conclusion::AgreedDraw, wall_time);
            }
            ClaimDrawReason::ThreefoldRepetition => {
                let current = *self
                    .position_history
                    .last()
                    .expect("position_history always has the initial position");
                let occurrences = self.position_history.iter().filter(|&&f| f == current).count();
                if occurrences < 3 {
                    return Err(KasupelError::DrawNotAvailable);
                }
                self.conclude(Winner::Draw, Conclusion::ThreefoldRepetition, wall_time);
            }
            ClaimDrawReason::FiftyMoveRule => {
                if self.halfmove_clock < 100 {
                    return Err(KasupelError::DrawNotAvailable);
                }
                self.conclude(Winner::Draw, Conclusion::FiftyMoveRule, wall_time);
            }
        }

        Ok(vec![EngineEvent::GameEnded {
            winner: self.winner,
            conclusion: self.conclusion,
        }])
    }

    /// `Resign(side)` per §4.3.
    pub fn resign(&mut self, side: Side, wall_time: i64) -> Result<Vec<EngineEvent>, KasupelError> {
        self.require_in_progress()?;
        self.conclude(
            match side {
                Side::Host => Winner::Away,
                Side::Away => Winner::Host,
            },
            Conclusion::Resignation,
            wall_time,
        );
        Ok(vec![EngineEvent::GameEnded {
            winner: self.winner,
            conclusion: self.conclusion,
        }])
    }

    /// `AssertTimeout(asserter_side, wall_time)` per §4.3. `asserter_side`
    /// is accepted for API symmetry and future auditing but is not part of
    /// the timeout computation itself, which always concerns the side to
    /// move.
    pub fn assert_timeout(
        &mut self,
        _asserter_side: Side,
        wall_time: i64,
    ) -> Result<Vec<EngineEvent>, KasupelError> {
        self.require_in_progress()?;
        if self.evaluate_timeout(wall_time) {
            Ok(vec![EngineEvent::GameEnded {
                winner: self.winner,
                conclusion: self.conclusion,
            }])
        } else {
            Err(KasupelError::NotTimedOut)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time_control() -> TimeControl {
        TimeControl {
            main_thinking_time: 600,
            fixed_extra_time: 0,
            time_increment_per_turn: 5,
            mode: GameModeKey::Chess,
        }
    }

    fn started_game() -> Game {
        let mut g = Game::new_searching(Uuid::new_v4(), 1, time_control(), 0);
        g.start(2, 0);
        g
    }

    #[test]
    fn scholars_mate_ends_in_checkmate_for_host() {
        let mut g = started_game();
        let moves = [
            (Side::Host, "e2", "e4"),
            (Side::Away, "e7", "e5"),
            (Side::Host, "f1", "c4"),
            (Side::Away, "b8", "c6"),
            (Side::Host, "d1", "h5"),
            (Side::Away, "g8", "f6"),
        ];
        let mut t = 1i64;
        for (side, from, to) in moves {
            let mv = ChessMove::simple(Square::from_algebraic(from).unwrap(), Square::from_algebraic(to).unwrap());
            g.make_move(side, mv, t).expect("legal opening move");
            t += 1;
        }
        // h5xf7#
        let mv = ChessMove::simple(Square::from_algebraic("h5").unwrap(), Square::from_algebraic("f7").unwrap());
        let events = g.make_move(Side::Host, mv, t).expect("scholars mate");
        assert!(matches!(
            events.last(),
            Some(EngineEvent::GameEnded { winner: Winner::Host, conclusion: Conclusion::Checkmate })
        ));
        assert_eq!(g.winner, Winner::Host);
        assert_eq!(g.conclusion, Conclusion::Checkmate);
        assert!(g.is_finished());
    }

    #[test]
    fn assert_timeout_ends_game_out_of_time() {
        let mut g = started_game();
        // main=600 is too long for a quick test; give away a short clock by
        // simulating that 601 seconds elapsed since the game started.
        let err = g.assert_timeout(Side::Away, 1).unwrap_err();
        assert_eq!(err, KasupelError::NotTimedOut);

        let events = g.assert_timeout(Side::Away, 601).expect("host should have timed out");
        assert!(matches!(
            events.last(),
            Some(EngineEvent::GameEnded { winner: Winner::Away, conclusion: Conclusion::OutOfTime })
        ));
    }

    #[test]
    fn draw_offer_is_cleared_by_a_move() {
        let mut g = started_game();
        g.offer_draw(Side::Host).unwrap();
        assert!(g.host_offering_draw);
        let mv = ChessMove::simple(Square::from_algebraic("e2").unwrap(), Square::from_algebraic("e4").unwrap());
        g.make_move(Side::Host, mv, 1).unwrap();
        assert!(!g.host_offering_draw);
    }

    #[test]
    fn agreed_draw_requires_a_live_offer() {
        let mut g = started_game();
        let err = g.claim_draw(Side::Away, ClaimDrawReason::AgreedDraw, 1).unwrap_err();
        assert_eq!(err, KasupelError::DrawNotAvailable);

        g.offer_draw(Side::Host).unwrap();
        let events = g.claim_draw(Side::Away, ClaimDrawReason::AgreedDraw, 2).unwrap();
        assert!(matches!(
            events.last(),
            Some(EngineEvent::GameEnded { winner: Winner::Draw, conclusion: Conclusion::AgreedDraw })
        ));
    }

    #[test]
    fn threefold_repetition_requires_three_occurrences() {
        let mut g = started_game();
        let mut t = 1i64;
        // Shuffle knights back and forth three times to repeat the start position.
        let shuffle = [
            (Side::Host, "g1", "f3"),
            (Side::Away, "g8", "f6"),
            (Side::Host, "f3", "g1"),
            (Side::Away, "f6", "g8"),
            (Side::Host, "g1", "f3"),
            (Side::Away, "g8", "f6"),
        ];
        for (side, from, to) in shuffle {
            let mv = ChessMove::simple(Square::from_algebraic(from).unwrap(), Square::from_algebraic(to).unwrap());
            let result = g.make_move(side, mv, t);
            t += 1;
            if let Err(e) = result {
                panic!("unexpected error during shuffle: {e:?}");
            }
        }
        let err = g.claim_draw(Side::Host, ClaimDrawReason::ThreefoldRepetition, t).unwrap_err();
        assert_eq!(err, KasupelError::DrawNotAvailable);

        let mv = ChessMove::simple(Square::from_algebraic("f3").unwrap(), Square::from_algebraic("g1").unwrap());
        g.make_move(Side::Host, mv, t).unwrap();
        t += 1;
        let mv = ChessMove::simple(Square::from_algebraic("g8").unwrap(), Square::from_algebraic("f6").unwrap());
        g.make_move(Side::Away, mv, t).unwrap();
        t += 1;

        let events = g.claim_draw(Side::Host, ClaimDrawReason::ThreefoldRepetition, t).unwrap();
        assert!(matches!(
            events.last(),
            Some(EngineEvent::GameEnded { winner: Winner::Draw, conclusion: Conclusion::ThreefoldRepetition })
        ));
    }

    #[test]
    fn commands_fail_not_in_progress_after_game_ends() {
        let mut g = started_game();
        g.resign(Side::Host, 1).unwrap();
        assert!(g.is_finished());
        let err = g.offer_draw(Side::Away).unwrap_err();
        assert_eq!(err, KasupelError::NotInProgress);
        let mv = ChessMove::simple(Square::from_algebraic("e2").unwrap(), Square::from_algebraic("e4").unwrap());
        let err = g.make_move(Side::Away, mv, 2).unwrap_err();
        assert_eq!(err, KasupelError::NotInProgress);
    }
}
