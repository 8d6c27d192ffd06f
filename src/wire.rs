//! Wire representations (spec §6) — the JSON shapes shared by the HTTP and
//! socket layers: the referenced-vs-included Game split, the sparse board
//! map, and the User/Notification public views.
//!
//! New module: the teacher serializes its single-flavour `Game` directly
//! via `#[derive(Serialize)]` (one game kind, one API surface, no
//! users-by-reference concept since it has no accounts). spec.md's "users
//! referenced or included" split (§6) needs its own home since both
//! `api.rs` and `ws.rs` build the same shapes.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::accounts::User;
use crate::engine::{Game, GameId, UserId};
use crate::notifications::Notification;
use crate::types::{ChessMove, Conclusion, MoveWire, Side, Winner};

/// The public view of a `User` — never includes `password_hash` or
/// `verification_token` (those are `#[serde(skip_serializing)]` already on
/// `User` itself; this wrapper additionally drops `email` for anyone but
/// the account's owner, per §6 `GET /accounts/me` vs `GET /users/<username>`).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PublicUser {
    pub id: UserId,
    pub username: String,
    pub elo: i32,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

impl PublicUser {
    /// The view any caller gets of any other user (`GET /users/<username>`,
    /// `GET /accounts/account`, the `users` array alongside a referenced
    /// Game).
    pub fn public(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            elo: user.elo,
            created_at: user.created_at,
            email: None,
            email_verified: None,
        }
    }

    /// The view an account's owner gets of themself (`GET /accounts/me`) —
    /// includes email per §6.
    pub fn owned(user: &User) -> Self {
        Self {
            email: Some(user.email.clone()),
            email_verified: Some(user.email_verified),
            ..Self::public(user)
        }
    }
}

/// A Game with users embedded ("included" flavour, §6) — used where the
/// endpoint doc says "users included", e.g. `GET /games/<id>`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GameIncluded {
    pub id: GameId,
    pub mode: u8,
    pub host: PublicUser,
    pub away: Option<PublicUser>,
    pub invited: Option<PublicUser>,
    pub main_thinking_time: i64,
    pub fixed_extra_time: i64,
    pub time_increment_per_turn: i64,
    pub host_time: i64,
    pub away_time: i64,
    pub host_offering_draw: bool,
    pub away_offering_draw: bool,
    pub current_turn: Side,
    pub turn_number: u32,
    #[schema(value_type = Object)]
    pub board: HashMap<String, (u8, u8)>,
    pub halfmove_clock: u32,
    pub winner: Winner,
    pub conclusion: Conclusion,
    pub opened_at: i64,
    pub started_at: Option<i64>,
    pub last_turn: Option<i64>,
    pub ended_at: Option<i64>,
}

/// A Game with users by id ("referenced" flavour, §6) — used for list
/// endpoints, paired with a parallel `users` array.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GameReferenced {
    pub id: GameId,
    pub mode: u8,
    pub host_id: UserId,
    pub away_id: Option<UserId>,
    pub invited_id: Option<UserId>,
    pub main_thinking_time: i64,
    pub fixed_extra_time: i64,
    pub time_increment_per_turn: i64,
    pub host_time: i64,
    pub away_time: i64,
    pub host_offering_draw: bool,
    pub away_offering_draw: bool,
    pub current_turn: Side,
    pub turn_number: u32,
    #[schema(value_type = Object)]
    pub board: HashMap<String, (u8, u8)>,
    pub halfmove_clock: u32,
    pub winner: Winner,
    pub conclusion: Conclusion,
    pub opened_at: i64,
    pub started_at: Option<i64>,
    pub last_turn: Option<i64>,
    pub ended_at: Option<i64>,
}

impl GameReferenced {
    pub fn from_game(game: &Game) -> Self {
        Self {
            id: game.id,
            mode: 1,
            host_id: game.host_id,
            away_id: game.away_id,
            invited_id: game.invited_id,
            main_thinking_time: game.time_control.main_thinking_time,
            fixed_extra_time: game.time_control.fixed_extra_time,
            time_increment_per_turn: game.time_control.time_increment_per_turn,
            host_time: game.host_time,
            away_time: game.away_time,
            host_offering_draw: game.host_offering_draw,
            away_offering_draw: game.away_offering_draw,
            current_turn: game.current_turn,
            turn_number: game.turn_number,
            board: game.position.board.to_wire_map(),
            halfmove_clock: game.halfmove_clock,
            winner: game.winner,
            conclusion: game.conclusion,
            opened_at: game.opened_at,
            started_at: game.started_at,
            last_turn: game.last_turn,
            ended_at: game.ended_at,
        }
    }
}

/// Builds the `{items: [GameReferenced], users: [PublicUser]}` envelope for
/// list endpoints, deduplicating each referenced user exactly once, per §6
/// ("a parallel `users` array containing each referenced user exactly
/// once").
pub fn referenced_envelope(
    games: Vec<Game>,
    lookup_user: impl Fn(UserId) -> Option<User>,
) -> (Vec<GameReferenced>, Vec<PublicUser>) {
    let mut seen = std::collections::HashSet::new();
    let mut users = Vec::new();
    let mut push_user = |id: UserId, seen: &mut std::collections::HashSet<UserId>| {
        if seen.insert(id)
            && let Some(user) = lookup_user(id)
        {
            users.push(PublicUser::public(&user));
        }
    };

    let mut items = Vec::with_capacity(games.len());
    for game in &games {
        push_user(game.host_id, &mut seen);
        if let Some(away) = game.away_id {
            push_user(away, &mut seen);
        }
        if let Some(invited) = game.invited_id {
            push_user(invited, &mut seen);
        }
        items.push(GameReferenced::from_game(game));
    }
    (items, users)
}

pub fn game_included(game: &Game, host: &User, away: Option<&User>, invited: Option<&User>) -> GameIncluded {
    GameIncluded {
        id: game.id,
        mode: 1,
        host: PublicUser::public(host),
        away: away.map(PublicUser::public),
        invited: invited.map(PublicUser::public),
        main_thinking_time: game.time_control.main_thinking_time,
        fixed_extra_time: game.time_control.fixed_extra_time,
        time_increment_per_turn: game.time_control.time_increment_per_turn,
        host_time: game.host_time,
        away_time: game.away_time,
        host_offering_draw: game.host_offering_draw,
        away_offering_draw: game.away_offering_draw,
        current_turn: game.current_turn,
        turn_number: game.turn_number,
        board: game.position.board.to_wire_map(),
        halfmove_clock: game.halfmove_clock,
        winner: game.winner,
        conclusion: game.conclusion,
        opened_at: game.opened_at,
        started_at: game.started_at,
        last_turn: game.last_turn,
        ended_at: game.ended_at,
    }
}

/// The socket `game_state` event payload (§6): a narrower slice of the
/// Game than the REST representations — just what a connected client
/// needs to redraw the board and clocks.
#[derive(Debug, Clone, Serialize)]
pub struct GameStateEvent {
    pub board: HashMap<String, (u8, u8)>,
    pub host_time: i64,
    pub away_time: i64,
    pub last_turn: Option<i64>,
    pub current_turn: Side,
    pub turn_number: u32,
}

impl GameStateEvent {
    pub fn from_game(game: &Game) -> Self {
        Self {
            board: game.position.board.to_wire_map(),
            host_time: game.host_time,
            away_time: game.away_time,
            last_turn: game.last_turn,
            current_turn: game.current_turn,
            turn_number: game.turn_number,
        }
    }
}

/// The socket `allowed_moves` event payload (§6): the legal moves for the
/// requester, plus which draw-claim reasons (if any) are currently
/// available to them.
#[derive(Debug, Clone, Serialize)]
pub struct AllowedMovesEvent {
    pub moves: Vec<MoveWire>,
    pub draw_claim: Option<&'static str>,
}

pub fn allowed_moves_event(game: &Game, requester: Side) -> AllowedMovesEvent {
    let moves = if game.current_turn == requester {
        crate::movegen::legal_moves(&game.position)
            .into_iter()
            .map(MoveWire::from_chess_move)
            .collect()
    } else {
        Vec::new()
    };

    let draw_claim = if game.halfmove_clock >= 100 {
        Some("fifty_move_rule")
    } else if let Some(&current) = game.position_history.last() {
        let occurrences = game.position_history.iter().filter(|&&f| f == current).count();
        if occurrences >= 3 { Some("threefold_repetition") } else { None }
    } else {
        None
    };

    AllowedMovesEvent { moves, draw_claim }
}

/// The socket `move` event payload sent to the opponent (§4.5/§6): the
/// move just played, the resulting state, and the opponent's own allowed
/// moves (§9 open-question resolution: `allowed_moves` rides along inside
/// `move`, otherwise only sent on explicit request).
pub fn move_event(game: &Game, mv: ChessMove, recipient: Side) -> serde_json::Value {
    json!({
        "move": MoveWire::from_chess_move(mv),
        "game_state": GameStateEvent::from_game(game),
        "allowed_moves": allowed_moves_event(game, recipient),
    })
}

pub fn game_end_event(game: &Game) -> serde_json::Value {
    json!({
        "game_state": GameStateEvent::from_game(game),
        "reason": game.conclusion,
    })
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NotificationWire {
    pub id: u64,
    pub sent_at: i64,
    pub type_code: crate::notifications::TypeCode,
    pub game_id: Option<GameId>,
    pub read: bool,
}

impl From<&Notification> for NotificationWire {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id,
            sent_at: n.sent_at,
            type_code: n.type_code,
            game_id: n.game_id,
            read: n.read,
        }
    }
}
