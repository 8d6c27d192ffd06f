//! Game hub (spec §4.5) — one actor per live game: routes socket client
//! events to `engine::Game` commands, fans out the resulting events to the
//! right participants, and enforces one connection per (game, account).
//!
//! REDESIGNED from the teacher's `GameBroadcaster` — a single actor for
//! *every* game, holding a session registry and a game→subscribers map —
//! into one `GameHub` actor per live game, tracked by `HubRegistry`. §4.5
//! names the hub as "one per live game" and §5 requires "a single logical
//! owner... processes commands one at a time in arrival order"; an actor's
//! mailbox already gives that serialisation for free, so each hub just
//! needs to exist 1:1 with a game. See DESIGN.md.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use actix::prelude::*;
use serde_json::json;

use crate::accounts::AccountStore;
use crate::engine::{ClaimDrawReason, EngineEvent, Game, GameId, UserId};
use crate::errors::KasupelError;
use crate::notifications::{Notification, NotificationQueue, TypeCode};
use crate::storage::GameStorage;
use crate::types::{MoveWire, Side};
use crate::ws::WsSession;

pub fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs() as i64
}

/// A client event, already resolved to the sending side — §6's socket
/// client event vocabulary.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    GameState,
    AllowedMoves,
    Move(MoveWire),
    OfferDraw,
    ClaimDraw { reason: String },
    Resign,
    Timeout,
}

/// Registers a socket with the hub. `token` disambiguates this specific
/// connection from a later one for the same user, so a stale `Disconnect`
/// from a displaced session can't evict its replacement.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub user_id: UserId,
    pub token: u64,
    pub addr: Addr<WsSession>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub user_id: UserId,
    pub token: u64,
}

#[derive(Message)]
#[rtype(result = "Result<serde_json::Value, KasupelError>")]
pub struct RunCommand {
    pub user_id: UserId,
    pub command: ClientCommand,
}

/// Pushed to a single socket's `WsSession`.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct Push(pub serde_json::Value);

/// Tells a `WsSession` to send `game_disconnect` with the given reason and
/// then close the socket — §4.5's displacement / game-over closing.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct CloseWith {
    pub reason: String,
}

struct Socket {
    token: u64,
    addr: Addr<WsSession>,
}

/// One live game's dispatcher. Holds the authoritative `Game` for as long
/// as it is live; on conclusion it archives and persists then stops.
pub struct GameHub {
    game_id: GameId,
    game: Game,
    sockets: HashMap<UserId, Socket>,
    accounts: actix_web::web::Data<AccountStore>,
    notifications: actix_web::web::Data<NotificationQueue>,
    storage: actix_web::web::Data<GameStorage>,
    registry: actix_web::web::Data<HubRegistry>,
}

impl GameHub {
    pub fn new(
        game: Game,
        accounts: actix_web::web::Data<AccountStore>,
        notifications: actix_web::web::Data<NotificationQueue>,
        storage: actix_web::web::Data<GameStorage>,
        registry: actix_web::web::Data<HubRegistry>,
    ) -> Self {
        Self {
            game_id: game.id,
            game,
            sockets: HashMap::new(),
            accounts,
            notifications,
            storage,
            registry,
        }
    }

    fn side_of(&self, user_id: UserId) -> Option<Side> {
        if self.game.host_id == user_id {
            Some(Side::Host)
        } else if self.game.away_id == Some(user_id) {
            Some(Side::Away)
        } else {
            None
        }
    }

    fn user_id_of(&self, side: Side) -> Option<UserId> {
        match side {
            Side::Host => Some(self.game.host_id),
            Side::Away => self.game.away_id,
        }
    }

    fn push_to(&self, user_id: UserId, payload: serde_json::Value) {
        if let Some(socket) = self.sockets.get(&user_id) {
            socket.addr.do_send(Push(payload));
        }
    }

    fn push_to_side(&self, side: Side, payload: serde_json::Value) {
        if let Some(user_id) = self.user_id_of(side) {
            self.push_to(user_id, payload);
        }
    }

    fn broadcast(&self, payload: serde_json::Value) {
        for socket in self.sockets.values() {
            socket.addr.do_send(Push(payload.clone()));
        }
    }

    /// Fans out engine events per the per-recipient rules in §4.5.
    fn dispatch_events(&mut self, events: Vec<EngineEvent>) {
        for event in events {
            match event {
                EngineEvent::MoveMade { mover, mv } => {
                    let opponent = mover.opponent();
                    let payload = json!({
                        "event": "move",
                        "data": crate::wire::move_event(&self.game, mv, opponent),
                    });
                    self.push_to_side(opponent, payload);
                }
                EngineEvent::DrawOffered { side } => {
                    let payload = json!({ "event": "draw_offer", "data": {} });
                    self.push_to_side(side.opponent(), payload);
                }
                EngineEvent::GameStarted => {
                    self.broadcast(json!({ "event": "game_start", "data": {} }));
                }
                EngineEvent::GameEnded { winner, conclusion } => {
                    self.conclude(winner, conclusion);
                }
            }
        }
    }

    /// End-of-game side effects (§4.3): Elo settlement, notifications,
    /// `game_end` broadcast, persistence, then `game_disconnect` + close.
    fn conclude(&mut self, winner: crate::types::Winner, conclusion: crate::types::Conclusion) {
        use crate::types::Winner;

        if let Some(away_id) = self.game.away_id {
            let host_user = self.accounts.get(self.game.host_id).ok();
            let away_user = self.accounts.get(away_id).ok();
            if let (Some(host_user), Some(away_user)) = (host_user, away_user) {
                let (new_host, new_away) = self.game.settle_elo(host_user.elo, away_user.elo);
                self.accounts.apply_elo_delta(self.game.host_id, new_host - host_user.elo);
                self.accounts.apply_elo_delta(away_id, new_away - away_user.elo);
            }

            let host_is_winner = matches!(winner, Winner::Host);
            let away_is_winner = matches!(winner, Winner::Away);
            self.notifications.enqueue(Notification::new(
                self.game.host_id,
                TypeCode::for_conclusion(winner, conclusion, host_is_winner),
                Some(self.game_id),
                now(),
            ));
            self.notifications.enqueue(Notification::new(
                away_id,
                TypeCode::for_conclusion(winner, conclusion, away_is_winner),
                Some(self.game_id),
                now(),
            ));
        }

        self.broadcast(json!({ "event": "game_end", "data": crate::wire::game_end_event(&self.game) }));

        if let Err(e) = self.storage.archive_game(&self.game) {
            log::error!("failed to archive game {}: {e}", self.game_id);
        }

        self.broadcast(json!({ "event": "game_disconnect", "data": { "reason": "GameOver" } }));
        for socket in self.sockets.values() {
            socket.addr.do_send(CloseWith { reason: "GameOver".to_string() });
        }

        self.registry.remove(self.game_id, self.game.host_id, self.game.away_id);
    }

    fn persist(&self) {
        if let Err(e) = self.storage.save_active(&self.game) {
            log::warn!("failed to persist active game {}: {e}", self.game_id);
        }
    }
}

impl Actor for GameHub {
    type Context = Context<Self>;

    /// Persists the just-paired Started game the moment the hub comes up —
    /// before this hook existed, a crash between pairing (`hub::spawn`) and
    /// the first `RunCommand` (the only other `persist()` call site) lost a
    /// live game entirely: it had already been removed from the pending
    /// `GameStore`, had no hub-owned snapshot on disk yet, and wasn't in the
    /// archive either, so `ws_connect`'s lookup chain returned 2001 for a
    /// `game_id` both clients already held. See §5's recovery contract.
    fn started(&mut self, _ctx: &mut Context<Self>) {
        self.persist();
    }
}

impl Handler<Connect> for GameHub {
    type Result = ();

    fn handle(&mut self, msg: Connect, _ctx: &mut Context<Self>) {
        if self.side_of(msg.user_id).is_none() {
            msg.addr.do_send(Push(json!({
                "event": "game_disconnect",
                "data": { "reason": "Forbidden" },
            })));
            msg.addr.do_send(CloseWith { reason: "Forbidden".to_string() });
            return;
        }

        if let Some(previous) = self.sockets.remove(&msg.user_id) {
            previous.addr.do_send(Push(json!({
                "event": "game_disconnect",
                "data": { "reason": "NewConnectionSameAccount" },
            })));
            previous.addr.do_send(CloseWith { reason: "NewConnectionSameAccount".to_string() });
        }
        self.sockets.insert(msg.user_id, Socket { token: msg.token, addr: msg.addr.clone() });

        if self.game.is_started() {
            let payload = json!({
                "event": "game_state",
                "data": crate::wire::GameStateEvent::from_game(&self.game),
            });
            msg.addr.do_send(Push(payload));
        }

        if self.game.is_started() && self.sockets.len() == 2 {
            self.broadcast(json!({ "event": "game_start", "data": {} }));
        }
    }
}

impl Handler<Disconnect> for GameHub {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _ctx: &mut Context<Self>) {
        if let Some(current) = self.sockets.get(&msg.user_id)
            && current.token == msg.token
        {
            self.sockets.remove(&msg.user_id);
        }
    }
}

impl Handler<RunCommand> for GameHub {
    type Result = Result<serde_json::Value, KasupelError>;

    fn handle(&mut self, msg: RunCommand, _ctx: &mut Context<Self>) -> Self::Result {
        let side = self.side_of(msg.user_id).ok_or(KasupelError::NotParticipant)?;
        let wall_time = now();

        let result = match msg.command {
            ClientCommand::GameState => {
                return Ok(json!({
                    "event": "game_state",
                    "data": crate::wire::GameStateEvent::from_game(&self.game),
                }));
            }
            ClientCommand::AllowedMoves => {
                return Ok(json!({
                    "event": "allowed_moves",
                    "data": crate::wire::allowed_moves_event(&self.game, side),
                }));
            }
            ClientCommand::Move(wire) => {
                let mv = wire.to_chess_move().map_err(|_| KasupelError::InvalidMove)?;
                self.game.make_move(side, mv, wall_time).map(|events| {
                    let ack = json!({
                        "event": "move",
                        "data": crate::wire::move_event(&self.game, mv, side),
                    });
                    (ack, events)
                })
            }
            ClientCommand::OfferDraw => self.game.offer_draw(side).map(|events| (json!({"event": "draw_offer", "data": {}}), events)),
            ClientCommand::ClaimDraw { reason } => {
                let reason = match reason.as_str() {
                    "AgreedDraw" => ClaimDrawReason::AgreedDraw,
                    "ThreefoldRepetition" => ClaimDrawReason::ThreefoldRepetition,
                    "FiftyMoveRule" => ClaimDrawReason::FiftyMoveRule,
                    _ => return Err(KasupelError::NotADrawReason),
                };
                self.game
                    .claim_draw(side, reason, wall_time)
                    .map(|events| (json!({"event": "game_state", "data": crate::wire::GameStateEvent::from_game(&self.game)}), events))
            }
            ClientCommand::Resign => self
                .game
                .resign(side, wall_time)
                .map(|events| (json!({"event": "game_state", "data": crate::wire::GameStateEvent::from_game(&self.game)}), events)),
            ClientCommand::Timeout => self
                .game
                .assert_timeout(side, wall_time)
                .map(|events| (json!({"event": "game_state", "data": crate::wire::GameStateEvent::from_game(&self.game)}), events)),
        };

        match result {
            Ok((ack, events)) => {
                self.dispatch_events(events);
                self.persist();
                Ok(ack)
            }
            Err(e) => Err(e),
        }
    }
}

/// Headless assertion used by the background sweep (§5) — runs
/// `AssertTimeout` without needing a client-originated command, since a
/// silent opponent may never send one.
pub struct SweepTimeout;

impl Message for SweepTimeout {
    type Result = ();
}

impl Handler<SweepTimeout> for GameHub {
    type Result = ();

    fn handle(&mut self, _msg: SweepTimeout, _ctx: &mut Context<Self>) {
        if !self.game.is_started() {
            return;
        }
        let side = self.game.current_turn;
        match self.game.assert_timeout(side, now()) {
            Ok(events) => {
                self.dispatch_events(events);
                self.persist();
            }
            Err(KasupelError::NotTimedOut) => {}
            Err(e) => log::warn!("unexpected error from sweep AssertTimeout on {}: {e}", self.game_id),
        }
    }
}

/// Reads a clone of the live game state without mutating anything — used by
/// `api::games::get_game`/`ongoing` to report on a hub-owned game that has
/// not yet been archived.
pub struct Snapshot;

impl Message for Snapshot {
    type Result = Game;
}

impl Handler<Snapshot> for GameHub {
    type Result = MessageResult<Snapshot>;

    fn handle(&mut self, _msg: Snapshot, _ctx: &mut Context<Self>) -> Self::Result {
        MessageResult(self.game.clone())
    }
}

/// Starts a `GameHub` for a just-started game and registers it — called by
/// `api::find`/`api::accept_invitation` the moment `Game::start` succeeds,
/// and by `main`'s startup recovery for any game restored from an active
/// snapshot whose `is_started()` is true.
pub fn spawn(
    game: Game,
    accounts: actix_web::web::Data<AccountStore>,
    notifications: actix_web::web::Data<NotificationQueue>,
    storage: actix_web::web::Data<GameStorage>,
    registry: actix_web::web::Data<HubRegistry>,
) -> Addr<GameHub> {
    let game_id = game.id;
    let host_id = game.host_id;
    let away_id = game.away_id;
    let hub = GameHub::new(game, accounts, notifications, storage, registry.clone());
    let addr = hub.start();
    registry.insert(game_id, host_id, away_id, addr.clone());
    addr
}

/// The set of live hubs, keyed by game id — §4.5 "one hub per live game".
/// `by_user` is a secondary index so `GET /games/ongoing [A][P]` can list a
/// user's live games without messaging every hub.
#[derive(Default)]
pub struct HubRegistry {
    hubs: Mutex<HashMap<GameId, Addr<GameHub>>>,
    by_user: Mutex<HashMap<UserId, std::collections::HashSet<GameId>>>,
}

impl HubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, game_id: GameId) -> Option<Addr<GameHub>> {
        self.hubs.lock().expect("hub registry mutex poisoned").get(&game_id).cloned()
    }

    pub fn insert(&self, game_id: GameId, host_id: UserId, away_id: Option<UserId>, addr: Addr<GameHub>) {
        self.hubs.lock().expect("hub registry mutex poisoned").insert(game_id, addr);
        let mut by_user = self.by_user.lock().expect("hub registry mutex poisoned");
        by_user.entry(host_id).or_default().insert(game_id);
        if let Some(away_id) = away_id {
            by_user.entry(away_id).or_default().insert(game_id);
        }
    }

    pub fn remove(&self, game_id: GameId, host_id: UserId, away_id: Option<UserId>) {
        self.hubs.lock().expect("hub registry mutex poisoned").remove(&game_id);
        let mut by_user = self.by_user.lock().expect("hub registry mutex poisoned");
        if let Some(set) = by_user.get_mut(&host_id) {
            set.remove(&game_id);
        }
        if let Some(away_id) = away_id
            && let Some(set) = by_user.get_mut(&away_id)
        {
            set.remove(&game_id);
        }
    }

    pub fn all(&self) -> Vec<Addr<GameHub>> {
        self.hubs.lock().expect("hub registry mutex poisoned").values().cloned().collect()
    }

    /// `GET /games/ongoing [A][P]` — the live game ids a user is currently
    /// playing.
    pub fn ongoing_for(&self, user_id: UserId) -> Vec<GameId> {
        self.by_user
            .lock()
            .expect("hub registry mutex poisoned")
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// The background sweep (§5): posts `SweepTimeout` to every live hub so a
/// silent opponent's clock expiry still ends the game even with no client
/// ever asserting it.
pub fn sweep_all(registry: &HubRegistry) {
    for hub in registry.all() {
        hub.do_send(SweepTimeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_of_identifies_host_and_away() {
        let game = Game::new_searching(uuid::Uuid::new_v4(), 1, crate::engine::TimeControl {
            main_thinking_time: 60,
            fixed_extra_time: 0,
            time_increment_per_turn: 0,
            mode: crate::engine::GameModeKey::Chess,
        }, 0);
        let hub_game_id = game.id;
        let hub = GameHub {
            game_id: hub_game_id,
            game,
            sockets: HashMap::new(),
            accounts: actix_web::web::Data::new(AccountStore::new()),
            notifications: actix_web::web::Data::new(NotificationQueue::new()),
            storage: actix_web::web::Data::new(GameStorage::new(std::env::temp_dir().join(format!("hub_test_{hub_game_id}"))).unwrap()),
            registry: actix_web::web::Data::new(HubRegistry::new()),
        };
        assert_eq!(hub.side_of(1), Some(Side::Host));
        assert_eq!(hub.side_of(999), None);
    }
}
