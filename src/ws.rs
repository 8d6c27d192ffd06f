//! WebSocket gameplay channel (spec §4.5/§6) — one socket per connected
//! player per live game, routing the client event vocabulary
//! (`game_state`/`allowed_moves`/`move`/`offer_draw`/`claim_draw`/`resign`/
//! `timeout`) to the owning `GameHub` and forwarding whatever the hub
//! pushes back.
//!
//! REDESIGNED from the teacher's `GameBroadcaster`/`WsSession` pair, which
//! multiplexed every game and every client action (including plain REST
//! mirrors like `list_games`) through one global actor and a free-form
//! `action` string. Here a session is scoped to exactly one game for its
//! whole lifetime (the `Game-ID` header is fixed at connect time, per §6),
//! so the fan-out target is always a single `Addr<GameHub>` — see
//! `hub::GameHub` and DESIGN.md.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{HttpRequest, HttpResponse, web};
use actix_web_actors::ws;
use serde::Deserialize;
use serde_json::json;

use crate::accounts::AccountStore;
use crate::engine::{Game, GameId, UserId};
use crate::errors::{ErrorBody, KasupelError};
use crate::hub::{self, ClientCommand, CloseWith, Connect, Disconnect, GameHub, HubRegistry, Push, RunCommand};
use crate::notifications::NotificationQueue;
use crate::sessions::SessionStore;
use crate::storage::GameStorage;
use crate::types::MoveWire;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

static NEXT_SESSION_TOKEN: AtomicU64 = AtomicU64::new(1);

fn now() -> i64 {
    hub::now()
}

/// The socket client event vocabulary (§6). `#[serde(tag = "event")]`
/// matches the shape the hub's own pushed events use, so a client can
/// reason about one envelope shape in both directions.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ClientEvent {
    GameState,
    AllowedMoves,
    Move {
        #[serde(flatten)]
        mv: MoveWire,
    },
    OfferDraw,
    ClaimDraw {
        reason: String,
    },
    Resign,
    Timeout,
}

impl From<ClientEvent> for ClientCommand {
    fn from(event: ClientEvent) -> Self {
        match event {
            ClientEvent::GameState => ClientCommand::GameState,
            ClientEvent::AllowedMoves => ClientCommand::AllowedMoves,
            ClientEvent::Move { mv } => ClientCommand::Move(mv),
            ClientEvent::OfferDraw => ClientCommand::OfferDraw,
            ClientEvent::ClaimDraw { reason } => ClientCommand::ClaimDraw { reason },
            ClientEvent::Resign => ClientCommand::Resign,
            ClientEvent::Timeout => ClientCommand::Timeout,
        }
    }
}

fn error_frame(err: KasupelError) -> String {
    let body: ErrorBody = err.into();
    json!({ "event": "error", "data": body }).to_string()
}

/// Parses `Authorization: SessionKey <id>|<base64 secret>` (§6) into the
/// authenticated user id.
fn authenticate(req: &HttpRequest, sessions: &SessionStore) -> Result<UserId, KasupelError> {
    let header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(KasupelError::SocketAuthHeaderMissing)?;

    let rest = header.strip_prefix("SessionKey ").ok_or(KasupelError::SocketAuthHeaderMissing)?;
    let (id_part, token_part) = rest.split_once('|').ok_or(KasupelError::SocketAuthHeaderMissing)?;
    let session_id: u64 = id_part.parse().map_err(|_| KasupelError::SocketAuthHeaderMissing)?;
    use base64::Engine as _;
    let token = base64::engine::general_purpose::STANDARD
        .decode(token_part)
        .map_err(|_| KasupelError::SocketAuthHeaderMissing)?;

    sessions.authenticate(session_id, &token, now())
}

/// Parses the `Game-ID` header (§6) into a game id.
fn parse_game_id(req: &HttpRequest) -> Result<GameId, KasupelError> {
    let header = req
        .headers()
        .get("Game-ID")
        .and_then(|v| v.to_str().ok())
        .ok_or(KasupelError::SocketGameIdHeaderInvalid)?;
    header.parse().map_err(|_| KasupelError::SocketGameIdHeaderInvalid)
}

/// A single player's connection to one live game.
pub struct WsSession {
    user_id: UserId,
    token: u64,
    hub: Addr<GameHub>,
    last_heartbeat: Instant,
}

impl WsSession {
    fn new(user_id: UserId, hub: Addr<GameHub>) -> Self {
        Self {
            user_id,
            token: NEXT_SESSION_TOKEN.fetch_add(1, Ordering::SeqCst),
            hub,
            last_heartbeat: Instant::now(),
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                log::warn!("WS session for user {} timed out, disconnecting", act.user_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_text(&self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let event: ClientEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                log::debug!("WS session for user {}: malformed client event: {e}", self.user_id);
                ctx.text(error_frame(KasupelError::SyntaxError));
                return;
            }
        };

        let fut = self
            .hub
            .send(RunCommand { user_id: self.user_id, command: event.into() });

        ctx.spawn(actix::fut::wrap_future(fut).map(|result, _act, ctx: &mut ws::WebsocketContext<Self>| {
            match result {
                Ok(Ok(payload)) => ctx.text(payload.to_string()),
                Ok(Err(err)) => ctx.text(error_frame(err)),
                Err(mailbox_err) => {
                    log::error!("hub mailbox error: {mailbox_err}");
                    ctx.text(error_frame(KasupelError::Internal));
                }
            }
        }));
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.start_heartbeat(ctx);
        self.hub.do_send(Connect {
            user_id: self.user_id,
            token: self.token,
            addr: ctx.address(),
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.hub.do_send(Disconnect { user_id: self.user_id, token: self.token });
    }
}

impl actix::StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => self.handle_text(&text, ctx),
            Ok(ws::Message::Binary(_)) => {
                ctx.text(error_frame(KasupelError::SyntaxError));
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                log::error!("WS protocol error for user {}: {e}", self.user_id);
                ctx.stop();
            }
        }
    }
}

/// Delivers a hub-pushed event to this session's socket.
impl Handler<Push> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Push, ctx: &mut Self::Context) {
        ctx.text(msg.0.to_string());
    }
}

impl Handler<CloseWith> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: CloseWith, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Normal,
            description: Some(msg.reason),
        }));
        ctx.stop();
    }
}

/// HTTP → WebSocket upgrade entry point (`GET /ws`, per §6): authenticates
/// via the `Authorization` header, resolves the game via `Game-ID`, and
/// hands the connection to that game's hub (lazily starting one if the
/// game has just become live but has no hub yet — see `hub::spawn`).
#[allow(clippy::too_many_arguments)]
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    sessions: web::Data<SessionStore>,
    games: web::Data<std::sync::Mutex<std::collections::HashMap<GameId, Game>>>,
    accounts: web::Data<AccountStore>,
    notifications: web::Data<NotificationQueue>,
    storage: web::Data<GameStorage>,
    hubs: web::Data<HubRegistry>,
) -> Result<HttpResponse, actix_web::Error> {
    let user_id = authenticate(&req, &sessions).map_err(actix_web::error::ErrorUnauthorized)?;
    let game_id = parse_game_id(&req).map_err(actix_web::error::ErrorBadRequest)?;

    let hub_addr = match hubs.get(game_id) {
        Some(addr) => addr,
        None => {
            let mut guard = games.lock().expect("games mutex poisoned");
            let game = guard.get(&game_id).ok_or_else(|| actix_web::error::ErrorNotFound("game not found"))?;
            if !game.is_started() {
                return Err(actix_web::error::ErrorForbidden("game is not in progress"));
            }
            let game = guard.remove(&game_id).expect("just checked present");
            drop(guard);
            hub::spawn(game, accounts.clone(), notifications.clone(), storage.clone(), hubs.clone())
        }
    };

    let session = WsSession::new(user_id, hub_addr);
    ws::start(session, &req, stream)
}
