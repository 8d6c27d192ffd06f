//! `GET/POST/DELETE /games/*` (spec §6 Games) — matchmaking, invitations,
//! and the three game-listing views (own invites/searches, ongoing, and
//! completed-by-account).
//!
//! Handler shape grounded on `JosunLP-checkai/src/api.rs`'s
//! `web::Data`-extraction pattern, same as `api::accounts`. A listed game
//! can live in one of three places depending on its state — the pending
//! `GameStore` (Searching/Invited/Started-no-socket-yet), a live
//! `hub::GameHub` actor (Started, at least one socket connected), or the
//! zstd archive (Finished) — so every listing handler here picks the
//! right source(s) for the states it cares about rather than querying one
//! uniform store. See DESIGN.md.
//!
//! `pagination::paginate` cannot be called directly on `Vec<Game>` (it
//! requires `T: Serialize`, and `Game` deliberately isn't — it's an
//! internal engine type, not a wire type); `referenced_response` below
//! duplicates its page-slicing arithmetic against `Game` directly and
//! converts the page to `wire::GameReferenced` before serializing.

use actix_web::{HttpRequest, HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::accounts::AccountStore;
use crate::api::{self, PageQuery, PayloadDecryptor};
use crate::engine::{Game, GameId, GameModeKey, GameStore, TimeControl, UserId};
use crate::errors::KasupelError;
use crate::hub::{self, HubRegistry, Snapshot};
use crate::matchmaker::{FindOutcome, Matchmaker};
use crate::notifications::NotificationQueue;
use crate::pagination;
use crate::sessions::SessionStore;
use crate::storage::GameStorage;
use crate::wire;

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct TimeControlWire {
    pub main_thinking_time: i64,
    pub fixed_extra_time: i64,
    pub time_increment_per_turn: i64,
    /// `GameMode` as the wire integer (spec §6 "enums as integers") — `1`
    /// is the only value Chess accepts.
    pub mode: u8,
}

impl TimeControlWire {
    fn to_time_control(&self) -> Result<TimeControl, KasupelError> {
        if self.mode != 1 {
            return Err(KasupelError::WrongParameters);
        }
        Ok(TimeControl {
            main_thinking_time: self.main_thinking_time,
            fixed_extra_time: self.fixed_extra_time,
            time_increment_per_turn: self.time_increment_per_turn,
            mode: GameModeKey::Chess,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FindRequest {
    #[serde(flatten)]
    pub time_control: TimeControlWire,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendInvitationRequest {
    pub invitee: String,
    #[serde(flatten)]
    pub time_control: TimeControlWire,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GameIdResponse {
    pub game_id: GameId,
}

#[derive(Debug, Deserialize)]
pub struct AccountPageQuery {
    pub account: UserId,
    pub page: Option<u64>,
}

impl AccountPageQuery {
    fn page(&self) -> u64 {
        self.page.unwrap_or(0)
    }
}

/// Slices `games` into `page` (0-indexed, `pagination::PAGE_SIZE` per
/// page), then builds the `{items, users, pages}` referenced envelope
/// (§6 "a parallel `users` array containing each referenced user exactly
/// once").
fn referenced_response(games: Vec<Game>, page: u64, accounts: &AccountStore) -> HttpResponse {
    let total_pages = games.len().div_ceil(pagination::PAGE_SIZE).max(1) as u64;
    if page >= total_pages && page != 0 {
        return api::error_response(KasupelError::PageOutOfRange);
    }
    let start = (page as usize) * pagination::PAGE_SIZE;
    let end = (start + pagination::PAGE_SIZE).min(games.len());
    let slice = if start >= games.len() { Vec::new() } else { games[start..end].to_vec() };
    let (items, users) = wire::referenced_envelope(slice, |id| accounts.get(id).ok());
    HttpResponse::Ok().json(json!({ "items": items, "users": users, "pages": total_pages }))
}

/// Looks a game up wherever it currently lives: a live hub first (the
/// authoritative copy while Started), then the pending store, then the
/// archive.
async fn find_any_game(
    game_id: GameId,
    games: &web::Data<GameStore>,
    hubs: &web::Data<HubRegistry>,
    storage: &web::Data<GameStorage>,
) -> Option<Game> {
    if let Some(addr) = hubs.get(game_id)
        && let Ok(game) = addr.send(Snapshot).await
    {
        return Some(game);
    }
    if let Some(game) = games.lock().expect("games mutex poisoned").get(&game_id).cloned() {
        return Some(game);
    }
    storage.load_archive(&game_id).ok()
}

/// All archived games either player of which is `account`.
fn load_completed_for(storage: &GameStorage, account: UserId) -> Result<Vec<Game>, KasupelError> {
    let ids = storage.list_archive_ids().map_err(|e| {
        log::error!("failed to list archived games: {e}");
        KasupelError::Internal
    })?;
    let mut games = Vec::new();
    for id in ids {
        match storage.load_archive(&id) {
            Ok(game) if game.host_id == account || game.away_id == Some(account) => games.push(game),
            Ok(_) => {}
            Err(e) => log::warn!("failed to load archived game {id}: {e}"),
        }
    }
    games.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
    Ok(games)
}

/// `GET /games/invites [A][P]` — games in which the caller is `invited_id`.
#[utoipa::path(
    get,
    path = "/games/invites",
    tag = "games",
    params(("page" = Option<u64>, Query)),
    responses((status = 200, description = "Pending invitations addressed to the caller"))
)]
pub async fn invites(
    req: HttpRequest,
    query: web::Query<PageQuery>,
    sessions: web::Data<SessionStore>,
    accounts: web::Data<AccountStore>,
    games: web::Data<GameStore>,
) -> HttpResponse {
    let (_session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };
    let matching: Vec<Game> = {
        let guard = games.lock().expect("games mutex poisoned");
        guard.values().filter(|g| g.invited_id == Some(user_id)).cloned().collect()
    };
    referenced_response(matching, query.page(), &accounts)
}

/// `GET /games/searches [A][P]` — the caller's own pending `Find` games
/// (host, Searching, not yet paired).
#[utoipa::path(
    get,
    path = "/games/searches",
    tag = "games",
    params(("page" = Option<u64>, Query)),
    responses((status = 200, description = "The caller's own pending matchmaking searches"))
)]
pub async fn searches(
    req: HttpRequest,
    query: web::Query<PageQuery>,
    sessions: web::Data<SessionStore>,
    accounts: web::Data<AccountStore>,
    games: web::Data<GameStore>,
) -> HttpResponse {
    let (_session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };
    let matching: Vec<Game> = {
        let guard = games.lock().expect("games mutex poisoned");
        guard
            .values()
            .filter(|g| g.host_id == user_id && g.away_id.is_none() && g.invited_id.is_none())
            .cloned()
            .collect()
    };
    referenced_response(matching, query.page(), &accounts)
}

/// `GET /games/ongoing [A][P]` — the caller's live (Started) games,
/// snapshotted from their owning hubs.
#[utoipa::path(
    get,
    path = "/games/ongoing",
    tag = "games",
    params(("page" = Option<u64>, Query)),
    responses((status = 200, description = "The caller's currently live games"))
)]
pub async fn ongoing(
    req: HttpRequest,
    query: web::Query<PageQuery>,
    sessions: web::Data<SessionStore>,
    accounts: web::Data<AccountStore>,
    hubs: web::Data<HubRegistry>,
) -> HttpResponse {
    let (_session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };
    let mut games = Vec::new();
    for game_id in hubs.ongoing_for(user_id) {
        if let Some(addr) = hubs.get(game_id) {
            match addr.send(Snapshot).await {
                Ok(game) => games.push(game),
                Err(e) => log::warn!("hub mailbox error while snapshotting {game_id}: {e}"),
            }
        }
    }
    referenced_response(games, query.page(), &accounts)
}

/// `GET /games/completed?account= [P]` — every archived game `account`
/// played in, newest first.
#[utoipa::path(
    get,
    path = "/games/completed",
    tag = "games",
    params(("account" = u64, Query), ("page" = Option<u64>, Query)),
    responses((status = 200, description = "An account's completed games"))
)]
pub async fn completed(
    query: web::Query<AccountPageQuery>,
    accounts: web::Data<AccountStore>,
    storage: web::Data<GameStorage>,
) -> HttpResponse {
    let games = match load_completed_for(&storage, query.account) {
        Ok(games) => games,
        Err(e) => return api::error_response(e),
    };
    referenced_response(games, query.page(), &accounts)
}

/// `GET /games/common_completed?account= [A][P]` — completed games shared
/// between the caller and `account`.
#[utoipa::path(
    get,
    path = "/games/common_completed",
    tag = "games",
    params(("account" = u64, Query), ("page" = Option<u64>, Query)),
    responses((status = 200, description = "Completed games shared between the caller and an account"))
)]
pub async fn common_completed(
    req: HttpRequest,
    query: web::Query<AccountPageQuery>,
    sessions: web::Data<SessionStore>,
    accounts: web::Data<AccountStore>,
    storage: web::Data<GameStorage>,
) -> HttpResponse {
    let (_session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };
    let games = match load_completed_for(&storage, query.account) {
        Ok(games) => games,
        Err(e) => return api::error_response(e),
    };
    let games: Vec<Game> = games
        .into_iter()
        .filter(|g| g.host_id == user_id || g.away_id == Some(user_id))
        .collect();
    referenced_response(games, query.page(), &accounts)
}

/// `GET /games/<id>` — users included (§6), wherever the game currently
/// lives.
#[utoipa::path(
    get,
    path = "/games/{id}",
    tag = "games",
    params(("id" = uuid::Uuid, Path)),
    responses(
        (status = 200, description = "The game, with users embedded"),
        (status = 404, description = "No such game", body = crate::errors::ErrorBody),
    )
)]
pub async fn get_game(
    path: web::Path<GameId>,
    accounts: web::Data<AccountStore>,
    games: web::Data<GameStore>,
    hubs: web::Data<HubRegistry>,
    storage: web::Data<GameStorage>,
) -> HttpResponse {
    let game_id = path.into_inner();
    let game = match find_any_game(game_id, &games, &hubs, &storage).await {
        Some(game) => game,
        None => return api::error_response(KasupelError::GameNotFound),
    };
    let host = match accounts.get(game.host_id) {
        Ok(user) => user,
        Err(e) => return api::error_response(e),
    };
    let away = game.away_id.and_then(|id| accounts.get(id).ok());
    let invited = game.invited_id.and_then(|id| accounts.get(id).ok());
    HttpResponse::Ok().json(wire::game_included(&game, &host, away.as_ref(), invited.as_ref()))
}

/// `POST /games/find [A][V][E]` — spec §4.4 `Find`.
#[utoipa::path(
    post,
    path = "/games/find",
    tag = "games",
    request_body = FindRequest,
    responses((status = 200, description = "Paired with a waiting opponent, or a new search was opened", body = GameIdResponse))
)]
#[allow(clippy::too_many_arguments)]
pub async fn find(
    req: HttpRequest,
    body: web::Bytes,
    sessions: web::Data<SessionStore>,
    accounts: web::Data<AccountStore>,
    games: web::Data<GameStore>,
    notifications: web::Data<NotificationQueue>,
    matchmaker: web::Data<Matchmaker>,
    hubs: web::Data<HubRegistry>,
    storage: web::Data<GameStorage>,
    decryptor: web::Data<crate::api::PassthroughDecryptor>,
) -> HttpResponse {
    let (_session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };
    if let Err(e) = api::require_verified(&accounts, user_id) {
        return api::error_response(e);
    }

    let payload: FindRequest = match api::decrypt_json(&body, decryptor.get_ref()) {
        Ok(payload) => payload,
        Err(e) => return api::error_response(e),
    };
    let profile = match payload.time_control.to_time_control() {
        Ok(profile) => profile,
        Err(e) => return api::error_response(e),
    };

    let wall_time = api::now();
    let (game_id, outcome) = {
        let mut guard = games.lock().expect("games mutex poisoned");
        matchmaker.find(user_id, profile, wall_time, uuid::Uuid::new_v4, &mut guard, &notifications)
    };

    // A pairing starts the game immediately (§4.4); hand it to a fresh hub
    // right away rather than waiting for the first socket connect.
    if outcome == FindOutcome::Paired {
        let paired = games.lock().expect("games mutex poisoned").remove(&game_id);
        if let Some(game) = paired {
            hub::spawn(game, accounts.clone(), notifications.clone(), storage.clone(), hubs.clone());
        }
    } else if let Some(game) = games.lock().expect("games mutex poisoned").get(&game_id) {
        // A fresh Searching game has no hub to persist it; without this it
        // can't survive a restart, and the matchmaker's pending index would
        // have nothing real on disk to reindex (see `main::recover_active_games`).
        if let Err(e) = storage.save_active(game) {
            log::warn!("failed to persist pending game {game_id}: {e}");
        }
    }

    HttpResponse::Ok().json(GameIdResponse { game_id })
}

/// `POST /games/send_invitation [A][V][E]` — spec §4.4 `SendInvitation`.
#[utoipa::path(
    post,
    path = "/games/send_invitation",
    tag = "games",
    request_body = SendInvitationRequest,
    responses((status = 200, description = "Invitation sent", body = GameIdResponse))
)]
pub async fn send_invitation(
    req: HttpRequest,
    body: web::Bytes,
    sessions: web::Data<SessionStore>,
    accounts: web::Data<AccountStore>,
    games: web::Data<GameStore>,
    notifications: web::Data<NotificationQueue>,
    matchmaker: web::Data<Matchmaker>,
    storage: web::Data<GameStorage>,
    decryptor: web::Data<crate::api::PassthroughDecryptor>,
) -> HttpResponse {
    let (_session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };
    if let Err(e) = api::require_verified(&accounts, user_id) {
        return api::error_response(e);
    }

    let payload: SendInvitationRequest = match api::decrypt_json(&body, decryptor.get_ref()) {
        Ok(payload) => payload,
        Err(e) => return api::error_response(e),
    };
    let profile = match payload.time_control.to_time_control() {
        Ok(profile) => profile,
        Err(e) => return api::error_response(e),
    };
    let invitee = match accounts.get_by_username(&payload.invitee) {
        Ok(user) => user.id,
        Err(e) => return api::error_response(e),
    };

    let wall_time = api::now();
    let result = {
        let mut guard = games.lock().expect("games mutex poisoned");
        matchmaker.send_invitation(user_id, invitee, profile, wall_time, uuid::Uuid::new_v4, &mut guard, &notifications)
    };

    match result {
        Ok(game_id) => {
            if let Some(game) = games.lock().expect("games mutex poisoned").get(&game_id) {
                if let Err(e) = storage.save_active(game) {
                    log::warn!("failed to persist invited game {game_id}: {e}");
                }
            }
            HttpResponse::Ok().json(GameIdResponse { game_id })
        }
        Err(e) => api::error_response(e),
    }
}

/// `POST /games/invites/<game> [A][V]` — spec §4.4 `AcceptInvitation`.
#[utoipa::path(
    post,
    path = "/games/invites/{game}",
    tag = "games",
    params(("game" = uuid::Uuid, Path)),
    responses((status = 200, description = "Invitation accepted, game started", body = GameIdResponse))
)]
pub async fn accept_invitation(
    req: HttpRequest,
    path: web::Path<GameId>,
    sessions: web::Data<SessionStore>,
    accounts: web::Data<AccountStore>,
    games: web::Data<GameStore>,
    notifications: web::Data<NotificationQueue>,
    matchmaker: web::Data<Matchmaker>,
    hubs: web::Data<HubRegistry>,
    storage: web::Data<GameStorage>,
) -> HttpResponse {
    let (_session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };
    if let Err(e) = api::require_verified(&accounts, user_id) {
        return api::error_response(e);
    }
    let game_id = path.into_inner();
    let wall_time = api::now();

    {
        let mut guard = games.lock().expect("games mutex poisoned");
        if let Err(e) = matchmaker.accept_invitation(user_id, game_id, wall_time, &mut guard, &notifications) {
            return api::error_response(e);
        }
    }

    let started = games.lock().expect("games mutex poisoned").remove(&game_id);
    if let Some(game) = started {
        hub::spawn(game, accounts.clone(), notifications.clone(), storage.clone(), hubs.clone());
    }

    HttpResponse::Ok().json(GameIdResponse { game_id })
}

/// `DELETE /games/invites/<game> [A]` — spec §4.4 `DeclineInvitation`. An
/// Invited game never has a hub (one is only spawned once `Game::start`
/// has run, see `ws::ws_connect`/`hub::spawn`), so the host-notification
/// side effect here is always just the queued `matchmaking.invite_declined`
/// notification — there is no connected socket to disconnect.
#[utoipa::path(
    delete,
    path = "/games/invites/{game}",
    tag = "games",
    params(("game" = uuid::Uuid, Path)),
    responses((status = 200, description = "Invitation declined"))
)]
pub async fn decline_invitation(
    req: HttpRequest,
    path: web::Path<GameId>,
    sessions: web::Data<SessionStore>,
    games: web::Data<GameStore>,
    notifications: web::Data<NotificationQueue>,
    matchmaker: web::Data<Matchmaker>,
    storage: web::Data<GameStorage>,
) -> HttpResponse {
    let (_session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };
    let game_id = path.into_inner();
    let wall_time = api::now();

    let result = {
        let mut guard = games.lock().expect("games mutex poisoned");
        matchmaker.decline_invitation(user_id, game_id, wall_time, &mut guard, &notifications)
    };
    match result {
        Ok(_host_id) => {
            if let Err(e) = storage.remove_active(&game_id) {
                log::warn!("failed to remove declined game {game_id} from disk: {e}");
            }
            HttpResponse::Ok().json(json!({}))
        }
        Err(e) => api::error_response(e),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/games")
            .route("/invites", web::get().to(invites))
            .route("/invites/{game}", web::post().to(accept_invitation))
            .route("/invites/{game}", web::delete().to(decline_invitation))
            .route("/searches", web::get().to(searches))
            .route("/ongoing", web::get().to(ongoing))
            .route("/completed", web::get().to(completed))
            .route("/common_completed", web::get().to(common_completed))
            .route("/find", web::post().to(find))
            .route("/send_invitation", web::post().to(send_invitation))
            .route("/{id}", web::get().to(get_game)),
    );
}
