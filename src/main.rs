//! # Kasupel — turn-based chess matchmaking and live-play server
//!
//! Kasupel pairs players through a time-control-based matchmaker, runs one
//! live game per `GameHub` actor, and persists finished games to a
//! zstd-compressed archive. See the crate's modules for each subsystem:
//! `movegen`/`clock`/`elo` (pure chess rules and arithmetic), `engine`
//! (the per-game state machine), `matchmaker` (pairing/invitations),
//! `hub` (live-game actors and socket fan-out), `accounts`/`sessions`/
//! `notifications` (cross-game shared state), `storage` (persistence),
//! and `api`/`ws` (the HTTP and WebSocket surface).
//!
//! ## Usage
//!
//! ```bash
//! # Start the API server (default: http://0.0.0.0:8080)
//! kasupel serve
//!
//! # Start the API server on a custom port, with a custom data directory
//! kasupel serve --port 3000 --data-dir /var/lib/kasupel
//! ```
//!
//! Swagger UI is available at `/swagger-ui/`.

pub mod accounts;
pub mod api;
pub mod clock;
pub mod elo;
pub mod engine;
pub mod errors;
pub mod hub;
pub mod matchmaker;
pub mod movegen;
pub mod notifications;
pub mod pagination;
pub mod sessions;
pub mod storage;
pub mod types;
pub mod wire;
pub mod ws;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use clap::{Parser, Subcommand};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::accounts::{AccountStore, InMemoryAvatarStore, LoggingEmailSender, NeverPwned};
use crate::api::{ApiDoc, PassthroughDecryptor};
use crate::engine::GameStore;
use crate::hub::HubRegistry;
use crate::matchmaker::Matchmaker;
use crate::notifications::NotificationQueue;
use crate::sessions::{DEFAULT_SESSION_TTL_DAYS, SessionStore};
use crate::storage::GameStorage;

/// Kasupel — turn-based chess matchmaking and live-play server.
#[derive(Parser, Debug)]
#[command(name = "kasupel")]
#[command(about = "Turn-based chess matchmaking and live-play server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP + WebSocket server with Swagger UI.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        /// Host address to bind to.
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Directory for game storage (active snapshots + archive).
        #[arg(long, default_value = "data")]
        data_dir: String,

        /// Interval, in milliseconds, between background sweeps that expire
        /// silently-timed-out games (§5).
        #[arg(long, default_value_t = 1000)]
        sweep_interval_ms: u64,

        /// Number of days a session remains valid after login.
        #[arg(long, default_value_t = DEFAULT_SESSION_TTL_DAYS)]
        session_ttl_days: i64,
    },
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { port, host, data_dir, sweep_interval_ms, session_ttl_days } => {
            run_server(&host, port, &data_dir, sweep_interval_ms, session_ttl_days).await
        }
    }
}

/// Rebuilds in-memory state from `<data_dir>/active/*.ksp` at startup
/// (spec §5's crash-recovery guarantee): an already-Started game gets its
/// hub spawned immediately, everything else (a restart can only ever catch
/// a Searching or Invited game here, since those are the only states with
/// no hub to have persisted it) waits in the pending store for a `Find`
/// pairing, invitation acceptance, or socket connect. A recovered Searching
/// game (away_id and invited_id both null) is also re-registered in the
/// matchmaker's `pending_by_profile` index — that index is in-memory only,
/// so without this a recovered search would sit in `games` forever, never
/// matched by a later `Find` with the same profile.
fn recover_active_games(
    storage: &web::Data<GameStorage>,
    games: &web::Data<GameStore>,
    accounts: &web::Data<AccountStore>,
    notifications: &web::Data<NotificationQueue>,
    hubs: &web::Data<HubRegistry>,
    matchmaker: &web::Data<Matchmaker>,
) {
    let ids = match storage.list_active_on_disk() {
        Ok(ids) => ids,
        Err(e) => {
            log::error!("failed to list active games on disk: {e}");
            return;
        }
    };
    for id in ids {
        let game = match storage.load_active(&id) {
            Ok(game) => game,
            Err(e) => {
                log::error!("failed to recover active game {id}: {e}");
                continue;
            }
        };
        if game.is_started() {
            log::info!("recovered live game {id}, spawning hub");
            hub::spawn(game, accounts.clone(), notifications.clone(), storage.clone(), hubs.clone());
        } else {
            log::info!("recovered pending game {id}");
            if game.away_id.is_none() && game.invited_id.is_none() {
                matchmaker.reindex_pending(game.time_control, id);
            }
            games.lock().expect("games mutex poisoned").insert(id, game);
        }
    }
}

/// The background sweep (§5): on `sweep_interval_ms`, posts `SweepTimeout`
/// to every live hub so a silent opponent's clock expiry still ends the
/// game even if no client ever sends `timeout`.
fn spawn_sweep_task(hubs: web::Data<HubRegistry>, sweep_interval_ms: u64) {
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(sweep_interval_ms));
        loop {
            interval.tick().await;
            hub::sweep_all(&hubs);
        }
    });
}

/// Starts the HTTP + WebSocket server with all API routes and Swagger UI.
async fn run_server(
    host: &str,
    port: u16,
    data_dir: &str,
    sweep_interval_ms: u64,
    session_ttl_days: i64,
) -> std::io::Result<()> {
    let openapi = ApiDoc::openapi();

    let accounts = web::Data::new(AccountStore::new());
    let sessions = web::Data::new(SessionStore::new(session_ttl_days));
    let notifications = web::Data::new(NotificationQueue::new());
    let matchmaker = web::Data::new(Matchmaker::new());
    let hubs = web::Data::new(HubRegistry::new());
    let games: web::Data<GameStore> = web::Data::new(Mutex::new(HashMap::new()));
    let storage = web::Data::new(GameStorage::new(data_dir)?);
    let pwned = web::Data::new(NeverPwned);
    let email_sender = web::Data::new(LoggingEmailSender);
    let avatar_store = web::Data::new(InMemoryAvatarStore::default());
    let decryptor = web::Data::new(PassthroughDecryptor);

    recover_active_games(&storage, &games, &accounts, &notifications, &hubs, &matchmaker);
    spawn_sweep_task(hubs.clone(), sweep_interval_ms);

    log::info!("Starting Kasupel server on {host}:{port}");
    log::info!("Game storage directory: {data_dir}");
    log::info!("Swagger UI available at http://{host}:{port}/swagger-ui/");
    log::info!("WebSocket endpoint: ws://{host}:{port}/ws");

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(accounts.clone())
            .app_data(sessions.clone())
            .app_data(notifications.clone())
            .app_data(matchmaker.clone())
            .app_data(hubs.clone())
            .app_data(games.clone())
            .app_data(storage.clone())
            .app_data(pwned.clone())
            .app_data(email_sender.clone())
            .app_data(avatar_store.clone())
            .app_data(decryptor.clone())
            .configure(api::configure_routes)
            .route("/ws", web::get().to(ws::ws_connect))
            .service(SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi.clone()))
    })
    .bind((host, port))?
    .run()
    .await
}
