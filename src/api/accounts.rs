//! `GET/POST/PATCH/DELETE /accounts/*` and `GET /users/<username>` (spec
//! §6 Accounts) — handler shape grounded on `JosunLP-checkai/src/api.rs`'s
//! `web::Data`-extraction, JSON-body-struct pattern.

use actix_web::{HttpRequest, HttpResponse, web};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::accounts::{AccountStore, AvatarStore, EmailSender, PwnedChecker};
use crate::api::{self, PageQuery, PayloadDecryptor};
use crate::engine::UserId;
use crate::errors::KasupelError;
use crate::notifications::NotificationQueue;
use crate::pagination;
use crate::sessions::SessionStore;
use crate::wire::{NotificationWire, PublicUser};

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// 32 raw bytes, base64-encoded — the client-generated session secret
    /// (spec §6 `POST /accounts/login [E]`).
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub session_id: u64,
}

/// `POST /accounts/login [E]`.
#[utoipa::path(
    post,
    path = "/accounts/login",
    tag = "accounts",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session created", body = LoginResponse),
        (status = 401, description = "Wrong username or password", body = crate::errors::ErrorBody),
    )
)]
pub async fn login(
    body: web::Bytes,
    accounts: web::Data<AccountStore>,
    sessions: web::Data<SessionStore>,
    decryptor: web::Data<api::PassthroughDecryptor>,
) -> HttpResponse {
    let req: LoginRequest = match api::decrypt_json(&body, decryptor.get_ref()) {
        Ok(req) => req,
        Err(e) => return api::error_response(e),
    };

    use base64::Engine as _;
    let token = match base64::engine::general_purpose::STANDARD.decode(&req.token) {
        Ok(t) => t,
        Err(_) => return api::error_response(KasupelError::WrongParameters),
    };

    match accounts.authenticate(&req.username, &req.password) {
        Ok(user_id) => {
            let session_id = sessions.login(user_id, &token, api::now());
            HttpResponse::Ok().json(LoginResponse { session_id })
        }
        Err(e) => api::error_response(e),
    }
}

/// `GET /accounts/logout [A]`.
#[utoipa::path(
    get,
    path = "/accounts/logout",
    tag = "accounts",
    responses((status = 200, description = "Session ended"))
)]
pub async fn logout(req: HttpRequest, sessions: web::Data<SessionStore>) -> HttpResponse {
    let (session_id, _user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };
    sessions.logout(session_id);
    HttpResponse::Ok().json(serde_json::json!({}))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAccountRequest {
    pub username: String,
    pub password: String,
    pub email: String,
}

/// `POST /accounts/create [E]`.
#[utoipa::path(
    post,
    path = "/accounts/create",
    tag = "accounts",
    request_body = CreateAccountRequest,
    responses(
        (status = 200, description = "Account created", body = PublicUser),
        (status = 400, description = "Validation failed", body = crate::errors::ErrorBody),
    )
)]
pub async fn create(
    body: web::Bytes,
    accounts: web::Data<AccountStore>,
    pwned: web::Data<crate::accounts::NeverPwned>,
    email_sender: web::Data<crate::accounts::LoggingEmailSender>,
    decryptor: web::Data<api::PassthroughDecryptor>,
) -> HttpResponse {
    let req: CreateAccountRequest = match api::decrypt_json(&body, decryptor.get_ref()) {
        Ok(req) => req,
        Err(e) => return api::error_response(e),
    };

    match accounts.create(req.username, req.password, req.email, pwned.get_ref(), api::now()) {
        Ok((user, token)) => {
            email_sender.send_verification_email(&user.email, &token);
            HttpResponse::Ok().json(PublicUser::owned(&user))
        }
        Err(e) => api::error_response(e),
    }
}

/// `GET /accounts/resend_verification_email [A]`.
#[utoipa::path(
    get,
    path = "/accounts/resend_verification_email",
    tag = "accounts",
    responses((status = 200, description = "Verification email reissued"))
)]
pub async fn resend_verification_email(
    req: HttpRequest,
    accounts: web::Data<AccountStore>,
    sessions: web::Data<SessionStore>,
    email_sender: web::Data<crate::accounts::LoggingEmailSender>,
) -> HttpResponse {
    let (_session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };

    let token = match accounts.resend_verification_token(user_id) {
        Ok(token) => token,
        Err(e) => return api::error_response(e),
    };
    match accounts.get(user_id) {
        Ok(user) => {
            email_sender.send_verification_email(&user.email, &token);
            HttpResponse::Ok().json(serde_json::json!({}))
        }
        Err(e) => api::error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub username: String,
    pub token: String,
}

/// `GET /accounts/verify_email`.
#[utoipa::path(
    get,
    path = "/accounts/verify_email",
    tag = "accounts",
    params(("username" = String, Query), ("token" = String, Query)),
    responses((status = 200, description = "Email verified"))
)]
pub async fn verify_email(query: web::Query<VerifyEmailQuery>, accounts: web::Data<AccountStore>) -> HttpResponse {
    match accounts.verify_email(&query.username, &query.token) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({})),
        Err(e) => api::error_response(e),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateAccountRequest {
    pub password: Option<String>,
    /// Raw avatar bytes, base64-encoded; ≤1 MiB, png/jpeg/gif/webp.
    pub avatar: Option<String>,
    pub email: Option<String>,
}

/// The four image formats `PATCH /accounts/me` accepts, sniffed from the
/// leading bytes — spec §6 ("avatar ≤1 MiB, png/jpeg/gif/webp").
fn is_supported_image(bytes: &[u8]) -> bool {
    bytes.starts_with(b"\x89PNG\r\n\x1a\n")
        || bytes.starts_with(b"\xff\xd8\xff")
        || bytes.starts_with(b"GIF87a")
        || bytes.starts_with(b"GIF89a")
        || (bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP")
}

/// `PATCH /accounts/me [A][E]`.
#[utoipa::path(
    patch,
    path = "/accounts/me",
    tag = "accounts",
    request_body = UpdateAccountRequest,
    responses(
        (status = 200, description = "Account updated", body = PublicUser),
        (status = 400, description = "Validation failed", body = crate::errors::ErrorBody),
    )
)]
pub async fn update_me(
    req: HttpRequest,
    body: web::Bytes,
    accounts: web::Data<AccountStore>,
    sessions: web::Data<SessionStore>,
    avatar_store: web::Data<crate::accounts::InMemoryAvatarStore>,
    decryptor: web::Data<api::PassthroughDecryptor>,
) -> HttpResponse {
    let (_session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };

    let patch: UpdateAccountRequest = match api::decrypt_json(&body, decryptor.get_ref()) {
        Ok(patch) => patch,
        Err(e) => return api::error_response(e),
    };

    let avatar_blob_id = match patch.avatar {
        None => None,
        Some(b64) => {
            use base64::Engine as _;
            let bytes = match base64::engine::general_purpose::STANDARD.decode(&b64) {
                Ok(b) => b,
                Err(_) => return api::error_response(KasupelError::WrongParameters),
            };
            if !is_supported_image(&bytes) {
                return api::error_response(KasupelError::WrongParameters);
            }
            match avatar_store.store(&bytes) {
                Ok(id) => Some(id),
                Err(e) => return api::error_response(e),
            }
        }
    };

    match accounts.update(user_id, patch.password, avatar_blob_id, patch.email) {
        Ok(user) => HttpResponse::Ok().json(PublicUser::owned(&user)),
        Err(e) => api::error_response(e),
    }
}

/// `DELETE /accounts/me [A]`.
#[utoipa::path(
    delete,
    path = "/accounts/me",
    tag = "accounts",
    responses((status = 200, description = "Account tombstoned"))
)]
pub async fn delete_me(req: HttpRequest, accounts: web::Data<AccountStore>, sessions: web::Data<SessionStore>) -> HttpResponse {
    let (session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };
    match accounts.tombstone(user_id) {
        Ok(()) => {
            sessions.logout(session_id);
            HttpResponse::Ok().json(serde_json::json!({}))
        }
        Err(e) => api::error_response(e),
    }
}

/// `GET /accounts/me [A]` → User with email.
#[utoipa::path(
    get,
    path = "/accounts/me",
    tag = "accounts",
    responses((status = 200, description = "The caller's own account", body = PublicUser))
)]
pub async fn me(req: HttpRequest, accounts: web::Data<AccountStore>, sessions: web::Data<SessionStore>) -> HttpResponse {
    let (_session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };
    match accounts.get(user_id) {
        Ok(user) => HttpResponse::Ok().json(PublicUser::owned(&user)),
        Err(e) => api::error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    pub id: UserId,
}

/// `GET /accounts/account?id=`.
#[utoipa::path(
    get,
    path = "/accounts/account",
    tag = "accounts",
    params(("id" = u64, Query)),
    responses((status = 200, description = "Public view of an account", body = PublicUser))
)]
pub async fn account(query: web::Query<AccountQuery>, accounts: web::Data<AccountStore>) -> HttpResponse {
    match accounts.get(query.id) {
        Ok(user) => HttpResponse::Ok().json(PublicUser::public(&user)),
        Err(e) => api::error_response(e),
    }
}

/// `GET /users/<username>`.
#[utoipa::path(
    get,
    path = "/users/{username}",
    tag = "accounts",
    params(("username" = String, Path)),
    responses((status = 200, description = "Public view of an account", body = PublicUser))
)]
pub async fn user_by_username(path: web::Path<String>, accounts: web::Data<AccountStore>) -> HttpResponse {
    match accounts.get_by_username(&path.into_inner()) {
        Ok(user) => HttpResponse::Ok().json(PublicUser::public(&user)),
        Err(e) => api::error_response(e),
    }
}

/// `GET /accounts/accounts [P]` sorted by ELO desc.
#[utoipa::path(
    get,
    path = "/accounts/accounts",
    tag = "accounts",
    params(("page" = Option<u64>, Query)),
    responses((status = 200, description = "Paginated ELO leaderboard"))
)]
pub async fn list_accounts(query: web::Query<PageQuery>, accounts: web::Data<AccountStore>) -> HttpResponse {
    let users: Vec<PublicUser> = accounts.list_by_elo_desc().iter().map(PublicUser::public).collect();
    match pagination::paginate(&users, query.page()) {
        Ok(page) => HttpResponse::Ok().json(page),
        Err(e) => api::error_response(e),
    }
}

/// `GET /accounts/notifications [A][P]`.
#[utoipa::path(
    get,
    path = "/accounts/notifications",
    tag = "accounts",
    params(("page" = Option<u64>, Query)),
    responses((status = 200, description = "Paginated notification list"))
)]
pub async fn notifications(
    req: HttpRequest,
    query: web::Query<PageQuery>,
    sessions: web::Data<SessionStore>,
    notifications: web::Data<NotificationQueue>,
) -> HttpResponse {
    let (_session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };
    let items: Vec<NotificationWire> = notifications.list(user_id).iter().map(NotificationWire::from).collect();
    match pagination::paginate(&items, query.page()) {
        Ok(page) => HttpResponse::Ok().json(page),
        Err(e) => api::error_response(e),
    }
}

/// `GET /accounts/notifications/unread_count [A]`.
#[utoipa::path(
    get,
    path = "/accounts/notifications/unread_count",
    tag = "accounts",
    responses((status = 200, description = "Unread notification count"))
)]
pub async fn notifications_unread_count(
    req: HttpRequest,
    sessions: web::Data<SessionStore>,
    notifications: web::Data<NotificationQueue>,
) -> HttpResponse {
    let (_session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };
    HttpResponse::Ok().json(serde_json::json!({ "unread_count": notifications.unread_count(user_id) }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AckNotificationRequest {
    pub id: u64,
}

/// `POST /accounts/notifications/ack [A]`.
#[utoipa::path(
    post,
    path = "/accounts/notifications/ack",
    tag = "accounts",
    request_body = AckNotificationRequest,
    responses((status = 200, description = "Notification acknowledged"))
)]
pub async fn notifications_ack(
    req: HttpRequest,
    body: web::Json<AckNotificationRequest>,
    sessions: web::Data<SessionStore>,
    notifications: web::Data<NotificationQueue>,
) -> HttpResponse {
    let (_session_id, user_id) = match api::authenticate(&req, &sessions) {
        Ok(pair) => pair,
        Err(e) => return api::error_response(e),
    };
    match notifications.ack(user_id, body.id) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({})),
        Err(e) => api::error_response(e),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/accounts")
            .route("/login", web::post().to(login))
            .route("/logout", web::get().to(logout))
            .route("/create", web::post().to(create))
            .route("/resend_verification_email", web::get().to(resend_verification_email))
            .route("/verify_email", web::get().to(verify_email))
            .route("/me", web::patch().to(update_me))
            .route("/me", web::delete().to(delete_me))
            .route("/me", web::get().to(me))
            .route("/account", web::get().to(account))
            .route("/accounts", web::get().to(list_accounts))
            .route("/notifications", web::get().to(notifications))
            .route("/notifications/unread_count", web::get().to(notifications_unread_count))
            .route("/notifications/ack", web::post().to(notifications_ack)),
    );
    cfg.route("/users/{username}", web::get().to(user_by_username));
}
