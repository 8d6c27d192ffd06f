//! Error taxonomy (spec §7) — a closed 4-digit numeric code per failure,
//! grouped by family: 1000 accounts, 2000 games, 3000 malformed request,
//! 4000 internal, 5000 media. Codes ending in 0 are sub-group labels and
//! are never themselves returned.
//!
//! `KasupelError` is the one error type every in-scope component returns;
//! `api.rs` and `ws.rs` translate it to the HTTP/socket wire forms. The
//! 4000 family is logged with context before being downgraded to a generic
//! code at the boundary, per §7's propagation policy.

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KasupelError {
    // 1000 — accounts
    #[error("account not found")]
    AccountNotFound,
    #[error("username too short")]
    UsernameTooShort,
    #[error("username too long")]
    UsernameTooLong,
    #[error("username already taken")]
    UsernameTaken,
    #[error("password too short or too weak")]
    PasswordTooWeak,
    #[error("password too long")]
    PasswordTooLong,
    #[error("password has been seen in a breach")]
    PasswordPwned,
    #[error("email address malformed")]
    EmailMalformed,
    #[error("email address already in use")]
    EmailTaken,
    #[error("email not verified")]
    EmailNotVerified,
    #[error("verification token invalid")]
    VerificationTokenInvalid,
    #[error("verification token already used")]
    VerificationTokenUsed,
    #[error("session not found or expired")]
    SessionInvalid,
    #[error("wrong username or password")]
    LoginFailed,
    #[error("notification not found")]
    NotificationNotFound,

    // 2000 — games
    #[error("game not found")]
    GameNotFound,
    #[error("user was not invited to this game")]
    NotInvited,
    #[error("cannot invite yourself")]
    CannotInviteSelf,
    #[error("socket is not a participant of this game")]
    NotParticipant,
    #[error("game has already ended")]
    GameAlreadyEnded,
    #[error("game is not in progress")]
    NotInProgress,
    #[error("it is not this side's turn")]
    NotYourTurn,
    #[error("move is not legal in this position")]
    InvalidMove,
    #[error("opponent has not timed out")]
    NotTimedOut,
    #[error("reason is not a valid draw-claim reason")]
    NotADrawReason,
    #[error("draw is not available for the given reason")]
    DrawNotAvailable,

    // 3000 — malformed request
    #[error("a required value is missing")]
    ValueRequired,
    #[error("wrong parameters supplied")]
    WrongParameters,
    #[error("encrypted payload could not be decrypted")]
    BadEncryptedData,
    #[error("request body failed to parse")]
    SyntaxError,
    #[error("page out of range")]
    PageOutOfRange,
    #[error("unknown URL")]
    UnknownUrl,
    #[error("Authorization header missing or malformed")]
    SocketAuthHeaderMissing,
    #[error("Authorization header names an unknown session")]
    SocketAuthHeaderInvalid,
    #[error("Game-ID header missing or malformed")]
    SocketGameIdHeaderInvalid,
    #[error("Game-ID header names a game the socket may not join")]
    SocketGameIdHeaderForbidden,

    // 4000 — internal
    #[error("internal server error")]
    Internal,
    #[error("socket session not known to the server")]
    SocketSessionUnknown,

    // 5000 — media
    #[error("media not found")]
    MediaNotFound,
}

impl KasupelError {
    /// The numeric code per §7.
    pub fn code(self) -> u32 {
        use KasupelError::*;
        match self {
            AccountNotFound => 1001,
            UsernameTooShort => 1111,
            UsernameTooLong => 1112,
            UsernameTaken => 1113,
            PasswordTooWeak => 1121,
            PasswordTooLong => 1122,
            PasswordPwned => 1123,
            EmailMalformed => 1131,
            EmailTaken => 1132,
            EmailNotVerified => 1133,
            VerificationTokenInvalid => 1201,
            VerificationTokenUsed => 1202,
            SessionInvalid => 1301,
            LoginFailed => 1302,
            NotificationNotFound => 1401,

            GameNotFound => 2001,
            NotInvited => 2111,
            CannotInviteSelf => 2121,
            NotParticipant => 2201,
            GameAlreadyEnded => 2202,
            NotInProgress => 2311,
            NotYourTurn => 2312,
            InvalidMove => 2313,
            NotTimedOut => 2314,
            NotADrawReason => 2321,
            DrawNotAvailable => 2322,

            ValueRequired => 3101,
            WrongParameters => 3102,
            BadEncryptedData => 3103,
            SyntaxError => 3111,
            PageOutOfRange => 3201,
            UnknownUrl => 3301,
            SocketAuthHeaderMissing => 3411,
            SocketAuthHeaderInvalid => 3412,
            SocketGameIdHeaderInvalid => 3413,
            SocketGameIdHeaderForbidden => 3421,

            Internal => 4001,
            SocketSessionUnknown => 4101,

            MediaNotFound => 5001,
        }
    }

    /// `true` for the 4000 family — these are logged with context and
    /// downgraded to a generic message before reaching the client.
    pub fn is_internal(self) -> bool {
        matches!(self, KasupelError::Internal | KasupelError::SocketSessionUnknown)
    }

    /// The HTTP status this error maps to, for `api.rs` handlers.
    pub fn http_status(self) -> u16 {
        use KasupelError::*;
        match self {
            AccountNotFound | GameNotFound | NotificationNotFound | MediaNotFound => 404,
            SessionInvalid | LoginFailed => 401,
            EmailNotVerified => 403,
            Internal | SocketSessionUnknown => 500,
            _ => 400,
        }
    }
}

/// The JSON error body shape returned by both the HTTP and socket layers.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: u32,
    pub message: String,
}

impl From<KasupelError> for ErrorBody {
    fn from(err: KasupelError) -> Self {
        if err.is_internal() {
            log::error!("internal error surfaced to client: {err:?}");
            ErrorBody {
                code: KasupelError::Internal.code(),
                message: "internal server error".to_string(),
            }
        } else {
            ErrorBody {
                code: err.code(),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_spec_families() {
        assert_eq!(KasupelError::GameNotFound.code(), 2001);
        assert_eq!(KasupelError::NotYourTurn.code(), 2312);
        assert_eq!(KasupelError::SocketGameIdHeaderForbidden.code(), 3421);
    }

    #[test]
    fn internal_errors_are_downgraded() {
        let body: ErrorBody = KasupelError::SocketSessionUnknown.into();
        assert_eq!(body.code, 4001);
        assert_eq!(body.message, "internal server error");
    }
}
