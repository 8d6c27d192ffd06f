//! Session store (spec §3 Session) —
//! `session_id → (user_id, token_hash, expires_at)`.
//!
//! Grounded structurally on the same mutex-guarded-map idiom used
//! throughout this crate for shared, cross-request state (matchmaker's
//! pending index, notification queue). The session *secret* (the
//! client-generated 32-byte token) is never stored — only its hash, so a
//! stolen snapshot of this store cannot be replayed as a valid token.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

use crate::engine::UserId;
use crate::errors::KasupelError;

pub type SessionId = u64;

pub const DEFAULT_SESSION_TTL_DAYS: i64 = 30;

struct Session {
    user_id: UserId,
    token_hash: [u8; 32],
    expires_at: i64,
}

pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
    ttl_seconds: i64,
}

fn hash_token(token: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(token);
    hasher.finalize().into()
}

impl SessionStore {
    pub fn new(ttl_days: i64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl_seconds: ttl_days * 86_400,
        }
    }

    /// Creates a session for `user_id`, keyed to a token the *client*
    /// generated and submitted with `POST /accounts/login [E]` (spec §6: the
    /// login body itself carries "token: 32 base64 bytes") — only the hash
    /// is kept server-side; the caller already knows the raw bytes since
    /// they supplied them.
    pub fn login(&self, user_id: UserId, token: &[u8], now: i64) -> SessionId {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let session_id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        let session = Session {
            user_id,
            token_hash: hash_token(token),
            expires_at: now + self.ttl_seconds,
        };
        self.sessions.lock().expect("session store mutex poisoned").insert(session_id, session);
        session_id
    }

    /// Validates `session_id`/`token` against `now`, returning the owning
    /// user id. Fails `SessionInvalid` for an unknown id, a wrong token, or
    /// an expired session.
    pub fn authenticate(&self, session_id: SessionId, token: &[u8], now: i64) -> Result<UserId, KasupelError> {
        let sessions = self.sessions.lock().expect("session store mutex poisoned");
        let session = sessions.get(&session_id).ok_or(KasupelError::SessionInvalid)?;
        if session.expires_at <= now {
            return Err(KasupelError::SessionInvalid);
        }
        if hash_token(token) != session.token_hash {
            return Err(KasupelError::SessionInvalid);
        }
        Ok(session.user_id)
    }

    /// `GET /accounts/logout [A]`.
    pub fn logout(&self, session_id: SessionId) {
        self.sessions.lock().expect("session store mutex poisoned").remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8; 32] = b"01234567890123456789012345678901";

    #[test]
    fn login_then_authenticate_round_trips() {
        let store = SessionStore::new(DEFAULT_SESSION_TTL_DAYS);
        let session_id = store.login(42, SECRET, 0);
        let user_id = store.authenticate(session_id, SECRET, 1).unwrap();
        assert_eq!(user_id, 42);
    }

    #[test]
    fn wrong_token_is_rejected() {
        let store = SessionStore::new(DEFAULT_SESSION_TTL_DAYS);
        let session_id = store.login(42, SECRET, 0);
        let err = store.authenticate(session_id, b"wrong-token-bytes", 1).unwrap_err();
        assert_eq!(err, KasupelError::SessionInvalid);
    }

    #[test]
    fn expired_session_is_rejected() {
        let store = SessionStore::new(DEFAULT_SESSION_TTL_DAYS);
        let session_id = store.login(42, SECRET, 0);
        let ttl_seconds = DEFAULT_SESSION_TTL_DAYS * 86_400;
        let err = store.authenticate(session_id, SECRET, ttl_seconds + 1).unwrap_err();
        assert_eq!(err, KasupelError::SessionInvalid);
    }

    #[test]
    fn logout_invalidates_the_session() {
        let store = SessionStore::new(DEFAULT_SESSION_TTL_DAYS);
        let session_id = store.login(42, SECRET, 0);
        store.logout(session_id);
        let err = store.authenticate(session_id, SECRET, 1).unwrap_err();
        assert_eq!(err, KasupelError::SessionInvalid);
    }
}
