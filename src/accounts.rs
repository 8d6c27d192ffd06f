//! Accounts — the in-scope slice of user management (spec §3 User, §6
//! Accounts endpoints): the user store, Elo-sorted listing, and the
//! password/email/avatar/HIBP/RSA boundaries spec.md calls out as external
//! collaborators (SPEC_FULL.md "Out of scope, restated as Rust
//! boundaries").
//!
//! Handler-shape grounded on `JosunLP-checkai/src/api.rs`'s
//! `web::Data`-extraction, JSON-body-struct pattern; the user store itself
//! is new (the teacher has no concept of accounts).

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::engine::UserId;
use crate::errors::KasupelError;

pub const DEFAULT_ELO: i32 = 1000;
pub const USERNAME_MIN: usize = 1;
pub const USERNAME_MAX: usize = 32;
pub const PASSWORD_MIN: usize = 10;
pub const PASSWORD_MAX: usize = 32;
pub const PASSWORD_MIN_UNIQUE_CHARS: usize = 6;

/// A registered account (spec §3 User).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email: String,
    pub email_verified: bool,
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    pub avatar_blob_id: Option<String>,
    pub elo: i32,
    pub created_at: i64,
}

/// Placeholder password hashing — SPEC_FULL.md documents this as *not*
/// the production hasher; password storage is an external collaborator's
/// concern per spec.md §1, this exists only so the in-scope account flow
/// is exercisable end to end.
pub fn hash_password(plain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plain.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_password(plain: &str, hash: &str) -> bool {
    hash_password(plain) == hash
}

/// Checks the structural password policy from §6
/// (`POST /accounts/create [E]`): 10-32 chars, at least 6 unique chars.
/// The haveibeenpwned check is a separate, explicitly external,
/// collaborator (`PwnedChecker`) — not folded in here.
pub fn validate_password_shape(password: &str) -> Result<(), KasupelError> {
    if password.chars().count() < PASSWORD_MIN {
        return Err(KasupelError::PasswordTooWeak);
    }
    if password.chars().count() > PASSWORD_MAX {
        return Err(KasupelError::PasswordTooLong);
    }
    let unique: std::collections::HashSet<char> = password.chars().collect();
    if unique.len() < PASSWORD_MIN_UNIQUE_CHARS {
        return Err(KasupelError::PasswordTooWeak);
    }
    Ok(())
}

pub fn validate_username_shape(username: &str) -> Result<(), KasupelError> {
    let len = username.chars().count();
    if len < USERNAME_MIN {
        return Err(KasupelError::UsernameTooShort);
    }
    if len > USERNAME_MAX {
        return Err(KasupelError::UsernameTooLong);
    }
    if !username.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
        return Err(KasupelError::UsernameTooShort);
    }
    Ok(())
}

/// External collaborator seam: haveibeenpwned lookup (spec §1 out of
/// scope). Default implementation never flags a password as pwned.
pub trait PwnedChecker: Send + Sync {
    fn is_pwned(&self, password: &str) -> bool;
}

pub struct NeverPwned;
impl PwnedChecker for NeverPwned {
    fn is_pwned(&self, _password: &str) -> bool {
        false
    }
}

/// External collaborator seam: email delivery for verification (spec §1
/// out of scope). Default implementation logs instead of sending.
pub trait EmailSender: Send + Sync {
    fn send_verification_email(&self, to: &str, token: &str);
}

pub struct LoggingEmailSender;
impl EmailSender for LoggingEmailSender {
    fn send_verification_email(&self, to: &str, token: &str) {
        log::info!("would send verification email to {to} with token {token}");
    }
}

pub const AVATAR_MAX_BYTES: usize = 1024 * 1024;

/// External collaborator seam: avatar image decode/storage (spec §1 out of
/// scope). Default implementation keeps the raw bytes in memory and hands
/// back a random id — no decoding, no format validation beyond size.
pub trait AvatarStore: Send + Sync {
    fn store(&self, bytes: &[u8]) -> Result<String, KasupelError>;
}

#[derive(Default)]
pub struct InMemoryAvatarStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl AvatarStore for InMemoryAvatarStore {
    fn store(&self, bytes: &[u8]) -> Result<String, KasupelError> {
        if bytes.len() > AVATAR_MAX_BYTES {
            return Err(KasupelError::WrongParameters);
        }
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let id = format!("avatar-{}", NEXT_ID.fetch_add(1, Ordering::SeqCst));
        self.blobs.lock().expect("avatar store mutex poisoned").insert(id.clone(), bytes.to_vec());
        Ok(id)
    }
}

fn generate_verification_token() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

pub struct AccountStore {
    users_by_id: Mutex<HashMap<UserId, User>>,
    id_by_username: Mutex<HashMap<String, UserId>>,
}

impl Default for AccountStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountStore {
    pub fn new() -> Self {
        Self {
            users_by_id: Mutex::new(HashMap::new()),
            id_by_username: Mutex::new(HashMap::new()),
        }
    }

    /// `POST /accounts/create [E]`.
    pub fn create(
        &self,
        username: String,
        password: String,
        email: String,
        pwned: &dyn PwnedChecker,
        now: i64,
    ) -> Result<(User, String), KasupelError> {
        validate_username_shape(&username)?;
        validate_password_shape(&password)?;
        if pwned.is_pwned(&password) {
            return Err(KasupelError::PasswordPwned);
        }
        if !email.contains('@') {
            return Err(KasupelError::EmailMalformed);
        }

        let mut by_username = self.id_by_username.lock().expect("account store mutex poisoned");
        if by_username.contains_key(&username) {
            return Err(KasupelError::UsernameTaken);
        }

        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        let token = generate_verification_token();
        let user = User {
            id,
            username: username.clone(),
            password_hash: hash_password(&password),
            email,
            email_verified: false,
            verification_token: Some(token.clone()),
            avatar_blob_id: None,
            elo: DEFAULT_ELO,
            created_at: now,
        };

        by_username.insert(username, id);
        self.users_by_id
            .lock()
            .expect("account store mutex poisoned")
            .insert(id, user.clone());

        Ok((user, token))
    }

    /// `POST /accounts/login [E]`.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<UserId, KasupelError> {
        let by_username = self.id_by_username.lock().expect("account store mutex poisoned");
        let id = by_username.get(username).copied().ok_or(KasupelError::LoginFailed)?;
        let users = self.users_by_id.lock().expect("account store mutex poisoned");
        let user = users.get(&id).ok_or(KasupelError::LoginFailed)?;
        if verify_password(password, &user.password_hash) {
            Ok(id)
        } else {
            Err(KasupelError::LoginFailed)
        }
    }

    /// `GET /accounts/resend_verification_email [A]` — reissues a fresh
    /// token, invalidating any previously issued one.
    pub fn resend_verification_token(&self, id: UserId) -> Result<String, KasupelError> {
        let mut users = self.users_by_id.lock().expect("account store mutex poisoned");
        let user = users.get_mut(&id).ok_or(KasupelError::AccountNotFound)?;
        if user.email_verified {
            return Err(KasupelError::VerificationTokenUsed);
        }
        let token = generate_verification_token();
        user.verification_token = Some(token.clone());
        Ok(token)
    }

    /// `GET /accounts/verify_email` (username, 6-char token).
    pub fn verify_email(&self, username: &str, token: &str) -> Result<(), KasupelError> {
        let by_username = self.id_by_username.lock().expect("account store mutex poisoned");
        let id = *by_username.get(username).ok_or(KasupelError::AccountNotFound)?;
        let mut users = self.users_by_id.lock().expect("account store mutex poisoned");
        let user = users.get_mut(&id).ok_or(KasupelError::AccountNotFound)?;
        match &user.verification_token {
            None => Err(KasupelError::VerificationTokenUsed),
            Some(expected) if expected == token => {
                user.email_verified = true;
                user.verification_token = None;
                Ok(())
            }
            Some(_) => Err(KasupelError::VerificationTokenInvalid),
        }
    }

    pub fn get(&self, id: UserId) -> Result<User, KasupelError> {
        self.users_by_id
            .lock()
            .expect("account store mutex poisoned")
            .get(&id)
            .cloned()
            .ok_or(KasupelError::AccountNotFound)
    }

    pub fn get_by_username(&self, username: &str) -> Result<User, KasupelError> {
        let id = *self
            .id_by_username
            .lock()
            .expect("account store mutex poisoned")
            .get(username)
            .ok_or(KasupelError::AccountNotFound)?;
        self.get(id)
    }

    pub fn is_email_verified(&self, id: UserId) -> bool {
        self.get(id).map(|u| u.email_verified).unwrap_or(false)
    }

    pub fn apply_elo_delta(&self, id: UserId, delta: i32) {
        if let Some(user) = self.users_by_id.lock().expect("account store mutex poisoned").get_mut(&id) {
            user.elo += delta;
        }
    }

    /// `GET /accounts/accounts [P]` sorted by ELO desc.
    pub fn list_by_elo_desc(&self) -> Vec<User> {
        let users = self.users_by_id.lock().expect("account store mutex poisoned");
        let mut all: Vec<User> = users.values().cloned().collect();
        all.sort_by(|a, b| b.elo.cmp(&a.elo).then(a.id.cmp(&b.id)));
        all
    }

    /// `PATCH /accounts/me [A][E]` — applies whichever optional fields were
    /// supplied; a changed email resets `email_verified` since the new
    /// address has not itself been verified.
    pub fn update(
        &self,
        id: UserId,
        password: Option<String>,
        avatar_blob_id: Option<String>,
        email: Option<String>,
    ) -> Result<User, KasupelError> {
        if let Some(ref password) = password {
            validate_password_shape(password)?;
        }
        if let Some(ref email) = email
            && !email.contains('@')
        {
            return Err(KasupelError::EmailMalformed);
        }

        let mut users = self.users_by_id.lock().expect("account store mutex poisoned");
        let user = users.get_mut(&id).ok_or(KasupelError::AccountNotFound)?;
        if let Some(password) = password {
            user.password_hash = hash_password(&password);
        }
        if let Some(avatar_blob_id) = avatar_blob_id {
            user.avatar_blob_id = Some(avatar_blob_id);
        }
        if let Some(email) = email {
            user.email = email;
            user.email_verified = false;
        }
        Ok(user.clone())
    }

    /// `DELETE /accounts/me [A]` — tombstones rather than hard-deleting,
    /// per spec.md §3 Ownership ("never deleted while referenced
    /// (deletion tombstones the user row instead — details out of
    /// scope)").
    pub fn tombstone(&self, id: UserId) -> Result<(), KasupelError> {
        let mut users = self.users_by_id.lock().expect("account store mutex poisoned");
        let user = users.get_mut(&id).ok_or(KasupelError::AccountNotFound)?;
        user.username = format!("deleted-user-{id}");
        user.email.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_authenticate_round_trips() {
        let store = AccountStore::new();
        let (user, _token) = store
            .create(
                "alice".to_string(),
                "correct-horse-battery".to_string(),
                "alice@example.com".to_string(),
                &NeverPwned,
                0,
            )
            .unwrap();
        assert_eq!(user.elo, DEFAULT_ELO);
        let id = store.authenticate("alice", "correct-horse-battery").unwrap();
        assert_eq!(id, user.id);
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let store = AccountStore::new();
        store
            .create("alice".to_string(), "correct-horse-battery".to_string(), "a@example.com".to_string(), &NeverPwned, 0)
            .unwrap();
        let err = store
            .create("alice".to_string(), "another-battery-99".to_string(), "b@example.com".to_string(), &NeverPwned, 1)
            .unwrap_err();
        assert_eq!(err, KasupelError::UsernameTaken);
    }

    #[test]
    fn verify_email_consumes_the_token() {
        let store = AccountStore::new();
        let (user, token) = store
            .create("alice".to_string(), "correct-horse-battery".to_string(), "a@example.com".to_string(), &NeverPwned, 0)
            .unwrap();
        assert!(!store.is_email_verified(user.id));
        store.verify_email("alice", &token).unwrap();
        assert!(store.is_email_verified(user.id));
        let err = store.verify_email("alice", &token).unwrap_err();
        assert_eq!(err, KasupelError::VerificationTokenUsed);
    }

    #[test]
    fn weak_password_is_rejected() {
        let store = AccountStore::new();
        let err = store
            .create("alice".to_string(), "aaaaaaaaaa".to_string(), "a@example.com".to_string(), &NeverPwned, 0)
            .unwrap_err();
        assert_eq!(err, KasupelError::PasswordTooWeak);
    }

    #[test]
    fn elo_sorted_listing_is_descending() {
        let store = AccountStore::new();
        let (a, _) = store.create("alice".to_string(), "correct-horse-battery".to_string(), "a@example.com".to_string(), &NeverPwned, 0).unwrap();
        let (b, _) = store.create("bob".to_string(), "another-battery-99".to_string(), "b@example.com".to_string(), &NeverPwned, 0).unwrap();
        store.apply_elo_delta(a.id, 50);
        store.apply_elo_delta(b.id, -20);
        let listed = store.list_by_elo_desc();
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[1].id, b.id);
    }
}
