//! Notification queue (spec §4.6) — a per-user FIFO with a closed
//! `type_code` set, an O(1) unread counter, and immediate delivery to any
//! open socket across hubs.
//!
//! Structural idiom (a mutex-guarded map keyed by user id) grounded on the
//! same pattern the teacher uses for its `GameManager`'s game map,
//! generalized to two parallel maps — one for the FIFO itself, one for the
//! unread counter, so `unread_count` does not need to scan the queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::engine::{GameId, UserId};
use crate::errors::KasupelError;
use crate::types::{Conclusion, Winner};

/// The closed set of notification kinds (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TypeCode {
    AccountsWelcome,
    MatchmakingInviteReceived,
    MatchmakingInviteDeclined,
    MatchmakingInviteAccepted,
    MatchmakingMatchFound,
    GamesOngoingTurn,
    GamesOngoingDrawOffer,
    GamesWinResign,
    GamesWinTime,
    /// Not in spec.md's literal enumeration, which lists only
    /// `games.win.resign/time` — added to fill the gap that leaves a
    /// checkmate winner with no code, which §8 scenario 1 requires
    /// ("Both players receive checkmate-family notifications"). See
    /// DESIGN.md.
    GamesWinCheckmate,
    GamesLossTime,
    GamesLossCheckmate,
    /// Same gap-fill as `GamesWinCheckmate`, for the symmetric case: the
    /// side that resigned has no dedicated loss code in the literal list.
    GamesLossResign,
    GamesDrawStalemate,
    GamesDrawThreefoldRepetition,
    GamesDrawFiftyMoveRule,
    GamesDrawAgreed,
}

impl TypeCode {
    /// The result-family notification for one player's perspective on a
    /// Started→Finished transition, per §8's invariant ("every
    /// Started→Finished transition produces exactly one result-family
    /// notification for each of the two players").
    pub fn for_conclusion(winner: Winner, conclusion: Conclusion, perspective_is_winner: bool) -> Self {
        use Conclusion::*;
        match (conclusion, perspective_is_winner) {
            (Resignation, true) => TypeCode::GamesWinResign,
            (Resignation, false) => TypeCode::GamesLossResign,
            (OutOfTime, true) => TypeCode::GamesWinTime,
            (OutOfTime, false) => TypeCode::GamesLossTime,
            (Checkmate, true) => TypeCode::GamesWinCheckmate,
            (Checkmate, false) => TypeCode::GamesLossCheckmate,
            (Stalemate, _) => TypeCode::GamesDrawStalemate,
            (ThreefoldRepetition, _) => TypeCode::GamesDrawThreefoldRepetition,
            (FiftyMoveRule, _) => TypeCode::GamesDrawFiftyMoveRule,
            (AgreedDraw, _) => TypeCode::GamesDrawAgreed,
            (None, _) => {
                debug_assert!(matches!(winner, Winner::None));
                TypeCode::GamesDrawAgreed
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub user_id: UserId,
    pub sent_at: i64,
    pub type_code: TypeCode,
    pub game_id: Option<GameId>,
    pub read: bool,
}

impl Notification {
    pub fn new(user_id: UserId, type_code: TypeCode, game_id: Option<GameId>, sent_at: i64) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            user_id,
            sent_at,
            type_code,
            game_id,
            read: false,
        }
    }
}

struct PerUser {
    queue: VecDeque<Notification>,
    unread: u64,
}

pub struct NotificationQueue {
    by_user: Mutex<HashMap<UserId, PerUser>>,
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self {
            by_user: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts a notification. The caller is responsible for delivering it
    /// immediately over any open socket the user has (across hubs) — this
    /// method only persists it and updates the counter, per §4.6 ("On
    /// insert: if the target user has any open socket... deliver... in
    /// addition to persisting").
    pub fn enqueue(&self, notification: Notification) {
        let mut by_user = self.by_user.lock().expect("notification queue mutex poisoned");
        let entry = by_user.entry(notification.user_id).or_insert_with(|| PerUser {
            queue: VecDeque::new(),
            unread: 0,
        });
        entry.unread += 1;
        entry.queue.push_back(notification);
    }

    /// Acknowledges a single notification by id, setting `read = true`.
    pub fn ack(&self, user_id: UserId, notification_id: u64) -> Result<(), KasupelError> {
        let mut by_user = self.by_user.lock().expect("notification queue mutex poisoned");
        let entry = by_user.get_mut(&user_id).ok_or(KasupelError::NotificationNotFound)?;
        let notification = entry
            .queue
            .iter_mut()
            .find(|n| n.id == notification_id)
            .ok_or(KasupelError::NotificationNotFound)?;
        if !notification.read {
            notification.read = true;
            entry.unread = entry.unread.saturating_sub(1);
        }
        Ok(())
    }

    /// O(1) unread count, per §4.6.
    pub fn unread_count(&self, user_id: UserId) -> u64 {
        let by_user = self.by_user.lock().expect("notification queue mutex poisoned");
        by_user.get(&user_id).map(|e| e.unread).unwrap_or(0)
    }

    /// Most-recent-first page of a user's notifications, for
    /// `GET /accounts/notifications [A][P]`.
    pub fn list(&self, user_id: UserId) -> Vec<Notification> {
        let by_user = self.by_user.lock().expect("notification queue mutex poisoned");
        match by_user.get(&user_id) {
            Some(entry) => entry.queue.iter().rev().cloned().collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_increments_unread_and_ack_decrements() {
        let q = NotificationQueue::new();
        q.enqueue(Notification::new(1, TypeCode::AccountsWelcome, None, 0));
        q.enqueue(Notification::new(1, TypeCode::GamesWinTime, None, 1));
        assert_eq!(q.unread_count(1), 2);

        let notifications = q.list(1);
        q.ack(1, notifications[0].id).unwrap();
        assert_eq!(q.unread_count(1), 1);
    }

    #[test]
    fn ack_unknown_notification_errors() {
        let q = NotificationQueue::new();
        q.enqueue(Notification::new(1, TypeCode::AccountsWelcome, None, 0));
        let err = q.ack(1, 999).unwrap_err();
        assert_eq!(err, KasupelError::NotificationNotFound);
    }

    #[test]
    fn list_is_empty_for_unknown_user() {
        let q = NotificationQueue::new();
        assert!(q.list(42).is_empty());
        assert_eq!(q.unread_count(42), 0);
    }
}
