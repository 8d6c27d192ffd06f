//! Matchmaker (spec §4.4) — pairs users requesting identical time controls,
//! and handles invitation flows.
//!
//! Structural idiom (an index behind a mutex, atomic remove-then-mutate)
//! grounded on the teacher's `GameManager`'s mutex-guarded map, generalized
//! with a second index keyed by time-control profile.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::engine::{Game, GameId, TimeControl, UserId};
use crate::errors::KasupelError;
use crate::notifications::{Notification, NotificationQueue, TypeCode};

/// Outcome of a `Find` call — whether it paired into an existing game or
/// opened a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindOutcome {
    Paired,
    Created,
}

pub struct Matchmaker {
    /// `pending_by_profile`: at most one pending "find" game per exact
    /// time-control tuple (§4.4).
    pending_by_profile: Mutex<HashMap<TimeControl, GameId>>,
}

impl Default for Matchmaker {
    fn default() -> Self {
        Self::new()
    }
}

impl Matchmaker {
    pub fn new() -> Self {
        Self {
            pending_by_profile: Mutex::new(HashMap::new()),
        }
    }

    /// Re-registers a recovered Searching game in the pending-by-profile
    /// index — used only at startup (`main::recover_active_games`) to
    /// rebuild the index from the games restored out of `<data_dir>/active`,
    /// since the index itself is in-memory only and does not survive a
    /// restart on its own.
    pub fn reindex_pending(&self, profile: TimeControl, game_id: GameId) {
        self.pending_by_profile.lock().expect("matchmaker mutex poisoned").insert(profile, game_id);
    }

    /// `Find(user, profile, wall_time)` per §4.4. `games` is the store the
    /// matchmaker mutates in place; `notifications` receives the
    /// `match_found` notification when a pairing occurs. The per-profile
    /// lock held for the duration of this call is what makes two
    /// simultaneous `find` callers with the same profile resolve to
    /// exactly one pairing (§4.4 atomicity).
    pub fn find(
        &self,
        user: UserId,
        profile: TimeControl,
        wall_time: i64,
        new_game_id: impl FnOnce() -> GameId,
        games: &mut HashMap<GameId, Game>,
        notifications: &NotificationQueue,
    ) -> (GameId, FindOutcome) {
        let mut pending = self.pending_by_profile.lock().expect("matchmaker mutex poisoned");

        if let Some(&existing_id) = pending.get(&profile) {
            let existing = games.get(&existing_id).expect("pending index points at a live game");
            if existing.host_id == user {
                // Idempotent re-find by the same user.
                return (existing_id, FindOutcome::Created);
            }
            pending.remove(&profile);
            let game = games.get_mut(&existing_id).expect("pending index points at a live game");
            game.start(user, wall_time);
            notifications.enqueue(Notification::new(
                game.host_id,
                TypeCode::MatchmakingMatchFound,
                Some(existing_id),
                wall_time,
            ));
            return (existing_id, FindOutcome::Paired);
        }

        let id = new_game_id();
        let game = Game::new_searching(id, user, profile, wall_time);
        games.insert(id, game);
        pending.insert(profile, id);
        (id, FindOutcome::Created)
    }

    /// `SendInvitation(inviter, invitee_username, profile, wall_time)` per
    /// §4.4. Username-to-id resolution is the caller's responsibility
    /// (that's an accounts-store lookup, not a matchmaker concern).
    pub fn send_invitation(
        &self,
        inviter: UserId,
        invitee: UserId,
        profile: TimeControl,
        wall_time: i64,
        new_game_id: impl FnOnce() -> GameId,
        games: &mut HashMap<GameId, Game>,
        notifications: &NotificationQueue,
    ) -> Result<GameId, KasupelError> {
        if invitee == inviter {
            return Err(KasupelError::CannotInviteSelf);
        }
        let id = new_game_id();
        let game = Game::new_invited(id, inviter, invitee, profile, wall_time);
        games.insert(id, game);
        notifications.enqueue(Notification::new(
            invitee,
            TypeCode::MatchmakingInviteReceived,
            Some(id),
            wall_time,
        ));
        Ok(id)
    }

    /// `AcceptInvitation(user, game_id, wall_time)` per §4.4.
    pub fn accept_invitation(
        &self,
        user: UserId,
        game_id: GameId,
        wall_time: i64,
        games: &mut HashMap<GameId, Game>,
        notifications: &NotificationQueue,
    ) -> Result<(), KasupelError> {
        let game = games.get_mut(&game_id).ok_or(KasupelError::GameNotFound)?;
        if game.invited_id != Some(user) {
            return Err(KasupelError::NotInvited);
        }
        game.start(user, wall_time);
        notifications.enqueue(Notification::new(
            game.host_id,
            TypeCode::MatchmakingInviteAccepted,
            Some(game_id),
            wall_time,
        ));
        Ok(())
    }

    /// `DeclineInvitation(user, game_id)` per §4.4. Returns the host id so
    /// the caller can notify a connected hub, if any, with
    /// `game_disconnect` reason `InviteDeclined`, and removes the game
    /// from `games`.
    pub fn decline_invitation(
        &self,
        user: UserId,
        game_id: GameId,
        wall_time: i64,
        games: &mut HashMap<GameId, Game>,
        notifications: &NotificationQueue,
    ) -> Result<UserId, KasupelError> {
        let game = games.get(&game_id).ok_or(KasupelError::GameNotFound)?;
        if game.invited_id != Some(user) {
            return Err(KasupelError::NotInvited);
        }
        let host_id = game.host_id;
        games.remove(&game_id);
        notifications.enqueue(Notification::new(
            host_id,
            TypeCode::MatchmakingInviteDeclined,
            None,
            wall_time,
        ));
        Ok(host_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GameModeKey;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn profile() -> TimeControl {
        TimeControl {
            main_thinking_time: 600,
            fixed_extra_time: 0,
            time_increment_per_turn: 5,
            mode: GameModeKey::Chess,
        }
    }

    fn id_factory() -> impl FnMut() -> GameId {
        let counter = AtomicU64::new(1);
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            uuid::Uuid::from_u128(n as u128)
        }
    }

    #[test]
    fn two_finds_with_identical_profile_pair_into_one_game() {
        let mm = Matchmaker::new();
        let notifications = NotificationQueue::new();
        let mut games = HashMap::new();
        let mut next_id = id_factory();

        let (game_x, outcome_x) = mm.find(100, profile(), 0, &mut next_id, &mut games, &notifications);
        assert_eq!(outcome_x, FindOutcome::Created);

        let (game_y, outcome_y) = mm.find(200, profile(), 1, &mut next_id, &mut games, &notifications);
        assert_eq!(outcome_y, FindOutcome::Paired);
        assert_eq!(game_x, game_y);

        assert_eq!(games.len(), 1);
        let game = &games[&game_x];
        assert_eq!(game.away_id, Some(200));
        assert!(game.is_started());
    }

    #[test]
    fn repeated_find_by_same_user_is_idempotent() {
        let mm = Matchmaker::new();
        let notifications = NotificationQueue::new();
        let mut games = HashMap::new();
        let mut next_id = id_factory();

        let (first, _) = mm.find(100, profile(), 0, &mut next_id, &mut games, &notifications);
        let (second, _) = mm.find(100, profile(), 1, &mut next_id, &mut games, &notifications);
        assert_eq!(first, second);
        assert_eq!(games.len(), 1);
    }

    #[test]
    fn decline_removes_the_game_and_notifies_host() {
        let mm = Matchmaker::new();
        let notifications = NotificationQueue::new();
        let mut games = HashMap::new();
        let mut next_id = id_factory();

        let game_id = mm
            .send_invitation(100, 200, profile(), 0, &mut next_id, &mut games, &notifications)
            .unwrap();
        assert_eq!(games.len(), 1);

        let host = mm
            .decline_invitation(200, game_id, 1, &mut games, &notifications)
            .unwrap();
        assert_eq!(host, 100);
        assert!(!games.contains_key(&game_id));
        assert_eq!(notifications.unread_count(100), 1);
    }

    #[test]
    fn cannot_invite_self() {
        let mm = Matchmaker::new();
        let notifications = NotificationQueue::new();
        let mut games = HashMap::new();
        let mut next_id = id_factory();

        let err = mm
            .send_invitation(100, 100, profile(), 0, &mut next_id, &mut games, &notifications)
            .unwrap_err();
        assert_eq!(err, KasupelError::CannotInviteSelf);
    }
}
