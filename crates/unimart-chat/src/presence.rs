use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// Remote users' online and typing state as seen by one client.
///
/// Every update supersedes the previous one. Typing indicators expire on
/// their own after `typing_timeout`, so a peer that disconnects mid-word does
/// not stay "typing" forever.
#[derive(Debug)]
pub struct PresenceTracker {
    entries: HashMap<Uuid, PresenceEntry>,
    typing_timeout: Duration,
}

#[derive(Debug, Clone, Default)]
struct PresenceEntry {
    online: bool,
    typing: Option<TypingState>,
}

#[derive(Debug, Clone, Copy)]
struct TypingState {
    conversation_id: Uuid,
    since: Instant,
}

impl PresenceTracker {
    pub fn new(typing_timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            typing_timeout,
        }
    }

    pub fn set_online(&mut self, user_id: Uuid, online: bool) {
        let entry = self.entries.entry(user_id).or_default();
        entry.online = online;
        if !online {
            entry.typing = None;
        }
    }

    pub fn set_typing(&mut self, user_id: Uuid, conversation_id: Uuid, is_typing: bool, now: Instant) {
        let entry = self.entries.entry(user_id).or_default();
        entry.online = true;
        entry.typing = is_typing.then_some(TypingState {
            conversation_id,
            since: now,
        });
    }

    /// A message from the user ends their typing indicator.
    pub fn clear_typing(&mut self, user_id: Uuid) {
        if let Some(entry) = self.entries.get_mut(&user_id) {
            entry.typing = None;
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.entries.get(&user_id).is_some_and(|e| e.online)
    }

    pub fn is_typing(&self, user_id: Uuid, conversation_id: Uuid, now: Instant) -> bool {
        self.entries
            .get(&user_id)
            .and_then(|e| e.typing)
            .is_some_and(|t| t.conversation_id == conversation_id && !self.expired(t, now))
    }

    pub fn typing_users(&self, conversation_id: Uuid, now: Instant) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|(_, e)| {
                e.typing
                    .is_some_and(|t| t.conversation_id == conversation_id && !self.expired(t, now))
            })
            .map(|(id, _)| *id)
            .collect();
        users.sort();
        users
    }

    /// Forget a user entirely (disconnect or unmount).
    pub fn remove(&mut self, user_id: Uuid) {
        self.entries.remove(&user_id);
    }

    fn expired(&self, typing: TypingState, now: Instant) -> bool {
        now.saturating_duration_since(typing.since) >= self.typing_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_expires_without_stop_event() {
        let mut tracker = PresenceTracker::new(Duration::from_secs(3));
        let (user, conversation) = (Uuid::new_v4(), Uuid::new_v4());
        let start = Instant::now();

        tracker.set_typing(user, conversation, true, start);
        assert!(tracker.is_typing(user, conversation, start + Duration::from_millis(2_999)));
        assert!(!tracker.is_typing(user, conversation, start + Duration::from_secs(3)));
        assert!(tracker.typing_users(conversation, start + Duration::from_secs(4)).is_empty());
    }

    #[test]
    fn typing_is_scoped_to_one_conversation() {
        let mut tracker = PresenceTracker::new(Duration::from_secs(3));
        let (user, here, elsewhere) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let now = Instant::now();

        tracker.set_typing(user, elsewhere, true, now);
        assert!(!tracker.is_typing(user, here, now));
        assert_eq!(tracker.typing_users(elsewhere, now), vec![user]);
    }

    #[test]
    fn newer_update_supersedes_and_offline_clears_typing() {
        let mut tracker = PresenceTracker::new(Duration::from_secs(3));
        let (user, conversation) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Instant::now();

        tracker.set_typing(user, conversation, true, now);
        assert!(tracker.is_online(user));

        tracker.set_online(user, false);
        assert!(!tracker.is_online(user));
        assert!(!tracker.is_typing(user, conversation, now));

        tracker.set_online(user, true);
        tracker.remove(user);
        assert!(!tracker.is_online(user));
    }
}
