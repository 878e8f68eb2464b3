use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use unimart_types::models::ChatSummary;

use crate::error::ChatError;

/// One origin of chats for the unified list (direct conversations, legacy
/// product channels, exchange messages, ...).
#[async_trait]
pub trait ChatSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn load(&self, viewer_id: Uuid) -> Result<Vec<ChatSummary>, ChatError>;
}

#[async_trait]
pub trait PresenceLookup: Send + Sync {
    async fn is_online(&self, user_id: Uuid) -> bool;
}

/// Builds the unified chat list. Read-only: calling it again with the same
/// backing data returns the same list.
#[derive(Clone, Default)]
pub struct ChatAggregator {
    sources: Vec<Arc<dyn ChatSource>>,
    presence: Option<Arc<dyn PresenceLookup>>,
}

impl ChatAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sources registered earlier win de-duplication against later ones.
    pub fn with_source(mut self, source: Arc<dyn ChatSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_presence(mut self, presence: Arc<dyn PresenceLookup>) -> Self {
        self.presence = Some(presence);
        self
    }

    pub async fn aggregate(&self, viewer_id: Uuid) -> Vec<ChatSummary> {
        let results = join_all(self.sources.iter().map(|source| source.load(viewer_id))).await;

        let mut seen = HashSet::new();
        let mut chats = Vec::new();
        for (source, result) in self.sources.iter().zip(results) {
            let entries = match result {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Chat source '{}' failed for {}: {}", source.name(), viewer_id, e);
                    continue;
                }
            };

            let total = entries.len();
            let before = chats.len();
            // First writer wins
            chats.extend(entries.into_iter().filter(|chat| seen.insert(chat.key())));
            debug!(
                "Chat source '{}' contributed {} of {} entries",
                source.name(),
                chats.len() - before,
                total
            );
        }

        self.fill_presence(&mut chats).await;

        chats.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.title.cmp(&b.title))
        });
        chats
    }

    async fn fill_presence(&self, chats: &mut [ChatSummary]) {
        let Some(presence) = &self.presence else {
            return;
        };

        let users: Vec<Uuid> = chats
            .iter()
            .map(|chat| chat.other_participant_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let online = join_all(users.iter().map(|user| presence.is_online(*user))).await;
        let online: HashMap<Uuid, bool> = users.into_iter().zip(online).collect();

        for chat in chats {
            chat.other_online = online.get(&chat.other_participant_id).copied().unwrap_or(false);
        }
    }
}
