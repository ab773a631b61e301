use crate::config::ClientConfig;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use stitchcore::cache::OptimisticCache;
use stitchcore::reconcile::ConversationState;
use stitchcore::types::Participants;
use stitchcore::typing::TypingTracker;

/// A reference to a locally-held image preview (the placeholder shown in
/// the uploading bubble before the canonical URL exists).
///
/// The handle must be released exactly once: either when its upload
/// attempt finishes (success or failure) or when the owning session is
/// torn down. [`PreviewHandle::release`] is an atomic swap, so whichever
/// path gets there first wins and the other becomes a no-op.
pub struct PreviewHandle {
    client_message_id: String,
    url: String,
    released: AtomicBool,
}

impl PreviewHandle {
    pub fn new(client_message_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            client_message_id: client_message_id.into(),
            url: url.into(),
            released: AtomicBool::new(false),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Releases the local resource. Returns `true` only for the call that
    /// actually performed the release.
    pub fn release(&self) -> bool {
        let first = !self.released.swap(true, Ordering::SeqCst);
        if first {
            debug!("released preview for {}", self.client_message_id);
        }
        first
    }
}

/// All state owned by one open conversation: the reconciled message
/// sequence, the optimistic payload cache, and the typing map. Torn down
/// wholesale when the user switches conversations.
pub struct ConversationSession {
    pub conversation_id: String,
    pub participants: Participants,
    /// Generation this session was opened under; continuations captured
    /// before a conversation switch compare against the client's counter
    /// and drop themselves when stale.
    pub generation: u64,
    pub store: ConversationState,
    pub cache: OptimisticCache,
    pub typing: TypingTracker,
}

impl ConversationSession {
    pub fn new(
        conversation_id: impl Into<String>,
        participants: Participants,
        generation: u64,
        config: &ClientConfig,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            participants,
            generation,
            store: ConversationState::new(),
            cache: OptimisticCache::new(config.optimistic_cache_capacity),
            typing: TypingTracker::with_window(config.typing_window),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_release_is_exactly_once() {
        let handle = PreviewHandle::new("cm-1", "local://cm-1/a.png");
        assert!(!handle.is_released());
        assert!(handle.release());
        assert!(!handle.release());
        assert!(handle.is_released());
    }
}
