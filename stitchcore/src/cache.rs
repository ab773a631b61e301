use crate::types::{MessageKind, Payload};
use log::debug;
use lru::LruCache;
use std::num::NonZeroUsize;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Payload snapshot taken the instant a message was optimistically created.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPayload {
    pub kind: MessageKind,
    pub payload: Payload,
}

/// Session-scoped store of locally-known rich payloads.
///
/// Written when a message is optimistically created, read only as a
/// normalization fallback when the server echoes a stripped-down version
/// of the same message. Entries are evicted when a confirmed server
/// payload supersedes them, when capacity is exceeded (oldest first), and
/// when the owning conversation session ends.
pub struct OptimisticCache {
    entries: LruCache<String, CachedPayload>,
}

impl OptimisticCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap());
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Records the locally-known payload for a freshly minted message.
    pub fn record(&mut self, client_message_id: impl Into<String>, kind: MessageKind, payload: Payload) {
        let client_message_id = client_message_id.into();
        if self
            .entries
            .put(client_message_id.clone(), CachedPayload { kind, payload })
            .is_some()
        {
            debug!("optimistic cache: replaced entry for {client_message_id}");
        }
    }

    /// Fallback lookup during normalization. Does not refresh recency, so
    /// a flood of echoes cannot keep a dead entry alive.
    pub fn peek(&self, client_message_id: &str) -> Option<&CachedPayload> {
        self.entries.peek(client_message_id)
    }

    /// Drops an entry once a confirmed server payload has superseded it.
    pub fn supersede(&mut self, client_message_id: &str) {
        if self.entries.pop(client_message_id).is_some() {
            debug!("optimistic cache: superseded {client_message_id}");
        }
    }

    /// Drops everything. Called on session teardown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for OptimisticCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserPayload;

    fn user_payload(text: &str) -> Payload {
        Payload::User(UserPayload {
            text: text.into(),
            avatar_url: None,
        })
    }

    #[test]
    fn supersede_removes_entry() {
        let mut cache = OptimisticCache::new(8);
        cache.record("c1", MessageKind::User, user_payload("hello"));
        assert!(cache.peek("c1").is_some());
        cache.supersede("c1");
        assert!(cache.peek("c1").is_none());
    }

    #[test]
    fn capacity_bound_evicts_oldest() {
        let mut cache = OptimisticCache::new(2);
        cache.record("a", MessageKind::User, user_payload("1"));
        cache.record("b", MessageKind::User, user_payload("2"));
        cache.record("c", MessageKind::User, user_payload("3"));
        assert!(cache.peek("a").is_none());
        assert!(cache.peek("b").is_some());
        assert!(cache.peek("c").is_some());
    }

    #[test]
    fn clear_empties_the_session() {
        let mut cache = OptimisticCache::new(8);
        cache.record("a", MessageKind::User, user_payload("1"));
        cache.record("b", MessageKind::User, user_payload("2"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
