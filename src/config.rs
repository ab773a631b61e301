use std::time::Duration;
use stitchcore::cache::DEFAULT_CACHE_CAPACITY;
use stitchcore::types::SenderRole;
use stitchcore::typing::TYPING_WINDOW;

/// Static configuration for a [`crate::client::ChatClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL for the REST surface (history, jobs, escrow).
    pub api_base_url: String,
    /// Endpoint for multipart file uploads.
    pub upload_url: String,
    /// Which side of the marketplace this client speaks for.
    pub own_role: SenderRole,
    /// This user's backend identity, stamped onto outgoing messages.
    pub own_participant_id: Option<String>,
    /// Role assumed for senders that cannot be resolved.
    pub fallback_role: SenderRole,
    /// Typing indicator expiry window.
    pub typing_window: Duration,
    /// Capacity bound of the per-session optimistic cache.
    pub optimistic_cache_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            upload_url: String::new(),
            own_role: SenderRole::Creator,
            own_participant_id: None,
            fallback_role: SenderRole::System,
            typing_window: TYPING_WINDOW,
            optimistic_cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}
