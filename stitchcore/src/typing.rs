//! Per-participant typing indicator state.
//!
//! Consumes inbound typing signals and exposes the current map; emission
//! of this client's own typing state happens elsewhere. Time is injected
//! so expiry is deterministic under simulated clocks.

use log::debug;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long a typing signal stays live without a follow-up.
pub const TYPING_WINDOW: Duration = Duration::from_millis(2000);

/// Tracks, per sender, the deadline after which their typing indicator
/// expires. Every new signal for a sender restarts their window.
pub struct TypingTracker {
    window: Duration,
    deadlines: HashMap<String, Instant>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::with_window(TYPING_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            deadlines: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Applies one inbound typing signal.
    pub fn note(&mut self, sender: &str, is_typing: bool, now: Instant) {
        if is_typing {
            self.deadlines.insert(sender.to_string(), now + self.window);
        } else {
            self.deadlines.remove(sender);
        }
    }

    pub fn is_typing(&self, sender: &str, now: Instant) -> bool {
        self.deadlines.get(sender).is_some_and(|&deadline| now < deadline)
    }

    /// Drops expired entries and returns the senders that flipped back to
    /// not-typing.
    pub fn sweep(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .deadlines
            .iter()
            .filter(|&(_, &deadline)| now >= deadline)
            .map(|(sender, _)| sender.clone())
            .collect();
        for sender in &expired {
            self.deadlines.remove(sender);
            debug!("typing: {sender} expired");
        }
        expired
    }

    /// Senders currently typing.
    pub fn active(&self, now: Instant) -> Vec<String> {
        self.deadlines
            .iter()
            .filter(|&(_, &deadline)| now < deadline)
            .map(|(sender, _)| sender.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new()
    }
}
