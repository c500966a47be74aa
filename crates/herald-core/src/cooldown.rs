//! Cooldown dispatcher — at most one dispatched action per identity per
//! window.
//!
//! The dispatcher only answers eligibility questions; recording a dispatch
//! is the caller's job, after the downstream action succeeds. A failed
//! action records nothing, so the next recognized occurrence retries
//! instead of being locked out by the failure.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-identity dispatch dedup over a sliding cooldown window.
pub struct CooldownDispatcher {
    window: Duration,
    /// Per-identity window overrides, keyed by name.
    overrides: HashMap<String, Duration>,
    /// Timestamp of the last *successful* dispatch per identity.
    /// Grows bounded by the number of enrolled identities.
    last_dispatch: HashMap<String, Instant>,
}

impl CooldownDispatcher {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            overrides: HashMap::new(),
            last_dispatch: HashMap::new(),
        }
    }

    /// Set a custom window for one identity (e.g., a dignitary greeted far
    /// less often than a transient label refresh).
    pub fn with_override(mut self, name: &str, window: Duration) -> Self {
        self.overrides.insert(name.to_string(), window);
        self
    }

    fn window_for(&self, name: &str) -> Duration {
        self.overrides.get(name).copied().unwrap_or(self.window)
    }

    /// Whether a dispatch for `name` at `now` would be outside the window.
    ///
    /// True when the identity was never dispatched, or strictly more than
    /// the window has elapsed since the last recorded dispatch. At exactly
    /// the window boundary the identity is still cooling.
    pub fn should_dispatch(&self, name: &str, now: Instant) -> bool {
        match self.last_dispatch.get(name) {
            None => true,
            Some(&last) => now.saturating_duration_since(last) > self.window_for(name),
        }
    }

    /// Record a successful dispatch. Call only after the action succeeded.
    pub fn record_dispatch(&mut self, name: &str, now: Instant) {
        self.last_dispatch.insert(name.to_string(), now);
    }

    /// Forget all dispatch history (session restart).
    pub fn reset(&mut self) {
        self.last_dispatch.clear();
    }
}
