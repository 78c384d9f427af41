// In-memory sliding-window rate limiter for player actions.
//
// Gate 1 of the action validator: each player may submit at most 10
// actions per second and 300 per minute. Tables are per-player and
// thread-safe behind their own lock; the engine never touches them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::engine::constants::{ACTIONS_PER_MINUTE, ACTIONS_PER_SECOND};

/// The two enforcement windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionWindow {
    PerSecond,
    PerMinute,
}

impl ActionWindow {
    pub fn max_count(&self) -> usize {
        match self {
            ActionWindow::PerSecond => ACTIONS_PER_SECOND,
            ActionWindow::PerMinute => ACTIONS_PER_MINUTE,
        }
    }

    pub fn window(&self) -> Duration {
        match self {
            ActionWindow::PerSecond => Duration::from_secs(1),
            ActionWindow::PerMinute => Duration::from_secs(60),
        }
    }
}

impl std::fmt::Display for ActionWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionWindow::PerSecond => write!(f, "actions per second"),
            ActionWindow::PerMinute => write!(f, "actions per minute"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitError {
    pub window: ActionWindow,
    pub max: usize,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rate limit exceeded: max {} {}", self.max, self.window)
    }
}

/// Thread-safe per-player action rate limiter.
#[derive(Debug, Clone, Default)]
pub struct ActionRateLimiter {
    inner: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
}

impl ActionRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one action for `player_id` if both windows allow it.
    pub fn check(&self, player_id: &str) -> Result<(), RateLimitError> {
        self.check_at(player_id, Instant::now())
    }

    /// Like `check`, with an explicit clock for tests.
    pub fn check_at(&self, player_id: &str, now: Instant) -> Result<(), RateLimitError> {
        let mut map = self.inner.lock().unwrap();
        let entries = map.entry(player_id.to_string()).or_default();

        // The minute window subsumes the second window for retention.
        let keep = ActionWindow::PerMinute.window();
        entries.retain(|t| now.duration_since(*t) < keep);

        for window in [ActionWindow::PerSecond, ActionWindow::PerMinute] {
            let span = window.window();
            let count = entries
                .iter()
                .filter(|t| now.duration_since(**t) < span)
                .count();
            if count >= window.max_count() {
                return Err(RateLimitError {
                    window,
                    max: window.max_count(),
                });
            }
        }

        entries.push(now);
        Ok(())
    }

    /// Drop a player's tracking state (room teardown, leave).
    pub fn forget(&self, player_id: &str) {
        self.inner.lock().unwrap().remove(player_id);
    }

    /// Accepted actions currently inside the given window.
    pub fn current_count(&self, player_id: &str, window: ActionWindow) -> usize {
        let map = self.inner.lock().unwrap();
        let now = Instant::now();
        map.get(player_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|t| now.duration_since(**t) < window.window())
                    .count()
            })
            .unwrap_or(0)
    }
}
