//! Per-action request rate limiting
//!
//! Keeps provider calls under their per-second API quotas. Each action name
//! owns its own window behind its own lock, so callers of different actions
//! never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Length of one accounting window
pub const WINDOW: Duration = Duration::from_secs(1);

/// Limit applied to actions without an explicit entry
pub const DEFAULT_LIMIT: u32 = 20;

/// Name under which calls of one operation on one subject are accounted,
/// e.g. `list:vpc` or `create:security-rule`.
pub fn action_name(operation: &str, subject: impl std::fmt::Display) -> String {
    format!("{}:{}", operation, subject)
}

/// Request accounting for one action
#[derive(Debug)]
pub struct RateWindow {
    count: u32,
    started_at: Instant,
    limit: u32,
}

impl RateWindow {
    fn new(limit: u32) -> Self {
        Self {
            count: 0,
            started_at: Instant::now(),
            limit: limit.max(1),
        }
    }

    fn reset(&mut self) {
        self.count = 1;
        self.started_at = Instant::now();
    }
}

/// Bounds call frequency per distinct action name
pub struct RateLimiter {
    default_limit: u32,
    limits: HashMap<String, u32>,
    windows: Mutex<HashMap<String, Arc<tokio::sync::Mutex<RateWindow>>>>,
}

impl RateLimiter {
    pub fn new(default_limit: u32) -> Self {
        Self {
            default_limit,
            limits: HashMap::new(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Override the per-second limit of one action
    pub fn with_limit(mut self, action: impl Into<String>, limit: u32) -> Self {
        self.limits.insert(action.into(), limit);
        self
    }

    pub fn with_limits(mut self, limits: impl IntoIterator<Item = (String, u32)>) -> Self {
        self.limits.extend(limits);
        self
    }

    /// Configured limit for an action
    pub fn limit_for(&self, action: &str) -> u32 {
        self.limits
            .get(action)
            .copied()
            .unwrap_or(self.default_limit)
    }

    fn window(&self, action: &str) -> Arc<tokio::sync::Mutex<RateWindow>> {
        // A poisoned map still holds valid windows.
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows
            .entry(action.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(RateWindow::new(self.limit_for(action)))))
            .clone()
    }

    /// Wait until one more request for `action` fits into its quota.
    pub async fn acquire(&self, action: &str) {
        let window = self.window(action);
        let mut window = window.lock().await;

        if window.started_at.elapsed() > WINDOW {
            window.reset();
            return;
        }

        if window.count < window.limit {
            window.count += 1;
            return;
        }

        tracing::debug!(action, limit = window.limit, "rate limit reached, waiting");
        // The lock is held while sleeping so later callers queue behind us.
        sleep(WINDOW).await;
        window.reset();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}
