use super::{LookupError, RateLimiter};
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::Instant;

/// Counts calls per user over fixed, non-overlapping windows.
///
/// A user's window starts with their first call and lasts `window`; the
/// `limit + 1`-th call inside it is reported as exceeding the quota. The lock
/// is held only for the map update, never across an await point.
///
/// Expired windows are swept at most once per `window`, so a call costs O(1)
/// amortized regardless of how many users are tracked.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    windows: HashMap<String, Window>,
    last_sweep: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    calls: u32,
}

impl FixedWindowRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: Mutex::new(State {
                windows: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    fn record(&self, user_id: &str, now: Instant) -> bool {
        let mut state = self.state.lock();

        if now.saturating_duration_since(state.last_sweep) >= self.window {
            let window = self.window;
            state
                .windows
                .retain(|_, w| now.saturating_duration_since(w.started) < window);
            state.last_sweep = now;
        }

        let entry = state.windows.entry(user_id.to_string()).or_insert(Window {
            started: now,
            calls: 0,
        });
        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                calls: 0,
            };
        }
        entry.calls = entry.calls.saturating_add(1);
        entry.calls > self.limit
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.state.lock().windows.len()
    }
}

#[tonic::async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn check(&self, user_id: &str) -> Result<bool, LookupError> {
        Ok(self.record(user_id, Instant::now()))
    }
}
