//! Simple in-memory sliding-window rate limiter for the public endpoints.
//! Enforced at the web boundary; the capture/aggregation core never sees it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Once the map tracks this many identifiers, the next check sweeps out
/// every identifier whose window has fully elapsed.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<RwLock<HashMap<String, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Check if a request is allowed for the given identifier (IP, user id).
    pub async fn check(&self, identifier: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        // keep the map bounded: idle identifiers would otherwise accumulate
        if requests.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            requests.retain(|_, history| {
                history.retain(|&timestamp| now.duration_since(timestamp) < window);
                !history.is_empty()
            });
        }

        let history = requests.entry(identifier.to_string()).or_default();
        history.retain(|&timestamp| now.duration_since(timestamp) < self.window);

        if history.len() < self.max_requests {
            history.push(now);
            true
        } else {
            false
        }
    }
}
