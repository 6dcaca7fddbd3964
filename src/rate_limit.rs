//! Per-client request limiting. Each client address gets a sliding window
//! of `max_requests` per `window`; excess requests are answered with 429.

use crate::{backend::BookingBackend, error::AppError, AppState};
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::{
    collections::{HashMap, VecDeque},
    net::{IpAddr, SocketAddr},
    time::{Duration, Instant},
};
use tracing::warn;

#[derive(Debug)]
pub struct RateLimiter {
    windows: HashMap<Option<IpAddr>, VecDeque<Instant>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: HashMap::new(),
            max_requests,
            window,
        }
    }

    /// Records a request at `now`. Returns `Err(retry_after_secs)` when the
    /// client already used up its window.
    pub fn check(&mut self, client: Option<IpAddr>, now: Instant) -> Result<(), u64> {
        let window = self.window;
        self.windows
            .retain(|_, hits| hits.back().is_some_and(|last| now.duration_since(*last) < window));

        let hits = self.windows.entry(client).or_default();
        while hits
            .front()
            .is_some_and(|first| now.duration_since(*first) >= window)
        {
            hits.pop_front();
        }

        if hits.len() >= self.max_requests as usize {
            let retry_after = hits
                .front()
                .map(|first| window.saturating_sub(now.duration_since(*first)))
                .unwrap_or(window);
            return Err(retry_after.as_secs().max(1));
        }

        hits.push_back(now);
        Ok(())
    }
}

/// Rejects clients that exceeded their request budget.
pub async fn limit_requests<T: BookingBackend>(
    State(state): State<AppState<T>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(address)| address.ip());

    // The guard is not Send and must be gone before awaiting.
    {
        let mut limiter = state
            .rate_limiter
            .lock()
            .map_err(|_| AppError::Internal("Rate limiter lock poisoned".into()))?;
        limiter.check(client, Instant::now()).map_err(|retry_after| {
            warn!(?client, retry_after, "Rate limit exceeded");
            AppError::RateLimited { retry_after }
        })?;
    }

    Ok(next.run(request).await)
}
