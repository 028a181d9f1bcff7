//! Request throttling for the unauthenticated account endpoints (sign-up, reset, code check).

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};

use crate::app::AppState;
use crate::errors::AppError;

/// One bucket per client, shared by every route the limiter is layered on.
pub type AccountRateLimiter = Arc<RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>>;

pub fn create_account_rate_limiter(per_minute: u32) -> AccountRateLimiter {
    let burst = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::keyed(Quota::per_minute(burst)))
}

/// Peer address of the connection, or the first `X-Forwarded-For` hop when running behind
/// a trusted proxy.
pub fn client_key(request: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').map(str::trim).find(|hop| !hop.is_empty()));
        if let Some(hop) = forwarded {
            return hop.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn limit_account_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = client_key(&request, state.settings.trust_forwarded_for);

    match state.account_limiter.check_key(&key) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(client = %key, path = %request.uri().path(), "account request throttled");
            AppError::TooManyRequests.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http;

    #[test]
    fn limiter_rejects_past_the_burst_per_client() {
        let limiter = create_account_rate_limiter(3);
        let a = "10.0.0.1".to_string();
        let b = "10.0.0.2".to_string();

        for _ in 0..3 {
            assert!(limiter.check_key(&a).is_ok());
        }
        assert!(limiter.check_key(&a).is_err());
        assert!(limiter.check_key(&b).is_ok());
    }

    #[test]
    fn client_key_prefers_peer_address_unless_proxy_is_trusted() -> Result<(), http::Error> {
        let mut request = http::Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())?;
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 5], 4000))));

        assert_eq!(client_key(&request, false), "192.168.1.5");
        assert_eq!(client_key(&request, true), "203.0.113.7");

        let bare = http::Request::builder().body(Body::empty())?;
        assert_eq!(client_key(&bare, false), "unknown");
        Ok(())
    }
}
