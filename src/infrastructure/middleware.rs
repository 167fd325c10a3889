//! axum integration.
//!
//! [`gate_middleware`] runs every request through a shared [`RequestGate`]:
//!
//! ```rust,ignore
//! use axum::{middleware, routing::get, Router};
//! use quota_gate::{gate_middleware, InMemoryQuotaStore, RequestGate, SystemClock, TokenValidator};
//! use std::sync::Arc;
//!
//! let store = InMemoryQuotaStore::new(Arc::new(SystemClock::new()));
//! let validator = TokenValidator::hs256(b"secret").unwrap();
//! let gate = Arc::new(RequestGate::builder(store, validator).build().unwrap());
//!
//! let app: Router = Router::new()
//!     .route("/api/v1/topics", get(|| async { "topics" }))
//!     .layer(middleware::from_fn_with_state(
//!         gate,
//!         gate_middleware::<InMemoryQuotaStore, TokenValidator>,
//!     ));
//! ```
//!
//! Admitted requests carry a [`RequestIdentity`] extension; handlers read it
//! with `Extension<RequestIdentity>`. Rejections are answered directly with
//! a JSON body and never reach the handler. For client addresses to be known,
//! serve the router with `into_make_service_with_connect_info::<SocketAddr>()`.

use crate::application::gate::{GateOutcome, GateRequest, QuotaStatus, Rejection, RequestGate};
use crate::application::ports::{IdentityVerifier, QuotaStore};
use crate::domain::identity::{InvalidToken, RequestIdentity};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{AUTHORIZATION, RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Requests allowed per window.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Seconds until the current window resets.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Authenticate and rate-limit one request.
pub async fn gate_middleware<S, V>(
    State(gate): State<Arc<RequestGate<S, V>>>,
    mut request: Request,
    next: Next,
) -> Response
where
    S: QuotaStore + 'static,
    V: IdentityVerifier + 'static,
{
    let path = request.uri().path().to_owned();
    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let client_addr = client_addr(&request, gate.trusts_forwarded_for());

    let outcome = gate
        .evaluate(&GateRequest {
            path: &path,
            authorization: authorization.as_deref(),
            client_addr,
        })
        .await;

    match outcome {
        GateOutcome::Bypass => next.run(request).await,
        GateOutcome::Forward(admission) => {
            request.extensions_mut().insert(admission.identity);
            let mut response = next.run(request).await;
            if let Some(quota) = admission.quota {
                insert_quota_headers(response.headers_mut(), &quota);
            }
            response
        }
        GateOutcome::Reject(rejection) => rejection.into_response(),
    }
}

/// Client address: first trusted `X-Forwarded-For` entry, else the peer address.
fn client_addr(request: &Request, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get(X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn insert_quota_headers(headers: &mut HeaderMap, quota: &QuotaStatus) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(quota.reset_after));
}

#[derive(Debug, Serialize)]
struct RejectionBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status()).unwrap_or(StatusCode::TOO_MANY_REQUESTS);
        let retry_after = self.retry_after();
        let challenge = match &self {
            Rejection::Unauthenticated(InvalidToken::Missing) => Some("Bearer"),
            Rejection::Unauthenticated(_) => Some(r#"Bearer error="invalid_token""#),
            _ => None,
        };
        let body = RejectionBody {
            error: self.code(),
            message: self.to_string(),
            retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        if let Some(secs) = retry_after {
            headers.insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        if let Some(challenge) = challenge {
            headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
        }
        response
    }
}

/// Identity of the caller, for handlers behind [`gate_middleware`].
///
/// Falls back to [`RequestIdentity::Anonymous`] on routes the gate bypassed.
pub fn request_identity(request: &Request) -> RequestIdentity {
    request
        .extensions()
        .get::<RequestIdentity>()
        .cloned()
        .unwrap_or(RequestIdentity::Anonymous)
}
