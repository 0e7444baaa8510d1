use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, Method, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use http_body_util::LengthLimitError;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::error::SubscribeError;
use crate::mail::welcome_email;
use crate::metrics::{DEDUP_HITS, REJECTIONS, REQUEST_LATENCY, REQUEST_TOTAL, SIGNUPS};
use crate::models::{ALLOWED_FIELDS, DEFAULT_LANG, NewSignup, SignupRequest, SubscribeResponse};
use crate::state::AppState;
use crate::store::InsertOutcome;
use crate::validation::{email_digest, is_valid_email, normalize_email};

const UNKNOWN_IP: &str = "unknown";

// First X-Forwarded-For hop, then the socket peer, then "unknown"
pub(crate) fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

// application/json, parameters such as charset allowed
fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

fn body_error(err: axum::Error) -> SubscribeError {
    let is_limit = std::error::Error::source(&err)
        .is_some_and(|inner| inner.downcast_ref::<LengthLimitError>().is_some());
    if is_limit {
        SubscribeError::PayloadTooLarge
    } else {
        SubscribeError::BodyRead(err)
    }
}

async fn read_signup(
    headers: &HeaderMap,
    body: Body,
    settings: &Settings,
) -> Result<SignupRequest, SubscribeError> {
    if settings.strict_body && !is_json_content_type(headers) {
        return Err(SubscribeError::UnsupportedContentType);
    }

    let bytes = axum::body::to_bytes(body, settings.body_limit)
        .await
        .map_err(body_error)?;

    if !settings.strict_body {
        return serde_json::from_slice(&bytes).map_err(SubscribeError::MalformedJson);
    }

    let fields: serde_json::Map<String, Value> =
        serde_json::from_slice(&bytes).map_err(SubscribeError::MalformedJson)?;
    if let Some(unknown) = fields
        .keys()
        .find(|key| !ALLOWED_FIELDS.contains(&key.as_str()))
    {
        return Err(SubscribeError::UnexpectedField(unknown.clone()));
    }

    serde_json::from_value(Value::Object(fields)).map_err(SubscribeError::MalformedJson)
}

// Runs the admission gates in order, the first failing gate ends the request
async fn admit(state: &AppState, request: Request) -> Result<(), SubscribeError> {
    let (parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(&parts.headers, peer);

    if !state.rate_limiter.check(&ip) {
        tracing::warn!(client = %ip, "rate limit exceeded");
        return Err(SubscribeError::RateLimited);
    }

    if parts.method != Method::POST {
        return Err(SubscribeError::MethodNotAllowed);
    }

    let signup = read_signup(&parts.headers, body, &state.settings).await?;

    let token = signup
        .token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or(SubscribeError::MissingToken)?;

    // checked before the verification call so a bad address costs no outbound request
    let email = match &signup.email {
        Some(Value::String(email)) if is_valid_email(email) => normalize_email(email),
        _ => return Err(SubscribeError::InvalidEmail),
    };
    let lang = signup
        .lang
        .filter(|lang| !lang.is_empty())
        .unwrap_or_else(|| DEFAULT_LANG.to_string());
    let digest = email_digest(&email);

    match state.verifier.verify(token, &ip).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(client = %ip, "bot verification rejected token");
            return Err(SubscribeError::BotCheckFailed);
        }
        Err(e) => {
            tracing::warn!(client = %ip, error = %e, "bot verification unavailable");
            return Err(SubscribeError::BotCheckFailed);
        }
    }

    let now = Utc::now();
    if let Some(last) = state.store.latest_signup(&email).await? {
        if now.signed_duration_since(last) < state.settings.cooldown {
            DEDUP_HITS.inc();
            tracing::info!(email = %digest, "repeat signup inside cooldown, nothing sent");
            return Ok(());
        }
    }

    let recent = state
        .store
        .count_from_ip_since(&ip, now - state.settings.abuse_window)
        .await?;
    if recent > state.settings.abuse_threshold {
        tracing::warn!(client = %ip, recent, "too many signups from one address");
        return Err(SubscribeError::TooManyFromIp);
    }

    let outcome = state
        .store
        .insert(&NewSignup {
            email: email.clone(),
            lang: lang.clone(),
            ip: ip.clone(),
        })
        .await?;
    // the existing row already got its welcome email; created_at never moves,
    // so sending here would bypass the cooldown on every later resubmission
    if outcome == InsertOutcome::Duplicate {
        DEDUP_HITS.inc();
        tracing::info!(email = %digest, "email already on the waitlist, nothing sent");
        return Ok(());
    }

    // no retry and no rollback of the insert when this fails
    state.mailer.send(&welcome_email(&lang, &email)).await?;

    SIGNUPS.inc();
    tracing::info!(email = %digest, lang = %lang, client = %ip, "new waitlist signup");
    Ok(())
}

pub async fn subscribe_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    REQUEST_TOTAL.inc();
    let start_time = Instant::now();

    let result = admit(&state, request).await;

    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());

    match result {
        Ok(()) => Json(SubscribeResponse { ok: true }).into_response(),
        Err(err) => {
            REJECTIONS.with_label_values(&[err.reason()]).inc();
            if err.is_dependency_failure() {
                let cause = std::error::Error::source(&err).map(|e| e.to_string());
                tracing::error!(reason = err.reason(), cause = ?cause, "signup failed");
            } else {
                tracing::debug!(reason = err.reason(), error = %err, "signup rejected");
            }
            err.into_response()
        }
    }
}
