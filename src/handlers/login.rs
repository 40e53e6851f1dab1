//! Magic-link HTTP handlers.
//!
//! - POST /api/v1/login/request - JSON endpoint creating the one-time link
//! - GET /login/verify - redirect-only endpoint consuming it
//!
//! The verify endpoint never answers with JSON: every outcome is a redirect,
//! and failures carry only a bounded error code in the query string.

use axum::{
    Json,
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, header},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;

use crate::error::AppError;
use crate::models::login_token::LoginRequestBody;
use crate::services::login::{self, VerifyRejection};
use crate::state::AppState;
use crate::token::session;

/// Request a magic-link email.
///
/// # Request Body
///
/// ```json
/// {
///   "email": "ada@example.org",
///   "return_url": "https://forum.partner.example/sso",
///   "source": "partner-forum"
/// }
/// ```
///
/// # Responses
///
/// - 200 `{"status": "sent"}` when the link was emailed
/// - 403 `not_active_member` when the email has no active membership
/// - 429 `rate_limited` beyond the per-identity or per-IP quota
pub async fn request_login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<LoginRequestBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let requested_ip = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| addr.ip().to_string());

    login::request_login(
        &state.pool,
        state.email.as_ref(),
        &state.rate_limiter,
        &state.config,
        body,
        Some(requested_ip),
    )
    .await?;

    Ok(Json(json!({ "status": "sent" })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    pub token: Option<String>,
}

/// Consume a magic-link token.
///
/// On success the member gets the session cookie and a redirect to the
/// validated return URL with a handoff token attached. On failure the
/// redirect goes to the login page with `?error=<code>`, where the code is
/// one of `missing_token`, `invalid_or_used`, `membership_expired`,
/// `invalid_return`.
pub async fn verify_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<VerifyParams>,
) -> Response {
    let Some(token) = params.token.filter(|token| !token.is_empty()) else {
        return rejection_redirect(&state, VerifyRejection::MissingToken);
    };

    match login::verify_login(&state.pool, &state.config, &token).await {
        Ok(verified) => {
            let request_host = headers
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("");
            let cookie =
                session::cookie_header(&verified.session_token, request_host, &state.config);
            tracing::debug!(
                affiliation_id = %verified.affiliation_id,
                "session cookie issued"
            );
            (
                AppendHeaders([(header::SET_COOKIE, cookie)]),
                Redirect::to(verified.redirect_url.as_str()),
            )
                .into_response()
        }
        Err(rejection) => rejection_redirect(&state, rejection),
    }
}

fn rejection_redirect(state: &AppState, rejection: VerifyRejection) -> Response {
    let target = format!("{}?error={}", state.config.login_page(), rejection.code());
    Redirect::to(&target).into_response()
}
