//! Handoff HTTP handlers.
//!
//! Two ways to obtain a cross-site handoff token:
//! - GET /api/v1/handoff - for a browser with a live session cookie,
//!   answers with a redirect to the partner site
//! - POST /api/v1/handoff - for a server holding a paid order reference,
//!   answers with JSON

use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::affiliation::Affiliation;
use crate::services::login::VerifyRejection;
use crate::services::return_url;
use crate::state::AppState;
use crate::token::{handoff, session};

#[derive(Debug, Deserialize)]
pub struct HandoffParams {
    /// Partner destination; falls back to the configured default
    #[serde(rename = "return")]
    pub return_url: Option<String>,

    pub source: Option<String>,
}

/// Redirect a logged-in member to a partner site with a handoff token.
///
/// Requires the session cookie. Failures redirect to the login page with
/// the same bounded error codes the verify endpoint uses.
pub async fn handoff_redirect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HandoffParams>,
) -> Response {
    let Some(session_token) = session::read_from_headers(&headers) else {
        return rejection_redirect(&state, VerifyRejection::MissingToken);
    };

    let affiliation_id = match session::verify(&session_token, &state.config.token_secret) {
        Ok(Some(id)) => id,
        Ok(None) => return rejection_redirect(&state, VerifyRejection::InvalidOrUsed),
        Err(err) => {
            tracing::error!(error = %err, "session verification failed");
            return rejection_redirect(&state, VerifyRejection::InvalidOrUsed);
        }
    };

    let affiliation = match sqlx::query_as::<_, Affiliation>(
        "SELECT * FROM affiliations WHERE id = $1",
    )
    .bind(affiliation_id)
    .fetch_optional(&state.pool)
    .await
    {
        Ok(Some(affiliation)) => affiliation,
        Ok(None) => return rejection_redirect(&state, VerifyRejection::InvalidOrUsed),
        Err(err) => {
            tracing::error!(error = %err, "affiliation lookup failed during handoff");
            return rejection_redirect(&state, VerifyRejection::InvalidOrUsed);
        }
    };

    if !affiliation.is_active(Utc::now()) {
        return rejection_redirect(&state, VerifyRejection::MembershipExpired);
    }

    let destination = params
        .return_url
        .clone()
        .unwrap_or_else(|| state.config.default_return());
    let Ok(mut redirect_url) =
        return_url::validate(&destination, &state.config.allowed_return_hosts)
    else {
        return rejection_redirect(&state, VerifyRejection::InvalidReturn);
    };

    let source = params.source.as_deref().unwrap_or("session");
    let token = match handoff::issue(
        &affiliation.handoff_subject(),
        source,
        handoff::DEFAULT_TTL_SECS,
        &state.config.token_secret,
    ) {
        Ok(token) => token,
        Err(err) => {
            tracing::error!(error = %err, "handoff issuance failed");
            return rejection_redirect(&state, VerifyRejection::InvalidOrUsed);
        }
    };

    redirect_url
        .query_pairs_mut()
        .append_pair("fenam_token", &token);
    Redirect::to(redirect_url.as_str()).into_response()
}

/// Request body for the order-based handoff.
#[derive(Debug, Deserialize)]
pub struct HandoffRequest {
    pub order_reference: String,

    pub return_url: String,

    pub source: Option<String>,
}

/// Response carrying the signed token and the assembled redirect URL.
#[derive(Debug, Serialize)]
pub struct HandoffResponse {
    pub token: String,

    pub redirect_url: String,
}

/// Issue a handoff token for a paid order.
///
/// Used by the post-payment page, which holds the order reference but no
/// session yet.
pub async fn issue_handoff(
    State(state): State<AppState>,
    Json(request): Json<HandoffRequest>,
) -> Result<Json<HandoffResponse>, AppError> {
    let affiliation = sqlx::query_as::<_, Affiliation>(
        "SELECT * FROM affiliations WHERE order_reference = $1",
    )
    .bind(request.order_reference.trim())
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::OrderNotFound)?;

    if !affiliation.is_active(Utc::now()) {
        return Err(AppError::NotActiveMember);
    }

    let mut redirect_url =
        return_url::validate(&request.return_url, &state.config.allowed_return_hosts)
            .map_err(|reason| {
                AppError::InvalidRequest(format!("return URL rejected: {reason}"))
            })?;

    let source = request.source.as_deref().unwrap_or("order");
    let token = handoff::issue(
        &affiliation.handoff_subject(),
        source,
        handoff::DEFAULT_TTL_SECS,
        &state.config.token_secret,
    )?;

    redirect_url
        .query_pairs_mut()
        .append_pair("fenam_token", &token);

    Ok(Json(HandoffResponse {
        redirect_url: redirect_url.to_string(),
        token,
    }))
}

fn rejection_redirect(state: &AppState, rejection: VerifyRejection) -> Response {
    let target = format!("{}?error={}", state.config.login_page(), rejection.code());
    Redirect::to(&target).into_response()
}
