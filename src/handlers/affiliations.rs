//! Affiliation HTTP handlers.
//!
//! This module implements the affiliation endpoints:
//! - POST /api/v1/affiliations - Create a pending affiliation plus its
//!   payment order
//! - POST /api/v1/affiliations/complete - Confirm a captured payment and
//!   activate the membership

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use uuid::Uuid;

use crate::clients::paypal::OrderOutcome;
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::affiliation::{
    Affiliation, CompleteAffiliationRequest, CompleteAffiliationResponse,
    CreateAffiliationRequest, CreateAffiliationResponse,
};
use crate::services::{completion, side_effects};
use crate::state::AppState;

/// Create a pending affiliation and its payment order.
///
/// # Request Body
///
/// ```json
/// {
///   "name": "Ada",
///   "surname": "Lovelace",
///   "email": "ada@example.org",
///   "privacy_consent": true,
///   "amount_cents": 2500
/// }
/// ```
///
/// # Response (201)
///
/// ```json
/// {
///   "id": "550e8400-e29b-41d4-a716-446655440000",
///   "order_reference": "5O190127TN364715T",
///   "status": "pending"
/// }
/// ```
///
/// The client drives the payment approval with `order_reference` and calls
/// the completion endpoint afterwards.
pub async fn create_affiliation(
    State(state): State<AppState>,
    Json(request): Json<CreateAffiliationRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.name.trim().is_empty() || request.surname.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "name and surname are required".to_string(),
        ));
    }
    let email = request.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(AppError::InvalidRequest("a valid email is required".to_string()));
    }
    if !request.privacy_consent {
        return Err(AppError::InvalidRequest(
            "privacy consent is required".to_string(),
        ));
    }
    if request.amount_cents <= 0 {
        return Err(AppError::InvalidRequest("amount must be positive".to_string()));
    }

    let order_reference = state
        .paypal
        .create_order(request.amount_cents, &request.currency)
        .await?;

    let affiliation = sqlx::query_as::<_, Affiliation>(
        r#"
        INSERT INTO affiliations (order_reference, name, surname, email, phone, privacy_consent)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(&order_reference)
    .bind(request.name.trim())
    .bind(request.surname.trim())
    .bind(&email)
    .bind(&request.phone)
    .bind(request.privacy_consent)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(
        affiliation_id = %affiliation.id,
        order_reference = %order_reference,
        "pending affiliation created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateAffiliationResponse {
            id: affiliation.id,
            order_reference,
            status: affiliation.status,
        }),
    ))
}

/// Confirm a captured payment and activate the membership.
///
/// Idempotent: duplicate callbacks for the same order return the already
/// assigned member number with `already_completed: true`. A provider status
/// other than COMPLETED produces an informational "not yet" response, not an
/// error, since the provider may still be processing.
pub async fn complete_affiliation(
    State(state): State<AppState>,
    Json(request): Json<CompleteAffiliationRequest>,
) -> Result<Json<CompleteAffiliationResponse>, AppError> {
    let order_reference = request.order_reference.trim().to_string();
    if order_reference.is_empty() {
        return Err(AppError::InvalidRequest(
            "order_reference is required".to_string(),
        ));
    }
    let correlation_id = request
        .correlation_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let existing = sqlx::query_as::<_, Affiliation>(
        "SELECT * FROM affiliations WHERE order_reference = $1",
    )
    .bind(&order_reference)
    .fetch_optional(&state.pool)
    .await?;

    let capture = state.paypal.capture_order(&order_reference).await?;

    if !capture.is_completed() {
        tracing::info!(
            correlation_id = %correlation_id,
            order_reference = %order_reference,
            provider_status = %capture.status,
            "capture not completed yet"
        );
        if let Some(affiliation) = &existing {
            completion::record_capture_diagnostic(&state.pool, affiliation.id, &capture.status)
                .await;
        }
        return Ok(Json(CompleteAffiliationResponse {
            completed: false,
            already_completed: false,
            member_number: None,
            member_since: None,
            member_until: None,
            provider_status: Some(capture.status),
            email_sent: false,
            card_sent: false,
            warnings: Vec::new(),
        }));
    }

    // Tolerant recovery: the capture succeeded but no pending record
    // matches the order. Recreate one from payer data instead of losing the
    // payment.
    let affiliation = match existing {
        Some(affiliation) => affiliation,
        None => recover_affiliation(&state.pool, &order_reference, &capture, &request).await?,
    };

    let outcome = match completion::mark_completed(
        &state.pool,
        affiliation.id,
        capture.payer_email.as_deref(),
        &correlation_id,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            // The payment is captured; leave a breadcrumb before surfacing
            // the failure.
            completion::record_capture_diagnostic(&state.pool, affiliation.id, &capture.status)
                .await;
            return Err(err);
        }
    };

    let report = side_effects::run_side_effects(
        &state.pool,
        state.email.as_ref(),
        state.cards.as_ref(),
        affiliation.id,
        capture.amount.as_deref(),
        capture.currency.as_deref(),
    )
    .await;

    Ok(Json(CompleteAffiliationResponse {
        completed: true,
        already_completed: outcome.already_completed,
        member_number: Some(outcome.member_number),
        member_since: Some(outcome.member_since),
        member_until: Some(outcome.member_until),
        provider_status: None,
        email_sent: report.email_sent,
        card_sent: report.card_sent,
        warnings: report.warnings,
    }))
}

/// Recreate the missing pending record for a captured order.
async fn recover_affiliation(
    pool: &DbPool,
    order_reference: &str,
    capture: &OrderOutcome,
    request: &CompleteAffiliationRequest,
) -> Result<Affiliation, AppError> {
    let email = capture
        .payer_email
        .clone()
        .or_else(|| request.payer_email.clone())
        .map(|e| e.trim().to_lowercase())
        .filter(|e| e.contains('@'))
        .ok_or_else(|| {
            AppError::InvalidRequest(
                "order has no matching affiliation and no payer email to recover from"
                    .to_string(),
            )
        })?;

    tracing::warn!(
        order_reference = %order_reference,
        "capture succeeded without a pending record, recreating affiliation"
    );

    let inserted = sqlx::query_as::<_, Affiliation>(
        r#"
        INSERT INTO affiliations (order_reference, name, surname, email, privacy_consent)
        VALUES ($1, $2, $3, $4, FALSE)
        ON CONFLICT (order_reference) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(order_reference)
    .bind(request.name.as_deref().unwrap_or(""))
    .bind(request.surname.as_deref().unwrap_or(""))
    .bind(&email)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(affiliation) => Ok(affiliation),
        // A concurrent request recovered it first; read theirs.
        None => sqlx::query_as::<_, Affiliation>(
            "SELECT * FROM affiliations WHERE order_reference = $1",
        )
        .bind(order_reference)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::OrderNotFound),
    }
}
