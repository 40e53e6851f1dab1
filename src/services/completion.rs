//! Affiliation completion engine.
//!
//! Turns a confirmed payment capture into consistent membership state:
//! status, member number and validity window. The operation is idempotent
//! under retries and races; the only write happens inside one transaction
//! whose re-read makes the first completer win. Notifications are strictly
//! someone else's job (`side_effects`), so a flaky email provider can never
//! make a paid member look unpaid.
//!
//! # Process
//!
//! 1. Load the affiliation (not found is fatal, the caller creates records)
//! 2. Short-circuit when already completed with all values present
//! 3. Look up a renewal basis: the most recent completed affiliation
//!    sharing the payer or profile email
//! 4. Derive the validity window with calendar-year arithmetic
//! 5. Generate a member number when absent
//! 6. Transactional re-read and write; a concurrent completer's result is
//!    returned unchanged instead of being overwritten
//! 7. Commit failures surface as a distinguished error class, with
//!    diagnostic breadcrumbs persisted best-effort by the caller

use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::{AppError, CompletionWriteKind};
use crate::models::affiliation::{Affiliation, AffiliationStatus};
use crate::services::member_number;

/// The values a completed membership is made of.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub member_number: String,
    pub member_since: DateTime<Utc>,
    pub member_until: DateTime<Utc>,
    /// True when the record was already completed and nothing was written.
    pub already_completed: bool,
}

/// Transition an affiliation to completed, assigning member number and
/// validity window.
///
/// Safe to call repeatedly for the same record: duplicate webhook
/// deliveries, client retries and concurrent requests all converge on the
/// same persisted values.
pub async fn mark_completed(
    pool: &DbPool,
    affiliation_id: Uuid,
    payer_email: Option<&str>,
    correlation_id: &str,
) -> Result<CompletionOutcome, AppError> {
    let affiliation =
        sqlx::query_as::<_, Affiliation>("SELECT * FROM affiliations WHERE id = $1")
            .bind(affiliation_id)
            .fetch_optional(pool)
            .await?
            .ok_or(AppError::AffiliationNotFound)?;

    // Idempotence short-circuit: a fully completed record is returned as-is,
    // with no further writes.
    if let Some(outcome) = completed_outcome(&affiliation) {
        tracing::info!(
            correlation_id,
            affiliation_id = %affiliation_id,
            member_number = %outcome.member_number,
            "affiliation already completed, returning existing values"
        );
        return Ok(outcome);
    }

    let order_reference = affiliation
        .order_reference
        .clone()
        .unwrap_or_else(|| affiliation_id.to_string());

    // Renewal basis: most recent completed membership sharing an email.
    let profile_email = affiliation.email.trim().to_lowercase();
    let mut emails = vec![profile_email.clone()];
    let payer_email_norm = payer_email.map(|e| e.trim().to_lowercase());
    if let Some(payer) = &payer_email_norm {
        if !payer.is_empty() && *payer != profile_email {
            emails.push(payer.clone());
        }
    }

    let renewal_basis = sqlx::query_as::<_, (DateTime<Utc>, DateTime<Utc>)>(
        r#"
        SELECT member_since, member_until
        FROM affiliations
        WHERE id <> $1
          AND status = 'completed'
          AND member_since IS NOT NULL
          AND member_until IS NOT NULL
          AND (LOWER(email) = ANY($2) OR LOWER(payer_email) = ANY($2))
        ORDER BY member_until DESC
        LIMIT 1
        "#,
    )
    .bind(affiliation_id)
    .bind(&emails)
    .fetch_optional(pool)
    .await?;

    let now = Utc::now();
    let (member_since, member_until) = derive_membership_window(renewal_basis, now);

    // A completed record must never lack a member number.
    let number = match &affiliation.member_number {
        Some(existing) => existing.clone(),
        None => {
            let probe_pool = pool.clone();
            member_number::generate_unique(
                move |candidate| {
                    let pool = probe_pool.clone();
                    async move { member_number::member_number_taken(&pool, &candidate).await }
                },
                member_number::MAX_RETRIES,
            )
            .await?
        }
    };

    // Store the payer email only when it differs from the profile email.
    let payer_to_store = payer_email_norm.filter(|p| !p.is_empty() && *p != profile_email);

    // Atomic commit. The row lock plus re-read serializes concurrent
    // completion attempts: whoever got here first wins, everyone else
    // observes and returns the committed values.
    let mut tx = pool.begin().await?;

    let current =
        sqlx::query_as::<_, Affiliation>("SELECT * FROM affiliations WHERE id = $1 FOR UPDATE")
            .bind(affiliation_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|err| write_failure(err, &order_reference, correlation_id))?;

    let Some(current) = current else {
        tx.rollback().await?;
        return Err(AppError::CompletionWrite {
            kind: CompletionWriteKind::RecordVanished,
            order_reference,
        });
    };

    if let Some(outcome) = completed_outcome(&current) {
        tx.rollback().await?;
        tracing::info!(
            correlation_id,
            affiliation_id = %affiliation_id,
            "lost completion race, returning concurrent result"
        );
        return Ok(outcome);
    }

    // The transactional re-read is authoritative for the member number too.
    let number = current.member_number.clone().unwrap_or(number);

    sqlx::query(
        r#"
        UPDATE affiliations
        SET status = 'completed',
            member_number = $2,
            member_since = $3,
            member_until = $4,
            payer_email = COALESCE($5, payer_email),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(affiliation_id)
    .bind(&number)
    .bind(member_since)
    .bind(member_until)
    .bind(&payer_to_store)
    .execute(&mut *tx)
    .await
    .map_err(|err| write_failure(err, &order_reference, correlation_id))?;

    tx.commit()
        .await
        .map_err(|err| write_failure(err, &order_reference, correlation_id))?;

    tracing::info!(
        correlation_id,
        affiliation_id = %affiliation_id,
        member_number = %number,
        member_until = %member_until,
        "affiliation completed"
    );

    Ok(CompletionOutcome {
        member_number: number,
        member_since,
        member_until,
        already_completed: false,
    })
}

/// Persist provider-status breadcrumbs for manual reconciliation.
///
/// Best-effort on purpose: a failure here is logged and swallowed, the
/// caller is already handling a more important error.
pub async fn record_capture_diagnostic(pool: &DbPool, affiliation_id: Uuid, provider_status: &str) {
    let result = sqlx::query(
        r#"
        UPDATE affiliations
        SET last_paypal_status = $2,
            last_paypal_checked_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(affiliation_id)
    .bind(provider_status)
    .execute(pool)
    .await;

    if let Err(err) = result {
        tracing::warn!(
            affiliation_id = %affiliation_id,
            provider_status,
            error = %err,
            "failed to persist capture diagnostic"
        );
    }
}

/// Existing values of a record that is completed in full, if it is.
fn completed_outcome(affiliation: &Affiliation) -> Option<CompletionOutcome> {
    if affiliation.status != AffiliationStatus::Completed {
        return None;
    }
    match (
        &affiliation.member_number,
        affiliation.member_since,
        affiliation.member_until,
    ) {
        (Some(number), Some(since), Some(until)) => Some(CompletionOutcome {
            member_number: number.clone(),
            member_since: since,
            member_until: until,
            already_completed: true,
        }),
        _ => None,
    }
}

/// Derive the validity window for a completing affiliation.
///
/// - Renewal basis still valid: keep its `member_since` (continuity of
///   "member since") and extend its expiry by one calendar year.
/// - Renewal basis lapsed, or none: fresh start from now, one calendar year.
pub(crate) fn derive_membership_window(
    renewal_basis: Option<(DateTime<Utc>, DateTime<Utc>)>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    match renewal_basis {
        Some((since, until)) if until > now => (since, add_one_year(until)),
        _ => (now, add_one_year(now)),
    }
}

/// Add one calendar year: increment the year component rather than adding a
/// fixed day count. A Feb 29 anchor lands on Feb 28 of the next year.
pub(crate) fn add_one_year(date: DateTime<Utc>) -> DateTime<Utc> {
    match date.with_year(date.year() + 1) {
        Some(next) => next,
        None => date
            .with_day(28)
            .and_then(|d| d.with_year(d.year() + 1))
            .unwrap_or(date),
    }
}

fn write_failure(err: sqlx::Error, order_reference: &str, correlation_id: &str) -> AppError {
    let kind = match &err {
        sqlx::Error::RowNotFound => CompletionWriteKind::RecordVanished,
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            CompletionWriteKind::UniqueViolation
        }
        _ => CompletionWriteKind::Other,
    };
    tracing::error!(
        correlation_id,
        order_reference,
        error = %err,
        ?kind,
        "critical completion write failed after successful capture"
    );
    AppError::CompletionWrite {
        kind,
        order_reference: order_reference.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn fresh_membership_starts_now_for_one_year() {
        let now = utc(2026, 8, 4);
        let (since, until) = derive_membership_window(None, now);
        assert_eq!(since, now);
        assert_eq!(until, utc(2027, 8, 4));
    }

    #[test]
    fn active_renewal_preserves_since_and_extends_until() {
        let now = utc(2026, 8, 4);
        let original_since = utc(2023, 3, 1);
        let current_until = utc(2026, 10, 15);
        let (since, until) =
            derive_membership_window(Some((original_since, current_until)), now);
        assert_eq!(since, original_since);
        assert_eq!(until, utc(2027, 10, 15));
    }

    #[test]
    fn lapsed_renewal_is_a_fresh_start() {
        let now = utc(2026, 8, 4);
        let (since, until) =
            derive_membership_window(Some((utc(2022, 1, 10), utc(2023, 1, 10))), now);
        assert_eq!(since, now);
        assert_eq!(until, utc(2027, 8, 4));
    }

    #[test]
    fn expiry_exactly_now_counts_as_lapsed() {
        let now = utc(2026, 8, 4);
        let (since, until) = derive_membership_window(Some((utc(2025, 8, 4), now)), now);
        assert_eq!(since, now);
        assert_eq!(until, utc(2027, 8, 4));
    }

    #[test]
    fn leap_day_anchors_to_feb_28() {
        assert_eq!(add_one_year(utc(2024, 2, 29)), utc(2025, 2, 28));
        assert_eq!(add_one_year(utc(2025, 2, 28)), utc(2026, 2, 28));
        assert_eq!(add_one_year(utc(2024, 12, 31)), utc(2025, 12, 31));
    }
}
