//! Post-completion side effects: confirmation email and membership card.
//!
//! Everything here is best-effort and idempotent. Each sub-operation skips
//! itself when its sent-marker is already set, attempts the external send
//! otherwise, and persists the marker only after the send succeeded. A
//! failure becomes a warning in the report and the dispatcher moves on; it
//! never throws and never touches completion status, dates or member
//! number.

use serde::Serialize;
use uuid::Uuid;

use crate::clients::card::{CardRenderer, MembershipCard};
use crate::clients::email::{EmailAttachment, EmailMessage, EmailSender};
use crate::db::DbPool;
use crate::models::affiliation::{Affiliation, AffiliationStatus};

/// What the dispatcher managed to do.
#[derive(Debug, Default, Serialize)]
pub struct SideEffectReport {
    pub email_sent: bool,
    pub card_sent: bool,
    pub warnings: Vec<String>,
}

/// Run both notification sub-operations for a completed affiliation.
///
/// Callers may invoke this speculatively: a missing or non-completed record
/// yields an all-false report with a warning instead of an error.
pub async fn run_side_effects(
    pool: &DbPool,
    email_sender: &dyn EmailSender,
    card_renderer: &dyn CardRenderer,
    affiliation_id: Uuid,
    amount: Option<&str>,
    currency: Option<&str>,
) -> SideEffectReport {
    let mut report = SideEffectReport::default();

    let affiliation = match sqlx::query_as::<_, Affiliation>(
        "SELECT * FROM affiliations WHERE id = $1",
    )
    .bind(affiliation_id)
    .fetch_optional(pool)
    .await
    {
        Ok(Some(affiliation)) => affiliation,
        Ok(None) => {
            report
                .warnings
                .push(format!("affiliation {affiliation_id} not found, skipping notifications"));
            return report;
        }
        Err(err) => {
            report
                .warnings
                .push(format!("could not load affiliation for notifications: {err}"));
            return report;
        }
    };

    if affiliation.status != AffiliationStatus::Completed {
        report
            .warnings
            .push("affiliation is not completed, skipping notifications".to_string());
        return report;
    }

    send_confirmation_email(pool, email_sender, &affiliation, amount, currency, &mut report).await;
    send_membership_card(pool, email_sender, card_renderer, &affiliation, &mut report).await;

    report
}

async fn send_confirmation_email(
    pool: &DbPool,
    email_sender: &dyn EmailSender,
    affiliation: &Affiliation,
    amount: Option<&str>,
    currency: Option<&str>,
    report: &mut SideEffectReport,
) {
    if affiliation.confirmation_email_sent_at.is_some() {
        report.email_sent = true;
        return;
    }

    let message = confirmation_email(affiliation, amount, currency);
    match email_sender.send(&message).await {
        Ok(()) => {
            report.email_sent = true;
            if let Err(err) = mark_sent(pool, affiliation.id, "confirmation_email_sent_at").await {
                report.warnings.push(format!(
                    "confirmation email delivered but its marker could not be saved: {err}"
                ));
            }
        }
        Err(err) => {
            tracing::warn!(
                affiliation_id = %affiliation.id,
                error = %err,
                "confirmation email failed"
            );
            report
                .warnings
                .push(format!("confirmation email failed: {err}"));
        }
    }
}

async fn send_membership_card(
    pool: &DbPool,
    email_sender: &dyn EmailSender,
    card_renderer: &dyn CardRenderer,
    affiliation: &Affiliation,
    report: &mut SideEffectReport,
) {
    if affiliation.membership_card_sent_at.is_some() {
        report.card_sent = true;
        return;
    }

    // Completion guarantees a member number; re-checked here because this
    // can be reached speculatively.
    let (Some(member_number), Some(member_since), Some(member_until)) = (
        affiliation.member_number.clone(),
        affiliation.member_since,
        affiliation.member_until,
    ) else {
        report
            .warnings
            .push("membership card skipped: record is missing its membership values".to_string());
        return;
    };

    let card = MembershipCard {
        member_number,
        name: affiliation.name.clone(),
        surname: affiliation.surname.clone(),
        member_since,
        member_until,
    };

    let pdf = match card_renderer.render(&card).await {
        Ok(pdf) => pdf,
        Err(err) => {
            tracing::warn!(
                affiliation_id = %affiliation.id,
                error = %err,
                "membership card rendering failed"
            );
            report
                .warnings
                .push(format!("membership card rendering failed: {err}"));
            return;
        }
    };

    let message = card_email(affiliation, &card, pdf);
    match email_sender.send(&message).await {
        Ok(()) => {
            report.card_sent = true;
            if let Err(err) = mark_sent(pool, affiliation.id, "membership_card_sent_at").await {
                report.warnings.push(format!(
                    "membership card delivered but its marker could not be saved: {err}"
                ));
            }
        }
        Err(err) => {
            tracing::warn!(
                affiliation_id = %affiliation.id,
                error = %err,
                "membership card email failed"
            );
            report
                .warnings
                .push(format!("membership card email failed: {err}"));
        }
    }
}

/// Persist a sent-marker. The column name is one of the two marker columns,
/// chosen by the callers above.
async fn mark_sent(pool: &DbPool, affiliation_id: Uuid, column: &str) -> Result<(), sqlx::Error> {
    let query = format!(
        "UPDATE affiliations SET {column} = NOW(), updated_at = NOW() \
         WHERE id = $1 AND {column} IS NULL"
    );
    sqlx::query(&query).bind(affiliation_id).execute(pool).await?;
    Ok(())
}

fn confirmation_email(
    affiliation: &Affiliation,
    amount: Option<&str>,
    currency: Option<&str>,
) -> EmailMessage {
    let member_number = affiliation.member_number.as_deref().unwrap_or("(pending)");
    let until = affiliation
        .member_until
        .map(|d| d.format("%d/%m/%Y").to_string())
        .unwrap_or_default();

    let amount_line = match (amount, currency) {
        (Some(amount), Some(currency)) => format!("<p>Amount received: {amount} {currency}</p>"),
        (Some(amount), None) => format!("<p>Amount received: {amount}</p>"),
        _ => String::new(),
    };

    let html = format!(
        "<h1>Welcome to FENAM, {name}!</h1>\
         <p>Your membership is now active.</p>\
         <p>Member number: <strong>{member_number}</strong></p>\
         <p>Valid until: {until}</p>\
         {amount_line}\
         <p>Your membership card will arrive in a separate email.</p>",
        name = affiliation.name,
    );
    let text = format!(
        "Welcome to FENAM, {}!\nYour membership is now active.\n\
         Member number: {member_number}\nValid until: {until}\n",
        affiliation.name,
    );

    EmailMessage {
        to: affiliation.email.clone(),
        subject: format!("FENAM membership confirmed: {member_number}"),
        html,
        text,
        attachments: Vec::new(),
    }
}

fn card_email(affiliation: &Affiliation, card: &MembershipCard, pdf: Vec<u8>) -> EmailMessage {
    let html = format!(
        "<p>Dear {} {},</p>\
         <p>Your FENAM membership card is attached, number \
         <strong>{}</strong>.</p>",
        affiliation.name, affiliation.surname, card.member_number,
    );
    let text = format!(
        "Dear {} {},\nyour FENAM membership card is attached, number {}.\n",
        affiliation.name, affiliation.surname, card.member_number,
    );

    EmailMessage {
        to: affiliation.email.clone(),
        subject: format!("Your FENAM membership card {}", card.member_number),
        html,
        text,
        attachments: vec![EmailAttachment {
            filename: format!("{}.pdf", card.member_number),
            content_type: "application/pdf".to_string(),
            content: pdf,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn completed_affiliation() -> Affiliation {
        let now = Utc.with_ymd_and_hms(2026, 8, 4, 10, 0, 0).unwrap();
        Affiliation {
            id: Uuid::new_v4(),
            order_reference: Some("5O190127TN364715T".to_string()),
            member_number: Some("FENAM-2026-0A1B2C".to_string()),
            name: "Ada".to_string(),
            surname: "Lovelace".to_string(),
            email: "ada@example.org".to_string(),
            phone: None,
            privacy_consent: true,
            payer_email: None,
            status: AffiliationStatus::Completed,
            member_since: Some(now),
            member_until: Some(Utc.with_ymd_and_hms(2027, 8, 4, 10, 0, 0).unwrap()),
            confirmation_email_sent_at: None,
            membership_card_sent_at: None,
            last_paypal_status: None,
            last_paypal_checked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn confirmation_email_carries_membership_values() {
        let affiliation = completed_affiliation();
        let message = confirmation_email(&affiliation, Some("25.00"), Some("EUR"));

        assert_eq!(message.to, "ada@example.org");
        assert!(message.subject.contains("FENAM-2026-0A1B2C"));
        assert!(message.html.contains("FENAM-2026-0A1B2C"));
        assert!(message.html.contains("25.00 EUR"));
        assert!(message.html.contains("04/08/2027"));
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn confirmation_email_without_amount_has_no_amount_line() {
        let message = confirmation_email(&completed_affiliation(), None, None);
        assert!(!message.html.contains("Amount received"));
    }

    #[test]
    fn card_email_attaches_one_pdf() {
        let affiliation = completed_affiliation();
        let card = MembershipCard {
            member_number: "FENAM-2026-0A1B2C".to_string(),
            name: affiliation.name.clone(),
            surname: affiliation.surname.clone(),
            member_since: affiliation.member_since.unwrap(),
            member_until: affiliation.member_until.unwrap(),
        };
        let message = card_email(&affiliation, &card, vec![0x25, 0x50, 0x44, 0x46]);

        assert_eq!(message.attachments.len(), 1);
        let attachment = &message.attachments[0];
        assert_eq!(attachment.filename, "FENAM-2026-0A1B2C.pdf");
        assert_eq!(attachment.content_type, "application/pdf");
        assert_eq!(attachment.content, vec![0x25, 0x50, 0x44, 0x46]);
    }
}
