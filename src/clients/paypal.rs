//! PayPal Orders API client.
//!
//! Supports the single capture-on-demand flow this system needs: create an
//! order, capture it once the payer approved, and re-read order state when
//! PayPal reports it was already captured. Authentication is the
//! client-credentials OAuth flow, fetched per call.

use serde_json::{Value, json};

use crate::error::AppError;

/// Order state as reported by PayPal, reduced to what the completion flow
/// consumes.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    /// PayPal order status; only "COMPLETED" allows completion to proceed
    pub status: String,

    /// Payer email as reported by the provider
    pub payer_email: Option<String>,

    /// Captured amount as a decimal string, e.g. "25.00"
    pub amount: Option<String>,

    pub currency: Option<String>,
}

impl OrderOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == "COMPLETED"
    }
}

#[derive(Clone)]
pub struct PayPalClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl PayPalClient {
    pub fn new(
        base_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    async fn access_token(&self) -> Result<String, AppError> {
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::PaymentProvider(format!(
                "token request failed with status {status}"
            )));
        }

        let body: Value = response.json().await.map_err(transport_error)?;
        body.get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::PaymentProvider("token response carried no access_token".to_string())
            })
    }

    /// Create a capture-intent order for the given amount.
    pub async fn create_order(&self, amount_cents: i64, currency: &str) -> Result<String, AppError> {
        let token = self.access_token().await?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": {
                    "currency_code": currency,
                    "value": format_amount(amount_cents),
                }
            }]
        });

        let response = self
            .http
            .post(format!("{}/v2/checkout/orders", self.base_url))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body: Value = response.json().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(AppError::PaymentProvider(format!(
                "order creation failed with status {status}"
            )));
        }

        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::PaymentProvider("order response carried no id".to_string())
            })
    }

    /// Capture an approved order.
    ///
    /// An "already captured" rejection is recovered by re-reading the order:
    /// a duplicate completion callback must observe the captured state, not
    /// an error.
    pub async fn capture_order(&self, order_id: &str) -> Result<OrderOutcome, AppError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!(
                "{}/v2/checkout/orders/{order_id}/capture",
                self.base_url
            ))
            .bearer_auth(&token)
            .json(&json!({}))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            if has_issue(&body, "ORDER_ALREADY_CAPTURED") {
                tracing::info!(order_id, "order already captured, re-reading order state");
                return self.get_order(order_id).await;
            }
            return Err(AppError::PaymentProvider(format!(
                "capture failed with status {status}"
            )));
        }

        Ok(parse_order_payload(&body))
    }

    /// Read current order state.
    pub async fn get_order(&self, order_id: &str) -> Result<OrderOutcome, AppError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{}/v2/checkout/orders/{order_id}", self.base_url))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::PaymentProvider(format!(
                "order lookup failed with status {status}"
            )));
        }

        let body: Value = response.json().await.map_err(transport_error)?;
        Ok(parse_order_payload(&body))
    }
}

fn transport_error(err: reqwest::Error) -> AppError {
    AppError::PaymentProvider(format!("request failed: {err}"))
}

/// Extract the fields the completion flow needs from an order payload.
///
/// The captured amount lives under the capture when one exists, and under
/// the purchase unit before capture.
fn parse_order_payload(body: &Value) -> OrderOutcome {
    let amount_node = body
        .pointer("/purchase_units/0/payments/captures/0/amount")
        .or_else(|| body.pointer("/purchase_units/0/amount"));

    OrderOutcome {
        status: body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string(),
        payer_email: body
            .pointer("/payer/email_address")
            .and_then(Value::as_str)
            .map(str::to_string),
        amount: amount_node
            .and_then(|a| a.get("value"))
            .and_then(Value::as_str)
            .map(str::to_string),
        currency: amount_node
            .and_then(|a| a.get("currency_code"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// True when any entry of `details[]` carries the given issue code.
fn has_issue(body: &Value, issue: &str) -> bool {
    body.get("details")
        .and_then(Value::as_array)
        .is_some_and(|details| {
            details
                .iter()
                .any(|d| d.get("issue").and_then(Value::as_str) == Some(issue))
        })
}

fn format_amount(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captured_order_payload_parsed() {
        let body = json!({
            "id": "5O190127TN364715T",
            "status": "COMPLETED",
            "payer": { "email_address": "payer@example.org" },
            "purchase_units": [{
                "payments": {
                    "captures": [{
                        "amount": { "currency_code": "EUR", "value": "25.00" }
                    }]
                }
            }]
        });

        let outcome = parse_order_payload(&body);
        assert!(outcome.is_completed());
        assert_eq!(outcome.payer_email.as_deref(), Some("payer@example.org"));
        assert_eq!(outcome.amount.as_deref(), Some("25.00"));
        assert_eq!(outcome.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn uncaptured_order_falls_back_to_purchase_unit_amount() {
        let body = json!({
            "status": "CREATED",
            "purchase_units": [{
                "amount": { "currency_code": "EUR", "value": "25.00" }
            }]
        });

        let outcome = parse_order_payload(&body);
        assert!(!outcome.is_completed());
        assert_eq!(outcome.amount.as_deref(), Some("25.00"));
        assert_eq!(outcome.payer_email, None);
    }

    #[test]
    fn empty_payload_degrades_to_unknown() {
        let outcome = parse_order_payload(&Value::Null);
        assert_eq!(outcome.status, "UNKNOWN");
        assert_eq!(outcome.amount, None);
    }

    #[test]
    fn already_captured_issue_detected() {
        let body = json!({
            "name": "UNPROCESSABLE_ENTITY",
            "details": [{ "issue": "ORDER_ALREADY_CAPTURED" }]
        });
        assert!(has_issue(&body, "ORDER_ALREADY_CAPTURED"));
        assert!(!has_issue(&body, "ORDER_NOT_APPROVED"));
        assert!(!has_issue(&Value::Null, "ORDER_ALREADY_CAPTURED"));
    }

    #[test]
    fn amounts_formatted_as_decimal_strings() {
        assert_eq!(format_amount(2500), "25.00");
        assert_eq!(format_amount(100), "1.00");
        assert_eq!(format_amount(1205), "12.05");
    }
}
