//! Membership card rendering.
//!
//! Card PDFs come from an external rendering service, consumed as a passive
//! content converter: card data in, PDF bytes out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CardError {
    #[error("card render request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("card renderer rejected the request with status {status}")]
    Rejected { status: u16 },
}

/// Data printed on a membership card.
#[derive(Debug, Clone, Serialize)]
pub struct MembershipCard {
    pub member_number: String,
    pub name: String,
    pub surname: String,
    pub member_since: DateTime<Utc>,
    pub member_until: DateTime<Utc>,
}

#[async_trait]
pub trait CardRenderer: Send + Sync {
    /// Render the card as PDF bytes.
    async fn render(&self, card: &MembershipCard) -> Result<Vec<u8>, CardError>;
}

/// HTTP card rendering client.
pub struct HttpCardRenderer {
    http: reqwest::Client,
    api_url: String,
}

impl HttpCardRenderer {
    pub fn new(api_url: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.to_string(),
        })
    }
}

#[async_trait]
impl CardRenderer for HttpCardRenderer {
    async fn render(&self, card: &MembershipCard) -> Result<Vec<u8>, CardError> {
        let response = self.http.post(&self.api_url).json(card).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CardError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
