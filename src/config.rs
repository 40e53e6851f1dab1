//! Application configuration management.
//!
//! Configuration is loaded from environment variables with the `envy` crate,
//! which deserializes them into a type-safe struct. A `.env` file is loaded
//! first when present.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `TOKEN_SECRET` (required): HMAC secret for handoff/session tokens
/// - `BASE_URL` (required): public origin of this service, used to build
///   magic-link verification URLs (e.g. `https://www.fenam.org`)
/// - `ALLOWED_RETURN_HOSTS` (required): comma-separated host allowlist for
///   return URLs (exact host or any subdomain of it)
/// - `COOKIE_DOMAIN` (optional): parent domain for the session cookie; only
///   applied when the request host belongs to that domain family
/// - `ENVIRONMENT` (optional): "production" enables the Secure cookie
///   attribute, defaults to "development"
/// - `LOGIN_PAGE_URL` (optional): where verification failures redirect,
///   defaults to `<BASE_URL>/login`
/// - `DEFAULT_RETURN_URL` (optional): post-login destination when the login
///   request carried no return URL, defaults to `BASE_URL`
/// - `PAYPAL_BASE_URL` (optional): defaults to the PayPal sandbox
/// - `PAYPAL_CLIENT_ID` / `PAYPAL_CLIENT_SECRET` (required)
/// - `EMAIL_API_URL` / `EMAIL_API_KEY` / `EMAIL_FROM` (required)
/// - `CARD_RENDERER_URL` (required): PDF card rendering service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    pub token_secret: String,

    pub base_url: String,

    pub allowed_return_hosts: String,

    #[serde(default)]
    pub cookie_domain: Option<String>,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub login_page_url: Option<String>,

    #[serde(default)]
    pub default_return_url: Option<String>,

    #[serde(default = "default_paypal_base_url")]
    pub paypal_base_url: String,

    pub paypal_client_id: String,

    pub paypal_client_secret: String,

    pub email_api_url: String,

    pub email_api_key: String,

    pub email_from: String,

    pub card_renderer_url: String,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_paypal_base_url() -> String {
    "https://api-m.sandbox.paypal.com".to_string()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or cannot be
    /// parsed. A missing `TOKEN_SECRET` is caught here, at startup, rather
    /// than at the first signing call.
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        envy::from_env::<Config>()
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Redirect target for magic-link verification failures.
    pub fn login_page(&self) -> String {
        self.login_page_url
            .clone()
            .unwrap_or_else(|| format!("{}/login", self.base_url.trim_end_matches('/')))
    }

    /// Post-login destination when no return URL was requested.
    pub fn default_return(&self) -> String {
        self.default_return_url
            .clone()
            .unwrap_or_else(|| self.base_url.clone())
    }
}
