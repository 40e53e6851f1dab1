//! Shared application state injected into handlers.

use std::sync::Arc;

use crate::clients::card::CardRenderer;
use crate::clients::email::EmailSender;
use crate::clients::paypal::PayPalClient;
use crate::config::Config;
use crate::db::DbPool;
use crate::middleware::rate_limit::RateLimiter;

/// Everything a handler may need, cloned cheaply per request.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub paypal: PayPalClient,
    pub email: Arc<dyn EmailSender>,
    pub cards: Arc<dyn CardRenderer>,
    pub rate_limiter: RateLimiter,
}
