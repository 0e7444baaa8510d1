use std::sync::Arc;
use crate::config::Settings;
use crate::mail::Mailer;
use crate::rate_limit::RateLimiter;
use crate::store::WaitlistStore;
use crate::verify::BotVerifier;
// app's shared state

pub struct AppState {
    pub rate_limiter: Arc<RateLimiter>, // per-IP fixed window, shared with the sweeper
    pub store: Arc<dyn WaitlistStore>,
    pub mailer: Arc<dyn Mailer>,
    pub verifier: Arc<dyn BotVerifier>,
    pub settings: Settings,
}
