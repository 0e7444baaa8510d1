//! Waitlist signup service for the Purian landing page.
//!
//! `POST /api/subscribe` runs every submission through a fixed sequence of
//! admission gates before anything is stored or emailed:
//!
//! ```text
//! rate limit -> method -> body -> token -> email -> bot check
//!            -> cooldown -> ip abuse -> insert -> welcome email
//! ```
//!
//! The waitlist table, the mail service and the bot challenge service are
//! external; each sits behind a trait so tests can swap them out.

pub mod config;
pub mod error;
pub mod handlers;
pub mod mail;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod state;
pub mod store;
pub mod validation;
pub mod verify;

use axum::{
    Router,
    routing::{any, get},
};
use std::sync::Arc;

use crate::handlers::{health_handler, metrics_handler, subscribe_handler};
use crate::state::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // every method is routed here so the rate limit runs before the method check
        .route("/api/subscribe", any(subscribe_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
