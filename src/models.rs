use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Fields a subscribe body may carry
pub const ALLOWED_FIELDS: [&str; 3] = ["email", "lang", "token"];

pub const DEFAULT_LANG: &str = "en";

// Subscribe request body, as posted by the landing page form
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SignupRequest {
    pub email: Option<serde_json::Value>, // checked for being a string by the email gate
    pub lang: Option<String>,
    pub token: Option<String>,
}

// Row written to the waitlist table, created_at is assigned by the store
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NewSignup {
    pub email: String,
    pub lang: String,
    pub ip: String,
}

// Stored waitlist row
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WaitlistRecord {
    pub email: String,
    pub lang: String,
    pub ip: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResponse {
    pub ok: bool,
}
