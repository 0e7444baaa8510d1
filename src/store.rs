//! Waitlist persistence.
//!
//! Production rows live in a Supabase `waitlist` table reached through its
//! PostgREST API; `MemoryStore` keeps them in process for development and tests.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;

use crate::models::{NewSignup, WaitlistRecord};

// Postgres unique_violation
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store url: {0}")]
    InvalidUrl(String),

    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store answered {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("store response without a usable count")]
    MissingCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    // a row with this email already exists
    Duplicate,
}

#[async_trait]
pub trait WaitlistStore: Send + Sync {
    /// `created_at` of the most recent row for `email` (already case-folded).
    async fn latest_signup(&self, email: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Rows created from `ip` at or after `since`.
    async fn count_from_ip_since(&self, ip: &str, since: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn insert(&self, signup: &NewSignup) -> Result<InsertOutcome, StoreError>;
}

#[derive(Deserialize)]
struct CreatedAtRow {
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
}

pub struct SupabaseStore {
    client: reqwest::Client,
    table_url: Url,
    api_key: String,
}

impl SupabaseStore {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: String) -> Result<Self, StoreError> {
        let table_url = Url::parse(&format!(
            "{}/rest/v1/waitlist",
            base_url.trim_end_matches('/')
        ))
        .map_err(|e| StoreError::InvalidUrl(e.to_string()))?;

        Ok(Self {
            client,
            table_url,
            api_key,
        })
    }

    fn url_with(&self, params: &[(&str, &str)]) -> Url {
        let mut url = self.table_url.clone();
        url.query_pairs_mut().extend_pairs(params);
        url
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn rejected(res: reqwest::Response) -> StoreError {
        let status = res.status().as_u16();
        let message = res.text().await.unwrap_or_default();
        StoreError::Rejected { status, message }
    }
}

#[async_trait]
impl WaitlistStore for SupabaseStore {
    async fn latest_signup(&self, email: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let email_filter = format!("eq.{}", email);
        let url = self.url_with(&[
            ("select", "created_at"),
            ("email", &email_filter),
            ("order", "created_at.desc"),
            ("limit", "1"),
        ]);

        let res = self.request(reqwest::Method::GET, url).send().await?;
        if !res.status().is_success() {
            return Err(Self::rejected(res).await);
        }

        let rows: Vec<CreatedAtRow> = res.json().await?;
        Ok(rows.into_iter().next().map(|row| row.created_at))
    }

    async fn count_from_ip_since(&self, ip: &str, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let ip_filter = format!("eq.{}", ip);
        let since_filter = format!("gte.{}", since.to_rfc3339_opts(SecondsFormat::Millis, true));
        let url = self.url_with(&[
            ("select", "ip"),
            ("ip", &ip_filter),
            ("created_at", &since_filter),
        ]);

        // HEAD + count=exact: PostgREST reports the total in Content-Range
        let res = self
            .request(reqwest::Method::HEAD, url)
            .header("Prefer", "count=exact")
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(Self::rejected(res).await);
        }

        res.headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total)
            .ok_or(StoreError::MissingCount)
    }

    async fn insert(&self, signup: &NewSignup) -> Result<InsertOutcome, StoreError> {
        let res = self
            .request(reqwest::Method::POST, self.table_url.clone())
            .header("Prefer", "return=minimal")
            .json(signup)
            .send()
            .await?;

        let status = res.status();
        if status.is_success() {
            return Ok(InsertOutcome::Inserted);
        }
        if status == StatusCode::CONFLICT {
            return Ok(InsertOutcome::Duplicate);
        }

        let message = res.text().await.unwrap_or_default();
        if let Ok(err) = serde_json::from_str::<PostgrestError>(&message) {
            if err.code.as_deref() == Some(UNIQUE_VIOLATION) {
                return Ok(InsertOutcome::Duplicate);
            }
            if let Some(msg) = err.message {
                return Err(StoreError::Rejected {
                    status: status.as_u16(),
                    message: msg,
                });
            }
        }
        Err(StoreError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

// "0-4/5" or "*/0" -> total after the slash
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

/// In-process waitlist keyed by email, with the same uniqueness rule as the table.
#[derive(Default)]
pub struct MemoryStore {
    rows: DashMap<String, WaitlistRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a row with an explicit timestamp, replacing any row for that email.
    pub fn seed(&self, record: WaitlistRecord) {
        self.rows.insert(record.email.clone(), record);
    }

    pub fn get(&self, email: &str) -> Option<WaitlistRecord> {
        self.rows.get(email).map(|row| row.value().clone())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl WaitlistStore for MemoryStore {
    async fn latest_signup(&self, email: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.rows.get(email).map(|row| row.created_at))
    }

    async fn count_from_ip_since(&self, ip: &str, since: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row.ip == ip && row.created_at >= since)
            .count() as u64)
    }

    async fn insert(&self, signup: &NewSignup) -> Result<InsertOutcome, StoreError> {
        match self.rows.entry(signup.email.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::Duplicate),
            Entry::Vacant(slot) => {
                slot.insert(WaitlistRecord {
                    email: signup.email.clone(),
                    lang: signup.lang.clone(),
                    ip: signup.ip.clone(),
                    created_at: Utc::now(),
                });
                Ok(InsertOutcome::Inserted)
            }
        }
    }
}
