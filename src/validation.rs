use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

pub const MAX_EMAIL_LEN: usize = 320;

lazy_static! {
    // local@domain.tld, deliberately looser than RFC 5322
    static ref EMAIL_RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

pub fn is_valid_email(email: &str) -> bool {
    email.chars().count() <= MAX_EMAIL_LEN && EMAIL_RE.is_match(email)
}

// Key used for storage and cooldown lookups
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// Short hash so logs can correlate signups without holding addresses
pub fn email_digest(email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..12].to_string()
}
