use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, register_counter, register_counter_vec, register_gauge,
    register_histogram,
};


lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("waitlist_requests_total", "Total number of subscribe requests").unwrap();
    pub static ref REJECTIONS: CounterVec = register_counter_vec!(
        "waitlist_rejections_total",
        "Subscribe requests answered with an error, by reason",
        &["reason"]
    )
    .unwrap();
    pub static ref SIGNUPS: Counter =
        register_counter!("waitlist_signups_total", "Signups that reached the welcome email").unwrap();
    pub static ref DEDUP_HITS: Counter =
        register_counter!("waitlist_dedup_total", "Repeat signups answered without a new email").unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "waitlist_request_latency_seconds",
        "Subscribe latency in seconds"
    )
    .unwrap();
    pub static ref RATE_LIMIT_ENTRIES: Gauge =
        register_gauge!("waitlist_rate_limit_entries", "Client IPs currently tracked by the rate limiter").unwrap();
}
