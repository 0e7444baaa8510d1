mod health;
mod metrics;
mod subscribe;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use subscribe::subscribe_handler;
