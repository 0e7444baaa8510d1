use clap::Parser;
use std::time::Duration;

// CLI argument structure, every option can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "purian-waitlist")]
#[command(about = "Waitlist signup service for the Purian landing page")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Rate limit max requests per window (per client IP)
    #[arg(long, env = "RATE_LIMIT", default_value_t = 5)]
    pub rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, env = "RATE_WINDOW", default_value_t = 60)]
    pub rate_window: u64,

    // How often stale rate limit entries are swept, in seconds
    #[arg(
        long,
        env = "SWEEP_INTERVAL",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sweep_interval: u64,

    // Max accepted request body in bytes
    #[arg(long, env = "BODY_LIMIT", default_value_t = 10 * 1024)]
    pub body_limit: usize,

    // Skip the content-type and field allow-list checks
    #[arg(long, env = "LENIENT_BODY")]
    pub lenient_body: bool,

    // No second welcome email for the same address within this many hours
    #[arg(long, env = "COOLDOWN_HOURS", default_value_t = 24)]
    pub cooldown_hours: i64,

    // Lookback for the per-IP signup count, in minutes
    #[arg(long, env = "ABUSE_WINDOW_MINUTES", default_value_t = 60)]
    pub abuse_window_minutes: i64,

    // Signups allowed from one IP inside the lookback
    #[arg(long, env = "ABUSE_THRESHOLD", default_value_t = 20)]
    pub abuse_threshold: u64,

    // Timeout for calls to Turnstile, Supabase and Resend, in seconds
    #[arg(long, env = "OUTBOUND_TIMEOUT", default_value_t = 5)]
    pub outbound_timeout: u64,

    // Sender of the welcome email
    #[arg(long, env = "MAIL_FROM", default_value = "Purian <hello@purian.de>")]
    pub mail_from: String,

    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    #[arg(long, env = "SUPABASE_SERVICE_ROLE_KEY", hide_env_values = true)]
    pub supabase_key: Option<String>,

    #[arg(long, env = "RESEND_API_KEY", hide_env_values = true)]
    pub resend_api_key: Option<String>,

    #[arg(long, env = "RESEND_URL", default_value = "https://api.resend.com/emails")]
    pub resend_url: String,

    #[arg(long, env = "TURNSTILE_SECRET_KEY", hide_env_values = true)]
    pub turnstile_secret: String,

    #[arg(
        long,
        env = "TURNSTILE_URL",
        default_value = "https://challenges.cloudflare.com/turnstile/v0/siteverify"
    )]
    pub turnstile_url: String,
}

// Tunables the subscribe pipeline reads on every request
#[derive(Debug, Clone)]
pub struct Settings {
    pub body_limit: usize,
    pub strict_body: bool,
    pub cooldown: chrono::Duration,
    pub abuse_window: chrono::Duration,
    pub abuse_threshold: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            body_limit: 10 * 1024,
            strict_body: true,
            cooldown: chrono::Duration::hours(24),
            abuse_window: chrono::Duration::minutes(60),
            abuse_threshold: 20,
        }
    }
}

impl Args {
    pub fn settings(&self) -> Settings {
        Settings {
            body_limit: self.body_limit,
            strict_body: !self.lenient_body,
            cooldown: chrono::Duration::hours(self.cooldown_hours),
            abuse_window: chrono::Duration::minutes(self.abuse_window_minutes),
            abuse_threshold: self.abuse_threshold,
        }
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window)
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_secs(self.outbound_timeout)
    }
}
