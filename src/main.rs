use clap::Parser; // for cli
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use purian_waitlist::app;
use purian_waitlist::config::Args;
use purian_waitlist::mail::{LogMailer, Mailer, ResendMailer};
use purian_waitlist::rate_limit::{RateLimiter, sweeper};
use purian_waitlist::state::AppState;
use purian_waitlist::store::{MemoryStore, SupabaseStore, WaitlistStore};
use purian_waitlist::verify::TurnstileVerifier;

// this is main async function with tokio
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "purian_waitlist=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // parse cli arguments
    let args = Args::parse();

    // one client for every outbound call, so they all share the timeout
    let client = reqwest::Client::builder()
        .timeout(args.outbound_timeout())
        .build()?;

    let store: Arc<dyn WaitlistStore> = match (&args.supabase_url, &args.supabase_key) {
        (Some(url), Some(key)) => Arc::new(SupabaseStore::new(client.clone(), url, key.clone())?),
        _ => {
            tracing::warn!("SUPABASE_URL/SUPABASE_SERVICE_ROLE_KEY not set, keeping signups in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let mailer: Arc<dyn Mailer> = match &args.resend_api_key {
        Some(key) => Arc::new(ResendMailer::new(
            client.clone(),
            args.resend_url.clone(),
            key.clone(),
            args.mail_from.clone(),
        )),
        None => {
            tracing::warn!("RESEND_API_KEY not set, welcome emails are only logged");
            Arc::new(LogMailer)
        }
    };

    let verifier = Arc::new(TurnstileVerifier::new(
        client,
        args.turnstile_url.clone(),
        args.turnstile_secret.clone(),
    ));

    let rate_limiter = Arc::new(RateLimiter::new(args.rate_limit, args.rate_window()));

    // spawn the stale entry sweeper
    let sweep_limiter = Arc::clone(&rate_limiter);
    let sweep_interval = Duration::from_secs(args.sweep_interval);
    tokio::spawn(async move {
        sweeper(sweep_limiter, sweep_interval).await;
    });

    // creating shared state
    let state = Arc::new(AppState {
        rate_limiter,
        store,
        mailer,
        verifier,
        settings: args.settings(),
    });

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(port = args.port, "waitlist service listening");
    tracing::info!(
        limit = args.rate_limit,
        window_secs = args.rate_window,
        "rate limit per client ip"
    );
    tracing::info!(
        timeout_secs = args.outbound_timeout,
        strict_body = !args.lenient_body,
        "outbound calls and body parsing configured"
    );

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
