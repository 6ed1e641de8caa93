// VerifAI - API server
// Every setting can come from a flag or a VERIFAI_* environment variable.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use verifai::api::{self, AppState};
use verifai::config::{GoogleSettings, Settings};
use verifai::db;
use verifai::scoring::WeightedRiskModel;

#[derive(Parser, Debug)]
#[command(name = "verifai-server")]
#[command(author, version, about = "VerifAI fraud detection API", long_about = None)]
struct Args {
    #[arg(long, env = "VERIFAI_BIND", default_value = "0.0.0.0:8000")]
    bind: String,

    #[arg(long, env = "VERIFAI_DATABASE", default_value = "verifai.db")]
    database: PathBuf,

    /// JSON file with risk model weights
    #[arg(long, env = "VERIFAI_MODEL_PATH")]
    model: Option<PathBuf>,

    #[arg(long, env = "VERIFAI_HIGH_RISK_THRESHOLD", default_value_t = 0.80)]
    high_risk_threshold: f64,

    #[arg(long, env = "VERIFAI_MEDIUM_RISK_THRESHOLD", default_value_t = 0.50)]
    medium_risk_threshold: f64,

    #[arg(long, env = "VERIFAI_LOW_RISK_THRESHOLD", default_value_t = 0.20)]
    low_risk_threshold: f64,

    #[arg(long, env = "VERIFAI_ACCESS_TOKEN_TTL", default_value_t = 3600)]
    access_token_ttl: i64,

    #[arg(long, env = "VERIFAI_REFRESH_TOKEN_TTL", default_value_t = 7 * 24 * 3600)]
    refresh_token_ttl: i64,

    #[arg(long, env = "VERIFAI_ACCOUNT_LOCK_SECS", default_value_t = 30 * 60)]
    account_lock_secs: i64,

    #[arg(long, env = "VERIFAI_FRONTEND_URL", default_value = "http://localhost:5173")]
    frontend_url: String,

    #[arg(long, env = "VERIFAI_PUBLIC_URL", default_value = "https://verifai.app")]
    public_url: String,

    #[arg(long, env = "VERIFAI_EMAIL_SENDER", default_value = "security@verifai.app")]
    email_sender: String,

    #[arg(long, env = "VERIFAI_SUPPORT_EMAIL", default_value = "support@verifai.com")]
    support_email: String,

    #[arg(long, env = "VERIFAI_SUPPORT_PHONE", default_value = "+91-1800-123-4567")]
    support_phone: String,

    #[arg(long, env = "VERIFAI_GOOGLE_CLIENT_ID")]
    google_client_id: Option<String>,

    #[arg(long, env = "VERIFAI_GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    google_client_secret: Option<String>,

    #[arg(
        long,
        env = "VERIFAI_GOOGLE_REDIRECT_URI",
        default_value = "http://localhost:8000/api/auth/google/callback"
    )]
    google_redirect_uri: String,
}

impl Args {
    fn into_settings(self) -> Settings {
        let defaults = Settings::default();
        Settings {
            bind_addr: self.bind,
            database_path: self.database,
            model_path: self.model,
            high_risk_threshold: self.high_risk_threshold,
            medium_risk_threshold: self.medium_risk_threshold,
            low_risk_threshold: self.low_risk_threshold,
            access_token_ttl_secs: self.access_token_ttl,
            refresh_token_ttl_secs: self.refresh_token_ttl,
            account_lock_secs: self.account_lock_secs,
            frontend_url: self.frontend_url,
            public_url: self.public_url,
            email_sender: self.email_sender,
            support_email: self.support_email,
            support_phone: self.support_phone,
            google: GoogleSettings {
                client_id: self.google_client_id,
                client_secret: self.google_client_secret,
                redirect_uri: self.google_redirect_uri,
                ..GoogleSettings::default()
            },
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "verifai=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Args::parse().into_settings();
    settings.validate()?;

    let conn = db::open_database(&settings.database_path)?;
    let purged = db::purge_expired_tokens(&conn, Utc::now())?;
    info!(path = %settings.database_path.display(), purged, "Database opened");

    let model = WeightedRiskModel::load_or_built_in(settings.model_path.as_deref())?;
    info!(model = model.name.as_str(), "Risk model loaded");

    if !settings.google.is_configured() {
        warn!("Google OAuth is not configured, /api/auth/google/* will fail");
    }

    let bind_addr = settings.bind_addr.clone();
    let app = api::router(AppState::new(conn, settings, Arc::new(model)));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    info!("🚀 VerifAI API listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
