// ⚙️ Settings - every tunable of the service in one place
// Defaults match the production deployment; binaries override them via clap/env

use anyhow::{bail, Result};
use chrono::Duration;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub bind_addr: String,
    pub database_path: PathBuf,

    // ========================================================================
    // RISK THRESHOLDS (fraud probability, 0.0 - 1.0)
    // ========================================================================
    pub high_risk_threshold: f64,
    pub medium_risk_threshold: f64,
    pub low_risk_threshold: f64,

    /// Optional JSON file with risk model weights (built-in weights otherwise)
    pub model_path: Option<PathBuf>,

    // ========================================================================
    // AUTH LIFETIMES (seconds)
    // ========================================================================
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub email_verify_ttl_secs: i64,
    pub password_reset_ttl_secs: i64,
    pub account_lock_secs: i64,
    /// SHA-256 rounds for password hashes (stored per hash, so it can change)
    pub password_hash_iterations: u32,

    // ========================================================================
    // LINKS & CONTACT
    // ========================================================================
    /// Where the browser app lives (OAuth redirects land here)
    pub frontend_url: String,
    /// Base URL used in emailed links
    pub public_url: String,
    pub email_sender: String,
    pub support_phone: String,
    pub support_email: String,

    pub google: GoogleSettings,
}

#[derive(Debug, Clone)]
pub struct GoogleSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: "http://localhost:8000/api/auth/google/callback".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
        }
    }
}

impl GoogleSettings {
    pub fn is_configured(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "VerifAI".to_string(),
            bind_addr: "0.0.0.0:8000".to_string(),
            database_path: PathBuf::from("verifai.db"),
            high_risk_threshold: 0.80,
            medium_risk_threshold: 0.50,
            low_risk_threshold: 0.20,
            model_path: None,
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 7 * 24 * 3600,
            email_verify_ttl_secs: 24 * 3600,
            password_reset_ttl_secs: 3600,
            account_lock_secs: 30 * 60,
            password_hash_iterations: 50_000,
            frontend_url: "http://localhost:5173".to_string(),
            public_url: "https://verifai.app".to_string(),
            email_sender: "security@verifai.app".to_string(),
            support_phone: "+91-1800-123-4567".to_string(),
            support_email: "support@verifai.com".to_string(),
            google: GoogleSettings::default(),
        }
    }
}

impl Settings {
    /// Reject combinations that would make the decision bands meaningless
    pub fn validate(&self) -> Result<()> {
        let (low, medium, high) = (
            self.low_risk_threshold,
            self.medium_risk_threshold,
            self.high_risk_threshold,
        );

        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&medium) || !(0.0..=1.0).contains(&high) {
            bail!("Risk thresholds must be within 0.0..=1.0");
        }
        if !(low < medium && medium < high) {
            bail!(
                "Risk thresholds must be ordered low < medium < high (got {} / {} / {})",
                low, medium, high
            );
        }

        for (name, secs) in [
            ("access token TTL", self.access_token_ttl_secs),
            ("refresh token TTL", self.refresh_token_ttl_secs),
            ("email verification TTL", self.email_verify_ttl_secs),
            ("password reset TTL", self.password_reset_ttl_secs),
            ("account lock duration", self.account_lock_secs),
        ] {
            if secs <= 0 {
                bail!("{} must be positive", name);
            }
        }

        if self.password_hash_iterations == 0 {
            bail!("password hash iterations must be positive");
        }

        Ok(())
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::seconds(self.access_token_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::seconds(self.refresh_token_ttl_secs)
    }

    pub fn account_lock(&self) -> Duration {
        Duration::seconds(self.account_lock_secs)
    }

    /// Link emailed after signup
    pub fn verify_email_link(&self, token: &str) -> String {
        format!("{}/verify-email?token={}", self.public_url.trim_end_matches('/'), token)
    }

    /// Link emailed for password resets
    pub fn reset_password_link(&self, token: &str) -> String {
        format!("{}/reset-password?token={}", self.public_url.trim_end_matches('/'), token)
    }
}
