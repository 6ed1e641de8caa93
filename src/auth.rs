// 🔐 Authentication - passwords, bearer tokens and account lifecycle
//
// Tokens are opaque random strings. Only their SHA-256 digest is stored,
// so a leaked database cannot be replayed against the API.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::config::Settings;
use crate::db::{self, Event, TokenKind, VerificationTokenRow};
use crate::entities::user::{looks_like_phone, validate_password_length};
use crate::entities::{LoginRequest, PreferencesUpdate, SignupRequest, User, UserProfile};
use crate::error::{AppError, AppResult};
use crate::notify::{Notifier, Templates};

const EMAIL_VERIFY: &str = "EMAIL_VERIFY";
const PASSWORD_RESET: &str = "PASSWORD_RESET";

// ============================================================================
// PASSWORD HASHING
// Format: sha256$<iterations>$<salt>$<hex digest>
// ============================================================================

pub fn hash_password(password: &str, iterations: u32) -> String {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    let digest = stretch(password, &salt, iterations);
    format!("sha256${}${}${}", iterations, salt, digest)
}

pub fn verify_password(password: &str, encoded: &str) -> bool {
    let parts: Vec<&str> = encoded.split('$').collect();
    let [scheme, iterations, salt, expected] = parts.as_slice() else {
        return false;
    };
    if *scheme != "sha256" {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };

    let actual = stretch(password, salt, iterations);
    actual.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn stretch(password: &str, salt: &str, iterations: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let mut digest = hasher.finalize();

    for _ in 1..iterations {
        let mut hasher = Sha256::new();
        hasher.update(digest);
        hasher.update(salt.as_bytes());
        digest = hasher.finalize();
    }

    format!("{:x}", digest)
}

// ============================================================================
// TOKENS
// ============================================================================

/// 256 bits of randomness, hex encoded
pub fn generate_token() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

/// Identity returned by an external provider (Google)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

// ============================================================================
// AUTH SERVICE
// ============================================================================

pub struct AuthService<'a> {
    conn: &'a Connection,
    settings: &'a Settings,
    notifier: &'a dyn Notifier,
}

impl<'a> AuthService<'a> {
    pub fn new(conn: &'a Connection, settings: &'a Settings, notifier: &'a dyn Notifier) -> Self {
        Self { conn, settings, notifier }
    }

    fn issue_token_pair(&self, user: &User, now: DateTime<Utc>) -> AppResult<TokenResponse> {
        let access_token = generate_token();
        let refresh_token = generate_token();

        db::insert_auth_token(
            self.conn,
            &token_digest(&access_token),
            &user.id,
            TokenKind::Access,
            now + self.settings.access_ttl(),
        )?;
        db::insert_auth_token(
            self.conn,
            &token_digest(&refresh_token),
            &user.id,
            TokenKind::Refresh,
            now + self.settings.refresh_ttl(),
        )?;

        Ok(TokenResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.settings.access_token_ttl_secs,
            user: Some(user.profile()),
        })
    }

    fn create_verification_token(
        &self,
        user_id: &str,
        token_type: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<String> {
        let token = generate_token();
        db::insert_verification_token(
            self.conn,
            &VerificationTokenRow {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                token_hash: token_digest(&token),
                token_type: token_type.to_string(),
                expires_at: now + ttl,
                used_at: None,
            },
        )?;
        Ok(token)
    }

    fn audit(&self, event_type: &str, user_id: &str, data: serde_json::Value) -> AppResult<()> {
        db::insert_event(self.conn, &Event::new(event_type, "user", user_id, data, "auth"))?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Signup / login
    // ------------------------------------------------------------------------

    pub fn signup(&self, req: &SignupRequest) -> AppResult<TokenResponse> {
        req.validate()?;

        if db::find_user_by_email(self.conn, &req.email)?.is_some() {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        let now = Utc::now();
        let phone = req.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()).map(str::to_string);
        let user = User::new(
            &req.email,
            hash_password(&req.password, self.settings.password_hash_iterations),
            &req.name,
            phone,
        );

        let db_tx = self.conn.unchecked_transaction()?;
        db::insert_user(self.conn, &user)?;
        let verify_token = self.create_verification_token(
            &user.id,
            EMAIL_VERIFY,
            Duration::seconds(self.settings.email_verify_ttl_secs),
            now,
        )?;
        self.audit("user_registered", &user.id, serde_json::json!({ "email": user.email }))?;
        let tokens = self.issue_token_pair(&user, now)?;
        db_tx.commit()?;

        let message = Templates::new(self.settings).email_verification(&user.email, &user.name, &verify_token);
        if let Err(e) = self.notifier.send(self.conn, &message) {
            warn!(user_id = %user.id, error = %e, "Verification email not queued");
        }

        info!(user_id = %user.id, "User registered");
        Ok(tokens)
    }

    pub fn login(&self, req: &LoginRequest) -> AppResult<TokenResponse> {
        self.login_at(req, Utc::now())
    }

    pub fn login_at(&self, req: &LoginRequest, now: DateTime<Utc>) -> AppResult<TokenResponse> {
        let identifier = req.identifier.trim();
        let user = if !identifier.contains('@') && looks_like_phone(identifier) {
            db::find_user_by_phone(self.conn, identifier)?
        } else {
            db::find_user_by_email(self.conn, identifier)?
        };

        let mut user = match user {
            Some(user) if verify_password(&req.password, &user.password_hash) => user,
            _ => {
                warn!("Failed login attempt");
                return Err(AppError::InvalidCredentials);
            }
        };

        if let Some(until) = user.locked_until {
            if until > now {
                return Err(AppError::AccountLocked { until });
            }
            // Lock expired
            user.locked_until = None;
        }

        user.last_login = Some(now);
        user.updated_at = now;
        db::update_user(self.conn, &user)?;

        info!(user_id = %user.id, "User logged in");
        self.issue_token_pair(&user, now)
    }

    pub fn login_with_external(&self, identity: &ExternalIdentity) -> AppResult<TokenResponse> {
        crate::entities::user::validate_email(&identity.email)?;
        let now = Utc::now();

        let user = match db::find_user_by_email(self.conn, &identity.email)? {
            Some(mut user) => {
                if identity.email_verified && !user.is_email_verified {
                    user.is_email_verified = true;
                }
                user.last_login = Some(now);
                user.updated_at = now;
                db::update_user(self.conn, &user)?;
                user
            }
            None => {
                let name = identity
                    .name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| identity.email.split('@').next().unwrap_or_default().to_string());
                // Random password: the account can only sign in through the provider until reset
                let mut user = User::new(
                    &identity.email,
                    hash_password(&generate_token(), self.settings.password_hash_iterations),
                    &name,
                    None,
                );
                user.is_email_verified = identity.email_verified;
                user.last_login = Some(now);
                db::insert_user(self.conn, &user)?;
                self.audit("user_registered", &user.id, serde_json::json!({ "provider": "google" }))?;
                user
            }
        };

        if let Some(until) = user.locked_until.filter(|until| *until > now) {
            return Err(AppError::AccountLocked { until });
        }

        info!(user_id = %user.id, "User logged in with external provider");
        self.issue_token_pair(&user, now)
    }

    // ------------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------------

    /// Resolve a bearer token to its user id
    pub fn authenticate(&self, access_token: &str) -> AppResult<String> {
        self.authenticate_at(access_token, Utc::now())
    }

    pub fn authenticate_at(&self, access_token: &str, now: DateTime<Utc>) -> AppResult<String> {
        match db::find_auth_token(self.conn, &token_digest(access_token))? {
            Some(row) if row.kind == TokenKind::Access.as_str() && !row.revoked && row.expires_at > now => {
                Ok(row.user_id)
            }
            _ => Err(AppError::invalid_token()),
        }
    }

    /// New access token for a valid refresh token; the refresh token stays the same
    pub fn refresh(&self, refresh_token: &str) -> AppResult<TokenResponse> {
        self.refresh_at(refresh_token, Utc::now())
    }

    pub fn refresh_at(&self, refresh_token: &str, now: DateTime<Utc>) -> AppResult<TokenResponse> {
        let invalid = || AppError::Unauthorized("Invalid refresh token".to_string());

        let row = match db::find_auth_token(self.conn, &token_digest(refresh_token))? {
            Some(row) if row.kind == TokenKind::Refresh.as_str() && !row.revoked && row.expires_at > now => row,
            _ => return Err(invalid()),
        };
        let user = db::find_user_by_id(self.conn, &row.user_id)?.ok_or_else(invalid)?;

        let access_token = generate_token();
        db::insert_auth_token(
            self.conn,
            &token_digest(&access_token),
            &user.id,
            TokenKind::Access,
            now + self.settings.access_ttl(),
        )?;

        Ok(TokenResponse {
            access_token,
            refresh_token: refresh_token.to_string(),
            token_type: "Bearer".to_string(),
            expires_in: self.settings.access_token_ttl_secs,
            user: Some(user.profile()),
        })
    }

    pub fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> AppResult<()> {
        db::revoke_auth_token(self.conn, &token_digest(access_token))?;
        if let Some(refresh) = refresh_token {
            db::revoke_auth_token(self.conn, &token_digest(refresh))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Profile
    // ------------------------------------------------------------------------

    pub fn me(&self, user_id: &str) -> AppResult<UserProfile> {
        db::find_user_by_id(self.conn, user_id)?
            .map(|u| u.profile())
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    pub fn update_preferences(&self, user_id: &str, update: &PreferencesUpdate) -> AppResult<UserProfile> {
        let mut user = db::find_user_by_id(self.conn, user_id)?
            .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        if let Some(theme) = &update.theme {
            let theme = theme.trim().to_lowercase();
            if theme != "light" && theme != "dark" {
                return Err(AppError::validation("Theme must be 'light' or 'dark'"));
            }
            user.theme = theme;
        }
        if let Some(enabled) = update.notifications_enabled {
            user.notifications_enabled = enabled;
        }
        if let Some(alerts) = update.email_alerts {
            user.email_alerts = alerts;
        }
        user.updated_at = Utc::now();
        db::update_user(self.conn, &user)?;

        Ok(user.profile())
    }

    // ------------------------------------------------------------------------
    // Email verification & password reset
    // ------------------------------------------------------------------------

    pub fn verify_email(&self, token: &str) -> AppResult<()> {
        let now = Utc::now();
        let row = db::find_verification_token(self.conn, &token_digest(token), EMAIL_VERIFY)?
            .filter(|row| row.is_usable_at(now))
            .ok_or(AppError::InvalidVerificationToken("verification"))?;

        let mut user = db::find_user_by_id(self.conn, &row.user_id)?
            .ok_or(AppError::InvalidVerificationToken("verification"))?;

        db::mark_verification_token_used(self.conn, &row.id, now)?;
        user.is_email_verified = true;
        user.updated_at = now;
        db::update_user(self.conn, &user)?;
        self.audit("email_verified", &user.id, serde_json::json!({}))?;

        info!(user_id = %user.id, "Email verified");
        Ok(())
    }

    /// Never reveals whether the email exists
    pub fn forgot_password(&self, email: &str) -> AppResult<()> {
        let Some(user) = db::find_user_by_email(self.conn, email)? else {
            return Ok(());
        };

        let token = self.create_verification_token(
            &user.id,
            PASSWORD_RESET,
            Duration::seconds(self.settings.password_reset_ttl_secs),
            Utc::now(),
        )?;

        let message = Templates::new(self.settings).password_reset(&user.email, &user.name, &token);
        if let Err(e) = self.notifier.send(self.conn, &message) {
            warn!(user_id = %user.id, error = %e, "Password reset email not queued");
        }

        info!(user_id = %user.id, "Password reset requested");
        Ok(())
    }

    pub fn reset_password(&self, token: &str, new_password: &str) -> AppResult<()> {
        validate_password_length(new_password)?;

        let now = Utc::now();
        let row = db::find_verification_token(self.conn, &token_digest(token), PASSWORD_RESET)?
            .filter(|row| row.is_usable_at(now))
            .ok_or(AppError::InvalidVerificationToken("reset"))?;

        let mut user = db::find_user_by_id(self.conn, &row.user_id)?
            .ok_or(AppError::InvalidVerificationToken("reset"))?;

        let db_tx = self.conn.unchecked_transaction()?;
        db::mark_verification_token_used(self.conn, &row.id, now)?;
        user.password_hash = hash_password(new_password, self.settings.password_hash_iterations);
        user.updated_at = now;
        db::update_user(self.conn, &user)?;
        let revoked = db::revoke_user_tokens(self.conn, &user.id)?;
        self.audit("password_reset", &user.id, serde_json::json!({ "sessions_revoked": revoked }))?;
        db_tx.commit()?;

        info!(user_id = %user.id, "Password reset");
        Ok(())
    }
}

/// Lock an account until `until`. Returns the user when the id belongs to an account.
pub fn lock_account(conn: &Connection, user_id: &str, until: DateTime<Utc>, reason: &str) -> AppResult<Option<User>> {
    let Some(mut user) = db::find_user_by_id(conn, user_id)? else {
        return Ok(None);
    };

    user.locked_until = Some(until);
    user.updated_at = Utc::now();
    db::update_user(conn, &user)?;
    db::insert_event(
        conn,
        &Event::new(
            "account_locked",
            "user",
            user_id,
            serde_json::json!({ "until": until.to_rfc3339(), "reason": reason }),
            "agent",
        ),
    )?;

    warn!(user_id, until = %until, "Account locked");
    Ok(Some(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{list_outbox, setup_database};
    use crate::notify::OutboxNotifier;

    fn fixture() -> (Connection, Settings) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let settings = Settings {
            password_hash_iterations: 10,
            ..Settings::default()
        };
        (conn, settings)
    }

    fn signup_req(email: &str) -> SignupRequest {
        SignupRequest {
            email: email.to_string(),
            password: "Secret123".to_string(),
            name: "Asha Rao".to_string(),
            phone: Some("+919876543210".to_string()),
        }
    }

    fn login_req(identifier: &str, password: &str) -> LoginRequest {
        LoginRequest {
            identifier: identifier.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_password_hash_round_trip() {
        let encoded = hash_password("Secret123", 25);
        assert!(encoded.starts_with("sha256$25$"));
        assert!(verify_password("Secret123", &encoded));
        assert!(!verify_password("secret123", &encoded));
        assert!(!verify_password("Secret123", "garbage"));
        assert_ne!(hash_password("Secret123", 25), encoded, "salts must differ");
    }

    #[test]
    fn test_signup_issues_tokens_and_queues_verification() {
        let (conn, settings) = fixture();
        let auth = AuthService::new(&conn, &settings, &OutboxNotifier);

        let tokens = auth.signup(&signup_req("asha@example.com")).unwrap();
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.expires_in, 3600);
        assert_eq!(tokens.user.as_ref().unwrap().email, "asha@example.com");

        let user_id = auth.authenticate(&tokens.access_token).unwrap();
        assert_eq!(auth.me(&user_id).unwrap().name, "Asha Rao");

        let outbox = list_outbox(&conn, 5).unwrap();
        assert_eq!(outbox[0].kind, "email_verification");

        let dup = auth.signup(&signup_req("ASHA@example.com"));
        assert!(matches!(dup, Err(AppError::Conflict(_))));
    }

    #[test]
    fn test_login_by_email_and_phone() {
        let (conn, settings) = fixture();
        let auth = AuthService::new(&conn, &settings, &OutboxNotifier);
        auth.signup(&signup_req("asha@example.com")).unwrap();

        assert!(auth.login(&login_req("asha@example.com", "Secret123")).is_ok());
        assert!(auth.login(&login_req("+919876543210", "Secret123")).is_ok());
        assert!(matches!(
            auth.login(&login_req("asha@example.com", "wrong")),
            Err(AppError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login(&login_req("nobody@example.com", "Secret123")),
            Err(AppError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_locked_account_and_expiry() {
        let (conn, settings) = fixture();
        let auth = AuthService::new(&conn, &settings, &OutboxNotifier);
        let tokens = auth.signup(&signup_req("asha@example.com")).unwrap();
        let user_id = tokens.user.unwrap().id;

        let now = Utc::now();
        lock_account(&conn, &user_id, now + Duration::minutes(30), "test").unwrap();

        let locked = auth.login_at(&login_req("asha@example.com", "Secret123"), now);
        assert!(matches!(locked, Err(AppError::AccountLocked { .. })));

        let later = auth.login_at(&login_req("asha@example.com", "Secret123"), now + Duration::hours(1));
        assert!(later.is_ok());
        assert!(db::find_user_by_id(&conn, &user_id).unwrap().unwrap().locked_until.is_none());

        assert!(lock_account(&conn, "not-a-user", now, "test").unwrap().is_none());
    }

    #[test]
    fn test_refresh_keeps_refresh_token() {
        let (conn, settings) = fixture();
        let auth = AuthService::new(&conn, &settings, &OutboxNotifier);
        let tokens = auth.signup(&signup_req("asha@example.com")).unwrap();

        let refreshed = auth.refresh(&tokens.refresh_token).unwrap();
        assert_eq!(refreshed.refresh_token, tokens.refresh_token);
        assert_ne!(refreshed.access_token, tokens.access_token);
        assert!(auth.authenticate(&refreshed.access_token).is_ok());

        // An access token is not a refresh token
        assert!(matches!(auth.refresh(&tokens.access_token), Err(AppError::Unauthorized(_))));
        // Refresh token does not authenticate requests
        assert!(auth.authenticate(&tokens.refresh_token).is_err());
    }

    #[test]
    fn test_expired_and_revoked_tokens_rejected() {
        let (conn, settings) = fixture();
        let auth = AuthService::new(&conn, &settings, &OutboxNotifier);
        let tokens = auth.signup(&signup_req("asha@example.com")).unwrap();

        let later = Utc::now() + Duration::hours(2);
        assert!(auth.authenticate_at(&tokens.access_token, later).is_err());
        assert!(auth.refresh_at(&tokens.refresh_token, later).is_ok());
        assert!(auth.refresh_at(&tokens.refresh_token, Utc::now() + Duration::days(8)).is_err());

        auth.logout(&tokens.access_token, Some(&tokens.refresh_token)).unwrap();
        assert!(auth.authenticate(&tokens.access_token).is_err());
        assert!(auth.refresh(&tokens.refresh_token).is_err());
    }

    #[test]
    fn test_verify_email_is_single_use() {
        let (conn, settings) = fixture();
        let auth = AuthService::new(&conn, &settings, &OutboxNotifier);
        let tokens = auth.signup(&signup_req("asha@example.com")).unwrap();
        let user_id = tokens.user.unwrap().id;

        // Fetch the raw token back out of the queued email link
        let body = &list_outbox(&conn, 1).unwrap()[0].html_body;
        let start = body.find("token=").unwrap() + "token=".len();
        let token: String = body[start..].chars().take_while(|c| c.is_ascii_hexdigit()).collect();

        auth.verify_email(&token).unwrap();
        assert!(auth.me(&user_id).unwrap().is_email_verified);
        assert!(matches!(
            auth.verify_email(&token),
            Err(AppError::InvalidVerificationToken(_))
        ));
    }

    #[test]
    fn test_password_reset_flow_revokes_sessions() {
        let (conn, settings) = fixture();
        let auth = AuthService::new(&conn, &settings, &OutboxNotifier);
        let tokens = auth.signup(&signup_req("asha@example.com")).unwrap();

        auth.forgot_password("nobody@example.com").unwrap();
        auth.forgot_password("asha@example.com").unwrap();

        let reset_mail = list_outbox(&conn, 1).unwrap().remove(0);
        assert_eq!(reset_mail.kind, "password_reset");
        let start = reset_mail.html_body.find("token=").unwrap() + "token=".len();
        let token: String = reset_mail.html_body[start..]
            .chars()
            .take_while(|c| c.is_ascii_hexdigit())
            .collect();

        assert!(matches!(auth.reset_password(&token, "short"), Err(AppError::Validation(_))));
        auth.reset_password(&token, "NewSecret99").unwrap();

        assert!(auth.authenticate(&tokens.access_token).is_err());
        assert!(auth.login(&login_req("asha@example.com", "NewSecret99")).is_ok());
        assert!(auth.login(&login_req("asha@example.com", "Secret123")).is_err());
        assert!(auth.reset_password(&token, "Another123").is_err());
    }

    #[test]
    fn test_preferences_update() {
        let (conn, settings) = fixture();
        let auth = AuthService::new(&conn, &settings, &OutboxNotifier);
        let user_id = auth.signup(&signup_req("asha@example.com")).unwrap().user.unwrap().id;

        let profile = auth
            .update_preferences(
                &user_id,
                &PreferencesUpdate {
                    theme: Some("Dark".into()),
                    email_alerts: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(profile.theme, "dark");
        assert!(!profile.email_alerts);
        assert!(profile.notifications_enabled);

        let bad = auth.update_preferences(
            &user_id,
            &PreferencesUpdate {
                theme: Some("neon".into()),
                ..Default::default()
            },
        );
        assert!(matches!(bad, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_external_login_creates_then_reuses_user() {
        let (conn, settings) = fixture();
        let auth = AuthService::new(&conn, &settings, &OutboxNotifier);
        let identity = ExternalIdentity {
            email: "g.user@example.com".into(),
            name: None,
            email_verified: true,
        };

        let first = auth.login_with_external(&identity).unwrap();
        let profile = first.user.unwrap();
        assert_eq!(profile.name, "g.user");
        assert!(profile.is_email_verified);

        let second = auth.login_with_external(&identity).unwrap();
        assert_eq!(second.user.unwrap().id, profile.id);
    }
}
