// 👤 User Entity - account record, public profile and signup validation
//
// The password hash never leaves this crate's storage layer:
// handlers only ever see UserProfile.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

static EMAIL_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$").ok()
});

static PHONE_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^\+?[\d\s-]{10,15}$").ok());

fn pattern_matches(re: &Lazy<Option<Regex>>, text: &str) -> bool {
    re.as_ref().map(|re| re.is_match(text)).unwrap_or(false)
}

// ============================================================================
// USER RECORD
// ============================================================================

#[derive(Debug, Clone)]
pub struct User {
    /// Stable identity (UUID)
    pub id: String,
    /// Always stored lower-case
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub phone: Option<String>,

    // Account status
    pub is_email_verified: bool,
    pub locked_until: Option<DateTime<Utc>>,

    // Preferences
    pub theme: String,
    pub notifications_enabled: bool,
    pub email_alerts: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(email: &str, password_hash: String, name: &str, phone: Option<String>) -> Self {
        let now = Utc::now();
        User {
            id: uuid::Uuid::new_v4().to_string(),
            email: normalize_email(email),
            password_hash,
            name: name.trim().to_string(),
            phone,
            is_email_verified: false,
            locked_until: None,
            theme: "light".to_string(),
            notifications_enabled: true,
            email_alerts: true,
            created_at: now,
            updated_at: now,
            last_login: None,
        }
    }

    /// Locked right now? Expired locks count as unlocked.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            phone: self.phone.clone(),
            is_email_verified: self.is_email_verified,
            theme: self.theme.clone(),
            notifications_enabled: self.notifications_enabled,
            email_alerts: self.email_alerts,
            created_at: self.created_at,
            last_login: self.last_login,
        }
    }
}

/// Public view of a user (what `/auth/me` returns)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub is_email_verified: bool,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    #[serde(default = "default_true")]
    pub email_alerts: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

fn default_theme() -> String {
    "light".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl SignupRequest {
    pub fn validate(&self) -> AppResult<()> {
        validate_email(&self.email)?;
        validate_password_strength(&self.password)?;

        let name_len = self.name.trim().chars().count();
        if !(2..=50).contains(&name_len) {
            return Err(AppError::validation("Name must be 2-50 characters"));
        }

        if let Some(phone) = self.phone.as_deref().filter(|p| !p.is_empty()) {
            if !pattern_matches(&PHONE_RE, phone) {
                return Err(AppError::validation("Phone number must be valid"));
            }
        }

        Ok(())
    }
}

/// Login accepts either an email or a phone number as identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "email")]
    pub identifier: String,
    pub password: String,
}

/// Partial update of user preferences
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferencesUpdate {
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub notifications_enabled: Option<bool>,
    #[serde(default)]
    pub email_alerts: Option<bool>,
}

// ============================================================================
// VALIDATION HELPERS
// ============================================================================

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> AppResult<()> {
    if pattern_matches(&EMAIL_RE, email.trim()) {
        Ok(())
    } else {
        Err(AppError::validation("A valid email address is required"))
    }
}

/// Signup rule: 8+ characters with an uppercase letter and a digit
pub fn validate_password_strength(password: &str) -> AppResult<()> {
    validate_password_length(password)?;
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err(AppError::validation("Password must contain uppercase letter"));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AppError::validation("Password must contain digit"));
    }
    Ok(())
}

/// Reset rule: length only
pub fn validate_password_length(password: &str) -> AppResult<()> {
    if password.chars().count() < 8 {
        return Err(AppError::validation("Password must be at least 8 characters"));
    }
    Ok(())
}

pub fn looks_like_phone(identifier: &str) -> bool {
    pattern_matches(&PHONE_RE, identifier.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup(email: &str, password: &str, name: &str, phone: Option<&str>) -> SignupRequest {
        SignupRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: name.to_string(),
            phone: phone.map(str::to_string),
        }
    }

    #[test]
    fn test_valid_signup() {
        assert!(signup("asha@example.com", "Secret123", "Asha", Some("+91 98765 43210"))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_password_rules() {
        let short = signup("a@example.com", "Ab1", "Asha", None).validate();
        assert!(matches!(short, Err(AppError::Validation(m)) if m.contains("8 characters")));

        let no_upper = signup("a@example.com", "secret123", "Asha", None).validate();
        assert!(matches!(no_upper, Err(AppError::Validation(m)) if m.contains("uppercase")));

        let no_digit = signup("a@example.com", "SecretPass", "Asha", None).validate();
        assert!(matches!(no_digit, Err(AppError::Validation(m)) if m.contains("digit")));
    }

    #[test]
    fn test_name_and_email_rules() {
        assert!(signup("a@example.com", "Secret123", "A", None).validate().is_err());
        assert!(signup("not-an-email", "Secret123", "Asha", None).validate().is_err());
        assert!(signup("a@example.com", "Secret123", "Asha", Some("12")).validate().is_err());
    }

    #[test]
    fn test_lock_expiry() {
        let mut user = User::new("X@Example.com", "h".into(), "Xavier", None);
        assert_eq!(user.email, "x@example.com");

        let now = Utc::now();
        assert!(!user.is_locked_at(now));

        user.locked_until = Some(now + chrono::Duration::minutes(5));
        assert!(user.is_locked_at(now));
        assert!(!user.is_locked_at(now + chrono::Duration::minutes(10)));
    }

    #[test]
    fn test_login_request_accepts_email_alias() {
        let req: LoginRequest =
            serde_json::from_str(r#"{"email":"a@example.com","password":"x"}"#).unwrap();
        assert_eq!(req.identifier, "a@example.com");
    }
}
