// 💳 Transaction Entity - scored payment record
//
// fraud_score is the model probability (0.0 - 1.0);
// risk_score is the same value on the 0 - 100 scale the dashboard shows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, AppResult};

// ============================================================================
// STATUS & RISK LEVEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Approved,
    Blocked,
    Hold,
    Flagged,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 4] = [
        TransactionStatus::Approved,
        TransactionStatus::Blocked,
        TransactionStatus::Hold,
        TransactionStatus::Flagged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Approved => "APPROVED",
            TransactionStatus::Blocked => "BLOCKED",
            TransactionStatus::Hold => "HOLD",
            TransactionStatus::Flagged => "FLAGGED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = AppError;

    /// Case-insensitive, so `blocked` and `BLOCKED` both parse
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "APPROVED" => Ok(TransactionStatus::Approved),
            "BLOCKED" => Ok(TransactionStatus::Blocked),
            "HOLD" => Ok(TransactionStatus::Hold),
            "FLAGGED" => Ok(TransactionStatus::Flagged),
            other => Err(AppError::validation(format!("Unknown status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Minimal => "MINIMAL",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MINIMAL" => Ok(RiskLevel::Minimal),
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "CRITICAL" => Ok(RiskLevel::Critical),
            other => Err(AppError::validation(format!("Unknown risk level '{}'", other))),
        }
    }
}

/// Manual decision taken by an analyst from the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalystAction {
    Approve,
    Block,
    Hold,
    Flag,
}

impl AnalystAction {
    pub fn target_status(&self) -> TransactionStatus {
        match self {
            AnalystAction::Approve => TransactionStatus::Approved,
            AnalystAction::Block => TransactionStatus::Blocked,
            AnalystAction::Hold => TransactionStatus::Hold,
            AnalystAction::Flag => TransactionStatus::Flagged,
        }
    }

    /// Past-tense verb for user-facing messages ("approved", "blocked")
    pub fn past_tense(&self) -> &'static str {
        match self {
            AnalystAction::Approve => "approved",
            AnalystAction::Block => "blocked",
            AnalystAction::Hold => "held",
            AnalystAction::Flag => "flagged",
        }
    }
}

// ============================================================================
// INBOUND REQUEST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Great-circle distance in kilometres (haversine)
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;

        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.lon - self.lon).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// Transaction submitted for scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub user_id: String,
    pub amount: f64,
    pub merchant: String,
    pub merchant_category: String,
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default)]
    pub device_ip: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub user_location: Option<GeoPoint>,
    #[serde(default)]
    pub email: Option<String>,
}

fn default_device_type() -> String {
    "web".to_string()
}

impl TransactionRequest {
    pub fn validate(&self) -> AppResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(AppError::validation("user_id is required"));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(AppError::validation("Transaction amount must be positive"));
        }
        if self.merchant.trim().is_empty() {
            return Err(AppError::validation("merchant is required"));
        }
        if let Some(loc) = &self.user_location {
            if !(-90.0..=90.0).contains(&loc.lat) || !(-180.0..=180.0).contains(&loc.lon) {
                return Err(AppError::validation("user_location is out of range"));
            }
        }
        Ok(())
    }

    /// Key identifying the device: explicit device id, else the IP
    pub fn device_key(&self) -> Option<String> {
        self.device_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| Some(self.device_ip.as_str()).filter(|ip| !ip.trim().is_empty()))
            .map(str::to_string)
    }
}

// ============================================================================
// STORED RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub amount: f64,
    pub merchant: String,
    pub category: String,

    // Fraud scoring
    pub fraud_score: f64,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub status: TransactionStatus,
    pub reason: String,

    // Device & location
    pub device_type: String,
    pub device_ip: String,
    pub device_id: Option<String>,
    pub location: Option<GeoPoint>,

    /// When the transaction happened
    pub timestamp: DateTime<Utc>,
    /// Last time the status changed
    pub updated_at: DateTime<Utc>,
}

/// Map a 0.0 - 1.0 probability onto the 0 - 100 dashboard scale
pub fn to_risk_score(fraud_score: f64) -> u8 {
    (fraud_score.clamp(0.0, 1.0) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(amount: f64) -> TransactionRequest {
        TransactionRequest {
            user_id: "user_1".to_string(),
            amount,
            merchant: "Amazon".to_string(),
            merchant_category: "ECOMMERCE".to_string(),
            device_type: "web".to_string(),
            device_ip: "192.168.1.1".to_string(),
            device_id: None,
            user_location: Some(GeoPoint { lat: 19.0760, lon: 72.8777 }),
            email: None,
        }
    }

    #[test]
    fn test_amount_must_be_positive() {
        assert!(request(10.0).validate().is_ok());
        assert!(request(0.0).validate().is_err());
        assert!(request(-5.0).validate().is_err());
        assert!(request(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_device_key_prefers_device_id() {
        let mut req = request(10.0);
        assert_eq!(req.device_key().as_deref(), Some("192.168.1.1"));

        req.device_id = Some("dev-42".to_string());
        assert_eq!(req.device_key().as_deref(), Some("dev-42"));

        req.device_id = None;
        req.device_ip = String::new();
        assert_eq!(req.device_key(), None);
    }

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        assert_eq!("blocked".parse::<TransactionStatus>().unwrap(), TransactionStatus::Blocked);
        assert_eq!(" Hold ".parse::<TransactionStatus>().unwrap(), TransactionStatus::Hold);
        assert!("MAYBE".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&TransactionStatus::Flagged).unwrap();
        assert_eq!(json, "\"FLAGGED\"");
    }

    #[test]
    fn test_haversine_mumbai_delhi() {
        let mumbai = GeoPoint { lat: 19.0760, lon: 72.8777 };
        let delhi = GeoPoint { lat: 28.6139, lon: 77.2090 };
        let d = mumbai.distance_km(&delhi);
        assert!((1100.0..1200.0).contains(&d), "distance was {}", d);
        assert!(mumbai.distance_km(&mumbai) < 1e-9);
    }

    #[test]
    fn test_risk_score_scale() {
        assert_eq!(to_risk_score(0.0), 0);
        assert_eq!(to_risk_score(0.954), 95);
        assert_eq!(to_risk_score(1.7), 100);
    }
}
