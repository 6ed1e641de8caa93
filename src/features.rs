// 🧮 Behavioral Features - what the risk model sees
//
// One FeatureVector per scored transaction, computed from the request and
// the user's stored history. `now` is injected so results are reproducible.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{Device, GeoPoint, Transaction, TransactionRequest};

/// Baseline when the user has no usable history
pub const DEFAULT_MEAN_AMOUNT: f64 = 5000.0;
pub const DEFAULT_STD_AMOUNT: f64 = 3000.0;
/// Assumed distance when there is no previous location
pub const DEFAULT_DISTANCE_KM: f64 = 10.0;

pub const UNUSUAL_DISTANCE_KM: f64 = 500.0;
pub const VELOCITY_LIMIT: u32 = 10;
pub const HIGH_RISK_CATEGORIES: [&str; 3] = ["CRYPTO", "MONEY_TRANSFER", "GAMBLING"];

/// Column order shared with model weight files
pub const FEATURE_NAMES: [&str; 15] = [
    "amount_zscore",
    "amount_ratio_to_avg",
    "is_unusual_amount",
    "hour_of_day",
    "day_of_week",
    "is_night_transaction",
    "location_distance_km",
    "is_unusual_location",
    "transactions_today",
    "is_velocity_attack",
    "is_new_device",
    "is_high_risk_merchant_category",
    "merchant_seen_before",
    "has_vacation_pattern",
    "is_weekend",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    // Amount
    pub amount_zscore: f64,
    pub amount_ratio_to_avg: f64,
    pub is_unusual_amount: f64,

    // Time (UTC)
    pub hour_of_day: f64,
    pub day_of_week: f64,
    pub is_night_transaction: f64,

    // Location
    pub location_distance_km: f64,
    pub is_unusual_location: f64,

    // Frequency
    pub transactions_today: f64,
    pub is_velocity_attack: f64,

    // Device & merchant
    pub is_new_device: f64,
    pub is_high_risk_merchant_category: f64,
    pub merchant_seen_before: f64,

    // Context
    pub has_vacation_pattern: f64,
    pub is_weekend: f64,
}

impl FeatureVector {
    /// Values in FEATURE_NAMES order
    pub fn as_array(&self) -> [f64; 15] {
        [
            self.amount_zscore,
            self.amount_ratio_to_avg,
            self.is_unusual_amount,
            self.hour_of_day,
            self.day_of_week,
            self.is_night_transaction,
            self.location_distance_km,
            self.is_unusual_location,
            self.transactions_today,
            self.is_velocity_attack,
            self.is_new_device,
            self.is_high_risk_merchant_category,
            self.merchant_seen_before,
            self.has_vacation_pattern,
            self.is_weekend,
        ]
    }

    pub fn is_high_risk_category(&self) -> bool {
        self.is_high_risk_merchant_category >= 0.5
    }
}

pub fn is_high_risk_category(category: &str) -> bool {
    let upper = category.trim().to_uppercase();
    HIGH_RISK_CATEGORIES.contains(&upper.as_str())
}

fn flag(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

// ============================================================================
// FEATURE ENGINEER
// ============================================================================

/// Borrowed view of what we know about the user
pub struct FeatureEngineer<'a> {
    /// Prior transactions, oldest first
    history: &'a [Transaction],
    devices: &'a [Device],
}

impl<'a> FeatureEngineer<'a> {
    pub fn new(history: &'a [Transaction], devices: &'a [Device]) -> Self {
        Self { history, devices }
    }

    /// Mean and sample standard deviation of past amounts
    pub fn amount_stats(&self) -> (f64, f64) {
        let n = self.history.len();
        if n == 0 {
            return (DEFAULT_MEAN_AMOUNT, DEFAULT_STD_AMOUNT);
        }

        let mean = self.history.iter().map(|t| t.amount).sum::<f64>() / n as f64;
        if n < 2 {
            return (mean, DEFAULT_STD_AMOUNT);
        }

        let variance = self
            .history
            .iter()
            .map(|t| (t.amount - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        let std = variance.sqrt();
        // identical history carries no spread
        if std == 0.0 {
            return (mean, DEFAULT_STD_AMOUNT);
        }
        (mean, std)
    }

    pub fn last_location(&self) -> Option<GeoPoint> {
        self.history.iter().rev().find_map(|t| t.location)
    }

    pub fn create_features(&self, req: &TransactionRequest, now: DateTime<Utc>) -> FeatureVector {
        let (mean, std) = self.amount_stats();
        let amount = req.amount;

        let hour = now.hour();
        let weekday = now.weekday().num_days_from_monday();

        let distance = match (req.user_location, self.last_location()) {
            (Some(here), Some(before)) => here.distance_km(&before),
            _ => DEFAULT_DISTANCE_KM,
        };

        let day_ago = now - Duration::hours(24);
        let transactions_today = self
            .history
            .iter()
            .filter(|t| t.timestamp > day_ago && t.timestamp <= now)
            .count() as u32
            + 1;

        let is_new_device = match req.device_key() {
            Some(key) => !self.devices.is_empty() && !self.devices.iter().any(|d| d.device_key == key),
            None => false,
        };

        let merchant = req.merchant.trim();
        let merchant_seen = self
            .history
            .iter()
            .any(|t| t.merchant.trim().eq_ignore_ascii_case(merchant));

        FeatureVector {
            amount_zscore: (amount - mean) / (std + 1e-8),
            amount_ratio_to_avg: amount / (mean + 1.0),
            is_unusual_amount: flag(amount > mean + 3.0 * std),
            hour_of_day: hour as f64,
            day_of_week: weekday as f64,
            is_night_transaction: flag(hour > 22 || hour < 6),
            location_distance_km: distance,
            is_unusual_location: flag(distance > UNUSUAL_DISTANCE_KM),
            transactions_today: transactions_today as f64,
            is_velocity_attack: flag(transactions_today > VELOCITY_LIMIT),
            is_new_device: flag(is_new_device),
            is_high_risk_merchant_category: flag(is_high_risk_category(&req.merchant_category)),
            merchant_seen_before: flag(merchant_seen),
            has_vacation_pattern: 0.0,
            is_weekend: flag(weekday >= 5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{RiskLevel, TransactionStatus};
    use chrono::TimeZone;

    fn past(amount: f64, merchant: &str, at: DateTime<Utc>, location: Option<GeoPoint>) -> Transaction {
        Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".into(),
            amount,
            merchant: merchant.into(),
            category: "FOOD".into(),
            fraud_score: 0.1,
            risk_score: 10,
            risk_level: RiskLevel::Minimal,
            status: TransactionStatus::Approved,
            reason: String::new(),
            device_type: "mobile".into(),
            device_ip: "10.0.0.1".into(),
            device_id: None,
            location,
            timestamp: at,
            updated_at: at,
        }
    }

    fn request(amount: f64, merchant: &str, category: &str) -> TransactionRequest {
        TransactionRequest {
            user_id: "u1".into(),
            amount,
            merchant: merchant.into(),
            merchant_category: category.into(),
            device_type: "mobile".into(),
            device_ip: "10.0.0.1".into(),
            device_id: None,
            user_location: None,
            email: None,
        }
    }

    // Wednesday afternoon
    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 13, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_defaults_without_history() {
        let features = FeatureEngineer::new(&[], &[]).create_features(&request(5000.0, "Amazon", "ECOMMERCE"), noon());

        assert!(features.amount_zscore.abs() < 1e-9);
        assert!((features.amount_ratio_to_avg - 5000.0 / 5001.0).abs() < 1e-9);
        assert_eq!(features.location_distance_km, DEFAULT_DISTANCE_KM);
        assert_eq!(features.transactions_today, 1.0);
        assert_eq!(features.is_new_device, 0.0);
        assert_eq!(features.merchant_seen_before, 0.0);
        assert_eq!(features.hour_of_day, 14.0);
        assert_eq!(features.day_of_week, 2.0);
        assert_eq!(features.is_weekend, 0.0);
        assert_eq!(features.is_night_transaction, 0.0);
    }

    #[test]
    fn test_large_amount_against_history() {
        let now = noon();
        let history: Vec<_> = [400.0, 500.0, 600.0]
            .iter()
            .map(|a| past(*a, "Swiggy", now - Duration::days(3), None))
            .collect();

        let engineer = FeatureEngineer::new(&history, &[]);
        let (mean, std) = engineer.amount_stats();
        assert!((mean - 500.0).abs() < 1e-9);
        assert!((std - 100.0).abs() < 1e-9);

        let features = engineer.create_features(&request(75000.0, "Unknown_Store", "crypto"), now);
        assert!(features.amount_zscore > 3.0);
        assert_eq!(features.is_unusual_amount, 1.0);
        assert!(features.is_high_risk_category());
        assert_eq!(features.merchant_seen_before, 0.0);

        let repeat = engineer.create_features(&request(450.0, "swiggy", "FOOD"), now);
        assert_eq!(repeat.merchant_seen_before, 1.0);
        assert_eq!(repeat.is_unusual_amount, 0.0);
    }

    #[test]
    fn test_identical_history_uses_default_spread() {
        let now = noon();
        let history: Vec<_> = (0..3)
            .map(|i| past(499.0, "BookMyShow", now - Duration::days(i + 1), None))
            .collect();

        let engineer = FeatureEngineer::new(&history, &[]);
        let (mean, std) = engineer.amount_stats();
        assert!((mean - 499.0).abs() < 1e-9);
        assert_eq!(std, DEFAULT_STD_AMOUNT);

        let features = engineer.create_features(&request(499.5, "BookMyShow", "ENTERTAINMENT"), now);
        assert!(features.amount_zscore.abs() < 0.01);
        assert_eq!(features.is_unusual_amount, 0.0);
    }

    #[test]
    fn test_velocity_counts_last_24_hours() {
        let now = noon();
        let mut history: Vec<_> = (0..10)
            .map(|i| past(100.0, "Uber", now - Duration::minutes(10 * (i + 1)), None))
            .collect();
        history.insert(0, past(100.0, "Uber", now - Duration::days(2), None));

        let features = FeatureEngineer::new(&history, &[]).create_features(&request(100.0, "Uber", "TRAVEL"), now);
        assert_eq!(features.transactions_today, 11.0);
        assert_eq!(features.is_velocity_attack, 1.0);
    }

    #[test]
    fn test_distance_from_last_location() {
        let now = noon();
        let mumbai = GeoPoint { lat: 19.0760, lon: 72.8777 };
        let delhi = GeoPoint { lat: 28.6139, lon: 77.2090 };
        let history = vec![past(300.0, "Zomato", now - Duration::hours(5), Some(mumbai))];

        let mut req = request(300.0, "Zomato", "FOOD");
        req.user_location = Some(delhi);
        let features = FeatureEngineer::new(&history, &[]).create_features(&req, now);
        assert!(features.location_distance_km > 1000.0);
        assert_eq!(features.is_unusual_location, 1.0);
    }

    #[test]
    fn test_new_device_only_with_known_devices() {
        let now = noon();
        let known = vec![Device::new("u1", "phone-1", "mobile", now)];

        let mut req = request(100.0, "Uber", "TRAVEL");
        req.device_id = Some("phone-2".into());
        assert_eq!(FeatureEngineer::new(&[], &known).create_features(&req, now).is_new_device, 1.0);
        assert_eq!(FeatureEngineer::new(&[], &[]).create_features(&req, now).is_new_device, 0.0);

        req.device_id = Some("phone-1".into());
        assert_eq!(FeatureEngineer::new(&[], &known).create_features(&req, now).is_new_device, 0.0);
    }

    #[test]
    fn test_night_and_weekend_flags() {
        // Saturday 23:30
        let late = Utc.with_ymd_and_hms(2024, 3, 16, 23, 30, 0).unwrap();
        let features = FeatureEngineer::new(&[], &[]).create_features(&request(100.0, "Bar", "FOOD"), late);
        assert_eq!(features.is_night_transaction, 1.0);
        assert_eq!(features.is_weekend, 1.0);
        assert_eq!(features.as_array().len(), FEATURE_NAMES.len());
    }
}
