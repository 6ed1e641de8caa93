// 🎯 Risk Scoring - Weights as Data
// Logistic model over the feature vector, risk levels and decisions.
// Weights ship built in and can be replaced with a JSON file.

use anyhow::{bail, Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::config::Settings;
use crate::entities::{RiskLevel, TransactionStatus};
use crate::features::{FeatureVector, FEATURE_NAMES};

/// Anything that turns features into a fraud probability (0.0 - 1.0)
pub trait RiskModel: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> f64;

    fn name(&self) -> &str;
}

// ============================================================================
// WEIGHTED (LOGISTIC) MODEL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedRiskModel {
    #[serde(default = "default_model_name")]
    pub name: String,

    pub bias: f64,

    /// Feature name -> weight. Missing features weigh 0.
    pub weights: BTreeMap<String, f64>,
}

fn default_model_name() -> String {
    "custom".to_string()
}

impl WeightedRiskModel {
    pub fn built_in() -> Self {
        let weights = [
            ("amount_zscore", 0.6),
            ("amount_ratio_to_avg", 0.05),
            ("is_unusual_amount", 1.5),
            ("hour_of_day", 0.0),
            ("day_of_week", 0.0),
            ("is_night_transaction", 0.6),
            ("location_distance_km", 0.0005),
            ("is_unusual_location", 1.2),
            ("transactions_today", 0.05),
            ("is_velocity_attack", 1.5),
            ("is_new_device", 1.0),
            ("is_high_risk_merchant_category", 1.6),
            ("merchant_seen_before", -0.5),
            ("has_vacation_pattern", 0.0),
            ("is_weekend", 0.1),
        ];

        WeightedRiskModel {
            name: "built-in".to_string(),
            bias: -4.0,
            weights: weights.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    /// Load weights from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read model file: {:?}", path.as_ref()))?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let model: WeightedRiskModel = serde_json::from_str(json).context("Failed to parse model JSON")?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        if !self.bias.is_finite() {
            bail!("Model bias must be a finite number");
        }
        for (name, weight) in &self.weights {
            if !FEATURE_NAMES.contains(&name.as_str()) {
                bail!("Unknown feature in model weights: {}", name);
            }
            if !weight.is_finite() {
                bail!("Weight for {} must be a finite number", name);
            }
        }
        Ok(())
    }

    /// Weights file if one is configured, built-in weights otherwise
    pub fn load_or_built_in(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::built_in()),
        }
    }

    pub fn weight(&self, feature: &str) -> f64 {
        self.weights.get(feature).copied().unwrap_or(0.0)
    }
}

impl Default for WeightedRiskModel {
    fn default() -> Self {
        Self::built_in()
    }
}

impl RiskModel for WeightedRiskModel {
    fn predict(&self, features: &FeatureVector) -> f64 {
        let logit = FEATURE_NAMES
            .iter()
            .zip(features.as_array())
            .fold(self.bias, |acc, (name, value)| acc + self.weight(name) * value);
        sigmoid(logit)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Model probability plus the hard override for extreme amounts in risky categories
pub fn fraud_probability(model: &dyn RiskModel, features: &FeatureVector) -> f64 {
    let p = model.predict(features).clamp(0.0, 1.0);
    if features.amount_zscore > 3.0 && features.is_high_risk_category() {
        p.max(0.95)
    } else {
        p
    }
}

// ============================================================================
// THRESHOLDS & DECISIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "APPROVED")]
    Approve,
    #[serde(rename = "HOLD")]
    Hold,
    #[serde(rename = "BLOCKED")]
    Block,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "APPROVED",
            Decision::Hold => "HOLD",
            Decision::Block => "BLOCKED",
        }
    }

    pub fn status(&self) -> TransactionStatus {
        match self {
            Decision::Approve => TransactionStatus::Approved,
            Decision::Hold => TransactionStatus::Hold,
            Decision::Block => TransactionStatus::Blocked,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Decision::Block => "CRITICAL fraud risk detected",
            Decision::Hold => "Unusual transaction - verification needed",
            Decision::Approve => "Transaction appears legitimate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            high: 0.80,
            medium: 0.50,
            low: 0.20,
        }
    }
}

impl From<&Settings> for Thresholds {
    fn from(settings: &Settings) -> Self {
        Thresholds {
            high: settings.high_risk_threshold,
            medium: settings.medium_risk_threshold,
            low: settings.low_risk_threshold,
        }
    }
}

impl Thresholds {
    pub fn categorize(&self, p: f64) -> RiskLevel {
        if p >= self.high {
            RiskLevel::Critical
        } else if p >= self.medium {
            RiskLevel::Medium
        } else if p >= self.low {
            RiskLevel::Low
        } else {
            RiskLevel::Minimal
        }
    }

    pub fn decide(&self, p: f64) -> Decision {
        if p >= self.high {
            Decision::Block
        } else if p >= self.medium {
            Decision::Hold
        } else {
            Decision::Approve
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::TransactionRequest;
    use crate::features::FeatureEngineer;
    use chrono::{TimeZone, Utc};

    fn features_for(amount: f64, category: &str) -> FeatureVector {
        let req = TransactionRequest {
            user_id: "u1".into(),
            amount,
            merchant: "Shop".into(),
            merchant_category: category.into(),
            device_type: "web".into(),
            device_ip: String::new(),
            device_id: None,
            user_location: None,
            email: None,
        };
        let noon = Utc.with_ymd_and_hms(2024, 3, 13, 12, 0, 0).unwrap();
        FeatureEngineer::new(&[], &[]).create_features(&req, noon)
    }

    struct Constant(f64);

    impl RiskModel for Constant {
        fn predict(&self, _: &FeatureVector) -> f64 {
            self.0
        }

        fn name(&self) -> &str {
            "constant"
        }
    }

    #[test]
    fn test_built_in_model_separates_cases() {
        let model = WeightedRiskModel::built_in();
        let ordinary = model.predict(&features_for(2000.0, "FOOD"));
        let extreme = model.predict(&features_for(75000.0, "CRYPTO"));

        assert!(ordinary < 0.2, "ordinary purchase scored {}", ordinary);
        assert!(extreme > 0.8, "extreme purchase scored {}", extreme);
    }

    #[test]
    fn test_override_for_risky_category() {
        let features = features_for(75000.0, "GAMBLING");
        assert!(fraud_probability(&Constant(0.1), &features) >= 0.95);

        let safe_category = features_for(75000.0, "TRAVEL");
        assert!((fraud_probability(&Constant(0.1), &safe_category) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_thresholds() {
        let t = Thresholds::default();
        assert_eq!(t.decide(0.80), Decision::Block);
        assert_eq!(t.decide(0.79), Decision::Hold);
        assert_eq!(t.decide(0.50), Decision::Hold);
        assert_eq!(t.decide(0.49), Decision::Approve);

        assert_eq!(t.categorize(0.95), RiskLevel::Critical);
        assert_eq!(t.categorize(0.6), RiskLevel::Medium);
        assert_eq!(t.categorize(0.2), RiskLevel::Low);
        assert_eq!(t.categorize(0.19), RiskLevel::Minimal);
    }

    #[test]
    fn test_load_model_from_json() {
        let model = WeightedRiskModel::from_json(
            r#"{"name": "strict", "bias": 0.0, "weights": {"is_high_risk_merchant_category": 5.0}}"#,
        )
        .unwrap();
        assert_eq!(model.name(), "strict");
        assert!(model.predict(&features_for(100.0, "CRYPTO")) > 0.99);
        assert!((model.predict(&features_for(100.0, "FOOD")) - 0.5).abs() < 1e-9);

        assert!(WeightedRiskModel::from_json(r#"{"bias": 0.0, "weights": {"shoe_size": 1.0}}"#).is_err());
    }

    #[test]
    fn test_load_model_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&WeightedRiskModel::built_in()).unwrap();
        std::fs::write(file.path(), json).unwrap();

        let loaded = WeightedRiskModel::from_file(file.path()).unwrap();
        assert_eq!(loaded, WeightedRiskModel::built_in());
    }

    #[test]
    fn test_decision_serializes_as_status() {
        assert_eq!(serde_json::to_string(&Decision::Block).unwrap(), "\"BLOCKED\"");
        assert_eq!(Decision::Hold.status(), TransactionStatus::Hold);
    }
}
